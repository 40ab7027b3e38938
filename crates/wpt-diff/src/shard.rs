//! Test sharding for distributed execution.
//!
//! Each path is assigned to a shard by content hash, so the same path lands
//! in the same shard for a given shard count regardless of list order. CI
//! can run shards as independent processes without coordination.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shard configuration for distributed test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Current shard index (1-based)
    pub current: u32,
    /// Total number of shards
    pub total: u32,
}

impl ShardConfig {
    /// Create a shard configuration, validating `1 <= current <= total`
    pub fn new(current: u32, total: u32) -> Result<Self, ShardError> {
        if total == 0 {
            return Err(ShardError::ZeroTotal);
        }
        if current == 0 {
            return Err(ShardError::ZeroCurrent);
        }
        if current > total {
            return Err(ShardError::CurrentExceedsTotal { current, total });
        }
        Ok(Self { current, total })
    }

    /// Shard (1-based) a path belongs to out of `total`
    #[must_use]
    pub fn shard_of(path: &str, total: u32) -> u32 {
        (Self::hash_path(path) % total.max(1)) + 1
    }

    /// Check if a test path should run on this shard
    #[must_use]
    pub fn should_run(&self, path: &str) -> bool {
        Self::shard_of(path, self.total) == self.current
    }

    /// First four bytes of the path's SHA-256, big-endian
    fn hash_path(path: &str) -> u32 {
        let digest = Sha256::digest(path.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Filter a list of tests to only those that should run on this shard
    #[must_use]
    pub fn filter_tests<S: AsRef<str> + Clone>(&self, tests: &[S]) -> Vec<S> {
        tests
            .iter()
            .filter(|path| self.should_run(path.as_ref()))
            .cloned()
            .collect()
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            current: 1,
            total: 1,
        }
    }
}

impl std::fmt::Display for ShardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

/// Out-of-range shard numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Total shards cannot be zero
    ZeroTotal,
    /// Current shard cannot be zero (1-based)
    ZeroCurrent,
    /// Current shard exceeds total
    CurrentExceedsTotal {
        /// Current shard number
        current: u32,
        /// Total shard count
        total: u32,
    },
}

impl std::fmt::Display for ShardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroTotal => write!(f, "Total shards cannot be zero"),
            Self::ZeroCurrent => write!(f, "Current shard must be 1-based (cannot be 0)"),
            Self::CurrentExceedsTotal { current, total } => {
                write!(f, "Current shard ({current}) exceeds total ({total})")
            }
        }
    }
}

impl std::error::Error for ShardError {}
