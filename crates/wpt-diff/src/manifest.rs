//! Per-test timeout directives from the WPT update manifest.

use crate::catalog::fetch_json;
use crate::result::{WptDiffError, WptDiffResult};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Timeout for a test without a `timeout` flag
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Timeout for a test flagged `timeout: "long"`
pub const LONG_TIMEOUT_SECS: u64 = 60;
/// Grace added on top of the manifest timeout before we give up on a test
pub const TIMEOUT_GRACE_SECS: u64 = 5;

/// Normalized test path to timeout in seconds.
///
/// Only `testharness` tests appear here, so membership doubles as the
/// runnability check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutMap {
    timeouts: HashMap<String, u64>,
}

impl TimeoutMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a parsed update manifest.
    ///
    /// Errors only when `items.testharness` is missing; malformed entries
    /// inside it are skipped.
    pub fn from_manifest(manifest: &Value) -> WptDiffResult<Self> {
        let testharness = manifest
            .get("items")
            .and_then(|items| items.get("testharness"))
            .and_then(Value::as_object)
            .ok_or_else(|| WptDiffError::Schema {
                message: "update manifest has no items.testharness object".to_string(),
            })?;

        let mut map = Self::new();
        for (source, items) in testharness {
            let Some(items) = items.as_array() else {
                continue;
            };
            for item in items.iter().filter_map(Value::as_array) {
                let url = item
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or(source.as_str());
                let long = item
                    .last()
                    .and_then(|extras| extras.get("timeout"))
                    .and_then(Value::as_str)
                    == Some("long");
                let secs = if long {
                    LONG_TIMEOUT_SECS
                } else {
                    DEFAULT_TIMEOUT_SECS
                };
                map.insert(url, secs);
            }
        }
        Ok(map)
    }

    /// Insert a timeout for a path, normalizing the leading slash
    pub fn insert(&mut self, path: &str, secs: u64) {
        self.timeouts.insert(normalize(path), secs);
    }

    /// Manifest timeout for a path, falling back to the path without its
    /// query or fragment so that variants find their base entry
    #[must_use]
    pub fn get(&self, path: &str) -> Option<u64> {
        let path = normalize(path);
        self.timeouts.get(&path).copied().or_else(|| {
            let base = path.split(['?', '#']).next().unwrap_or(&path);
            self.timeouts.get(base).copied()
        })
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// How long to wait for a test before declaring it timed out
    #[must_use]
    pub fn effective_timeout(&self, path: &str) -> Duration {
        let secs = self.get(path).unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs + TIMEOUT_GRACE_SECS)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }
}

impl FromIterator<(String, u64)> for TimeoutMap {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (path, secs) in iter {
            map.insert(&path, secs);
        }
        map
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Ask the test server to regenerate and return its manifest
pub async fn fetch_update_manifest(
    client: &reqwest::Client,
    test_base: &str,
) -> WptDiffResult<TimeoutMap> {
    let url = format!(
        "{}/tools/runner/update_manifest.py",
        test_base.trim_end_matches('/')
    );
    let manifest = fetch_json(client.post(&url), &url, "the WPT update manifest").await?;
    let map = TimeoutMap::from_manifest(&manifest)?;
    tracing::debug!(tests = map.len(), "loaded update manifest");
    Ok(map)
}
