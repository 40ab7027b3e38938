//! Run configuration.
//!
//! [`TestOptions`] arrives already validated; file and flag parsing live in
//! the CLI crate.

use crate::result::{WptDiffError, WptDiffResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default WPT server the tests are served from
pub const DEFAULT_TEST_BASE_URL: &str = "https://wpt.live";
/// Default wpt.fyi results API
pub const DEFAULT_API_BASE_URL: &str = "https://wpt.fyi";
/// Default proxy front page
pub const DEFAULT_PROXY_BASE_URL: &str = "http://localhost:1337";
/// Default cap on tests per run
pub const DEFAULT_MAX_TESTS: usize = 30;
/// Completions between periodic checkpoint saves
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// Upstream endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WptUrls {
    /// Where test pages are served
    pub test: String,
    /// wpt.fyi-compatible results API
    pub api: String,
    /// Proxy front page, used only under a proxy
    pub proxy: String,
}

impl Default for WptUrls {
    fn default() -> Self {
        Self {
            test: DEFAULT_TEST_BASE_URL.to_string(),
            api: DEFAULT_API_BASE_URL.to_string(),
            proxy: DEFAULT_PROXY_BASE_URL.to_string(),
        }
    }
}

impl WptUrls {
    /// Check that every endpoint is an absolute URL
    pub fn validate(&self) -> WptDiffResult<()> {
        for url in [&self.test, &self.api, &self.proxy] {
            reqwest::Url::parse(url).map_err(|e| WptDiffError::InvalidUrl {
                url: url.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Test budget: a fixed count or the whole catalog.
///
/// Serialized as a number or the string `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTests {
    Count(usize),
    All,
}

impl MaxTests {
    /// The numeric cap, if any
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Count(n) => Some(n),
            Self::All => None,
        }
    }
}

impl Default for MaxTests {
    fn default() -> Self {
        Self::Count(DEFAULT_MAX_TESTS)
    }
}

impl fmt::Display for MaxTests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::All => f.write_str("all"),
        }
    }
}

impl FromStr for MaxTests {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .map(Self::Count)
            .map_err(|_| format!("expected a number or \"all\", got '{s}'"))
    }
}

impl Serialize for MaxTests {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n as u64),
            Self::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxTests {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(usize),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(Self::Count(n)),
            Raw::Text(s) if s == "all" => Ok(Self::All),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "max_tests must be a number or \"all\", got '{s}'"
            ))),
        }
    }
}

/// Where an artifact goes: a file, or standard output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// Fully validated options for one run
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub wpt_urls: WptUrls,
    pub max_tests: MaxTests,
    pub under_proxy: bool,
    /// Keep only paths starting with this prefix
    pub scope: Option<String>,
    /// Explicit `.html` files or directories to run
    pub test_paths: Vec<String>,
    pub shard: Option<u32>,
    pub total_shards: Option<u32>,
    pub output_failed: Option<OutputTarget>,
    pub report: Option<OutputTarget>,
    pub checkpoint_file: Option<PathBuf>,
    pub resume_from: Option<PathBuf>,
    pub checkpoint_interval: Option<usize>,
    pub debug: bool,
    pub verbose: bool,
    pub silent: bool,
}

impl TestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_wpt_urls(mut self, urls: WptUrls) -> Self {
        self.wpt_urls = urls;
        self
    }

    #[must_use]
    pub const fn with_max_tests(mut self, max_tests: MaxTests) -> Self {
        self.max_tests = max_tests;
        self
    }

    #[must_use]
    pub const fn with_under_proxy(mut self, under_proxy: bool) -> Self {
        self.under_proxy = under_proxy;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_test_paths(mut self, paths: Vec<String>) -> Self {
        self.test_paths = paths;
        self
    }

    #[must_use]
    pub const fn with_shard(mut self, shard: u32, total_shards: u32) -> Self {
        self.shard = Some(shard);
        self.total_shards = Some(total_shards);
        self
    }

    #[must_use]
    pub fn with_checkpoint_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_resume_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.resume_from = Some(path.into());
        self
    }

    #[must_use]
    pub const fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Completions between checkpoint saves
    #[must_use]
    pub fn checkpoint_interval(&self) -> usize {
        self.checkpoint_interval
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
    }
}
