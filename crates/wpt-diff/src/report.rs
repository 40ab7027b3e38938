//! wptreport generation.
//!
//! Collected results are reconciled against the Chrome baseline under two
//! merge policies:
//!
//! - [`ReportMode::Diff`] prefers what the subject actually did and falls
//!   back to Chrome wherever the subject gave no usable signal.
//! - [`ReportMode::Proxy`] assumes anything the subject could not run would
//!   have passed, which yields the subject's own optimistic pass rate.

use crate::types::{ResultsTable, SubtestResult, SubtestStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level status of a test whose harness completed
pub const STATUS_OK: &str = "OK";
/// Top-level status of a test with at least one failing subtest
pub const STATUS_ERROR: &str = "ERROR";

/// A wptreport document, as published by wpt.fyi and as written by us
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WptReport {
    #[serde(default)]
    pub run_info: Map<String, Value>,
    #[serde(default)]
    pub time_start: i64,
    #[serde(default)]
    pub time_end: i64,
    #[serde(default)]
    pub results: Vec<WptReportTest>,
}

/// One test file in a wptreport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WptReportTest {
    pub test: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub subtests: Vec<WptReportSubtest>,
    #[serde(default)]
    pub known_intermittent: Vec<String>,
    /// Fields we do not interpret (duration, expected, ...) pass through
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One subtest in a wptreport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WptReportSubtest {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub known_intermittent: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Merge policy for reconciling against the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    Diff,
    Proxy,
}

impl ReportMode {
    /// Suffix used for report files
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Proxy => "proxy",
        }
    }
}

/// Local host facts overlaid onto the baseline `run_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub product: String,
    pub os: String,
    pub version: String,
    pub processor: String,
}

impl HostInfo {
    /// Detect the running host.
    ///
    /// `product` is `"proxy"` when the subject was reached through a proxy
    /// and `"chrome"` otherwise.
    #[must_use]
    pub fn detect(under_proxy: bool) -> Self {
        let version = std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            product: if under_proxy { "proxy" } else { "chrome" }.to_string(),
            os: std::env::consts::OS.to_string(),
            version,
            processor: std::env::consts::ARCH.to_string(),
        }
    }

    fn overlay(&self, run_info: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = run_info.clone();
        merged.insert("product".into(), Value::String(self.product.clone()));
        merged.insert("os".into(), Value::String(self.os.clone()));
        merged.insert("version".into(), Value::String(self.version.clone()));
        merged.insert("processor".into(), Value::String(self.processor.clone()));
        merged
    }
}

/// Reconcile collected results against the Chrome baseline
#[must_use]
pub fn generate_report(
    results: &ResultsTable,
    baseline: &WptReport,
    time_start: i64,
    time_end: i64,
    mode: ReportMode,
    host: &HostInfo,
) -> WptReport {
    let mut seen = HashSet::new();
    let mut tests = Vec::with_capacity(baseline.results.len());

    for chrome in &baseline.results {
        seen.insert(chrome.test.as_str());
        let merged = match (mode, results.get(&chrome.test)) {
            (ReportMode::Diff, Some(ours)) if !is_inconclusive(ours) => {
                report_test(&chrome.test, ours)
            }
            (ReportMode::Diff, _) => chrome.clone(),
            (ReportMode::Proxy, Some(ours)) => report_test(&chrome.test, &remap_inconclusive(ours)),
            (ReportMode::Proxy, None) => all_pass(chrome),
        };
        tests.push(merged);
    }

    for (path, ours) in results.iter() {
        if seen.contains(path) {
            continue;
        }
        let test = match mode {
            ReportMode::Diff => report_test(path, ours),
            ReportMode::Proxy => report_test(path, &remap_inconclusive(ours)),
        };
        tests.push(test);
    }

    WptReport {
        run_info: host.overlay(&baseline.run_info),
        time_start,
        time_end,
        results: tests,
    }
}

/// No subtests, or nothing but TIMEOUT/NOTRUN
fn is_inconclusive(results: &[SubtestResult]) -> bool {
    results.iter().all(|r| r.status.is_inconclusive())
}

fn remap_inconclusive(results: &[SubtestResult]) -> Vec<SubtestResult> {
    results
        .iter()
        .map(|r| {
            if r.status.is_inconclusive() {
                SubtestResult {
                    status: SubtestStatus::Pass,
                    message: None,
                    ..r.clone()
                }
            } else {
                r.clone()
            }
        })
        .collect()
}

fn report_test(path: &str, results: &[SubtestResult]) -> WptReportTest {
    let any_fail = results.iter().any(|r| r.status == SubtestStatus::Fail);
    WptReportTest {
        test: path.to_string(),
        status: if any_fail { STATUS_ERROR } else { STATUS_OK }.to_string(),
        message: None,
        subtests: results
            .iter()
            .map(|r| WptReportSubtest {
                name: r.name.clone(),
                status: r.status.report_name().to_string(),
                message: r.message.clone(),
                known_intermittent: Vec::new(),
                extra: Map::new(),
            })
            .collect(),
        known_intermittent: Vec::new(),
        extra: Map::new(),
    }
}

fn all_pass(chrome: &WptReportTest) -> WptReportTest {
    WptReportTest {
        status: STATUS_OK.to_string(),
        message: None,
        subtests: chrome
            .subtests
            .iter()
            .map(|s| WptReportSubtest {
                status: SubtestStatus::Pass.report_name().to_string(),
                message: None,
                ..s.clone()
            })
            .collect(),
        ..chrome.clone()
    }
}

/// Milliseconds since the Unix epoch, the unit of `time_start`/`time_end`
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// File paths for both report modes derived from a user-supplied path.
///
/// `out/wpt.json` becomes `out/wpt-diff.json` and `out/wpt-proxy.json`.
#[must_use]
pub fn report_paths(path: &Path) -> (PathBuf, PathBuf) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wpt-report".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    let with_suffix = |mode: ReportMode| path.with_file_name(format!("{stem}-{}.{ext}", mode.suffix()));
    (with_suffix(ReportMode::Diff), with_suffix(ReportMode::Proxy))
}
