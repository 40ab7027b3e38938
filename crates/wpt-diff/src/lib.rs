//! wpt-diff: differential Web Platform Tests runner
//!
//! Drives Chromium through WPT pages, either directly or through a
//! web-proxy's own address bar, collects per-subtest verdicts from the
//! in-page `testharness.js`, and reconciles them against the latest
//! aligned Chrome run published on wpt.fyi.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ catalog +    │   │ filter +     │   │ TestRunner   │   │ report       │
//! │ manifest     │──►│ shard +      │──►│ (driver,     │──►│ diff / proxy │
//! │ (wpt.fyi)    │   │ iterator     │   │  collector)  │   │ wptreport    │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Browser control sits behind [`PageDriver`]; the chromiumoxide
//! implementation needs the `browser` feature.

// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod browser;
pub mod catalog;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod console;
pub mod driver;
pub mod filter;
pub mod iterator;
pub mod manifest;
pub mod report;
mod result;
pub mod runner;
pub mod shard;
mod types;

pub use browser::BrowserConfig;
#[cfg(feature = "browser")]
pub use browser::{Browser, CdpPageDriver};
pub use catalog::{Catalog, http_client};
pub use checkpoint::{Checkpoint, CheckpointInfo, CheckpointManager};
pub use collector::ResultCollector;
pub use config::{MaxTests, OutputTarget, TestOptions, WptUrls};
pub use console::{ConsoleForwarder, ConsoleLevel};
pub use driver::{MockPage, NavigationDriver, PageDriver, ProxySetup, ScriptId, UrlBarProxySetup};
pub use iterator::{TestIterator, TestRunInfo};
pub use manifest::TimeoutMap;
pub use report::{HostInfo, ReportMode, WptReport, generate_report, report_paths};
pub use result::{WptDiffError, WptDiffResult};
pub use runner::{
    NoopProgress, ProgressSink, ResolvedTests, RunOutcome, ShutdownSignal, TestRunner,
    resolve_tests,
};
pub use shard::{ShardConfig, ShardError};
pub use types::{AggregateTally, FailedTest, ResultsTable, SubtestResult, SubtestStatus};
