//! Output formatting and progress reporting

use console::{Style, Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, PoisonError};
use wpt_diff::{AggregateTally, CheckpointInfo, ProgressSink, SubtestResult, SubtestStatus, TestRunInfo, WptDiffError};

/// Renders run progress on stderr.
///
/// Non-verbose runs get a progress bar; verbose runs get one line per test
/// with the failing subtests underneath.
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Mutex<Option<ProgressBar>>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
    /// Per-test lines instead of a bar
    pub verbose: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool, verbose: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: Mutex::new(None),
            use_color,
            quiet,
            verbose,
        }
    }

    fn with_bar<R>(&self, f: impl FnOnce(&ProgressBar) -> R) -> Option<R> {
        self.progress_bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }

    /// Write a line without tearing an active progress bar
    fn line(&self, text: &str) {
        if self.with_bar(|pb| pb.println(text)).is_none() {
            let _ = self.term.write_line(text);
        }
    }

    fn prefixed(&self, symbol: &str, plain: &str, paint: fn(&str) -> String, message: &str) -> String {
        let prefix = if self.use_color {
            paint(symbol)
        } else {
            plain.to_string()
        };
        format!("{prefix} {message}")
    }

    /// Start a progress bar for `total` tests
    pub fn start_progress(&self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        *self
            .progress_bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        self.with_bar(|pb| pb.inc(delta));
    }

    /// Update progress message
    pub fn set_message(&self, message: &str) {
        self.with_bar(|pb| pb.set_message(message.to_string()));
    }

    /// Remove the progress bar
    pub fn finish(&self) {
        if let Some(pb) = self
            .progress_bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(&self.prefixed("✓", "PASS", |s| style(s).green().bold().to_string(), message));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        self.line(&self.prefixed("✗", "FAIL", |s| style(s).red().bold().to_string(), message));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(&self.prefixed("⚠", "WARN", |s| style(s).yellow().bold().to_string(), message));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(&self.prefixed("ℹ", "INFO", |s| style(s).blue().bold().to_string(), message));
    }

    /// Print the final tally
    pub fn summary(&self, tally: &AggregateTally) {
        if self.quiet && tally.fail == 0 {
            return;
        }
        let _ = self.term.write_line("");
        let _ = self.term.write_line(&format_tally(tally, self.use_color));
    }
}

/// `✓ N passed, ✗ N failed, N other`
#[must_use]
pub fn format_tally(tally: &AggregateTally, use_color: bool) -> String {
    if use_color {
        let passed = Style::new().green().bold();
        let failed = Style::new().red().bold();
        format!(
            "{} {} passed, {} {} failed, {} other",
            passed.apply_to("✓"),
            passed.apply_to(tally.pass),
            failed.apply_to("✗"),
            if tally.fail > 0 {
                failed.apply_to(tally.fail).to_string()
            } else {
                tally.fail.to_string()
            },
            style(tally.other).yellow()
        )
    } else {
        format!(
            "✓ {} passed, ✗ {} failed, {} other",
            tally.pass, tally.fail, tally.other
        )
    }
}

/// `Resuming: 120/400 tests already done (last: /dom/a.html)`
#[must_use]
pub fn format_resume(info: &CheckpointInfo) -> String {
    let mut line = format!(
        "Resuming: {}/{} tests already done",
        info.completed_tests, info.total_tests
    );
    if let Some(last) = info.last_processed_test.as_deref() {
        line.push_str(&format!(" (last: {last})"));
    }
    line
}

/// Detail lines for the subtests of one test that did not pass
#[must_use]
pub fn subtest_details(results: &[SubtestResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| r.status != SubtestStatus::Pass)
        .map(|r| match r.message.as_deref() {
            Some(message) => format!("    {} {}: {message}", r.status.report_name(), r.name),
            None => format!("    {} {}", r.status.report_name(), r.name),
        })
        .collect()
}

impl ProgressSink for ProgressReporter {
    fn run_started(&self, total: usize, under_proxy: bool) {
        let target = if under_proxy { " through the proxy" } else { "" };
        if self.verbose {
            self.info(&format!("Running {total} tests{target}"));
        } else {
            self.start_progress(total as u64, &format!("Running tests{target}"));
        }
    }

    fn test_started(&self, info: &TestRunInfo) {
        self.set_message(&info.test_path);
    }

    fn test_finished(&self, path: &str, results: &[SubtestResult]) {
        self.increment(1);
        if !self.verbose || self.quiet {
            return;
        }
        let details = subtest_details(results);
        if details.is_empty() {
            self.success(&format!("{path} ({} subtests)", results.len()));
        } else {
            self.failure(&format!("{path} ({}/{} not passing)", details.len(), results.len()));
            for detail in details {
                self.line(&detail);
            }
        }
    }

    fn test_timed_out(&self, path: &str) {
        self.increment(1);
        if self.verbose {
            self.warning(&format!("{path} timed out"));
        }
    }

    fn test_errored(&self, path: &str, error: &WptDiffError) {
        self.increment(1);
        self.failure(&format!("{path}: {error}"));
    }

    fn test_skipped(&self, _path: &str) {
        self.increment(1);
    }

    fn run_finished(&self, _tally: &AggregateTally) {
        self.finish();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod format_tests {
        use super::*;

        #[test]
        fn test_plain_tally() {
            let tally = AggregateTally {
                pass: 10,
                fail: 2,
                other: 1,
            };
            assert_eq!(format_tally(&tally, false), "✓ 10 passed, ✗ 2 failed, 1 other");
        }

        #[test]
        fn test_subtest_details_skip_passes() {
            let results = vec![
                SubtestResult::new("ok", SubtestStatus::Pass),
                SubtestResult::new("bad", SubtestStatus::Fail).with_message("expected 1"),
                SubtestResult::new("slow", SubtestStatus::Timeout),
            ];
            assert_eq!(
                subtest_details(&results),
                vec!["    FAIL bad: expected 1", "    TIMEOUT slow"]
            );
        }

        #[test]
        fn test_resume_line() {
            let mut info = CheckpointInfo {
                completed_tests: 120,
                total_tests: 400,
                last_processed_test: Some("/dom/a.html".to_string()),
            };
            assert_eq!(
                format_resume(&info),
                "Resuming: 120/400 tests already done (last: /dom/a.html)"
            );
            info.last_processed_test = None;
            assert_eq!(format_resume(&info), "Resuming: 120/400 tests already done");
        }
    }

    mod progress_reporter_tests {
        use super::*;

        #[test]
        fn test_new_reporter() {
            let reporter = ProgressReporter::new(true, false, false);
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
        }

        #[test]
        fn test_progress_bar_lifecycle() {
            let reporter = ProgressReporter::new(false, false, false);
            reporter.run_started(2, false);
            assert!(reporter.with_bar(|_| ()).is_some());
            reporter.test_finished("/a.html", &[SubtestResult::new("t", SubtestStatus::Pass)]);
            reporter.test_timed_out("/b.html");
            assert_eq!(reporter.with_bar(ProgressBar::position), Some(2));
            reporter.run_finished(&AggregateTally::default());
            assert!(reporter.with_bar(|_| ()).is_none());
        }

        #[test]
        fn test_quiet_mode_has_no_bar() {
            let reporter = ProgressReporter::new(false, true, false);
            reporter.run_started(10, true);
            assert!(reporter.with_bar(|_| ()).is_none());
            reporter.success("hidden");
            reporter.failure("shown");
        }

        #[test]
        fn test_verbose_mode_prints_lines() {
            let reporter = ProgressReporter::new(false, false, true);
            reporter.run_started(1, false);
            assert!(reporter.with_bar(|_| ()).is_none());
            reporter.test_finished(
                "/a.html",
                &[SubtestResult::new("t", SubtestStatus::Fail).with_message("nope")],
            );
            reporter.summary(&AggregateTally {
                pass: 0,
                fail: 1,
                other: 0,
            });
        }
    }
}
