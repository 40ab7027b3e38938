//! Run loop: drives the test iterator through the navigation driver and
//! result collector, one test at a time.

use crate::catalog::{self, Catalog};
use crate::checkpoint::CheckpointManager;
use crate::collector::ResultCollector;
use crate::config::TestOptions;
use crate::driver::{NavigationDriver, PageDriver, ProxySetup};
use crate::filter::filter_tests;
use crate::iterator::TestRunInfo;
use crate::manifest::{self, TimeoutMap};
use crate::result::{WptDiffError, WptDiffResult};
use crate::types::{AggregateTally, ResultsTable, SubtestResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Lifecycle events for progress rendering. All methods default to no-ops.
pub trait ProgressSink: Send + Sync {
    fn run_started(&self, _total: usize, _under_proxy: bool) {}
    fn test_started(&self, _info: &TestRunInfo) {}
    fn test_finished(&self, _path: &str, _results: &[SubtestResult]) {}
    fn test_timed_out(&self, _path: &str) {}
    fn test_errored(&self, _path: &str, _error: &WptDiffError) {}
    fn test_skipped(&self, _path: &str) {}
    fn run_finished(&self, _tally: &AggregateTally) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Cooperative shutdown flag shared between signal handlers and the loop
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown; returns `false` if it was already requested
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so this only ends on a trigger
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// How a single test ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Result of a run that was not aborted
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub results: ResultsTable,
    pub tally: AggregateTally,
    /// Tests navigated to in this process, resumed ones excluded
    pub executed: usize,
    /// Shutdown was requested before the iterator was exhausted
    pub cancelled: bool,
    /// The browser went away and the loop stopped early
    pub browser_closed: bool,
}

/// Resolved catalog plus the final, ordered list of tests to run
#[derive(Debug, Clone)]
pub struct ResolvedTests {
    pub catalog: Catalog,
    pub timeouts: TimeoutMap,
    pub paths: Vec<String>,
}

/// Fetch the Chrome baseline and update manifest, then select tests.
///
/// Any upstream failure aborts before a browser is involved.
pub async fn resolve_tests(
    client: &reqwest::Client,
    options: &TestOptions,
) -> WptDiffResult<ResolvedTests> {
    let catalog = catalog::resolve(client, &options.wpt_urls.api).await?;
    let timeouts = manifest::fetch_update_manifest(client, &options.wpt_urls.test).await?;
    let paths = filter_tests(&catalog.test_paths(), &timeouts, options);
    Ok(ResolvedTests {
        catalog,
        timeouts,
        paths,
    })
}

/// Executes tests sequentially against one page
pub struct TestRunner {
    page: Arc<dyn PageDriver>,
    collector: ResultCollector,
    driver: NavigationDriver,
    timeouts: TimeoutMap,
    test_base: String,
    progress: Arc<dyn ProgressSink>,
    shutdown: ShutdownSignal,
    checkpoint: Option<CheckpointManager>,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("driver", &self.driver)
            .field("test_base", &self.test_base)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

impl TestRunner {
    /// Build a runner for `page`.
    ///
    /// `proxy_setup` is required when `options.under_proxy` is set.
    pub fn new(
        page: Arc<dyn PageDriver>,
        options: &TestOptions,
        timeouts: TimeoutMap,
        proxy_setup: Option<Arc<dyn ProxySetup>>,
    ) -> WptDiffResult<Self> {
        let collector = ResultCollector::new(options.under_proxy);
        let driver = if options.under_proxy {
            let setup = proxy_setup.ok_or_else(|| {
                WptDiffError::proxy_setup("running under a proxy requires a proxy setup routine")
            })?;
            NavigationDriver::proxied(page.clone(), setup, collector.body_addition())
        } else {
            NavigationDriver::direct(page.clone(), collector.body_addition())
        };
        Ok(Self {
            page,
            collector,
            driver,
            timeouts,
            test_base: options.wpt_urls.test.clone(),
            progress: Arc::new(NoopProgress),
            shutdown: ShutdownSignal::new(),
            checkpoint: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Persist progress through `checkpoint`, seeding already completed
    /// tests from it
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CheckpointManager) -> Self {
        self.collector = ResultCollector::with_results(self.collector.under_proxy(), checkpoint.seed_results());
        self.checkpoint = Some(checkpoint);
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.driver = self.driver.with_settle_delay(delay);
        self
    }

    /// Results collected so far
    #[must_use]
    pub fn results(&self) -> ResultsTable {
        self.collector.results()
    }

    /// Run every test the iterator yields.
    ///
    /// Returns `Err` only for fatal conditions: the first executed test
    /// timing out, the proxy never coming up, or an unparseable test URL.
    pub async fn run<I>(&mut self, tests: I, total: usize) -> WptDiffResult<RunOutcome>
    where
        I: IntoIterator<Item = WptDiffResult<TestRunInfo>>,
    {
        let under_proxy = self.driver.under_proxy();
        tracing::info!(
            "Running {total} test{}{}",
            if total == 1 { "" } else { "s" },
            if under_proxy { " under a proxy" } else { "" }
        );
        self.progress.run_started(total, under_proxy);

        self.collector.start(self.page.as_ref()).await?;
        self.driver.prepare(&self.test_base).await?;

        let outcome = self.run_loop(tests).await;
        if let Some(checkpoint) = self.checkpoint.as_ref() {
            if let Err(e) = checkpoint.shutdown() {
                tracing::error!("Failed to save checkpoint: {e}");
            }
        }
        let outcome = outcome?;
        self.progress.run_finished(&outcome.tally);
        Ok(outcome)
    }

    async fn run_loop<I>(&mut self, tests: I) -> WptDiffResult<RunOutcome>
    where
        I: IntoIterator<Item = WptDiffResult<TestRunInfo>>,
    {
        let mut outcome = RunOutcome::default();

        for item in tests {
            if self.shutdown.is_triggered() {
                outcome.cancelled = true;
                break;
            }
            let info = item?;
            if self.collector.contains(&info.test_path) {
                tracing::debug!(path = %info.test_path, "already collected, skipping");
                self.progress.test_skipped(&info.test_path);
                continue;
            }

            tracing::debug!("Running: {}", info.full_url);
            self.progress.test_started(&info);
            let first = outcome.executed == 0;
            outcome.executed += 1;

            match self.run_one(&info).await {
                Ok(TestOutcome::Completed) => {
                    let results = self.collector.results_for(&info.test_path).unwrap_or_default();
                    self.progress.test_finished(&info.test_path, &results);
                    self.record_checkpoint(&info.test_path, &results);
                }
                Ok(TestOutcome::TimedOut) => {
                    tracing::warn!("Test {} timed out waiting for results", info.test_path);
                    self.collector.record_timeout(&info.test_path);
                    self.progress.test_timed_out(&info.test_path);
                    let results = self.collector.results_for(&info.test_path).unwrap_or_default();
                    self.record_checkpoint(&info.test_path, &results);
                    if first {
                        return Err(WptDiffError::FirstTestTimedOut {
                            test_path: info.test_path,
                        });
                    }
                }
                Ok(TestOutcome::Cancelled) => {
                    outcome.cancelled = true;
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!("Error running test {}: {e}", info.test_path);
                    self.progress.test_errored(&info.test_path, &e);
                    if e.is_target_closed() {
                        outcome.browser_closed = true;
                        break;
                    }
                }
            }
        }

        outcome.results = self.collector.results();
        outcome.tally = outcome.results.tally();
        Ok(outcome)
    }

    async fn run_one(&mut self, info: &TestRunInfo) -> WptDiffResult<TestOutcome> {
        let timeout = self.timeouts.effective_timeout(&info.test_path);
        let done = self.collector.set_current_test(info.test_path.clone());
        let outcome = self.race(info, timeout, done).await;
        self.collector.clear_current_test();
        outcome
    }

    /// Navigate, then wait for the completion signal, both within one
    /// `timeout`. A pending proxy bootstrap runs first and is not timed.
    async fn race(
        &mut self,
        info: &TestRunInfo,
        timeout: Duration,
        mut done: oneshot::Receiver<()>,
    ) -> WptDiffResult<TestOutcome> {
        let shutdown = self.shutdown.clone();

        if self.driver.needs_bootstrap() {
            tokio::select! {
                biased;
                () = shutdown.wait() => return Ok(TestOutcome::Cancelled),
                setup = self.driver.bootstrap(info) => setup?,
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        tokio::select! {
            biased;
            () = shutdown.wait() => return Ok(TestOutcome::Cancelled),
            navigated = self.driver.navigate(info) => navigated?,
            () = tokio::time::sleep_until(deadline) => return Ok(TestOutcome::TimedOut),
        }

        tokio::select! {
            biased;
            () = shutdown.wait() => Ok(TestOutcome::Cancelled),
            Ok(()) = &mut done => Ok(TestOutcome::Completed),
            () = tokio::time::sleep_until(deadline) => Ok(TestOutcome::TimedOut),
        }
    }

    fn record_checkpoint(&mut self, path: &str, results: &[SubtestResult]) {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            if let Err(e) = checkpoint.record_completion(path, results) {
                tracing::warn!("Failed to record checkpoint progress: {e}");
            }
        }
    }
}
