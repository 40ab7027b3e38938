//! `run` and `list` pipelines: resolve, filter, execute, write artifacts.

use crate::error::{CliError, CliResult};
use crate::output::{ProgressReporter, format_resume};
use std::path::Path;
use std::sync::Arc;
use wpt_diff::report::now_millis;
use wpt_diff::{
    BrowserConfig, CheckpointManager, HostInfo, OutputTarget, PageDriver, ProxySetup, ReportMode,
    ResultsTable, RunOutcome, ShutdownSignal, TestIterator, TestOptions, TestRunner, UrlBarProxySetup,
    WptReport, generate_report, http_client, report_paths, resolve_tests,
};

/// Full URLs of the tests `options` selects, in run order
pub async fn list_tests(options: &TestOptions) -> CliResult<Vec<String>> {
    let resolved = resolve_tests(&http_client(), options).await?;
    let urls = TestIterator::new(&options.wpt_urls.test, resolved.paths, options.max_tests)
        .map(|info| info.map(|info| info.raw_full_url))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(urls)
}

#[cfg(feature = "browser")]
async fn launch(config: BrowserConfig) -> CliResult<(wpt_diff::Browser, Arc<wpt_diff::CdpPageDriver>)> {
    let browser = wpt_diff::Browser::launch(config).await?;
    let page = Arc::new(browser.new_page().await?);
    Ok((browser, page))
}

#[cfg(not(feature = "browser"))]
async fn launch(_config: BrowserConfig) -> CliResult<((), Arc<wpt_diff::MockPage>)> {
    Err(CliError::BrowserUnavailable)
}

/// Execute a run and write the requested artifacts.
///
/// Returns `Err` for setup failures and fatal aborts; a cancelled run still
/// writes what it collected.
pub async fn run_tests(
    options: &TestOptions,
    browser_config: BrowserConfig,
    reporter: Arc<ProgressReporter>,
    shutdown: ShutdownSignal,
) -> CliResult<RunOutcome> {
    let mut time_start = now_millis();
    let resolved = resolve_tests(&http_client(), options).await?;
    if resolved.paths.is_empty() {
        reporter.warning("No tests selected");
    }

    let checkpoint = if options.checkpoint_file.is_some() || options.resume_from.is_some() {
        let mut manager = CheckpointManager::new(options);
        manager.initialize(resolved.paths.len(), time_start)?;
        if options.resume_from.is_some() {
            if let Some(info) = manager.info() {
                reporter.info(&format_resume(&info));
            }
        }
        time_start = manager.time_start().unwrap_or(time_start);
        Some(manager)
    } else {
        None
    };

    let browser_config = browser_config
        .with_under_proxy(options.under_proxy)
        .with_verbose(options.verbose);
    let (browser, page) = launch(browser_config).await?;
    let proxy_setup: Option<Arc<dyn ProxySetup>> = options
        .under_proxy
        .then(|| Arc::new(UrlBarProxySetup::new(&options.wpt_urls.proxy)) as Arc<dyn ProxySetup>);

    let mut runner = TestRunner::new(page.clone(), options, resolved.timeouts.clone(), proxy_setup)?
        .with_progress(reporter.clone())
        .with_shutdown(shutdown);
    if let Some(manager) = checkpoint {
        runner = runner.with_checkpoint(manager);
    }

    let total = resolved.paths.len();
    let tests = TestIterator::new(&options.wpt_urls.test, resolved.paths.clone(), options.max_tests);
    let result = runner.run(tests, total).await;

    if let Err(e) = page.close().await {
        tracing::debug!("Browser close failed: {e}");
    }
    drop(browser);

    let outcome = result?;
    if outcome.cancelled {
        reporter.warning("Run interrupted, writing partial results");
    }
    if outcome.browser_closed {
        reporter.warning("Browser closed unexpectedly, stopping early");
    }
    reporter.summary(&outcome.tally);

    write_artifacts(
        options,
        &outcome.results,
        &resolved.catalog.chrome_report,
        time_start,
        now_millis(),
    )?;
    Ok(outcome)
}

/// Write the failed-test list and both reports as configured
pub fn write_artifacts(
    options: &TestOptions,
    results: &ResultsTable,
    baseline: &WptReport,
    time_start: i64,
    time_end: i64,
) -> CliResult<()> {
    if let Some(target) = options.output_failed.as_ref() {
        let failed = serde_json::to_string_pretty(&results.failed_tests())?;
        match target {
            OutputTarget::Stdout => println!("{failed}"),
            OutputTarget::File(path) => write_file(path, &failed, "failed test list")?,
        }
    }

    if let Some(target) = options.report.as_ref() {
        let host = HostInfo::detect(options.under_proxy);
        let diff = generate_report(results, baseline, time_start, time_end, ReportMode::Diff, &host);
        let proxy = generate_report(results, baseline, time_start, time_end, ReportMode::Proxy, &host);
        let diff = serde_json::to_string_pretty(&diff)?;
        let proxy = serde_json::to_string_pretty(&proxy)?;
        match target {
            OutputTarget::Stdout => {
                println!("{diff}");
                println!("{proxy}");
            }
            OutputTarget::File(path) => {
                let (diff_path, proxy_path) = report_paths(path);
                write_file(&diff_path, &diff, "diff report")?;
                write_file(&proxy_path, &proxy, "proxy report")?;
            }
        }
    }
    Ok(())
}

fn write_file(path: &Path, contents: &str, what: &str) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CliError::artifact(what, e))?;
    }
    std::fs::write(path, contents).map_err(|e| CliError::artifact(what, e))?;
    tracing::info!("Wrote {what} to {}", path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wpt_diff::{SubtestResult, SubtestStatus};

    fn baseline() -> WptReport {
        serde_json::from_value(serde_json::json!({
            "run_info": {"product": "chrome", "browser_version": "130"},
            "time_start": 1,
            "time_end": 2,
            "results": [
                {"test": "/a.html", "status": "OK", "subtests": [{"name": "t", "status": "PASS"}]},
                {"test": "/b.html", "status": "OK", "subtests": [{"name": "t", "status": "PASS"}]}
            ]
        }))
        .unwrap()
    }

    fn results() -> ResultsTable {
        [
            ("/a.html".to_string(), vec![SubtestResult::new("t", SubtestStatus::Pass)]),
            (
                "/b.html".to_string(),
                vec![SubtestResult::new("t", SubtestStatus::Fail).with_message("boom")],
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_writes_failed_list_and_both_reports() {
        let dir = TempDir::new().unwrap();
        let mut options = TestOptions::new();
        options.output_failed = Some(OutputTarget::File(dir.path().join("failed.json")));
        options.report = Some(OutputTarget::File(dir.path().join("out/wpt.json")));

        write_artifacts(&options, &results(), &baseline(), 10, 20).unwrap();

        let failed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("failed.json")).unwrap()).unwrap();
        assert_eq!(failed[0]["testPath"], "/b.html");
        assert_eq!(failed[0]["message"], "boom");

        let diff: WptReport =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/wpt-diff.json")).unwrap()).unwrap();
        assert_eq!(diff.time_start, 10);
        assert_eq!(diff.results[1].subtests[0].status, "FAIL");
        assert!(dir.path().join("out/wpt-proxy.json").exists());
    }

    #[test]
    fn test_nothing_requested_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write_artifacts(&TestOptions::new(), &results(), &baseline(), 0, 0).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
