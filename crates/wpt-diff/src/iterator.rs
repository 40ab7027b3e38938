//! Lazy, single-pass sequence of tests to execute.

use crate::config::MaxTests;
use crate::result::{WptDiffError, WptDiffResult};
use reqwest::Url;

/// One test ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunInfo {
    /// Position in the filtered path list, skipped entries included
    pub index: usize,
    pub test_path: String,
    /// Test base URL and path concatenated, before parsing
    pub raw_full_url: String,
    pub full_url: Url,
    /// Tests yielded before this one
    pub tests_processed: usize,
}

/// Pairs each test path with its absolute URL.
///
/// Paths under `/wasm/` are skipped without counting against the budget, so
/// `max_tests` bounds executed tests rather than scanned entries. A URL that
/// fails to parse is yielded once as an error and ends the sequence.
#[derive(Debug)]
pub struct TestIterator {
    test_base: String,
    paths: std::vec::IntoIter<String>,
    index: usize,
    tests_processed: usize,
    limit: Option<usize>,
    failed: bool,
}

impl TestIterator {
    #[must_use]
    pub fn new(test_base: impl Into<String>, paths: Vec<String>, max_tests: MaxTests) -> Self {
        Self {
            test_base: test_base.into().trim_end_matches('/').to_string(),
            paths: paths.into_iter(),
            index: 0,
            tests_processed: 0,
            limit: max_tests.limit(),
            failed: false,
        }
    }
}

impl Iterator for TestIterator {
    type Item = WptDiffResult<TestRunInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if matches!(self.limit, Some(limit) if self.tests_processed >= limit) {
            return None;
        }

        loop {
            let test_path = self.paths.next()?;
            let index = self.index;
            self.index += 1;

            let raw_full_url = format!("{}{test_path}", self.test_base);
            let full_url = match Url::parse(&raw_full_url) {
                Ok(url) => url,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(WptDiffError::InvalidUrl {
                        url: raw_full_url,
                        message: e.to_string(),
                    }));
                }
            };

            if full_url.path().starts_with("/wasm/") {
                tracing::debug!(path = %test_path, "skipping wasm test");
                continue;
            }

            let info = TestRunInfo {
                index,
                test_path,
                raw_full_url,
                full_url,
                tests_processed: self.tests_processed,
            };
            self.tests_processed += 1;
            return Some(Ok(info));
        }
    }
}

impl std::iter::FusedIterator for TestIterator {}
