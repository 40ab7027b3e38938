//! Core data model: subtest verdicts, the per-run results table and tallies.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subtest verdict as reported by `testharness.js`.
///
/// The harness emits these as raw integers, so the numeric values are part
/// of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum SubtestStatus {
    Pass = 0,
    Fail = 1,
    Timeout = 2,
    NotRun = 3,
    OptionalFeatureUnsupported = 4,
}

impl SubtestStatus {
    /// Name used in wptreport JSON
    #[must_use]
    pub const fn report_name(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Timeout => "TIMEOUT",
            Self::NotRun => "NOTRUN",
            Self::OptionalFeatureUnsupported => "PRECONDITION_FAILED",
        }
    }

    /// TIMEOUT and NOTRUN carry no signal about the subject itself
    #[must_use]
    pub const fn is_inconclusive(self) -> bool {
        matches!(self, Self::Timeout | Self::NotRun)
    }
}

impl TryFrom<u8> for SubtestStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pass),
            1 => Ok(Self::Fail),
            2 => Ok(Self::Timeout),
            3 => Ok(Self::NotRun),
            4 => Ok(Self::OptionalFeatureUnsupported),
            other => Err(format!("unknown subtest status {other}")),
        }
    }
}

impl From<SubtestStatus> for u8 {
    fn from(status: SubtestStatus) -> Self {
        status as Self
    }
}

impl fmt::Display for SubtestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.report_name())
    }
}

/// One assertion group inside a test file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtestResult {
    pub name: String,
    pub status: SubtestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SubtestResult {
    /// Create a subtest result without message or stack
    #[must_use]
    pub fn new(name: impl Into<String>, status: SubtestStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            stack: None,
        }
    }

    /// Attach a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The synthetic verdict written when a test never reports back
    #[must_use]
    pub fn timed_out() -> Self {
        Self::new("Test timed out", SubtestStatus::NotRun).with_message("Test timed out")
    }
}

/// Test path to its subtests, in submission order.
///
/// Entries are written once and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsTable {
    entries: IndexMap<String, Vec<SubtestResult>>,
}

impl ResultsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a path already has results
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Record results for a path unless it already has some.
    ///
    /// Returns `false` when the path was already present; the existing
    /// entry is left untouched.
    pub fn insert_if_absent(&mut self, path: impl Into<String>, results: Vec<SubtestResult>) -> bool {
        match self.entries.entry(path.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(results);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[SubtestResult]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SubtestResult])> {
        self.entries
            .iter()
            .map(|(path, results)| (path.as_str(), results.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold every subtest status into pass/fail/other counts
    #[must_use]
    pub fn tally(&self) -> AggregateTally {
        let mut tally = AggregateTally::default();
        for status in self.entries.values().flatten().map(|r| r.status) {
            tally.record(status);
        }
        tally
    }

    /// Every FAIL subtest, flattened in table order
    #[must_use]
    pub fn failed_tests(&self) -> Vec<FailedTest> {
        self.iter()
            .flat_map(|(path, results)| {
                results
                    .iter()
                    .filter(|r| r.status == SubtestStatus::Fail)
                    .map(move |r| FailedTest {
                        test_path: path.to_string(),
                        test_name: r.name.clone(),
                        status: r.status,
                        message: r.message.clone(),
                        stack: r.stack.clone(),
                    })
            })
            .collect()
    }
}

impl FromIterator<(String, Vec<SubtestResult>)> for ResultsTable {
    fn from_iter<I: IntoIterator<Item = (String, Vec<SubtestResult>)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (path, results) in iter {
            table.insert_if_absent(path, results);
        }
        table
    }
}

/// Pass/fail/other counts over all subtests of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTally {
    pub pass: usize,
    pub fail: usize,
    pub other: usize,
}

impl AggregateTally {
    pub fn record(&mut self, status: SubtestStatus) {
        match status {
            SubtestStatus::Pass => self.pass += 1,
            SubtestStatus::Fail => self.fail += 1,
            _ => self.other += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pass + self.fail + self.other
    }
}

/// A single failing subtest, as written to the failed-test list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTest {
    pub test_path: String,
    pub test_name: String,
    pub status: SubtestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}
