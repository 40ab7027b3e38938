//! Checkpointing of run progress for resume after interruption.

use crate::config::{MaxTests, TestOptions, WptUrls};
use crate::report::now_millis;
use crate::result::{WptDiffError, WptDiffResult};
use crate::types::{ResultsTable, SubtestResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Checkpoint format version
pub const CHECKPOINT_VERSION: &str = "1.0.0";

/// Options in effect when the checkpoint was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub max_tests: MaxTests,
    pub under_proxy: bool,
    pub wpt_urls: WptUrls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointProgress {
    pub total_tests: usize,
    pub completed_tests: usize,
    pub completed_test_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_test: Option<String>,
}

/// On-disk checkpoint document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: String,
    /// Milliseconds since the epoch of the last update
    pub timestamp: i64,
    pub config: CheckpointConfig,
    pub progress: CheckpointProgress,
    /// `[path, subtests]` pairs in completion order
    pub test_results: Vec<(String, Vec<SubtestResult>)>,
    pub time_start: i64,
}

impl Checkpoint {
    /// Read a checkpoint from disk
    pub fn load(path: &Path) -> WptDiffResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            WptDiffError::checkpoint(format!("Failed to load checkpoint {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            WptDiffError::checkpoint(format!("Failed to parse checkpoint {}: {e}", path.display()))
        })
    }

    /// Write atomically through a sibling temp file
    pub fn write(&self, path: &Path) -> WptDiffResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    #[must_use]
    pub fn results(&self) -> ResultsTable {
        self.test_results.iter().cloned().collect()
    }
}

/// Summary for progress reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub completed_tests: usize,
    pub total_tests: usize,
    pub last_processed_test: Option<String>,
}

/// Tracks completions and periodically persists them
#[derive(Debug)]
pub struct CheckpointManager {
    checkpoint: Option<Checkpoint>,
    path: Option<PathBuf>,
    resume_from: Option<PathBuf>,
    save_interval: usize,
    since_last_save: usize,
    config: CheckpointConfig,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(options: &TestOptions) -> Self {
        Self {
            checkpoint: None,
            path: options.checkpoint_file.clone(),
            resume_from: options.resume_from.clone(),
            save_interval: options.checkpoint_interval(),
            since_last_save: 0,
            config: CheckpointConfig {
                scope: options.scope.clone(),
                max_tests: options.max_tests,
                under_proxy: options.under_proxy,
                wpt_urls: options.wpt_urls.clone(),
            },
        }
    }

    /// Load the resume checkpoint if configured, else start fresh
    pub fn initialize(&mut self, total_tests: usize, time_start: i64) -> WptDiffResult<()> {
        let checkpoint = match self.resume_from.as_deref() {
            Some(path) => {
                let checkpoint = Checkpoint::load(path)?;
                if checkpoint.config != self.config {
                    tracing::warn!(
                        path = %path.display(),
                        "resuming a checkpoint taken with different options"
                    );
                }
                tracing::info!(
                    "Resumed from checkpoint with {} completed tests",
                    checkpoint.progress.completed_tests
                );
                checkpoint
            }
            None => Checkpoint {
                version: CHECKPOINT_VERSION.to_string(),
                timestamp: now_millis(),
                config: self.config.clone(),
                progress: CheckpointProgress {
                    total_tests,
                    ..CheckpointProgress::default()
                },
                test_results: Vec::new(),
                time_start,
            },
        };
        self.checkpoint = Some(checkpoint);
        Ok(())
    }

    /// Record a finished test; saves every `save_interval` completions
    pub fn record_completion(&mut self, path: &str, results: &[SubtestResult]) -> WptDiffResult<()> {
        let checkpoint = self
            .checkpoint
            .as_mut()
            .ok_or_else(|| WptDiffError::checkpoint("Checkpoint not initialized"))?;

        checkpoint.test_results.push((path.to_string(), results.to_vec()));
        checkpoint.progress.completed_tests += 1;
        checkpoint.progress.completed_test_paths.push(path.to_string());
        checkpoint.progress.last_processed_test = Some(path.to_string());
        checkpoint.timestamp = now_millis();
        self.since_last_save += 1;

        if self.path.is_some() && self.since_last_save >= self.save_interval {
            match self.save() {
                Ok(()) => self.since_last_save = 0,
                Err(e) => tracing::error!("Failed to save checkpoint: {e}"),
            }
        }
        Ok(())
    }

    /// Results restored from the resume checkpoint plus those recorded since
    #[must_use]
    pub fn seed_results(&self) -> ResultsTable {
        self.checkpoint
            .as_ref()
            .map(Checkpoint::results)
            .unwrap_or_default()
    }

    /// Start of the overall run, carried across resumes
    #[must_use]
    pub fn time_start(&self) -> Option<i64> {
        self.checkpoint.as_ref().map(|c| c.time_start)
    }

    /// Progress so far, for announcing a resume
    #[must_use]
    pub fn info(&self) -> Option<CheckpointInfo> {
        self.checkpoint.as_ref().map(|c| CheckpointInfo {
            completed_tests: c.progress.completed_tests,
            total_tests: c.progress.total_tests,
            last_processed_test: c.progress.last_processed_test.clone(),
        })
    }

    /// Persist now; a no-op without a checkpoint file
    pub fn save(&self) -> WptDiffResult<()> {
        let (Some(checkpoint), Some(path)) = (self.checkpoint.as_ref(), self.path.as_deref()) else {
            return Ok(());
        };
        checkpoint.write(path)?;
        tracing::debug!(
            "Checkpoint saved with {} completed tests",
            checkpoint.progress.completed_tests
        );
        Ok(())
    }

    /// Final save on the way out
    pub fn shutdown(&self) -> WptDiffResult<()> {
        self.save()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::SubtestStatus;
    use tempfile::TempDir;

    fn pass(name: &str) -> Vec<SubtestResult> {
        vec![SubtestResult::new(name, SubtestStatus::Pass)]
    }

    #[test]
    fn test_fresh_initialize() {
        let mut manager = CheckpointManager::new(&TestOptions::new());
        manager.initialize(10, 1234).unwrap();
        let info = manager.info().unwrap();
        assert_eq!(info.total_tests, 10);
        assert_eq!(info.completed_tests, 0);
        assert_eq!(manager.time_start(), Some(1234));
        assert!(manager.seed_results().is_empty());
    }

    #[test]
    fn test_record_before_initialize_errors() {
        let mut manager = CheckpointManager::new(&TestOptions::new());
        assert!(manager.record_completion("/a.html", &pass("x")).is_err());
    }

    #[test]
    fn test_periodic_save_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut options = TestOptions::new().with_checkpoint_file(&path);
        options.checkpoint_interval = Some(2);

        let mut manager = CheckpointManager::new(&options);
        manager.initialize(3, 99).unwrap();
        manager.record_completion("/a.html", &pass("a")).unwrap();
        assert!(!path.exists());
        manager.record_completion("/b.html", &pass("b")).unwrap();
        assert!(path.exists());
        manager.record_completion("/c.html", &pass("c")).unwrap();
        manager.shutdown().unwrap();

        let resumed_options = TestOptions::new().with_resume_from(&path);
        let mut resumed = CheckpointManager::new(&resumed_options);
        resumed.initialize(3, 5000).unwrap();
        assert_eq!(resumed.info().unwrap().completed_tests, 3);
        assert!(resumed.seed_results().contains("/c.html"));
        assert_eq!(resumed.time_start(), Some(99));
        let order: Vec<String> = resumed.seed_results().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(order, vec!["/a.html", "/b.html", "/c.html"]);
        assert_eq!(resumed.info().unwrap().last_processed_test.as_deref(), Some("/c.html"));
    }

    #[test]
    fn test_camel_case_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        let mut manager = CheckpointManager::new(&TestOptions::new().with_checkpoint_file(&path));
        manager.initialize(1, 0).unwrap();
        manager.record_completion("/a.html", &pass("a")).unwrap();
        manager.save().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["progress"]["completedTestPaths"][0], "/a.html");
        assert_eq!(json["testResults"][0][0], "/a.html");
        assert_eq!(json["testResults"][0][1][0]["status"], 0);
        assert_eq!(json["config"]["maxTests"], 30);
    }

    #[test]
    fn test_missing_resume_file_is_checkpoint_error() {
        let dir = TempDir::new().unwrap();
        let options = TestOptions::new().with_resume_from(dir.path().join("nope.json"));
        let err = CheckpointManager::new(&options).initialize(1, 0).unwrap_err();
        assert!(matches!(err, WptDiffError::Checkpoint { .. }));
    }

    #[test]
    fn test_save_without_path_is_noop() {
        let mut manager = CheckpointManager::new(&TestOptions::new());
        manager.initialize(1, 0).unwrap();
        manager.save().unwrap();
    }
}
