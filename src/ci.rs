//! Post-promotion CI: smoke tests on trunk, revert-on-failure.
//!
//! A smoke run executes the given tests against an ephemeral verification
//! workpad created at a trunk commit. On FAILURE (and with auto-rollback
//! enabled) the rollback handler puts a revert commit on trunk and, by
//! default, recreates a workpad carrying the reverted change so it can be
//! fixed and retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::events::Event;
use crate::ids;
use crate::store::RepoStore;
use crate::testing::{CancelToken, TestConfig, TestOrchestrator, TestResult, summarize};

/// Lifecycle of a CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Running,
    Success,
    Failure,
    /// Nothing failed outright, but some tests hit their deadline.
    Unstable,
}

/// Result of one smoke run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CiResult {
    pub run_id: String,
    pub repo_id: String,
    pub commit: String,
    pub status: CiStatus,
    pub results: Vec<TestResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CiResult {
    pub fn failed(&self) -> bool {
        self.status == CiStatus::Failure
    }
}

/// Progress events surfaced to the optional callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiProgress {
    TestsStarted { total: usize },
    Running,
    Completed { status: CiStatus },
}

/// Outcome of a rollback.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackResult {
    /// The trunk commit that was reverted.
    pub old_sha: String,
    /// The revert commit now on trunk.
    pub revert_sha: String,
    /// Workpad recreated from the reverted change, when enabled and
    /// successful.
    pub recreated_workpad: Option<String>,
    pub reason: String,
}

/// Runs smoke tests on trunk commits and rolls back failures.
pub struct CiOrchestrator {
    store: Arc<RepoStore>,
    orchestrator: TestOrchestrator,
}

impl CiOrchestrator {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self {
            orchestrator: TestOrchestrator::new(Arc::clone(&store)),
            store,
        }
    }

    /// Run smoke tests against `commit` on the repository's trunk.
    pub fn run_smoke_tests(
        &self,
        repo_id: &str,
        commit: &str,
        tests: &[TestConfig],
    ) -> Result<CiResult> {
        self.run_smoke_tests_with_progress(repo_id, commit, tests, &mut |_| {})
    }

    /// Same semantics as [`Self::run_smoke_tests`], but yields progress
    /// events to the callback as the run advances.
    pub fn run_smoke_tests_with_progress(
        &self,
        repo_id: &str,
        commit: &str,
        tests: &[TestConfig],
        on_progress: &mut dyn FnMut(CiProgress),
    ) -> Result<CiResult> {
        let repo = self.store.get_repo(repo_id)?;
        let run_id = ids::ci_run_id(commit);
        let started_at = Utc::now();

        log::info!("ci {run_id}: smoke run on {repo_id}@{commit} ({} test(s))", tests.len());
        self.store.events().publish(Event::CiStarted {
            run_id: run_id.clone(),
            repo_id: repo_id.to_string(),
            commit: commit.to_string(),
        });
        on_progress(CiProgress::TestsStarted { total: tests.len() });

        // Ephemeral verification workpad pinned to the commit under test.
        let short = &commit[..8.min(commit.len())];
        let pad = self
            .store
            .create_workpad_at(&repo.id, &format!("ci verify {short}"), commit)?;

        on_progress(CiProgress::Running);
        let outcome = self
            .orchestrator
            .run_tests(&pad.id, tests, true, &CancelToken::new());

        // The verification pad is scaffolding: always try to remove it, and
        // never let removal problems change the run's status.
        if let Err(err) = self.store.delete_workpad(&pad.id, true) {
            log::warn!("ci {run_id}: could not clean up verification pad {}: {err}", pad.id);
        }

        let results = outcome?;
        let summary = summarize(&results);
        let status = if summary.failed > 0 || summary.error > 0 {
            CiStatus::Failure
        } else if summary.timeout > 0 {
            CiStatus::Unstable
        } else {
            CiStatus::Success
        };

        log::info!(
            "ci {run_id}: {status} ({} passed, {} failed, {} timeout, {} error)",
            summary.passed,
            summary.failed,
            summary.timeout,
            summary.error
        );
        self.store.events().publish(Event::CiFinished {
            run_id: run_id.clone(),
            status: status.to_string(),
        });
        on_progress(CiProgress::Completed { status });

        Ok(CiResult {
            run_id,
            repo_id: repo_id.to_string(),
            commit: commit.to_string(),
            status,
            results,
            started_at,
            finished_at: Some(Utc::now()),
        })
    }
}

/// Reverts failing trunk commits and optionally recreates them as workpads.
pub struct RollbackHandler {
    store: Arc<RepoStore>,
}

impl RollbackHandler {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self { store }
    }

    /// React to a finished CI run: on FAILURE with auto-rollback enabled,
    /// revert trunk. Returns `None` when no rollback was warranted.
    pub fn handle_ci_result(&self, ci: &CiResult) -> Result<Option<RollbackResult>> {
        if !ci.failed() {
            return Ok(None);
        }
        if !self.store.config().ci.auto_rollback {
            log::info!("ci {} failed but auto-rollback is disabled", ci.run_id);
            return Ok(None);
        }
        self.rollback(&ci.repo_id, &ci.commit, &format!("smoke run {} failed", ci.run_id))
            .map(Some)
    }

    /// Revert the trunk tip and optionally recreate the change as a new
    /// workpad. A failed revert is fatal ([`Error::RollbackFailed`]); a
    /// failed recreate is logged and leaves the revert standing.
    pub fn rollback(&self, repo_id: &str, commit: &str, reason: &str) -> Result<RollbackResult> {
        // Capture the diff before touching trunk so the recreate step cannot
        // be invalidated by the revert itself.
        let diff = self.store.get_commit_diff(repo_id, commit)?;

        let revert_sha = self
            .store
            .revert_last(repo_id)
            .map_err(|err| Error::RollbackFailed {
                repo_id: repo_id.to_string(),
                detail: err.to_string(),
            })?;
        log::info!("rollback on {repo_id}: {commit} reverted by {revert_sha}");

        let recreated_workpad = if self.store.config().ci.recreate_workpad_on_rollback {
            match self.recreate_workpad(repo_id, commit, &diff) {
                Ok(pad_id) => Some(pad_id),
                Err(err) => {
                    log::warn!(
                        "rollback on {repo_id}: revert stands, but recreate failed: {err}"
                    );
                    None
                }
            }
        } else {
            None
        };

        self.store.events().publish(Event::RollbackPerformed {
            repo_id: repo_id.to_string(),
            revert_commit: revert_sha.clone(),
            recreated_pad: recreated_workpad.clone(),
        });

        Ok(RollbackResult {
            old_sha: commit.to_string(),
            revert_sha,
            recreated_workpad,
            reason: reason.to_string(),
        })
    }

    /// New workpad whose first checkpoint reapplies the reverted change.
    fn recreate_workpad(&self, repo_id: &str, commit: &str, diff: &str) -> Result<String> {
        let short = &commit[..8.min(commit.len())];
        let pad = self
            .store
            .create_workpad(repo_id, &format!("retry {short}"))?;
        self.store.apply_patch_as_checkpoint(
            &pad.id,
            diff,
            &format!("Reapply reverted commit {short}"),
        )?;
        Ok(pad.id)
    }
}
