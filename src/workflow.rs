//! The auto-merge workflow: tests → analysis → gate → promotion.
//!
//! Coordinates the orchestrator, the analyzer, the gate, and the store.
//! Errors from the phases become phase-tagged failure outcomes rather than
//! bubbling out; only workpad resolution fails fast.

use std::sync::Arc;

use crate::analyzer::{self, OverallStatus, TestAnalysis};
use crate::capabilities::{CodeReviewer, Review};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::gate::{self, ChangeSize, MergePreconditions, PromotionDecision};
use crate::pads::WorkpadManager;
use crate::store::{RepoStore, TestStatus};
use crate::testing::{CancelToken, RunSummary, TestConfig, TestOrchestrator, summarize};

/// Where an auto-merge run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Failed while running tests.
    Tests,
    /// Failed while analyzing results.
    Analysis,
    /// Stopped at the gate: rejected, sent to manual review, or evaluate-only.
    Gate,
    /// Promotion was attempted (merged commit set on success).
    Promote,
    /// A cancellation signal stopped the run.
    Cancelled,
}

/// Structured result of one auto-merge run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutoMergeResult {
    pub pad_id: String,
    pub phase: WorkflowPhase,
    pub tests: Option<RunSummary>,
    pub analysis: Option<TestAnalysis>,
    pub decision: Option<PromotionDecision>,
    /// Trunk tip after promotion, when one happened.
    pub merged_commit: Option<String>,
    /// Error detail when the run failed partway.
    pub failure: Option<String>,
    /// One-line human-readable summary.
    pub summary: String,
}

impl AutoMergeResult {
    pub fn promoted(&self) -> bool {
        self.merged_commit.is_some()
    }

    fn failed(pad_id: &str, phase: WorkflowPhase, detail: String) -> Self {
        Self {
            pad_id: pad_id.to_string(),
            phase,
            tests: None,
            analysis: None,
            decision: None,
            merged_commit: None,
            summary: format!("{phase} phase failed: {detail}"),
            failure: Some(detail),
        }
    }
}

/// Orchestrates C4 → C5 → C6 → promotion for one workpad.
pub struct AutoMergeWorkflow {
    store: Arc<RepoStore>,
    orchestrator: TestOrchestrator,
    pads: WorkpadManager,
    reviewer: Option<Arc<dyn CodeReviewer>>,
}

impl AutoMergeWorkflow {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self {
            orchestrator: TestOrchestrator::new(Arc::clone(&store)),
            pads: WorkpadManager::new(Arc::clone(&store)),
            reviewer: None,
            store,
        }
    }

    /// Attach an external reviewer, consulted only when the
    /// `require_ai_review` rule is on.
    pub fn with_reviewer(mut self, reviewer: Arc<dyn CodeReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Run the pipeline. With `auto_promote` false this is "evaluate" mode:
    /// the decision comes back and nothing is merged.
    pub fn execute(
        &self,
        pad_id: &str,
        tests: &[TestConfig],
        parallel: bool,
        auto_promote: bool,
        cancel: &CancelToken,
    ) -> Result<AutoMergeResult> {
        // Resolution failures fail fast; everything later is an outcome.
        let pad = self.store.get_workpad(pad_id)?;
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {}, not active",
                pad.status
            )));
        }

        log::info!("auto-merge for {pad_id}: running {} test(s)", tests.len());
        self.store.events().publish(Event::TestsStarted {
            pad_id: pad_id.to_string(),
            total: tests.len(),
        });

        let results = match self.orchestrator.run_tests(pad_id, tests, parallel, cancel) {
            Ok(results) => results,
            Err(err) => {
                log::warn!("auto-merge for {pad_id}: test phase failed: {err}");
                return Ok(AutoMergeResult::failed(
                    pad_id,
                    WorkflowPhase::Tests,
                    err.to_string(),
                ));
            }
        };
        if cancel.is_cancelled() {
            log::info!("auto-merge for {pad_id}: cancelled during tests");
            return Ok(AutoMergeResult::failed(
                pad_id,
                WorkflowPhase::Cancelled,
                "cancelled".to_string(),
            ));
        }
        let test_summary = summarize(&results);

        log::info!(
            "auto-merge for {pad_id}: analyzing {}/{} passing result(s)",
            test_summary.passed,
            test_summary.total
        );
        let analysis = analyzer::analyze(&results);
        self.store.events().publish(Event::TestsFinished {
            pad_id: pad_id.to_string(),
            passed: test_summary.passed,
            failed: test_summary.failed,
        });
        self.stamp_test_status(pad_id, &analysis);

        // Merge preconditions and change size feed the gate.
        let check = match self.store.can_promote(pad_id) {
            Ok(check) => check,
            Err(err) => {
                return Ok(AutoMergeResult::failed(
                    pad_id,
                    WorkflowPhase::Gate,
                    err.to_string(),
                ));
            }
        };
        let preconditions = MergePreconditions {
            can_fast_forward: check.eligible,
            blocked_reason: check.blocked.as_ref().map(|b| b.reason().to_string()),
        };
        let change_size = match self.pads.get_workpad_stats(pad_id) {
            Ok(stats) => ChangeSize {
                files_changed: stats.files_changed.len(),
                lines_changed: stats.additions + stats.deletions,
            },
            Err(err) => {
                return Ok(AutoMergeResult::failed(
                    pad_id,
                    WorkflowPhase::Gate,
                    err.to_string(),
                ));
            }
        };

        let review = self.collect_review(pad_id);
        let rules = &self.store.config().promotion;
        let decision = gate::evaluate(
            rules,
            Some(&analysis),
            &preconditions,
            &change_size,
            review.as_ref(),
        );
        log::info!("auto-merge for {pad_id}: gate says {}", decision.decision);

        if cancel.is_cancelled() {
            return Ok(AutoMergeResult::failed(
                pad_id,
                WorkflowPhase::Cancelled,
                "cancelled".to_string(),
            ));
        }

        let mut phase = WorkflowPhase::Gate;
        let mut merged_commit = None;
        let mut failure = None;
        if decision.approved() && auto_promote {
            phase = WorkflowPhase::Promote;
            match self.store.promote(pad_id) {
                Ok(sha) => {
                    log::info!("auto-merge for {pad_id}: promoted to {sha}");
                    merged_commit = Some(sha);
                }
                Err(err) => {
                    log::warn!("auto-merge for {pad_id}: promotion failed: {err}");
                    failure = Some(err.to_string());
                }
            }
        }

        let summary = match (&merged_commit, &failure) {
            (Some(sha), _) => format!(
                "{}/{} tests passed; approved and promoted ({})",
                test_summary.passed,
                test_summary.total,
                &sha[..12.min(sha.len())]
            ),
            (None, Some(detail)) => format!("approved but promotion failed: {detail}"),
            (None, None) => format!(
                "{}/{} tests passed; gate decision: {}{}",
                test_summary.passed,
                test_summary.total,
                decision.decision,
                if decision.approved() && !auto_promote {
                    " (evaluate mode, no merge attempted)"
                } else {
                    ""
                }
            ),
        };

        Ok(AutoMergeResult {
            pad_id: pad_id.to_string(),
            phase,
            tests: Some(test_summary),
            analysis: Some(analysis),
            decision: Some(decision),
            merged_commit,
            failure,
            summary,
        })
    }

    /// Record the analysis verdict on the workpad (GREEN/RED). Yellow runs
    /// leave the previous verdict in place.
    fn stamp_test_status(&self, pad_id: &str, analysis: &TestAnalysis) {
        let status = match analysis.status {
            OverallStatus::Green => TestStatus::Green,
            OverallStatus::Red => TestStatus::Red,
            OverallStatus::Yellow => return,
        };
        let stamped = self
            .store
            .get_workpad(pad_id)
            .and_then(|mut pad| {
                pad.test_status = status;
                pad.touch();
                self.store.catalog().put_workpad(pad)
            });
        if let Err(err) = stamped {
            log::warn!("could not stamp test status on {pad_id}: {err}");
        }
    }

    /// Ask the external reviewer for a verdict when the rules call for one.
    /// An unavailable or failing reviewer yields `None`, which the gate
    /// treats as a warning.
    fn collect_review(&self, pad_id: &str) -> Option<Review> {
        if !self.store.config().promotion.require_ai_review {
            return None;
        }
        let reviewer = self.reviewer.as_ref()?;
        let diff = match self.store.get_diff(pad_id, None) {
            Ok(diff) => diff,
            Err(err) => {
                log::warn!("review skipped for {pad_id}: could not read diff: {err}");
                return None;
            }
        };
        match reviewer.review(&diff, pad_id) {
            Ok(review) => Some(review),
            Err(err) => {
                log::warn!("reviewer failed for {pad_id}: {err}");
                None
            }
        }
    }
}
