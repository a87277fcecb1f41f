//! The promotion gate: a pure decision function.
//!
//! Takes rules, the test analysis, merge preconditions, and change size, and
//! returns an ordered decision. Never errors, never touches git or the
//! catalog; rule failures become REJECT or MANUAL_REVIEW with reasons.

use serde::{Deserialize, Serialize};

use crate::analyzer::TestAnalysis;
use crate::capabilities::Review;

/// Configurable promotion rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PromotionRules {
    /// A run with no test analysis at all is rejected.
    pub require_tests: bool,
    /// Anything short of a green analysis is rejected.
    pub require_all_pass: bool,
    /// A non-fast-forwardable workpad is rejected...
    pub require_fast_forward: bool,
    /// ...unless this is set, which downgrades it to manual review
    /// (never an auto-promote).
    pub allow_merge_conflicts: bool,
    /// Changes touching more files than this go to manual review.
    pub max_files_changed: Option<usize>,
    /// Changes touching more lines than this go to manual review.
    pub max_lines_changed: Option<usize>,
    /// Consult the external reviewer; if it is unavailable this is a
    /// warning, not a rejection.
    pub require_ai_review: bool,
    /// Reserved: coverage tracking is not wired up yet, so this only ever
    /// produces a warning.
    pub min_coverage: Option<f64>,
}

impl Default for PromotionRules {
    fn default() -> Self {
        Self {
            require_tests: true,
            require_all_pass: true,
            require_fast_forward: true,
            allow_merge_conflicts: false,
            max_files_changed: None,
            max_lines_changed: None,
            require_ai_review: false,
            min_coverage: None,
        }
    }
}

/// Merge-side facts gathered before the gate runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePreconditions {
    pub can_fast_forward: bool,
    /// Stable token for why fast-forward is impossible ("diverged",
    /// "workpad-empty", "has-conflicts").
    pub blocked_reason: Option<String>,
}

/// Size of the change a workpad carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSize {
    pub files_changed: usize,
    pub lines_changed: usize,
}

/// The gate's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    ManualReview,
}

/// Decision plus everything that led to it, in evaluation order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PromotionDecision {
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl PromotionDecision {
    pub fn approved(&self) -> bool {
        self.decision == Decision::Approve
    }
}

/// Evaluate the gate. Pure: same inputs, same decision, no side effects
/// beyond log lines.
///
/// Tie-breaks: any reject dominates; among non-rejects, any manual-review
/// dominates approve. Reasons and warnings accumulate across all rules.
pub fn evaluate(
    rules: &PromotionRules,
    analysis: Option<&TestAnalysis>,
    preconditions: &MergePreconditions,
    change_size: &ChangeSize,
    review: Option<&Review>,
) -> PromotionDecision {
    let mut rejects: Vec<String> = Vec::new();
    let mut manuals: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    match analysis {
        None => {
            if rules.require_tests {
                rejects.push("no-tests: no test run was provided".to_string());
            }
        }
        Some(analysis) => {
            if rules.require_all_pass && !analysis.is_green() {
                rejects.push(format!(
                    "tests-failed: {} failed, {} timed out, {} errored, {} skipped",
                    analysis.failed, analysis.timeout, analysis.error, analysis.skipped
                ));
            }
        }
    }

    if rules.require_fast_forward && !preconditions.can_fast_forward {
        let token = preconditions
            .blocked_reason
            .clone()
            .unwrap_or_else(|| "diverged".to_string());
        if rules.allow_merge_conflicts {
            manuals.push(format!("{token}: not a fast-forward; review the merge by hand"));
        } else {
            rejects.push(format!("{token}: trunk cannot fast-forward to this workpad"));
        }
    }

    if let Some(max) = rules.max_files_changed
        && change_size.files_changed > max
    {
        manuals.push(format!(
            "change-size: {} files changed exceeds the {max}-file limit",
            change_size.files_changed
        ));
    }
    if let Some(max) = rules.max_lines_changed
        && change_size.lines_changed > max
    {
        manuals.push(format!(
            "change-size: {} lines changed exceeds the {max}-line limit",
            change_size.lines_changed
        ));
    }

    if rules.require_ai_review {
        match review {
            None => {
                warnings.push("ai-review: reviewer unavailable, proceeding without it".to_string());
            }
            Some(review) if !review.approved => {
                manuals.push(format!(
                    "ai-review: reviewer raised {} issue(s)",
                    review.issues.len()
                ));
                for issue in &review.issues {
                    warnings.push(format!("ai-review: {issue}"));
                }
            }
            Some(_) => {}
        }
    }

    if rules.min_coverage.is_some() {
        log::warn!("promotion gate: coverage tracking not yet implemented");
        warnings.push("min-coverage: coverage tracking not yet implemented".to_string());
    }

    let decision = if !rejects.is_empty() {
        Decision::Reject
    } else if !manuals.is_empty() {
        Decision::ManualReview
    } else {
        Decision::Approve
    };

    let mut reasons = rejects;
    reasons.extend(manuals);
    log::info!(
        "promotion gate: {decision} ({} reason(s), {} warning(s))",
        reasons.len(),
        warnings.len()
    );
    PromotionDecision {
        decision,
        reasons,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisComplexity, OverallStatus};

    fn green_analysis() -> TestAnalysis {
        TestAnalysis {
            total: 1,
            passed: 1,
            failed: 0,
            timeout: 0,
            error: 0,
            skipped: 0,
            status: OverallStatus::Green,
            patterns: vec![],
            suggestions: vec![],
            complexity: AnalysisComplexity::Low,
        }
    }

    fn red_analysis() -> TestAnalysis {
        TestAnalysis {
            failed: 1,
            passed: 0,
            status: OverallStatus::Red,
            ..green_analysis()
        }
    }

    fn ff_ok() -> MergePreconditions {
        MergePreconditions {
            can_fast_forward: true,
            blocked_reason: None,
        }
    }

    fn diverged() -> MergePreconditions {
        MergePreconditions {
            can_fast_forward: false,
            blocked_reason: Some("diverged".into()),
        }
    }

    #[test]
    fn green_tests_and_clean_merge_approve() {
        let decision = evaluate(
            &PromotionRules::default(),
            Some(&green_analysis()),
            &ff_ok(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision.reasons.is_empty());
        assert!(decision.warnings.is_empty());
    }

    #[test]
    fn missing_tests_reject() {
        let decision = evaluate(
            &PromotionRules::default(),
            None,
            &ff_ok(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.reasons[0].starts_with("no-tests"));
    }

    #[test]
    fn missing_tests_allowed_when_rule_off() {
        let rules = PromotionRules {
            require_tests: false,
            ..PromotionRules::default()
        };
        let decision = evaluate(&rules, None, &ff_ok(), &ChangeSize::default(), None);
        assert_eq!(decision.decision, Decision::Approve);
    }

    #[test]
    fn red_tests_reject() {
        let decision = evaluate(
            &PromotionRules::default(),
            Some(&red_analysis()),
            &ff_ok(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.reasons[0].starts_with("tests-failed"));
    }

    #[test]
    fn divergence_rejects_with_token() {
        let decision = evaluate(
            &PromotionRules::default(),
            Some(&green_analysis()),
            &diverged(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.reasons[0].starts_with("diverged"));
    }

    #[test]
    fn allow_merge_conflicts_downgrades_to_manual() {
        let rules = PromotionRules {
            allow_merge_conflicts: true,
            ..PromotionRules::default()
        };
        let decision = evaluate(
            &rules,
            Some(&green_analysis()),
            &diverged(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::ManualReview);
    }

    #[test]
    fn change_size_goes_to_manual_review() {
        let rules = PromotionRules {
            max_files_changed: Some(2),
            max_lines_changed: Some(100),
            ..PromotionRules::default()
        };
        let decision = evaluate(
            &rules,
            Some(&green_analysis()),
            &ff_ok(),
            &ChangeSize {
                files_changed: 5,
                lines_changed: 300,
            },
            None,
        );
        assert_eq!(decision.decision, Decision::ManualReview);
        assert_eq!(decision.reasons.len(), 2);
        assert!(decision.reasons.iter().all(|r| r.starts_with("change-size")));
    }

    #[test]
    fn reject_dominates_manual_review() {
        let rules = PromotionRules {
            max_files_changed: Some(1),
            ..PromotionRules::default()
        };
        let decision = evaluate(
            &rules,
            Some(&red_analysis()),
            &ff_ok(),
            &ChangeSize {
                files_changed: 10,
                lines_changed: 0,
            },
            None,
        );
        assert_eq!(decision.decision, Decision::Reject);
        // Both reasons are preserved, reject-causing first.
        assert!(decision.reasons[0].starts_with("tests-failed"));
        assert!(decision.reasons[1].starts_with("change-size"));
    }

    #[test]
    fn unavailable_reviewer_is_warning_only() {
        let rules = PromotionRules {
            require_ai_review: true,
            ..PromotionRules::default()
        };
        let decision = evaluate(
            &rules,
            Some(&green_analysis()),
            &ff_ok(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision.warnings[0].contains("reviewer unavailable"));
    }

    #[test]
    fn rejecting_reviewer_forces_manual() {
        let rules = PromotionRules {
            require_ai_review: true,
            ..PromotionRules::default()
        };
        let review = Review {
            approved: false,
            issues: vec!["unbounded recursion in greet()".into()],
        };
        let decision = evaluate(
            &rules,
            Some(&green_analysis()),
            &ff_ok(),
            &ChangeSize::default(),
            Some(&review),
        );
        assert_eq!(decision.decision, Decision::ManualReview);
        assert!(decision.warnings.iter().any(|w| w.contains("recursion")));
    }

    #[test]
    fn min_coverage_is_warning_only() {
        let rules = PromotionRules {
            min_coverage: Some(0.8),
            ..PromotionRules::default()
        };
        let decision = evaluate(
            &rules,
            Some(&green_analysis()),
            &ff_ok(),
            &ChangeSize::default(),
            None,
        );
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision.warnings[0].contains("not yet implemented"));
    }

    #[test]
    fn gate_is_deterministic() {
        let rules = PromotionRules::default();
        let analysis = red_analysis();
        let pre = diverged();
        let size = ChangeSize {
            files_changed: 3,
            lines_changed: 30,
        };
        let first = evaluate(&rules, Some(&analysis), &pre, &size, None);
        let second = evaluate(&rules, Some(&analysis), &pre, &size, None);
        assert_eq!(first, second);
    }
}
