//! Capabilities supplied by external collaborators.
//!
//! The engine never generates or judges code itself. An AI layer (or a human
//! tool) implements these traits and hands the engine finished artifacts:
//! unified diffs to apply, review verdicts to weigh. The engine treats both
//! as opaque data.

use crate::error::Result;

/// A unified diff produced for a task, plus free-form provenance metadata
/// (model name, prompt id, cost — whatever the producer wants to attach).
#[derive(Debug, Clone)]
pub struct ProducedPatch {
    pub diff: String,
    pub metadata: serde_json::Value,
}

/// Produces patches for a described task. Implemented by the AI layer.
pub trait PatchProducer {
    fn produce(&self, task: &str, context: &str) -> Result<ProducedPatch>;
}

/// Verdict from an external code review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub approved: bool,
    pub issues: Vec<String>,
}

/// Reviews a diff before promotion. Consulted by the promotion gate only
/// when `require_ai_review` is enabled.
pub trait CodeReviewer {
    fn review(&self, diff: &str, context: &str) -> Result<Review>;
}
