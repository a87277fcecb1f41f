//! The patch engine: all reasoning over unified-diff text, plus the
//! apply-as-checkpoint execution path.

mod parse;

pub use parse::{FilePatch, Hunk, ParseOutcome, PatchSet, parse_lenient};

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ConflictInfo, ConflictKind, Error, Result};
use crate::store::RepoStore;

/// Patch size bucket. Thresholds are on files affected and total lines
/// changed (additions + deletions):
/// trivial ≤ 1 file & ≤ 10 lines; simple ≤ 3 & ≤ 50; moderate ≤ 10 & ≤ 200;
/// complex ≤ 30 & ≤ 1000; everything else very complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

/// Derived measurements of a patch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatchStats {
    pub files_affected: usize,
    pub additions: usize,
    pub deletions: usize,
    pub hunks: usize,
    pub complexity: Complexity,
}

impl PatchStats {
    pub fn total_lines(&self) -> usize {
        self.additions + self.deletions
    }
}

fn bucket(files: usize, lines: usize) -> Complexity {
    if files <= 1 && lines <= 10 {
        Complexity::Trivial
    } else if files <= 3 && lines <= 50 {
        Complexity::Simple
    } else if files <= 10 && lines <= 200 {
        Complexity::Moderate
    } else if files <= 30 && lines <= 1000 {
        Complexity::Complex
    } else {
        Complexity::VeryComplex
    }
}

/// Outcome of syntax validation. `errors` empty means the patch is usable.
#[derive(Debug, Clone, Default)]
pub struct PatchValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PatchValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Conflict dry-run result for one patch against one workpad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub can_apply: bool,
    pub per_file: Vec<ConflictInfo>,
}

/// What to do with a patch, from its size and conflict state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Recommendation {
    Apply,
    Review,
    Split,
    Reject,
}

/// Combined no-side-effect preview.
#[derive(Debug, Clone)]
pub struct PatchPreview {
    pub stats: PatchStats,
    pub conflicts: ConflictReport,
    pub recommendation: Recommendation,
}

/// Stages of the interactive apply pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ApplyStage {
    Validate,
    Preview,
    Apply,
}

/// Per-stage outcome of [`PatchEngine::apply_patch_interactive`].
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: ApplyStage,
    pub ok: bool,
    pub detail: String,
}

/// Result of the interactive pipeline. `checkpoint_id` is set only when the
/// apply stage ran and succeeded.
#[derive(Debug, Clone)]
pub struct InteractiveApply {
    pub stages: Vec<StageOutcome>,
    pub checkpoint_id: Option<String>,
}

/// Classify one `git apply --check` complaint line.
fn classify_apply_error(line: &str) -> Option<ConflictInfo> {
    let rest = line.strip_prefix("error: ")?;

    // "error: patch failed: <file>:<line>"
    if let Some(loc) = rest.strip_prefix("patch failed: ") {
        let path = loc.rsplit_once(':').map_or(loc, |(p, _)| p);
        return Some(ConflictInfo {
            path: path.to_string(),
            kind: ConflictKind::ContextMismatch,
            message: rest.to_string(),
        });
    }

    // "error: <file>: <reason>"
    let (path, reason) = rest.split_once(": ")?;
    let kind = if reason.contains("does not exist")
        || reason.contains("No such file")
        || reason.contains("not in the index")
        || reason.contains("does not match index")
    {
        ConflictKind::MissingFile
    } else if reason.contains("already exists") {
        ConflictKind::AlreadyExists
    } else if reason.contains("does not apply") {
        ConflictKind::ContextMismatch
    } else {
        ConflictKind::Other
    };
    Some(ConflictInfo {
        path: path.to_string(),
        kind,
        message: reason.to_string(),
    })
}

/// Parse `git apply --check --verbose` stderr into per-file conflicts,
/// de-duplicated by path (the first, most specific complaint wins).
fn parse_apply_errors(stderr: &str) -> Vec<ConflictInfo> {
    let mut seen = std::collections::HashSet::new();
    let mut conflicts = Vec::new();
    for line in stderr.lines() {
        if let Some(info) = classify_apply_error(line)
            && seen.insert(info.path.clone())
        {
            conflicts.push(info);
        }
    }
    conflicts
}

/// The patch engine. Pure operations (validate, stats, split, combine) touch
/// no repository; the rest run against a workpad through the store.
pub struct PatchEngine {
    store: Arc<RepoStore>,
}

impl PatchEngine {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self { store }
    }

    /// Syntax-check a diff without touching any repository.
    pub fn validate_patch_syntax(diff: &str) -> PatchValidation {
        let outcome = parse_lenient(diff);
        PatchValidation {
            errors: outcome.errors,
            warnings: outcome.warnings,
        }
    }

    /// Measure a diff. Fails with [`Error::InvalidPatchSyntax`] when it does
    /// not parse.
    pub fn get_patch_stats(diff: &str) -> Result<PatchStats> {
        let outcome = parse_lenient(diff);
        if !outcome.is_valid() {
            return Err(Error::InvalidPatchSyntax {
                errors: outcome.errors,
            });
        }
        let patch = outcome.patch;
        let files = patch.files.len();
        let additions = patch.additions();
        let deletions = patch.deletions();
        Ok(PatchStats {
            files_affected: files,
            additions,
            deletions,
            hunks: patch.hunk_count(),
            complexity: bucket(files, additions + deletions),
        })
    }

    /// Dry-run a diff against a workpad's tip; no side effects beyond
    /// checking out the workpad branch.
    pub fn detect_conflicts_detailed(&self, pad_id: &str, diff: &str) -> Result<ConflictReport> {
        match self.store.check_patch_against_pad(pad_id, diff)? {
            None => Ok(ConflictReport {
                can_apply: true,
                per_file: Vec::new(),
            }),
            Some(stderr) => {
                let mut per_file = parse_apply_errors(&stderr);
                if per_file.is_empty() {
                    // git refused without a recognizable per-file message;
                    // surface the raw complaint rather than dropping it.
                    per_file.push(ConflictInfo {
                        path: String::new(),
                        kind: ConflictKind::Other,
                        message: stderr.trim().to_string(),
                    });
                }
                Ok(ConflictReport {
                    can_apply: false,
                    per_file,
                })
            }
        }
    }

    /// Validate, measure, and dry-run a diff; recommend a next step.
    pub fn preview_patch(&self, pad_id: &str, diff: &str) -> Result<PatchPreview> {
        let validation = Self::validate_patch_syntax(diff);
        if !validation.is_valid() {
            return Err(Error::InvalidPatchSyntax {
                errors: validation.errors,
            });
        }
        let stats = Self::get_patch_stats(diff)?;
        let conflicts = self.detect_conflicts_detailed(pad_id, diff)?;

        let recommendation = if !conflicts.can_apply {
            Recommendation::Reject
        } else {
            match stats.complexity {
                Complexity::Trivial | Complexity::Simple => Recommendation::Apply,
                Complexity::Moderate => Recommendation::Review,
                Complexity::Complex | Complexity::VeryComplex => Recommendation::Split,
            }
        };
        Ok(PatchPreview {
            stats,
            conflicts,
            recommendation,
        })
    }

    /// Apply a diff to a workpad as a new checkpoint. Validation and
    /// conflict failures are typed ([`Error::InvalidPatchSyntax`],
    /// [`Error::PatchConflict`]); the workpad tree is unchanged unless the
    /// whole pipeline succeeds.
    pub fn apply_patch(&self, pad_id: &str, diff: &str, message: &str) -> Result<String> {
        let validation = Self::validate_patch_syntax(diff);
        if !validation.is_valid() {
            return Err(Error::InvalidPatchSyntax {
                errors: validation.errors,
            });
        }
        let report = self.detect_conflicts_detailed(pad_id, diff)?;
        if !report.can_apply {
            return Err(Error::PatchConflict {
                conflicts: report.per_file,
            });
        }
        let (checkpoint_id, _sha) = self
            .store
            .apply_patch_as_checkpoint(pad_id, diff, message)?;
        Ok(checkpoint_id)
    }

    /// Run the full pipeline — validate, preview, apply — reporting each
    /// stage. With `dry_run` the apply stage is skipped.
    pub fn apply_patch_interactive(
        &self,
        pad_id: &str,
        diff: &str,
        message: &str,
        dry_run: bool,
    ) -> Result<InteractiveApply> {
        let mut stages = Vec::new();

        let validation = Self::validate_patch_syntax(diff);
        stages.push(StageOutcome {
            stage: ApplyStage::Validate,
            ok: validation.is_valid(),
            detail: if validation.is_valid() {
                format!("ok ({} warning(s))", validation.warnings.len())
            } else {
                validation.errors.join("; ")
            },
        });
        if !validation.is_valid() {
            return Ok(InteractiveApply {
                stages,
                checkpoint_id: None,
            });
        }

        let preview = self.preview_patch(pad_id, diff)?;
        let preview_ok = preview.recommendation != Recommendation::Reject;
        stages.push(StageOutcome {
            stage: ApplyStage::Preview,
            ok: preview_ok,
            detail: format!(
                "{} file(s), +{} -{}, {} → {}",
                preview.stats.files_affected,
                preview.stats.additions,
                preview.stats.deletions,
                preview.stats.complexity,
                preview.recommendation
            ),
        });
        if !preview_ok || dry_run {
            return Ok(InteractiveApply {
                stages,
                checkpoint_id: None,
            });
        }

        match self
            .store
            .apply_patch_as_checkpoint(pad_id, diff, message)
        {
            Ok((checkpoint_id, sha)) => {
                stages.push(StageOutcome {
                    stage: ApplyStage::Apply,
                    ok: true,
                    detail: format!("checkpoint {checkpoint_id} at {sha}"),
                });
                Ok(InteractiveApply {
                    stages,
                    checkpoint_id: Some(checkpoint_id),
                })
            }
            Err(err) => {
                stages.push(StageOutcome {
                    stage: ApplyStage::Apply,
                    ok: false,
                    detail: err.to_string(),
                });
                Ok(InteractiveApply {
                    stages,
                    checkpoint_id: None,
                })
            }
        }
    }

    /// Split a diff into one single-file diff per affected path, preserving
    /// section order.
    pub fn split_patch_by_file(diff: &str) -> Result<IndexMap<String, String>> {
        let outcome = parse_lenient(diff);
        if !outcome.is_valid() {
            return Err(Error::InvalidPatchSyntax {
                errors: outcome.errors,
            });
        }
        let mut map: IndexMap<String, String> = IndexMap::new();
        for file in outcome.patch.files {
            map.entry(file.path().to_string())
                .or_default()
                .push_str(&file.raw);
        }
        Ok(map)
    }

    /// Concatenate diffs in order. The empty list yields the empty diff.
    pub fn combine_patches<S: AsRef<str>>(patches: &[S]) -> String {
        let mut combined = String::new();
        for patch in patches {
            let text = patch.as_ref();
            if text.is_empty() {
                continue;
            }
            combined.push_str(text);
            if !text.ends_with('\n') {
                combined.push('\n');
            }
        }
        combined
    }
}
