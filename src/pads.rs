//! Higher-level workpad operations composed from store primitives.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::git::FileChange;
use crate::store::{RepoStore, TestStatus, WorkpadRecord, WorkpadStatus};

/// Sort key for workpad listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PadSortBy {
    #[default]
    CreatedAt,
    LastActivity,
    Title,
}

/// Filter for workpad listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PadFilter {
    pub repo_id: Option<String>,
    pub status: Option<WorkpadStatus>,
    pub test_status: Option<TestStatus>,
}

/// Non-destructive merge simulation for a workpad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePreview {
    pub can_fast_forward: bool,
    pub ahead: usize,
    pub behind: usize,
    /// Files changed on both sides since the base commit (the overlap a
    /// real merge would have to reconcile).
    pub conflicts: Vec<String>,
    pub ready_to_promote: bool,
}

/// Shape of a workpad's accumulated change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkpadStats {
    pub files_changed: Vec<FileChange>,
    pub commits_ahead: usize,
    pub checkpoints: usize,
    pub additions: usize,
    pub deletions: usize,
}

/// Side-by-side comparison of two workpads in the same repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkpadComparison {
    pub files_changed: Vec<String>,
    pub diff_text: String,
}

/// Workpad manager: switching, previews, stats, filtered listings.
pub struct WorkpadManager {
    store: Arc<RepoStore>,
}

impl WorkpadManager {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self { store }
    }

    /// Check out a workpad's branch and mark it as the active workpad.
    ///
    /// Never discards local state: a dirty working tree fails with
    /// [`Error::DirtyWorkingTree`] before anything is touched.
    pub fn switch_workpad(&self, pad_id: &str) -> Result<WorkpadRecord> {
        let mut pad = self.store.get_workpad(pad_id)?;
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {}, not active",
                pad.status
            )));
        }
        let repo = self.store.get_repo(&pad.repo_id)?;
        let lock = self.store.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.store.git_for(&repo);

        if !git.branch_exists(&pad.branch)? {
            return Err(Error::InvariantViolation(format!(
                "workpad {pad_id} is active but branch {} is missing",
                pad.branch
            )));
        }
        if git.current_branch()?.as_deref() != Some(pad.branch.as_str()) && git.is_dirty()? {
            return Err(Error::DirtyWorkingTree {
                path: repo.path.clone(),
            });
        }
        git.checkout(&pad.branch)?;

        pad.touch();
        self.store.catalog().put_workpad(pad.clone())?;
        self.store.catalog().set_active_workpad(Some(pad_id))?;
        log::info!("switched to workpad {pad_id} ({})", pad.branch);
        Ok(pad)
    }

    /// The advisory active workpad, if one is set and still active.
    pub fn get_active_workpad(&self) -> Result<Option<WorkpadRecord>> {
        let Some(pad_id) = self.store.catalog().active_workpad()? else {
            return Ok(None);
        };
        match self.store.get_workpad(&pad_id) {
            Ok(pad) if pad.is_active() => Ok(Some(pad)),
            Ok(_) | Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Diff two workpads of the same repository (tip against tip).
    pub fn compare_workpads(&self, a: &str, b: &str) -> Result<WorkpadComparison> {
        let pad_a = self.store.get_workpad(a)?;
        let pad_b = self.store.get_workpad(b)?;
        if pad_a.repo_id != pad_b.repo_id {
            return Err(Error::InvalidInput(format!(
                "workpads {a} and {b} belong to different repositories"
            )));
        }
        let repo = self.store.get_repo(&pad_a.repo_id)?;
        let lock = self.store.repo_lock(&repo.id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.store.git_for(&repo);

        let changes = git.diff_name_status(&pad_a.branch, &pad_b.branch)?;
        let diff_text = git.diff_range(&pad_a.branch, &pad_b.branch)?;
        Ok(WorkpadComparison {
            files_changed: changes.into_iter().map(|c| c.path).collect(),
            diff_text,
        })
    }

    /// Simulate the merge of a workpad into trunk without touching anything.
    pub fn get_merge_preview(&self, pad_id: &str) -> Result<MergePreview> {
        let pad = self.store.get_workpad(pad_id)?;
        let repo = self.store.get_repo(&pad.repo_id)?;
        let check = self.store.can_promote(pad_id)?;

        // The overlap both sides changed since the base; empty unless trunk
        // has moved on.
        let conflicts = if check.behind > 0 {
            let lock = self.store.repo_lock(&repo.id);
            let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
            let git = self.store.git_for(&repo);
            let trunk_side: std::collections::HashSet<String> = git
                .diff_name_status(&pad.base_commit, &repo.trunk_branch)?
                .into_iter()
                .map(|c| c.path)
                .collect();
            git.diff_name_status(&pad.base_commit, &pad.branch)?
                .into_iter()
                .map(|c| c.path)
                .filter(|p| trunk_side.contains(p))
                .collect()
        } else {
            Vec::new()
        };

        Ok(MergePreview {
            can_fast_forward: check.behind == 0,
            ahead: check.ahead,
            behind: check.behind,
            conflicts,
            ready_to_promote: check.eligible,
        })
    }

    /// Files, commits, and checkpoint counts for a workpad.
    pub fn get_workpad_stats(&self, pad_id: &str) -> Result<WorkpadStats> {
        let pad = self.store.get_workpad(pad_id)?;
        let repo = self.store.get_repo(&pad.repo_id)?;
        let lock = self.store.repo_lock(&repo.id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.store.git_for(&repo);

        let reference: &str = if git.branch_exists(&pad.branch)? {
            &pad.branch
        } else if let Some(promoted) = &pad.promoted_commit {
            promoted
        } else {
            return Err(Error::InvariantViolation(format!(
                "workpad {pad_id} has neither a branch nor a promoted commit"
            )));
        };

        let files_changed = git.diff_name_status(&pad.base_commit, reference)?;
        let totals = git.diff_numstat(&pad.base_commit, reference)?;
        let counts = git.ahead_behind(&pad.base_commit, reference)?;
        Ok(WorkpadStats {
            files_changed,
            commits_ahead: counts.ahead,
            checkpoints: pad.checkpoints.len(),
            additions: totals.additions,
            deletions: totals.deletions,
        })
    }

    /// List workpads matching a filter, sorted and optionally reversed.
    pub fn list_workpads_filtered(
        &self,
        filter: &PadFilter,
        sort_by: PadSortBy,
        reverse: bool,
    ) -> Result<Vec<WorkpadRecord>> {
        let mut pads: Vec<WorkpadRecord> = self
            .store
            .list_workpads()?
            .into_iter()
            .filter(|p| {
                filter.repo_id.as_deref().is_none_or(|r| p.repo_id == r)
                    && filter.status.is_none_or(|s| p.status == s)
                    && filter.test_status.is_none_or(|t| p.test_status == t)
            })
            .collect();

        match sort_by {
            PadSortBy::CreatedAt => pads.sort_by_key(|p| p.created_at),
            PadSortBy::LastActivity => pads.sort_by_key(|p| p.last_activity),
            PadSortBy::Title => pads.sort_by(|a, b| a.title.cmp(&b.title)),
        }
        if reverse {
            pads.reverse();
        }
        Ok(pads)
    }
}
