//! The repository store: single point of truth for on-disk git state and the
//! metadata catalog.
//!
//! Every other component goes through this layer for git mutations. The store
//! guarantees: trunk history is never rewritten (fast-forward and revert
//! only), every git mutation is followed by an atomic catalog update, and a
//! repository has one exclusive writer at a time.

mod catalog;
mod record;

pub use catalog::{CatalogBackend, JsonCatalog};
pub use record::{CheckpointRecord, RepoOrigin, RepoRecord, TestStatus, WorkpadRecord, WorkpadStatus};

use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::{CoreConfig, StateLayout};
use crate::error::{Error, NotFoundKind, PromoteBlocked, Result};
use crate::events::{Event, EventSink};
use crate::git::{AheadBehind, CommitInfo, FileContent, GitRepo, StatusSummary};
use crate::ids;

/// Result of a non-destructive promotion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteCheck {
    pub eligible: bool,
    /// Why promotion is blocked, when it is.
    pub blocked: Option<PromoteBlocked>,
    /// Workpad commits not yet on trunk.
    pub ahead: usize,
    /// Trunk commits the workpad does not have.
    pub behind: usize,
}

/// Owns repositories, workpads, and the catalog.
pub struct RepoStore {
    layout: StateLayout,
    config: CoreConfig,
    catalog: Arc<dyn CatalogBackend>,
    locks: DashMap<String, Arc<RwLock<()>>>,
    events: Arc<dyn EventSink>,
}

impl RepoStore {
    /// Open a store over the given layout, reconciling the catalog against
    /// on-disk git state (records whose branches vanished are tombstoned).
    pub fn open(
        layout: StateLayout,
        config: CoreConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        layout.ensure()?;
        let catalog: Arc<dyn CatalogBackend> = Arc::new(JsonCatalog::open(layout.catalog_dir())?);
        let store = Self {
            layout,
            config,
            catalog,
            locks: DashMap::new(),
            events,
        };
        store.reconcile()?;
        Ok(store)
    }

    /// Open a store with a caller-supplied catalog backend.
    pub fn with_catalog(
        layout: StateLayout,
        config: CoreConfig,
        catalog: Arc<dyn CatalogBackend>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        layout.ensure()?;
        let store = Self {
            layout,
            config,
            catalog,
            locks: DashMap::new(),
            events,
        };
        store.reconcile()?;
        Ok(store)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Direct access to the catalog backend. Engine components keep records
    /// consistent with git state; external callers should treat this as
    /// read-mostly.
    pub fn catalog(&self) -> &Arc<dyn CatalogBackend> {
        &self.catalog
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.config.git.subprocess_timeout_seconds)
    }

    /// Git context for a repository record.
    pub(crate) fn git_for(&self, repo: &RepoRecord) -> GitRepo {
        GitRepo::at(&repo.path, self.git_timeout())
    }

    /// Per-repo lock. Writers take `.write()`, readers `.read()`.
    pub(crate) fn repo_lock(&self, repo_id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(repo_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Startup reconciliation
    // ------------------------------------------------------------------

    /// Bring the catalog in line with on-disk git state. Branches without
    /// catalog entries are ignored; ACTIVE records whose branches are gone
    /// are marked DELETED.
    fn reconcile(&self) -> Result<()> {
        for mut pad in self.catalog.list_workpads()? {
            if pad.status != WorkpadStatus::Active {
                continue;
            }
            let Some(repo) = self.catalog.get_repo(&pad.repo_id)? else {
                log::warn!("workpad {} references missing repo {}; tombstoning", pad.id, pad.repo_id);
                pad.status = WorkpadStatus::Deleted;
                self.catalog.put_workpad(pad)?;
                continue;
            };
            let git = self.git_for(&repo);
            if !git.branch_exists(&pad.branch)? {
                log::warn!(
                    "workpad {} branch {} missing on disk; tombstoning",
                    pad.id,
                    pad.branch
                );
                pad.status = WorkpadStatus::Deleted;
                self.catalog.put_workpad(pad)?;
            }
        }

        // Clear a dangling active-pad pointer.
        if let Some(active) = self.catalog.active_workpad()? {
            let keep = self
                .catalog
                .get_workpad(&active)?
                .is_some_and(|p| p.is_active());
            if !keep {
                self.catalog.set_active_workpad(None)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Repository lifecycle
    // ------------------------------------------------------------------

    /// Create a repository from a zip archive buffer: explode the archive,
    /// initialize git, commit everything onto trunk.
    pub fn init_from_zip(&self, bytes: &[u8], name: &str) -> Result<RepoRecord> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("repository name must not be empty".into()));
        }
        let id = ids::repo_id(name);
        let dir = self.layout.repo_dir(&id);
        std::fs::create_dir_all(&dir)?;

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::InvalidArchive { detail: e.to_string() })?;
        let mut file_count = 0usize;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| Error::InvalidArchive { detail: e.to_string() })?;
            let Some(rel) = entry.enclosed_name() else {
                return Err(Error::InvalidArchive {
                    detail: format!("entry {:?} escapes the archive root", entry.name()),
                });
            };
            let dest = dir.join(rel);
            if entry.is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&dest)?;
                std::io::copy(&mut entry, &mut out)?;
                file_count += 1;
            }
        }
        if file_count == 0 {
            return Err(Error::InvalidArchive {
                detail: "archive contains no files".into(),
            });
        }

        let trunk = self.config.trunk_branch_name.clone();
        let git = GitRepo::at(&dir, self.git_timeout());
        git.init(&trunk)?;
        git.add_all()?;
        git.commit(&format!("Initial import of {name}"))?;

        let now = Utc::now();
        let record = RepoRecord {
            id: id.clone(),
            name: name.to_string(),
            path: dir,
            trunk_branch: trunk,
            origin: RepoOrigin::Zip,
            origin_ref: format!("{name}.zip"),
            created_at: now,
            last_activity: now,
            workpad_count: 0,
        };
        self.catalog.put_repo(record.clone())?;
        log::info!("repo {} created from archive ({file_count} files)", record.id);
        self.events.publish(Event::RepoCreated {
            repo_id: record.id.clone(),
            name: name.to_string(),
        });
        Ok(record)
    }

    /// Create a repository by cloning a git URL. The clone's default branch
    /// becomes trunk.
    pub fn init_from_git(&self, url: &str, name: &str) -> Result<RepoRecord> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("repository name must not be empty".into()));
        }
        let id = ids::repo_id(name);
        let dir = self.layout.repo_dir(&id);

        let git = GitRepo::clone_from(url, &dir, self.git_timeout())?;
        let trunk = git
            .current_branch()?
            .unwrap_or_else(|| self.config.trunk_branch_name.clone());

        let now = Utc::now();
        let record = RepoRecord {
            id: id.clone(),
            name: name.to_string(),
            path: dir,
            trunk_branch: trunk,
            origin: RepoOrigin::GitUrl,
            origin_ref: url.to_string(),
            created_at: now,
            last_activity: now,
            workpad_count: 0,
        };
        self.catalog.put_repo(record.clone())?;
        log::info!("repo {} cloned from {url}", record.id);
        self.events.publish(Event::RepoCreated {
            repo_id: record.id.clone(),
            name: name.to_string(),
        });
        Ok(record)
    }

    pub fn list_repos(&self) -> Result<Vec<RepoRecord>> {
        self.catalog.list_repos()
    }

    pub fn get_repo(&self, id: &str) -> Result<RepoRecord> {
        self.catalog.get_repo(id)?.ok_or_else(|| Error::NotFound {
            kind: NotFoundKind::Repository,
            id: id.to_string(),
        })
    }

    /// Tracked files at a ref (trunk tip when `None`).
    pub fn list_files(&self, repo_id: &str, reference: Option<&str>) -> Result<Vec<String>> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        git.list_files(reference.unwrap_or(&repo.trunk_branch))
    }

    // ------------------------------------------------------------------
    // Workpad lifecycle
    // ------------------------------------------------------------------

    /// Create a workpad branched from the current trunk tip.
    pub fn create_workpad(&self, repo_id: &str, title: &str) -> Result<WorkpadRecord> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        let base = git.rev_parse(&repo.trunk_branch)?;
        self.create_workpad_inner(repo, title, base)
    }

    /// Create a workpad branched from a specific commit (used for
    /// post-promotion verification runs).
    pub fn create_workpad_at(
        &self,
        repo_id: &str,
        title: &str,
        base_commit: &str,
    ) -> Result<WorkpadRecord> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        let base = git.rev_parse(base_commit)?;
        self.create_workpad_inner(repo, title, base)
    }

    fn create_workpad_inner(
        &self,
        mut repo: RepoRecord,
        title: &str,
        base_commit: String,
    ) -> Result<WorkpadRecord> {
        ids::validate_title(title).map_err(Error::InvalidInput)?;
        let git = self.git_for(&repo);
        let branch = ids::workpad_branch(title);
        git.create_branch(&branch, &base_commit)?;

        let now = Utc::now();
        let record = WorkpadRecord {
            id: ids::workpad_id(title),
            repo_id: repo.id.clone(),
            title: title.to_string(),
            branch: branch.clone(),
            base_commit,
            status: WorkpadStatus::Active,
            test_status: TestStatus::None,
            checkpoints: Vec::new(),
            created_at: now,
            last_activity: now,
            promoted_commit: None,
        };
        self.catalog.put_workpad(record.clone())?;
        repo.workpad_count += 1;
        repo.touch();
        self.catalog.put_repo(repo)?;

        log::info!("workpad {} created on {}", record.id, branch);
        self.events.publish(Event::WorkpadCreated {
            pad_id: record.id.clone(),
            repo_id: record.repo_id.clone(),
            branch,
        });
        Ok(record)
    }

    pub fn get_workpad(&self, id: &str) -> Result<WorkpadRecord> {
        self.catalog.get_workpad(id)?.ok_or_else(|| Error::NotFound {
            kind: NotFoundKind::Workpad,
            id: id.to_string(),
        })
    }

    pub fn list_workpads(&self) -> Result<Vec<WorkpadRecord>> {
        self.catalog.list_workpads()
    }

    /// Delete a workpad: branch and checkpoint tags go, the record is
    /// tombstoned. Non-promoted pads require `force` as the confirmation
    /// signal.
    pub fn delete_workpad(&self, pad_id: &str, force: bool) -> Result<()> {
        let mut pad = self.get_workpad(pad_id)?;
        if pad.status == WorkpadStatus::Deleted {
            return Ok(());
        }
        if pad.status != WorkpadStatus::Promoted && !force {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {} and not promoted; pass force to delete it",
                pad.status
            )));
        }
        let mut repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);

        if git.branch_exists(&pad.branch)? {
            // Cannot delete the checked-out branch; move to trunk first.
            if git.current_branch()?.as_deref() == Some(pad.branch.as_str()) {
                git.checkout(&repo.trunk_branch)?;
            }
            git.delete_branch(&pad.branch)?;
        }
        // Promoted pads keep their checkpoint tags on trunk history.
        if pad.status != WorkpadStatus::Promoted {
            for tag in git.list_tags(&ids::checkpoint_tag_glob(&pad.id))? {
                git.delete_tag(&tag)?;
            }
        }

        pad.status = WorkpadStatus::Deleted;
        pad.touch();
        self.catalog.put_workpad(pad.clone())?;
        repo.workpad_count = repo.workpad_count.saturating_sub(1);
        repo.touch();
        self.catalog.put_repo(repo)?;
        if self.catalog.active_workpad()?.as_deref() == Some(pad_id) {
            self.catalog.set_active_workpad(None)?;
        }

        log::info!("workpad {pad_id} deleted");
        self.events.publish(Event::WorkpadDeleted {
            pad_id: pad.id,
            repo_id: pad.repo_id,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Apply a unified diff to a workpad as a new checkpoint commit, tagged
    /// `pads/<pad-id>@tN`. On failure the working tree and index are reset
    /// to the pre-attempt state.
    pub fn apply_patch_as_checkpoint(
        &self,
        pad_id: &str,
        diff: &str,
        message: &str,
    ) -> Result<(String, String)> {
        let mut pad = self.get_workpad(pad_id)?;
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {}, not active",
                pad.status
            )));
        }
        let mut repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);

        if !git.branch_exists(&pad.branch)? {
            return Err(Error::InvariantViolation(format!(
                "workpad {pad_id} is active but branch {} is missing",
                pad.branch
            )));
        }
        git.checkout(&pad.branch)?;
        if git.is_dirty()? {
            return Err(Error::DirtyWorkingTree {
                path: repo.path.clone(),
            });
        }

        if let Err(err) = git.apply_patch(diff) {
            // Leave the tree exactly as it was before the attempt.
            git.reset_hard("HEAD")?;
            git.clean_untracked()?;
            let stderr = match err {
                Error::Git { stderr, .. } => stderr,
                other => other.to_string(),
            };
            return Err(Error::ApplyFailed { stderr });
        }
        if git.status()?.is_clean() {
            return Err(Error::ApplyFailed {
                stderr: "patch produced no changes".into(),
            });
        }

        let sha = git.commit(message)?;
        let ordinal = pad.next_ordinal();
        let tag = ids::checkpoint_tag(&pad.id, ordinal);
        git.tag(&tag, &sha)?;

        let parent = format!("{sha}^");
        let changes = git.diff_name_status(&parent, &sha)?;
        let totals = git.diff_numstat(&parent, &sha)?;
        let checkpoint = CheckpointRecord {
            id: format!("t{ordinal}"),
            ordinal,
            commit: sha.clone(),
            files: changes.into_iter().map(|c| c.path).collect(),
            additions: totals.additions,
            deletions: totals.deletions,
            created_at: Utc::now(),
            message: message.to_string(),
        };
        let checkpoint_id = checkpoint.id.clone();
        pad.checkpoints.push(checkpoint);
        pad.touch();
        self.catalog.put_workpad(pad.clone())?;
        repo.touch();
        self.catalog.put_repo(repo)?;

        log::info!("checkpoint {checkpoint_id} on {pad_id} at {}", &sha[..12.min(sha.len())]);
        self.events.publish(Event::CheckpointCreated {
            pad_id: pad.id,
            checkpoint_id: checkpoint_id.clone(),
            commit: sha.clone(),
        });
        Ok((checkpoint_id, sha))
    }

    /// Dry-run a patch against a workpad's tip. `Ok(None)` means it would
    /// apply cleanly; `Ok(Some(stderr))` carries git's per-file complaints.
    /// The working tree is left on the workpad branch but otherwise
    /// untouched.
    pub fn check_patch_against_pad(&self, pad_id: &str, diff: &str) -> Result<Option<String>> {
        let pad = self.get_workpad(pad_id)?;
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {}, not active",
                pad.status
            )));
        }
        let repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        if !git.branch_exists(&pad.branch)? {
            return Err(Error::InvariantViolation(format!(
                "workpad {pad_id} is active but branch {} is missing",
                pad.branch
            )));
        }
        git.checkout(&pad.branch)?;
        git.apply_check(diff)
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Non-destructive promotion check.
    pub fn can_promote(&self, pad_id: &str) -> Result<PromoteCheck> {
        let pad = self.get_workpad(pad_id)?;
        let repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        self.promote_check_inner(&pad, &repo)
    }

    fn promote_check_inner(&self, pad: &WorkpadRecord, repo: &RepoRecord) -> Result<PromoteCheck> {
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {} is {}, not active",
                pad.id, pad.status
            )));
        }
        let git = self.git_for(repo);
        if !git.branch_exists(&pad.branch)? {
            return Err(Error::InvariantViolation(format!(
                "workpad {} is active but branch {} is missing",
                pad.id, pad.branch
            )));
        }
        let trunk_tip = git.rev_parse(&repo.trunk_branch)?;
        let counts = git.ahead_behind(&repo.trunk_branch, &pad.branch)?;

        let blocked = if counts.behind > 0 {
            Some(PromoteBlocked::Diverged {
                trunk_tip,
                base_commit: pad.base_commit.clone(),
            })
        } else if counts.ahead == 0 {
            Some(PromoteBlocked::Empty)
        } else if git.is_dirty()? {
            Some(PromoteBlocked::Conflicts)
        } else {
            None
        };

        Ok(PromoteCheck {
            eligible: blocked.is_none(),
            blocked,
            ahead: counts.ahead,
            behind: counts.behind,
        })
    }

    /// Fast-forward trunk to the workpad tip. Atomic from the caller's view:
    /// on success trunk has advanced, the pad branch is gone, and the record
    /// is PROMOTED with the merged sha stamped; on failure nothing changed.
    pub fn promote(&self, pad_id: &str) -> Result<String> {
        let mut pad = self.get_workpad(pad_id)?;
        let mut repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());

        let check = self.promote_check_inner(&pad, &repo)?;
        if let Some(blocked) = check.blocked {
            return Err(Error::CannotPromote(blocked));
        }

        let git = self.git_for(&repo);
        git.checkout(&repo.trunk_branch)?;
        git.merge_ff_only(&pad.branch)?;
        let tip = git.head()?;
        git.delete_branch(&pad.branch)?;

        pad.status = WorkpadStatus::Promoted;
        pad.promoted_commit = Some(tip.clone());
        pad.touch();
        self.catalog.put_workpad(pad.clone())?;
        repo.workpad_count = repo.workpad_count.saturating_sub(1);
        repo.touch();
        self.catalog.put_repo(repo)?;
        if self.catalog.active_workpad()?.as_deref() == Some(pad_id) {
            self.catalog.set_active_workpad(None)?;
        }

        log::info!("workpad {pad_id} promoted; trunk at {}", &tip[..12.min(tip.len())]);
        self.events.publish(Event::WorkpadPromoted {
            pad_id: pad.id,
            repo_id: pad.repo_id,
            commit: tip.clone(),
        });
        Ok(tip)
    }

    // ------------------------------------------------------------------
    // Trunk operations
    // ------------------------------------------------------------------

    /// Put a revert commit for the trunk tip on top of trunk. History is
    /// preserved, never rewritten.
    pub fn revert_last(&self, repo_id: &str) -> Result<String> {
        let mut repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);

        git.checkout(&repo.trunk_branch)?;
        let reverted = git.head()?;
        let revert_sha = git.revert_head()?;

        repo.touch();
        self.catalog.put_repo(repo)?;
        log::info!(
            "trunk of {repo_id} reverted: {} undone by {}",
            &reverted[..12.min(reverted.len())],
            &revert_sha[..12.min(revert_sha.len())]
        );
        self.events.publish(Event::TrunkReverted {
            repo_id: repo_id.to_string(),
            reverted_commit: reverted,
            revert_commit: revert_sha.clone(),
        });
        Ok(revert_sha)
    }

    // ------------------------------------------------------------------
    // Read-side queries
    // ------------------------------------------------------------------

    /// Unified diff of a workpad against a base (its recorded base commit
    /// when `None`).
    pub fn get_diff(&self, pad_id: &str, base: Option<&str>) -> Result<String> {
        let pad = self.get_workpad(pad_id)?;
        let repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);

        let head = self.pad_tip(&git, &pad)?;
        let base = base.unwrap_or(&pad.base_commit);
        git.diff_range(base, &head)
    }

    /// Tip commit of a workpad: the branch when it still exists, the stamped
    /// promoted commit afterwards.
    fn pad_tip(&self, git: &GitRepo, pad: &WorkpadRecord) -> Result<String> {
        if git.branch_exists(&pad.branch)? {
            return git.rev_parse(&pad.branch);
        }
        pad.promoted_commit.clone().ok_or_else(|| {
            Error::InvariantViolation(format!(
                "workpad {} has neither a branch nor a promoted commit",
                pad.id
            ))
        })
    }

    /// Recent commits on a branch (trunk when `None`).
    pub fn get_history(
        &self,
        repo_id: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        git.log(Some(branch.unwrap_or(&repo.trunk_branch)), limit)
    }

    /// Working-tree status. When a workpad id is given it is validated to
    /// belong to the repository (the working tree is shared either way).
    pub fn get_status(&self, repo_id: &str, pad_id: Option<&str>) -> Result<StatusSummary> {
        let repo = self.get_repo(repo_id)?;
        if let Some(pad_id) = pad_id {
            let pad = self.get_workpad(pad_id)?;
            if pad.repo_id != repo_id {
                return Err(Error::InvalidInput(format!(
                    "workpad {pad_id} does not belong to repository {repo_id}"
                )));
            }
        }
        let lock = self.repo_lock(repo_id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        self.git_for(&repo).status()
    }

    /// File content at a ref (trunk when `None`), with a binary flag.
    pub fn get_file_content(
        &self,
        repo_id: &str,
        path: &str,
        reference: Option<&str>,
    ) -> Result<FileContent> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        git.show_file(reference.unwrap_or(&repo.trunk_branch), path)
    }

    /// Commits ahead/behind of trunk for a workpad.
    pub fn get_commits_ahead_behind(&self, pad_id: &str) -> Result<AheadBehind> {
        let pad = self.get_workpad(pad_id)?;
        let repo = self.get_repo(&pad.repo_id)?;
        let lock = self.repo_lock(&repo.id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let git = self.git_for(&repo);
        let head = self.pad_tip(&git, &pad)?;
        git.ahead_behind(&repo.trunk_branch, &head)
    }

    /// The diff a single trunk commit introduced (used to recreate reverted
    /// changes as new workpads).
    pub fn get_commit_diff(&self, repo_id: &str, commit: &str) -> Result<String> {
        let repo = self.get_repo(repo_id)?;
        let lock = self.repo_lock(repo_id);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        self.git_for(&repo).commit_diff(commit)
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    /// Delete ACTIVE workpads whose last activity is older than `days`.
    /// Returns the ids that were reclaimed.
    pub fn cleanup_stale(&self, days: u64) -> Result<Vec<String>> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut reclaimed = Vec::new();
        for pad in self.catalog.list_workpads()? {
            if pad.is_active() && pad.last_activity < cutoff {
                self.delete_workpad(&pad.id, true)?;
                reclaimed.push(pad.id);
            }
        }
        if !reclaimed.is_empty() {
            log::info!("reclaimed {} stale workpad(s)", reclaimed.len());
        }
        Ok(reclaimed)
    }
}
