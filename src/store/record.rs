//! Catalog record types.
//!
//! These are the durable shapes the engine persists: one record per
//! repository and one per workpad, each holding the other only by id.
//! Checkpoints are embedded in their workpad, ordered by ordinal.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a repository's content originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RepoOrigin {
    Zip,
    GitUrl,
}

/// Workpad lifecycle state. Transitions are monotone:
/// ACTIVE → PROMOTED or ACTIVE → DELETED, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkpadStatus {
    Active,
    Promoted,
    Deleted,
}

/// Last known test verdict for a workpad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TestStatus {
    None,
    Green,
    Red,
}

/// One repository under engine management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: String,
    pub name: String,
    /// Absolute path of the working tree on disk.
    pub path: PathBuf,
    /// Trunk branch name; immutable after creation.
    pub trunk_branch: String,
    pub origin: RepoOrigin,
    /// Archive name or clone URL, depending on origin.
    pub origin_ref: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Number of non-deleted workpads.
    pub workpad_count: u64,
}

impl RepoRecord {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// One checkpoint: a commit on a workpad branch created by applying a patch,
/// tagged `pads/<pad-id>@t<ordinal>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// `t1`, `t2`, ... dense per workpad.
    pub id: String,
    pub ordinal: u32,
    pub commit: String,
    /// Paths the checkpoint's patch touched.
    pub files: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// One workpad: an ephemeral branch over a trunk base commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkpadRecord {
    pub id: String,
    pub repo_id: String,
    pub title: String,
    /// `pads/<slug>-<yyyymmdd-hhmmss>`.
    pub branch: String,
    /// Trunk tip at creation time; the branch is always descended from it.
    pub base_commit: String,
    pub status: WorkpadStatus,
    pub test_status: TestStatus,
    pub checkpoints: Vec<CheckpointRecord>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// The commit merged into trunk; set exactly when status is PROMOTED.
    pub promoted_commit: Option<String>,
}

impl WorkpadRecord {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Ordinal the next checkpoint will get.
    pub fn next_ordinal(&self) -> u32 {
        self.checkpoints.len() as u32 + 1
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkpadStatus::Active
    }
}
