//! Git subprocess primitives and output parsing.
//!
//! Everything the engine does to a repository goes through [`GitRepo`], a
//! thin context over the `git` binary: scrubbed environment, fixed author
//! identity, and a wall-clock deadline on every invocation. Higher layers
//! never shell out on their own.

use chrono::{DateTime, Utc};

mod parse;
mod repository;

pub use repository::GitRepo;

pub(crate) use parse::{
    parse_log_records, parse_name_status, parse_numstat_totals, parse_porcelain_status,
};

/// One commit in a history listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub author: String,
    pub time: DateTime<Utc>,
    pub subject: String,
}

/// Commit counts between two refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct AheadBehind {
    /// Commits in head not reachable from base.
    pub ahead: usize,
    /// Commits in base not reachable from head.
    pub behind: usize,
}

/// How a file changed between two trees (`git diff --name-status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Unmerged,
}

/// One changed path with its change kind.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: String,
}

/// Working-tree status buckets (`git status --porcelain`).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusSummary {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

/// Aggregated line totals from `git diff --numstat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiffTotals {
    pub files: usize,
    pub additions: usize,
    pub deletions: usize,
}

/// File content fetched from a ref, with a binary heuristic applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub is_binary: bool,
}

impl FileContent {
    /// The content as UTF-8 text, when it is not binary.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_binary {
            None
        } else {
            std::str::from_utf8(&self.bytes).ok()
        }
    }
}
