//! Error types for trunkpad.
//!
//! One closed taxonomy for the whole engine. Variants carry typed payloads so
//! callers can branch on what happened; messages are plain text — styling and
//! hints belong to whatever surface wraps the engine.

use std::fmt;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// What kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Repository,
    Workpad,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository => write!(f, "repository"),
            Self::Workpad => write!(f, "workpad"),
        }
    }
}

/// Why a promotion was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteBlocked {
    /// Trunk has advanced past the workpad's base commit.
    Diverged { trunk_tip: String, base_commit: String },
    /// The workpad has no commits beyond its base.
    Empty,
    /// The trunk working tree has local modifications that would be clobbered.
    Conflicts,
}

impl PromoteBlocked {
    /// Stable reason token used in decisions and events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Diverged { .. } => "diverged",
            Self::Empty => "workpad-empty",
            Self::Conflicts => "has-conflicts",
        }
    }
}

/// How a single file in a patch fails to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The patch context does not match the file contents.
    ContextMismatch,
    /// The patch modifies or deletes a file that does not exist.
    MissingFile,
    /// The patch creates a file that already exists.
    AlreadyExists,
    /// git reported a conflict we could not classify further.
    Other,
}

/// Per-file detail for a patch that cannot apply cleanly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConflictInfo {
    /// Path relative to the repository root.
    pub path: String,
    pub kind: ConflictKind,
    /// The relevant line of `git apply --check` output.
    pub message: String,
}

impl fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Unified error type for all trunkpad operations.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied input failed validation (empty title, bad id, ...).
    InvalidInput(String),
    /// A repository or workpad id did not resolve.
    NotFound { kind: NotFoundKind, id: String },
    /// Catalog and on-disk git state disagree in a way the engine cannot
    /// repair on the spot (e.g. branch missing for an ACTIVE record).
    InvariantViolation(String),
    /// The working tree has uncommitted changes blocking the operation.
    DirtyWorkingTree { path: PathBuf },
    /// Fast-forward promotion refused; the repository is untouched.
    CannotPromote(PromoteBlocked),
    /// The unified diff text itself is malformed.
    InvalidPatchSyntax { errors: Vec<String> },
    /// The diff is well-formed but does not apply to the workpad tree.
    /// Kept distinct from [`Error::ApplyFailed`] so callers can offer
    /// conflict-specific recovery.
    PatchConflict { conflicts: Vec<ConflictInfo> },
    /// `git apply` failed for a reason other than a detected conflict.
    ApplyFailed { stderr: String },
    /// A test sandbox could not be started.
    SandboxSpawnFailed { test: String, detail: String },
    /// A test exceeded its wall-clock deadline.
    TestTimeout { test: String, timeout_secs: u64 },
    /// The trunk revert after a failed smoke run did not complete; trunk is
    /// still at the failing commit.
    RollbackFailed { repo_id: String, detail: String },
    /// An archive buffer could not be read as a usable source tree.
    InvalidArchive { detail: String },
    /// A git subprocess exited non-zero.
    Git { command: String, stderr: String },
    /// Git produced output the engine could not parse.
    Parse(String),
    /// The metadata catalog could not be read or written.
    Catalog { detail: String },
    /// The operation was cancelled by the caller.
    Cancelled,
    Io(std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::Git`] from a command and its stderr.
    pub(crate) fn git(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::NotFound { kind, id } => write!(f, "{kind} '{id}' not found"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            Self::DirtyWorkingTree { path } => {
                write!(
                    f,
                    "working tree at {} has uncommitted changes",
                    path.display()
                )
            }
            Self::CannotPromote(blocked) => match blocked {
                PromoteBlocked::Diverged {
                    trunk_tip,
                    base_commit,
                } => write!(
                    f,
                    "cannot promote: trunk has diverged (trunk at {trunk_tip}, workpad based on {base_commit})"
                ),
                PromoteBlocked::Empty => {
                    write!(f, "cannot promote: workpad has no commits beyond its base")
                }
                PromoteBlocked::Conflicts => {
                    write!(f, "cannot promote: trunk working tree has local changes")
                }
            },
            Self::InvalidPatchSyntax { errors } => {
                write!(f, "invalid patch syntax ({} error(s))", errors.len())?;
                for e in errors {
                    write!(f, "\n  - {e}")?;
                }
                Ok(())
            }
            Self::PatchConflict { conflicts } => {
                write!(f, "patch conflicts with {} file(s):", conflicts.len())?;
                for c in conflicts {
                    write!(f, "\n  - {c}")?;
                }
                Ok(())
            }
            Self::ApplyFailed { stderr } => write!(f, "patch application failed: {stderr}"),
            Self::SandboxSpawnFailed { test, detail } => {
                write!(f, "could not start sandbox for test '{test}': {detail}")
            }
            Self::TestTimeout { test, timeout_secs } => {
                write!(f, "test '{test}' exceeded its {timeout_secs}s deadline")
            }
            Self::RollbackFailed { repo_id, detail } => {
                write!(
                    f,
                    "rollback failed for {repo_id}: {detail} (trunk remains at the failing commit)"
                )
            }
            Self::InvalidArchive { detail } => write!(f, "invalid archive: {detail}"),
            Self::Git { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.trim().is_empty() {
                    write!(f, "\n  stderr: {}", stderr.trim())?;
                }
                Ok(())
            }
            Self::Parse(msg) => write!(f, "could not parse git output: {msg}"),
            Self::Catalog { detail } => write!(f, "catalog error: {detail}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
