//! The [`GitRepo`] subprocess context.

use std::io::Read;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use super::parse::LOG_FIELD_SEP;
use super::{
    AheadBehind, CommitInfo, DiffTotals, FileChange, FileContent, StatusSummary,
    parse_log_records, parse_name_status, parse_numstat_totals, parse_porcelain_status,
};
use crate::error::{Error, Result};

/// Identity stamped on every commit the engine creates.
const AUTHOR_NAME: &str = "Trunkpad";
const AUTHOR_EMAIL: &str = "trunkpad@localhost";

/// Bytes inspected for the NUL-byte binary heuristic (matches git's own).
const BINARY_SNIFF_LEN: usize = 8000;

/// Repository context for git operations.
///
/// Wraps one working tree and runs every git invocation with a scrubbed
/// environment, a fixed author identity, and a wall-clock deadline. All
/// engine components go through this type; none shell out independently.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    /// Create a context at the given working-tree path.
    pub fn at(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize a fresh repository with the given trunk branch and the
    /// engine's commit identity configured locally.
    pub fn init(&self, trunk_branch: &str) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        self.run(&["init", "--initial-branch", trunk_branch])?;
        self.run(&["config", "user.name", AUTHOR_NAME])?;
        self.run(&["config", "user.email", AUTHOR_EMAIL])?;
        Ok(())
    }

    /// Clone `url` into `dest` (single branch) and return a context over it.
    pub fn clone_from(url: &str, dest: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest_str = dest
            .to_str()
            .ok_or_else(|| Error::InvalidInput("non-UTF-8 destination path".to_string()))?;
        // Run from the parent so the clone target is a plain argument.
        let scratch = Self::at(dest.parent().unwrap_or(Path::new(".")), timeout);
        scratch.run(&["clone", "--single-branch", url, dest_str])?;
        let repo = Self::at(dest, timeout);
        repo.run(&["config", "user.name", AUTHOR_NAME])?;
        repo.run(&["config", "user.email", AUTHOR_EMAIL])?;
        Ok(repo)
    }

    // ------------------------------------------------------------------
    // Subprocess plumbing
    // ------------------------------------------------------------------

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args);
        cmd.current_dir(&self.path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("GIT_AUTHOR_NAME", AUTHOR_NAME);
        cmd.env("GIT_AUTHOR_EMAIL", AUTHOR_EMAIL);
        cmd.env("GIT_COMMITTER_NAME", AUTHOR_NAME);
        cmd.env("GIT_COMMITTER_EMAIL", AUTHOR_EMAIL);
        cmd
    }

    fn run_raw(&self, args: &[&str], input: Option<&[u8]>) -> Result<(bool, Vec<u8>, String)> {
        let cmd_str = format!("git {}", args.join(" "));
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        log::debug!("$ {cmd_str} [{}]", self.path.display());
        let t0 = Instant::now();
        let mut child = cmd.spawn()?;

        if let Some(data) = input {
            // Feed stdin from this thread; diffs are bounded in practice and
            // git drains its input before producing meaningful output.
            let mut stdin = child.stdin.take().expect("stdin was piped");
            stdin.write_all(data)?;
            drop(stdin);
        }

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf);
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            buf
        });

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                child.kill().ok();
                child.wait().ok();
                // Drain the readers so the threads do not leak.
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(Error::git(
                    cmd_str,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr_bytes = stderr_reader.join().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        log::debug!(
            "[git-trace] cmd=\"{cmd_str}\" dur={:.1}ms ok={}",
            t0.elapsed().as_secs_f64() * 1000.0,
            status.success()
        );

        Ok((status.success(), stdout, stderr))
    }

    /// Run a git command, returning stdout as UTF-8 text.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let (ok, stdout, stderr) = self.run_raw(args, None)?;
        if !ok {
            return Err(Error::git(format!("git {}", args.join(" ")), stderr));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Run a git command, returning raw stdout bytes.
    pub fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        let (ok, stdout, stderr) = self.run_raw(args, None)?;
        if !ok {
            return Err(Error::git(format!("git {}", args.join(" ")), stderr));
        }
        Ok(stdout)
    }

    /// Run a git command whose exit code is the answer
    /// (e.g. `merge-base --is-ancestor`).
    pub fn run_check(&self, args: &[&str]) -> Result<bool> {
        let (ok, _, _) = self.run_raw(args, None)?;
        Ok(ok)
    }

    /// Run a git command with bytes piped to stdin.
    pub fn run_with_input(&self, args: &[&str], input: &[u8]) -> Result<String> {
        let (ok, stdout, stderr) = self.run_raw(args, Some(input))?;
        if !ok {
            return Err(Error::git(format!("git {}", args.join(" ")), stderr));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    // ------------------------------------------------------------------
    // Refs and branches
    // ------------------------------------------------------------------

    /// Resolve a ref to a full commit sha.
    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        let out = self.run(&["rev-parse", "--verify", &format!("{reference}^{{commit}}")])?;
        Ok(out.trim().to_string())
    }

    /// Resolve a ref, returning `None` when it does not exist.
    pub fn try_rev_parse(&self, reference: &str) -> Result<Option<String>> {
        match self.rev_parse(reference) {
            Ok(sha) => Ok(Some(sha)),
            Err(Error::Git { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn head(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    /// Current branch name, or `None` for detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run(&["branch", "--show-current"])?;
        let branch = out.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.run_check(&["rev-parse", "--verify", &format!("refs/heads/{branch}")])
    }

    pub fn create_branch(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run(&["branch", branch, start_point])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run(&["branch", "-D", branch])?;
        Ok(())
    }

    pub fn checkout(&self, reference: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", reference])?;
        Ok(())
    }

    /// Local branch names matching a glob (all branches when `None`).
    pub fn list_branches(&self, glob: Option<&str>) -> Result<Vec<String>> {
        let mut args: Vec<&str> = vec!["branch", "--format=%(refname:short)", "--list"];
        if let Some(glob) = glob {
            args.push(glob);
        }
        let out = self.run(&args)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    pub fn tag(&self, name: &str, target: &str) -> Result<()> {
        self.run(&["tag", name, target])?;
        Ok(())
    }

    pub fn list_tags(&self, glob: &str) -> Result<Vec<String>> {
        let out = self.run(&["tag", "--list", glob])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.run(&["tag", "--delete", name])?;
        Ok(())
    }

    pub fn tag_target(&self, name: &str) -> Result<String> {
        self.rev_parse(name)
    }

    // ------------------------------------------------------------------
    // History and ancestry
    // ------------------------------------------------------------------

    /// Whether `base` is an ancestor of `head` (a fast-forward would work).
    pub fn is_ancestor(&self, base: &str, head: &str) -> Result<bool> {
        self.run_check(&["merge-base", "--is-ancestor", base, head])
    }

    fn count_commits(&self, base: &str, head: &str) -> Result<usize> {
        let range = format!("{base}..{head}");
        let out = self.run(&["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .map_err(|e| Error::Parse(format!("commit count {:?}: {e}", out.trim())))
    }

    /// Commits ahead/behind between two refs.
    pub fn ahead_behind(&self, base: &str, head: &str) -> Result<AheadBehind> {
        Ok(AheadBehind {
            ahead: self.count_commits(base, head)?,
            behind: self.count_commits(head, base)?,
        })
    }

    /// Recent commits on a ref (HEAD when `None`), newest first.
    pub fn log(&self, reference: Option<&str>, limit: usize) -> Result<Vec<CommitInfo>> {
        let format = format!(
            "--format=%H{sep}%h{sep}%an{sep}%ct{sep}%s",
            sep = LOG_FIELD_SEP
        );
        let limit = limit.to_string();
        let mut args: Vec<&str> = vec!["log", &format, "-n", &limit];
        if let Some(reference) = reference {
            args.push(reference);
        }
        let out = self.run(&args)?;
        parse_log_records(&out)
    }

    // ------------------------------------------------------------------
    // Working tree
    // ------------------------------------------------------------------

    pub fn status(&self) -> Result<StatusSummary> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(parse_porcelain_status(&out))
    }

    pub fn is_dirty(&self) -> Result<bool> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    pub fn add_all(&self) -> Result<()> {
        self.run(&["add", "--all"])?;
        Ok(())
    }

    /// Commit staged changes and return the new sha.
    pub fn commit(&self, message: &str) -> Result<String> {
        self.run(&["commit", "--quiet", "-m", message])?;
        self.head()
    }

    /// Reset working tree and index to a ref, discarding local changes.
    pub fn reset_hard(&self, reference: &str) -> Result<()> {
        self.run(&["reset", "--hard", "--quiet", reference])?;
        Ok(())
    }

    /// Remove untracked files and directories.
    pub fn clean_untracked(&self) -> Result<()> {
        self.run(&["clean", "-fdq"])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Merging and reverting
    // ------------------------------------------------------------------

    /// Fast-forward the checked-out branch to `reference`; refuses anything
    /// that is not a fast-forward.
    pub fn merge_ff_only(&self, reference: &str) -> Result<()> {
        self.run(&["merge", "--ff-only", "--quiet", reference])?;
        Ok(())
    }

    /// Revert HEAD with a generated message; returns the revert commit sha.
    pub fn revert_head(&self) -> Result<String> {
        self.run(&["revert", "--no-edit", "HEAD"])?;
        self.head()
    }

    // ------------------------------------------------------------------
    // Diffs and patches
    // ------------------------------------------------------------------

    /// Unified diff between two refs.
    pub fn diff_range(&self, base: &str, head: &str) -> Result<String> {
        self.run(&["diff", base, head])
    }

    /// Name-status changes between two refs.
    pub fn diff_name_status(&self, base: &str, head: &str) -> Result<Vec<FileChange>> {
        let out = self.run(&["diff", "--name-status", base, head])?;
        parse_name_status(&out)
    }

    /// Aggregated numstat totals between two refs.
    pub fn diff_numstat(&self, base: &str, head: &str) -> Result<DiffTotals> {
        let out = self.run(&["diff", "--numstat", base, head])?;
        Ok(parse_numstat_totals(&out))
    }

    /// The diff a single commit introduced relative to its first parent.
    pub fn commit_diff(&self, sha: &str) -> Result<String> {
        self.run(&["diff", &format!("{sha}^"), sha])
    }

    /// Dry-run a patch against the working tree. `Ok(None)` means it applies;
    /// `Ok(Some(stderr))` carries git's per-file complaints.
    pub fn apply_check(&self, diff: &str) -> Result<Option<String>> {
        let (ok, _, stderr) = self.run_raw(&["apply", "--check", "--verbose"], Some(diff.as_bytes()))?;
        Ok(if ok { None } else { Some(stderr) })
    }

    /// Apply a patch to the working tree and index.
    pub fn apply_patch(&self, diff: &str) -> Result<()> {
        self.run_with_input(&["apply", "--index"], diff.as_bytes())?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tree contents
    // ------------------------------------------------------------------

    /// All tracked paths at a ref.
    pub fn list_files(&self, reference: &str) -> Result<Vec<String>> {
        let out = self.run(&["ls-tree", "-r", "--name-only", reference])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// File content at a ref, with git's NUL-byte binary heuristic applied.
    pub fn show_file(&self, reference: &str, path: &str) -> Result<FileContent> {
        let bytes = self.run_bytes(&["show", &format!("{reference}:{path}")])?;
        let is_binary = bytes
            .iter()
            .take(BINARY_SNIFF_LEN)
            .any(|&b| b == 0);
        Ok(FileContent { bytes, is_binary })
    }
}
