//! Parsers for git plumbing output.
//!
//! Pure functions over captured stdout, kept separate from subprocess
//! handling so they can be unit tested without a repository.

use chrono::{DateTime, Utc};

use super::{ChangeKind, CommitInfo, DiffTotals, FileChange, StatusSummary};
use crate::error::{Error, Result};

/// Field separator used in our `git log --format` strings (ASCII unit
/// separator, which cannot appear in commit subjects git prints).
pub(crate) const LOG_FIELD_SEP: char = '\x1f';

/// Parse `git status --porcelain` output into status buckets.
pub(crate) fn parse_porcelain_status(output: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();

    for line in output.lines() {
        if line.len() < 3 {
            continue;
        }
        let (code, path) = line.split_at(2);
        let path = path.trim_start().to_string();
        let mut chars = code.chars();
        let index = chars.next().unwrap_or(' ');
        let worktree = chars.next().unwrap_or(' ');

        if index == '?' && worktree == '?' {
            summary.untracked.push(path);
            continue;
        }
        if index != ' ' {
            summary.staged.push(path.clone());
        }
        if worktree != ' ' {
            summary.modified.push(path);
        }
    }

    summary
}

/// Parse `git diff --name-status` output.
///
/// Rename/copy lines carry two paths (`R100\told\tnew`); the new path wins.
pub(crate) fn parse_name_status(output: &str) -> Result<Vec<FileChange>> {
    let mut changes = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let code = parts
            .next()
            .ok_or_else(|| Error::Parse(format!("name-status line missing code: {line:?}")))?;
        let first_path = parts
            .next()
            .ok_or_else(|| Error::Parse(format!("name-status line missing path: {line:?}")))?;
        let second_path = parts.next();

        let kind = match code.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('M') => ChangeKind::Modified,
            Some('D') => ChangeKind::Deleted,
            Some('R') => ChangeKind::Renamed,
            Some('C') => ChangeKind::Copied,
            Some('T') => ChangeKind::TypeChanged,
            Some('U') => ChangeKind::Unmerged,
            other => {
                return Err(Error::Parse(format!(
                    "unknown name-status code {other:?} in line {line:?}"
                )));
            }
        };

        let path = match kind {
            ChangeKind::Renamed | ChangeKind::Copied => second_path.unwrap_or(first_path),
            _ => first_path,
        };
        changes.push(FileChange {
            kind,
            path: path.to_string(),
        });
    }

    Ok(changes)
}

/// Parse one `git diff --numstat` line into (added, deleted).
/// Returns `None` for binary entries (`-` counts) and non-numstat lines.
fn parse_numstat_line(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split('\t');
    let added_str = parts.next()?;
    let deleted_str = parts.next()?;
    parts.next()?; // must have a path component

    if added_str == "-" || deleted_str == "-" {
        return None;
    }

    let added = added_str.parse().ok()?;
    let deleted = deleted_str.parse().ok()?;
    Some((added, deleted))
}

/// Aggregate `git diff --numstat` output. Binary files count toward `files`
/// but contribute no line totals.
pub(crate) fn parse_numstat_totals(output: &str) -> DiffTotals {
    let mut totals = DiffTotals::default();
    for line in output.lines() {
        if let Some((added, deleted)) = parse_numstat_line(line) {
            totals.files += 1;
            totals.additions += added;
            totals.deletions += deleted;
        } else if !line.trim().is_empty() && line.contains('\t') {
            // Binary entry: "-\t-\tpath"
            totals.files += 1;
        }
    }
    totals
}

/// Parse `git log --format=%H<sep>%h<sep>%an<sep>%ct<sep>%s` output.
pub(crate) fn parse_log_records(output: &str) -> Result<Vec<CommitInfo>> {
    let mut commits = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(5, LOG_FIELD_SEP).collect();
        let [sha, short_sha, author, timestamp, subject] = fields.as_slice() else {
            return Err(Error::Parse(format!("malformed log record: {line:?}")));
        };
        let seconds: i64 = timestamp
            .trim()
            .parse()
            .map_err(|e| Error::Parse(format!("bad commit timestamp {timestamp:?}: {e}")))?;
        let time = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| Error::Parse(format!("out-of-range commit timestamp {seconds}")))?;

        commits.push(CommitInfo {
            sha: sha.to_string(),
            short_sha: short_sha.to_string(),
            author: author.to_string(),
            time,
            subject: subject.to_string(),
        });
    }

    Ok(commits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_buckets() {
        let output = " M src/lib.rs\nM  src/main.rs\nMM both.rs\n?? new.txt\n";
        let summary = parse_porcelain_status(output);
        assert_eq!(summary.modified, vec!["src/lib.rs", "both.rs"]);
        assert_eq!(summary.staged, vec!["src/main.rs", "both.rs"]);
        assert_eq!(summary.untracked, vec!["new.txt"]);
        assert!(!summary.is_clean());
    }

    #[test]
    fn porcelain_empty_is_clean() {
        let summary = parse_porcelain_status("");
        assert!(summary.is_clean());
    }

    #[test]
    fn name_status_basic() {
        let output = "A\thello.py\nM\tmain.py\nD\told.txt\n";
        let changes = parse_name_status(output).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].path, "hello.py");
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
    }

    #[test]
    fn name_status_rename_uses_new_path() {
        let output = "R100\told/name.rs\tnew/name.rs\n";
        let changes = parse_name_status(output).unwrap();
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "new/name.rs");
    }

    #[test]
    fn name_status_unknown_code_errors() {
        assert!(parse_name_status("Z\tweird.txt\n").is_err());
    }

    #[test]
    fn numstat_line_basic() {
        assert_eq!(parse_numstat_line("10\t5\tfile.rs"), Some((10, 5)));
        assert_eq!(parse_numstat_line("0\t8\tfile.rs"), Some((0, 8)));
    }

    #[test]
    fn numstat_line_binary_and_garbage() {
        assert_eq!(parse_numstat_line("-\t-\timage.png"), None);
        assert_eq!(parse_numstat_line(""), None);
        assert_eq!(parse_numstat_line("not a numstat line"), None);
    }

    #[test]
    fn numstat_totals_mixed() {
        let output = "10\t5\tsrc/main.rs\n-\t-\tlogo.png\n3\t2\tREADME.md\n";
        let totals = parse_numstat_totals(output);
        assert_eq!(totals.files, 3);
        assert_eq!(totals.additions, 13);
        assert_eq!(totals.deletions, 7);
    }

    #[test]
    fn numstat_totals_empty() {
        assert_eq!(parse_numstat_totals(""), DiffTotals::default());
    }

    #[test]
    fn log_records_roundtrip() {
        let sep = LOG_FIELD_SEP;
        let line = format!(
            "deadbeefcafe{sep}deadbee{sep}Trunkpad{sep}1700000000{sep}initial commit\n"
        );
        let commits = parse_log_records(&line).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, "deadbeefcafe");
        assert_eq!(commits[0].short_sha, "deadbee");
        assert_eq!(commits[0].author, "Trunkpad");
        assert_eq!(commits[0].time.timestamp(), 1_700_000_000);
        assert_eq!(commits[0].subject, "initial commit");
    }

    #[test]
    fn log_subject_may_contain_separator_free_text() {
        let sep = LOG_FIELD_SEP;
        let line = format!("a{sep}b{sep}c{sep}1700000000{sep}fix: handle tabs\tand colons\n");
        let commits = parse_log_records(&line).unwrap();
        assert_eq!(commits[0].subject, "fix: handle tabs\tand colons");
    }

    #[test]
    fn log_bad_timestamp_errors() {
        let sep = LOG_FIELD_SEP;
        let line = format!("a{sep}b{sep}c{sep}soon{sep}subject\n");
        assert!(parse_log_records(&line).is_err());
    }
}
