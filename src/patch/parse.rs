//! Unified-diff parsing.
//!
//! Parses `diff --git` file sections strictly enough to enumerate affected
//! files, count added/removed lines excluding headers, and check hunk
//! arithmetic. Content lines are kept verbatim; the engine never rewrites
//! diff bodies.

/// A parsed patch: an ordered list of file sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchSet {
    pub files: Vec<FilePatch>,
}

impl PatchSet {
    /// Total added lines across all hunks.
    pub fn additions(&self) -> usize {
        self.files.iter().map(FilePatch::additions).sum()
    }

    /// Total removed lines across all hunks.
    pub fn deletions(&self) -> usize {
        self.files.iter().map(FilePatch::deletions).sum()
    }

    /// Total hunk count.
    pub fn hunk_count(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }
}

/// One `diff --git` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Path on the old side (`None` for file creation).
    pub old_path: Option<String>,
    /// Path on the new side (`None` for file deletion).
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
    pub is_binary: bool,
    /// Whether a binary section carried an actual payload.
    pub has_binary_body: bool,
    /// The section's verbatim text, trailing newline included.
    pub raw: String,
}

impl FilePatch {
    /// The path this section is best known by: the new side, falling back to
    /// the old side for deletions.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    pub fn additions(&self) -> usize {
        self.hunks.iter().map(|h| h.additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.hunks.iter().map(|h| h.deletions).sum()
    }
}

/// One `@@ -a,b +c,d @@` hunk with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u64,
    pub old_count: u64,
    pub new_start: u64,
    pub new_count: u64,
    /// Body lines, prefixes included.
    pub lines: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
}

/// Outcome of a lenient parse: whatever could be parsed, plus every problem
/// found along the way.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub patch: PatchSet,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParseOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Strip `a/` / `b/` prefixes and quotes from a diff path token.
fn clean_path(token: &str) -> Option<String> {
    let token = token.trim().trim_matches('"');
    if token == "/dev/null" {
        return None;
    }
    let stripped = token
        .strip_prefix("a/")
        .or_else(|| token.strip_prefix("b/"))
        .unwrap_or(token);
    Some(stripped.to_string())
}

/// Parse a `@@ -a,b +c,d @@` header. Counts default to 1 when omitted.
fn parse_hunk_header(line: &str) -> Option<(u64, u64, u64, u64)> {
    let rest = line.strip_prefix("@@ -")?;
    let end = rest.find(" @@")?;
    let ranges = &rest[..end];
    let (old, new) = ranges.split_once(" +")?;

    fn parse_range(range: &str) -> Option<(u64, u64)> {
        match range.split_once(',') {
            Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
            None => Some((range.parse().ok()?, 1)),
        }
    }

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

/// Parse unified-diff text, collecting every error and warning instead of
/// stopping at the first.
pub fn parse_lenient(diff: &str) -> ParseOutcome {
    let mut out = ParseOutcome::default();

    if diff.trim().is_empty() {
        out.errors.push("patch is empty".to_string());
        return out;
    }
    if !diff.ends_with('\n') {
        out.warnings
            .push("patch does not end with a newline".to_string());
    }

    let lines: Vec<&str> = diff.lines().collect();
    let mut section_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("diff --git "))
        .map(|(i, _)| i)
        .collect();

    if section_starts.is_empty() {
        out.errors
            .push("no 'diff --git' header found".to_string());
        return out;
    }
    if section_starts[0] != 0 {
        let head = lines[..section_starts[0]]
            .iter()
            .any(|l| !l.trim().is_empty());
        if head {
            out.warnings
                .push("text before the first 'diff --git' header is ignored".to_string());
        }
    }

    section_starts.push(lines.len());
    for window in section_starts.windows(2) {
        let (start, end) = (window[0], window[1]);
        parse_section(&lines[start..end], start, &mut out);
    }
    out
}

fn parse_section(section: &[&str], offset: usize, out: &mut ParseOutcome) {
    let header = section[0];
    let line_no = |i: usize| offset + i + 1;

    // "diff --git a/<old> b/<new>"
    let rest = header.trim_start_matches("diff --git ").trim();
    let (old_token, new_token) = match rest.split_once(" b/") {
        Some((old, new)) => (old.to_string(), format!("b/{new}")),
        None => match rest.rsplit_once(' ') {
            Some((old, new)) => (old.to_string(), new.to_string()),
            None => {
                out.errors.push(format!(
                    "line {}: malformed file header {header:?}",
                    line_no(0)
                ));
                return;
            }
        },
    };

    let mut file = FilePatch {
        old_path: clean_path(&old_token),
        new_path: clean_path(&new_token),
        hunks: Vec::new(),
        is_binary: false,
        has_binary_body: false,
        raw: {
            let mut raw = section.join("\n");
            raw.push('\n');
            raw
        },
    };

    let mut saw_old_marker = false;
    let mut saw_new_marker = false;
    let mut current_hunk: Option<Hunk> = None;
    let mut index = 1;

    while index < section.len() {
        let line = section[index];

        if let Some(hunk) = current_hunk.as_mut() {
            match line.chars().next() {
                Some(' ' | '+' | '-' | '\\') => {
                    match line.chars().next() {
                        Some('+') => hunk.additions += 1,
                        Some('-') => hunk.deletions += 1,
                        _ => {}
                    }
                    hunk.lines.push(line.to_string());
                    index += 1;
                    continue;
                }
                _ => {
                    finish_hunk(current_hunk.take(), &mut file, line_no(index), out);
                }
            }
        }

        if line.starts_with("@@ ") || line.starts_with("@@-") {
            match parse_hunk_header(line) {
                Some((old_start, old_count, new_start, new_count)) => {
                    current_hunk = Some(Hunk {
                        old_start,
                        old_count,
                        new_start,
                        new_count,
                        lines: Vec::new(),
                        additions: 0,
                        deletions: 0,
                    });
                }
                None => {
                    out.errors.push(format!(
                        "line {}: malformed hunk header {line:?}",
                        line_no(index)
                    ));
                }
            }
        } else if let Some(path) = line.strip_prefix("--- ") {
            saw_old_marker = true;
            file.old_path = clean_path(path);
        } else if let Some(path) = line.strip_prefix("+++ ") {
            saw_new_marker = true;
            file.new_path = clean_path(path);
        } else if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.is_binary = true;
        } else if line == "GIT binary patch" {
            file.is_binary = true;
            // Payload lines follow until a blank line or the section ends.
            file.has_binary_body = section[index + 1..]
                .iter()
                .any(|l| !l.trim().is_empty());
            break;
        }
        // Anything else (index, mode, rename/copy metadata) is carried
        // verbatim in `raw` and needs no structure here.
        index += 1;
    }
    finish_hunk(current_hunk.take(), &mut file, line_no(section.len()), out);

    if file.is_binary {
        if !file.has_binary_body {
            out.warnings.push(format!(
                "binary section for {:?} has no payload",
                file.path()
            ));
        }
    } else {
        if saw_old_marker != saw_new_marker {
            out.errors.push(format!(
                "file section {:?} has an unpaired ---/+++ marker",
                file.path()
            ));
        }
        if !file.hunks.is_empty() && !(saw_old_marker && saw_new_marker) {
            out.errors.push(format!(
                "file section {:?} has hunks but no ---/+++ markers",
                file.path()
            ));
        }
    }

    out.patch.files.push(file);
}

fn finish_hunk(hunk: Option<Hunk>, file: &mut FilePatch, line_no: usize, out: &mut ParseOutcome) {
    let Some(hunk) = hunk else { return };

    let old_seen = hunk
        .lines
        .iter()
        .filter(|l| l.starts_with(' ') || l.starts_with('-'))
        .count() as u64;
    let new_seen = hunk
        .lines
        .iter()
        .filter(|l| l.starts_with(' ') || l.starts_with('+'))
        .count() as u64;
    if old_seen != hunk.old_count || new_seen != hunk.new_count {
        out.errors.push(format!(
            "before line {line_no}: hunk for {:?} declares -{},{} +{},{} but has {old_seen}/{new_seen} lines",
            file.path(),
            hunk.old_start,
            hunk.old_count,
            hunk.new_start,
            hunk.new_count,
        ));
    }
    file.hunks.push(hunk);
}
