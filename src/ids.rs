//! Identifier minting and title slugging.
//!
//! All catalog identifiers are opaque strings: a type prefix plus a short
//! SHA-256-derived suffix. The hash input mixes the display name, the wall
//! clock, and a process-local counter so ids stay unique without coordination.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

/// Length of the hex suffix appended to id prefixes.
const SUFFIX_LEN: usize = 12;

/// Maximum accepted workpad title length, in characters.
pub const MAX_TITLE_LEN: usize = 100;

static MINT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn short_hash(seed: &str) -> String {
    let counter = MINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(counter.to_le_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(SUFFIX_LEN);
    for byte in digest.iter().take(SUFFIX_LEN.div_ceil(2)) {
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(SUFFIX_LEN);
    out
}

/// Mint a repository id (`repo_<hex>`).
pub fn repo_id(name: &str) -> String {
    format!("repo_{}", short_hash(name))
}

/// Mint a workpad id (`pad_<hex>`).
pub fn workpad_id(title: &str) -> String {
    format!("pad_{}", short_hash(title))
}

/// Mint a CI run id (`ci_<hex>`).
pub fn ci_run_id(commit: &str) -> String {
    format!("ci_{}", short_hash(commit))
}

/// Validate a workpad title: non-blank and at most [`MAX_TITLE_LEN`] chars.
pub fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("title must not be empty".to_string());
    }
    let len = title.chars().count();
    if len > MAX_TITLE_LEN {
        return Err(format!(
            "title is {len} characters, maximum is {MAX_TITLE_LEN}"
        ));
    }
    Ok(())
}

/// Slug a workpad title for use in a branch name.
///
/// Lower-cases, collapses every run of characters outside `[a-z0-9]` into a
/// single `-`, and trims leading/trailing `-`. Titles that slug to nothing
/// (e.g. all punctuation) fall back to `"pad"` so the branch name stays valid.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(lower);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("pad");
    }
    slug
}

/// Branch-name timestamp suffix (`yyyymmdd-hhmmss`, local time).
pub fn branch_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Full workpad branch name for a title: `pads/<slug>-<yyyymmdd-hhmmss>`.
pub fn workpad_branch(title: &str) -> String {
    format!("pads/{}-{}", slugify(title), branch_timestamp())
}

/// Checkpoint tag name: `pads/<pad-id>@t<ordinal>`.
pub fn checkpoint_tag(pad_id: &str, ordinal: u32) -> String {
    format!("pads/{pad_id}@t{ordinal}")
}

/// Glob matching every checkpoint tag of a workpad.
pub fn checkpoint_tag_glob(pad_id: &str) -> String {
    format!("pads/{pad_id}@*")
}
