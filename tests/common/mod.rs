// Helpers are shared across integration test binaries; not every binary uses
// every helper.
#![allow(dead_code)]

//! Test harness for trunkpad integration tests.
//!
//! `TestCore` opens a full engine over a temporary base directory, so every
//! test gets an isolated catalog and repository store that disappear on
//! drop. Repositories are seeded from in-memory zip archives; direct git
//! manipulation (for simulating external trunk changes) goes through
//! `raw_git`, which pins identity and disables global config so tests behave
//! the same on any machine.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use trunkpad::config::{CoreConfig, StateLayout};
use trunkpad::events::NullSink;
use trunkpad::store::RepoRecord;
use trunkpad::Core;

/// A fully wired engine rooted in a temp directory.
pub struct TestCore {
    pub core: Core,
    _base: TempDir,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let base = TempDir::new().expect("temp base dir");
        let layout = StateLayout::new(base.path());
        let core = Core::open(layout, config, Arc::new(NullSink)).expect("open core");
        Self { core, _base: base }
    }

    /// Seed a repository from `files` (path, content) pairs.
    pub fn seed_repo(&self, name: &str, files: &[(&str, &str)]) -> RepoRecord {
        let bytes = zip_archive(files);
        self.core
            .store
            .init_from_zip(&bytes, name)
            .expect("init repo from zip")
    }

    /// Seed the standard one-file python project used by most scenarios.
    pub fn seed_hello_repo(&self) -> RepoRecord {
        self.seed_repo("hello", &[("main.py", "print('hello')\n")])
    }
}

/// Build a zip archive in memory.
pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options: zip::write::SimpleFileOptions = Default::default();
        for (name, content) in files {
            writer.start_file(*name, options).expect("zip entry");
            writer.write_all(content.as_bytes()).expect("zip content");
        }
        writer.finish().expect("zip finish");
    }
    cursor.into_inner()
}

/// Run a git command directly against a repo working tree, bypassing the
/// engine. Used to simulate external changes (e.g. trunk advancing).
pub fn raw_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "External")
        .env("GIT_AUTHOR_EMAIL", "external@localhost")
        .env("GIT_COMMITTER_NAME", "External")
        .env("GIT_COMMITTER_EMAIL", "external@localhost")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Commit a file straight onto a branch, as an external actor would.
pub fn external_commit(repo: &RepoRecord, branch: &str, file: &str, content: &str) -> String {
    raw_git(&repo.path, &["checkout", "--quiet", branch]);
    std::fs::write(repo.path.join(file), content).expect("write file");
    raw_git(&repo.path, &["add", "--all"]);
    raw_git(&repo.path, &["commit", "--quiet", "-m", "external change"]);
    raw_git(&repo.path, &["rev-parse", "HEAD"]).trim().to_string()
}

/// Unified diff creating `path` with the given lines.
pub fn new_file_patch(path: &str, lines: &[&str]) -> String {
    let mut diff = format!("diff --git a/{path} b/{path}\n");
    diff.push_str("new file mode 100644\n");
    diff.push_str("--- /dev/null\n");
    diff.push_str(&format!("+++ b/{path}\n"));
    diff.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
    for line in lines {
        diff.push_str(&format!("+{line}\n"));
    }
    diff
}

/// Unified diff replacing a single-line file's content.
pub fn replace_line_patch(path: &str, old: &str, new: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -1 +1 @@\n-{old}\n+{new}\n"
    )
}

/// A test config that always passes.
pub fn passing_test(name: &str) -> trunkpad::testing::TestConfig {
    trunkpad::testing::TestConfig::new(name, "true").timeout_secs(30)
}

/// A test config that fails with an assertion-style message.
pub fn assertion_failure_test(name: &str, message: &str) -> trunkpad::testing::TestConfig {
    trunkpad::testing::TestConfig::new(
        name,
        format!("echo 'AssertionError: {message}' >&2; exit 1"),
    )
    .timeout_secs(30)
}
