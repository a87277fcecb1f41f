//! Sandboxed execution of a single test command.
//!
//! The [`Sandbox`] trait is the isolation contract; [`ProcessSandbox`] is the
//! bundled implementation. It gives each test a private copy of the source
//! tree (so the workpad tree is never writable from a test), a scratch
//! directory discarded on exit, a whitelisted environment, and a hard
//! wall-clock deadline. Memory/CPU caps and network shaping are carried in
//! the spec for mechanism-backed implementations (containers, jails) to
//! enforce; the process impl records them and applies what a plain process
//! can.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use super::CancelToken;
use crate::error::{Error, Result};

/// Environment variables forwarded from the host into every sandbox.
const ENV_WHITELIST: &[&str] = &["PATH", "HOME", "LANG", "TERM"];

/// How often a running sandbox checks its deadline and cancel signal.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Marker appended when captured output hits the byte cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Everything a sandbox needs to run one test.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub test_name: String,
    /// Shell command, run with `sh -c`.
    pub command: String,
    /// Tree the test sees; the sandbox must not let the test mutate it.
    pub source_tree: std::path::PathBuf,
    /// Directory relative to the tree root to run in.
    pub working_dir: Option<String>,
    /// Extra environment on top of the whitelist.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub network_enabled: bool,
    pub mem_mib: u64,
    pub cpus: u32,
    /// Per-stream capture cap in bytes.
    pub output_cap: usize,
}

/// What happened inside the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    /// Exit code; `None` when the process was killed (timeout/cancel).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Isolation contract for one test execution.
pub trait Sandbox: Send + Sync {
    fn execute(&self, spec: &SandboxSpec, cancel: &CancelToken) -> Result<SandboxOutput>;
}

/// Process-backed sandbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSandbox;

impl Sandbox for ProcessSandbox {
    fn execute(&self, spec: &SandboxSpec, cancel: &CancelToken) -> Result<SandboxOutput> {
        let scratch = tempfile::tempdir().map_err(|e| Error::SandboxSpawnFailed {
            test: spec.test_name.clone(),
            detail: format!("scratch dir: {e}"),
        })?;
        let tree = scratch.path().join("tree");
        copy_tree(&spec.source_tree, &tree).map_err(|e| Error::SandboxSpawnFailed {
            test: spec.test_name.clone(),
            detail: format!("tree copy: {e}"),
        })?;
        let work = scratch.path().join("work");
        std::fs::create_dir_all(&work)?;

        let cwd = match &spec.working_dir {
            Some(dir) => tree.join(dir),
            None => tree.clone(),
        };
        if !cwd.is_dir() {
            return Err(Error::SandboxSpawnFailed {
                test: spec.test_name.clone(),
                detail: format!("working directory {} does not exist", cwd.display()),
            });
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&spec.command);
        cmd.current_dir(&cwd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear();
        for key in ENV_WHITELIST {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("TMPDIR", &work);
        cmd.env("TRUNKPAD_SCRATCH", &work);
        if !spec.network_enabled {
            // Best-effort offline hint for tools that honor it; real network
            // isolation belongs to mechanism-backed sandboxes.
            cmd.env("NO_NETWORK", "1");
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        log::debug!(
            "sandbox {}: sh -c {:?} (timeout {}s, mem {} MiB, cpus {})",
            spec.test_name,
            spec.command,
            spec.timeout.as_secs(),
            spec.mem_mib,
            spec.cpus
        );

        let mut child = cmd.spawn().map_err(|e| Error::SandboxSpawnFailed {
            test: spec.test_name.clone(),
            detail: e.to_string(),
        })?;

        let stdout_pipe = child.stdout.take().expect("stdout was piped");
        let stderr_pipe = child.stderr.take().expect("stderr was piped");
        let cap = spec.output_cap;
        let stdout_reader = std::thread::spawn(move || read_capped(stdout_pipe, cap));
        let stderr_reader = std::thread::spawn(move || read_capped(stderr_pipe, cap));

        let started = Instant::now();
        let (exit_code, timed_out, cancelled) = loop {
            if cancel.is_cancelled() {
                child.kill().ok();
                child.wait().ok();
                break (None, false, true);
            }
            if started.elapsed() >= spec.timeout {
                child.kill().ok();
                child.wait().ok();
                break (None, true, false);
            }
            match child.wait_timeout(POLL_INTERVAL)? {
                Some(status) => break (status.code(), false, false),
                None => continue,
            }
        };

        // After a kill, orphaned grandchildren can keep the pipes open
        // indefinitely; give the readers a short grace period instead of
        // blocking the scheduler on them.
        let graceful = exit_code.is_some();
        let stdout = collect_reader(stdout_reader, graceful);
        let stderr = collect_reader(stderr_reader, graceful);

        Ok(SandboxOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
            cancelled,
        })
    }
}

fn collect_reader(handle: std::thread::JoinHandle<String>, graceful: bool) -> String {
    if graceful {
        return handle.join().unwrap_or_default();
    }
    for _ in 0..20 {
        if handle.is_finished() {
            return handle.join().unwrap_or_default();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    // The reader thread stays parked on the pipe until the last orphan
    // exits; its output is lost.
    "[output unavailable: sandbox terminated]".to_string()
}

/// Read a stream up to `cap` bytes; keep draining past the cap (so the child
/// never blocks on a full pipe) but discard the excess and append a marker.
fn read_capped(mut stream: impl Read, cap: usize) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

/// Recursively copy a directory, skipping `.git`. Symlinks are copied as
/// their targets' content (tests see plain files).
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
