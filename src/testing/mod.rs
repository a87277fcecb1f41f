//! The test orchestrator: runs test specifications over a workpad's working
//! tree in isolated sandboxes, honoring a dependency DAG.
//!
//! Scheduling model: a snapshot of the workpad tree is taken once per run
//! (under the repo lock), then worker threads execute sandboxes against it —
//! concurrently up to the configured cap in parallel mode, strictly in input
//! order in sequential mode. One [`TestResult`] is produced for every
//! requested config, in input order, whatever happens.

mod dag;
mod sandbox;

pub use dag::{DagError, DependencyDag};
pub use sandbox::{ProcessSandbox, Sandbox, SandboxOutput, SandboxSpec, TRUNCATION_MARKER};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::store::RepoStore;

/// Default per-test wall-clock deadline.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 300;

/// Cooperative cancellation signal shared between the caller, the scheduler,
/// and every in-flight sandbox.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One test specification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TestConfig {
    pub name: String,
    /// Shell command run inside the sandbox.
    pub command: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Names of tests that must PASS before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Directory relative to the tree root to run in.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra environment variables for the sandbox.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_timeout() -> u64 {
    DEFAULT_TEST_TIMEOUT_SECS
}

impl TestConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            depends_on: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Outcome of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Timeout,
    Error,
    Skipped,
}

/// One test's result. Exit code 0 corresponds exactly to [`RunStatus::Passed`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TestResult {
    pub name: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Why the test was skipped or errored without running.
    pub reason: Option<String>,
}

mod duration_secs {
    use super::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

impl TestResult {
    fn placeholder(name: &str, status: RunStatus, reason: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
            reason,
        }
    }
}

/// Counts over a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
    pub skipped: usize,
}

/// True when every result passed.
pub fn all_passed(results: &[TestResult]) -> bool {
    results.iter().all(|r| r.status == RunStatus::Passed)
}

/// Tally results by status.
pub fn summarize(results: &[TestResult]) -> RunSummary {
    let mut summary = RunSummary {
        total: results.len(),
        ..RunSummary::default()
    };
    for result in results {
        match result.status {
            RunStatus::Passed => summary.passed += 1,
            RunStatus::Failed => summary.failed += 1,
            RunStatus::Timeout => summary.timeout += 1,
            RunStatus::Error => summary.error += 1,
            RunStatus::Skipped => summary.skipped += 1,
        }
    }
    summary
}

/// Runs test configs over workpad trees in sandboxes.
pub struct TestOrchestrator {
    store: Arc<RepoStore>,
    sandbox: Arc<dyn Sandbox>,
}

impl TestOrchestrator {
    pub fn new(store: Arc<RepoStore>) -> Self {
        Self {
            store,
            sandbox: Arc::new(ProcessSandbox),
        }
    }

    /// Swap in an alternative sandbox mechanism (containers, jails).
    pub fn with_sandbox(store: Arc<RepoStore>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { store, sandbox }
    }

    /// Run `configs` against the workpad's current tree.
    ///
    /// Dependency problems (cycles, unknown or duplicate names) abort the
    /// run: an error is logged and an empty result list returned. Otherwise
    /// exactly one result per config comes back, in input order.
    pub fn run_tests(
        &self,
        pad_id: &str,
        configs: &[TestConfig],
        parallel: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<TestResult>> {
        if configs.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<(&str, &[String])> = configs
            .iter()
            .map(|c| (c.name.as_str(), c.depends_on.as_slice()))
            .collect();
        let dag = match DependencyDag::build(entries.iter().map(|(n, d)| (*n, *d))) {
            Ok(dag) => dag,
            Err(err) => {
                log::error!("test run for {pad_id} aborted: {err}");
                return Ok(Vec::new());
            }
        };

        let snapshot = self.snapshot_workpad_tree(pad_id)?;
        log::info!(
            "running {} test(s) for {pad_id} ({})",
            configs.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        let results = if parallel {
            self.run_parallel(configs, &dag, snapshot.path(), cancel)
        } else {
            self.run_sequential(configs, snapshot.path(), cancel)
        };

        // Input order, one result per config.
        let mut by_name: HashMap<String, TestResult> = results
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        Ok(configs
            .iter()
            .map(|c| {
                by_name.remove(&c.name).unwrap_or_else(|| {
                    TestResult::placeholder(
                        &c.name,
                        RunStatus::Error,
                        Some("no result produced".into()),
                    )
                })
            })
            .collect())
    }

    /// Copy the workpad's tree (sans `.git`) into a run-scoped snapshot,
    /// holding the repo lock only for the checkout + copy.
    fn snapshot_workpad_tree(&self, pad_id: &str) -> Result<tempfile::TempDir> {
        let pad = self.store.get_workpad(pad_id)?;
        if !pad.is_active() {
            return Err(Error::InvalidInput(format!(
                "workpad {pad_id} is {}, not active",
                pad.status
            )));
        }
        let repo = self.store.get_repo(&pad.repo_id)?;
        let lock = self.store.repo_lock(&repo.id);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let git = self.store.git_for(&repo);
        if !git.branch_exists(&pad.branch)? {
            return Err(Error::InvariantViolation(format!(
                "workpad {pad_id} is active but branch {} is missing",
                pad.branch
            )));
        }
        git.checkout(&pad.branch)?;

        let snapshot = tempfile::tempdir()?;
        sandbox::copy_tree(&repo.path, snapshot.path())?;
        Ok(snapshot)
    }

    fn spec_for(&self, config: &TestConfig, tree: &std::path::Path) -> SandboxSpec {
        let sandbox_cfg = &self.store.config().sandbox;
        SandboxSpec {
            test_name: config.name.clone(),
            command: config.command.clone(),
            source_tree: tree.to_path_buf(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            network_enabled: sandbox_cfg.network_enabled,
            mem_mib: sandbox_cfg.mem_mib,
            cpus: sandbox_cfg.cpus,
            output_cap: sandbox_cfg.output_capture_bytes,
        }
    }

    fn execute_one(
        sandbox: &dyn Sandbox,
        spec: &SandboxSpec,
        timeout_secs: u64,
        cancel: &CancelToken,
    ) -> TestResult {
        let started_at = Utc::now();
        let t0 = std::time::Instant::now();
        let outcome = sandbox.execute(spec, cancel);
        let duration = t0.elapsed();
        let finished_at = Utc::now();

        match outcome {
            Ok(out) => {
                let (status, reason) = if out.cancelled {
                    (RunStatus::Error, Some("cancelled".to_string()))
                } else if out.timed_out {
                    (
                        RunStatus::Timeout,
                        Some(format!("exceeded {timeout_secs}s deadline")),
                    )
                } else if out.exit_code == Some(0) {
                    (RunStatus::Passed, None)
                } else {
                    (RunStatus::Failed, None)
                };
                TestResult {
                    name: spec.test_name.clone(),
                    status,
                    exit_code: out.exit_code,
                    stdout: out.stdout,
                    stderr: out.stderr,
                    duration,
                    started_at,
                    finished_at,
                    reason,
                }
            }
            Err(err) => TestResult {
                name: spec.test_name.clone(),
                status: RunStatus::Error,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration,
                started_at,
                finished_at,
                reason: Some(err.to_string()),
            },
        }
    }

    fn run_sequential(
        &self,
        configs: &[TestConfig],
        tree: &std::path::Path,
        cancel: &CancelToken,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(configs.len());
        let mut short_circuit: Option<String> = None;

        for config in configs {
            if cancel.is_cancelled() {
                results.push(TestResult::placeholder(
                    &config.name,
                    RunStatus::Skipped,
                    Some("cancelled".into()),
                ));
                continue;
            }
            if let Some(reason) = &short_circuit {
                results.push(TestResult::placeholder(
                    &config.name,
                    RunStatus::Skipped,
                    Some(reason.clone()),
                ));
                continue;
            }
            let spec = self.spec_for(config, tree);
            let result =
                Self::execute_one(self.sandbox.as_ref(), &spec, config.timeout_secs, cancel);
            if result.status != RunStatus::Passed {
                short_circuit = Some(format!(
                    "previous test '{}' {}",
                    config.name, result.status
                ));
            }
            results.push(result);
        }
        results
    }

    fn run_parallel(
        &self,
        configs: &[TestConfig],
        dag: &DependencyDag,
        tree: &std::path::Path,
        cancel: &CancelToken,
    ) -> Vec<TestResult> {
        let max_parallel = self.store.config().sandbox.max_parallel.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<TestResult>();

        let mut statuses: HashMap<String, RunStatus> = HashMap::new();
        let mut results: Vec<TestResult> = Vec::with_capacity(configs.len());
        let mut launched: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut running = 0usize;

        loop {
            // Settle everything decidable without execution: skips from
            // failed dependencies, or cancellation.
            loop {
                let mut progressed = false;
                for config in configs {
                    if launched.contains(&config.name) {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        launched.insert(config.name.clone());
                        statuses.insert(config.name.clone(), RunStatus::Skipped);
                        results.push(TestResult::placeholder(
                            &config.name,
                            RunStatus::Skipped,
                            Some("cancelled".into()),
                        ));
                        progressed = true;
                        continue;
                    }
                    let failed_dep = dag
                        .deps_of(&config.name)
                        .iter()
                        .find(|d| statuses.get(*d).is_some_and(|s| *s != RunStatus::Passed));
                    if let Some(dep) = failed_dep {
                        let dep_status = statuses[dep];
                        launched.insert(config.name.clone());
                        statuses.insert(config.name.clone(), RunStatus::Skipped);
                        results.push(TestResult::placeholder(
                            &config.name,
                            RunStatus::Skipped,
                            Some(format!("dependency '{dep}' {dep_status}")),
                        ));
                        progressed = true;
                    }
                }
                if !progressed {
                    break;
                }
            }

            // Launch every ready config up to the parallelism cap.
            if !cancel.is_cancelled() {
                for config in configs {
                    if running >= max_parallel {
                        break;
                    }
                    if launched.contains(&config.name) {
                        continue;
                    }
                    let ready = dag
                        .deps_of(&config.name)
                        .iter()
                        .all(|d| statuses.get(d) == Some(&RunStatus::Passed));
                    if !ready {
                        continue;
                    }
                    launched.insert(config.name.clone());
                    running += 1;
                    let spec = self.spec_for(config, tree);
                    let timeout_secs = config.timeout_secs;
                    let sandbox = Arc::clone(&self.sandbox);
                    let cancel = cancel.clone();
                    let tx = tx.clone();
                    std::thread::spawn(move || {
                        let result =
                            Self::execute_one(sandbox.as_ref(), &spec, timeout_secs, &cancel);
                        // Receiver only drops after the scheduler is done.
                        let _ = tx.send(result);
                    });
                }
            }

            if running == 0 {
                if launched.len() == configs.len() {
                    break;
                }
                if cancel.is_cancelled() {
                    continue; // settle loop will skip the rest
                }
                // Nothing running and nothing ready: every remaining config
                // waits on something unsettled, which cannot happen in a
                // validated DAG. Guard against looping forever regardless.
                log::error!("scheduler stalled with {} test(s) unlaunched", configs.len() - launched.len());
                break;
            }

            match rx.recv() {
                Ok(result) => {
                    running -= 1;
                    statuses.insert(result.name.clone(), result.status);
                    results.push(result);
                }
                Err(_) => break,
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_defaults() {
        let config = TestConfig::new("unit", "pytest");
        assert_eq!(config.timeout_secs, DEFAULT_TEST_TIMEOUT_SECS);
        assert!(config.depends_on.is_empty());
        assert!(config.working_dir.is_none());

        let config = TestConfig::new("b", "x")
            .timeout_secs(5)
            .depends_on(&["a"])
            .working_dir("sub")
            .env_var("K", "V");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.depends_on, ["a"]);
        assert_eq!(config.working_dir.as_deref(), Some("sub"));
        assert_eq!(config.env, [("K".to_string(), "V".to_string())]);
    }

    #[test]
    fn cancel_token_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    fn result(name: &str, status: RunStatus) -> TestResult {
        TestResult::placeholder(name, status, None)
    }

    #[test]
    fn summarize_counts_every_status() {
        let results = vec![
            result("a", RunStatus::Passed),
            result("b", RunStatus::Failed),
            result("c", RunStatus::Timeout),
            result("d", RunStatus::Error),
            result("e", RunStatus::Skipped),
            result("f", RunStatus::Passed),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timeout, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn all_passed_requires_every_result_green() {
        assert!(all_passed(&[result("a", RunStatus::Passed)]));
        assert!(!all_passed(&[
            result("a", RunStatus::Passed),
            result("b", RunStatus::Skipped)
        ]));
        assert!(all_passed(&[]));
    }

    #[test]
    fn run_status_displays_snake_case() {
        assert_eq!(RunStatus::Passed.to_string(), "passed");
        assert_eq!(RunStatus::Timeout.to_string(), "timeout");
    }
}
