//! Engine configuration.
//!
//! One TOML file at `<base>/config.toml`, every field optional with a
//! default, so an empty or missing file yields a fully working setup.
//!
//! ```toml
//! trunk_branch_name = "main"
//! workpad_ttl_days = 7
//!
//! [git]
//! subprocess_timeout_seconds = 60
//!
//! [sandbox]
//! max_parallel = 4
//! mem_mib = 2048
//! cpus = 1
//! network_enabled = false
//! output_capture_bytes = 1048576
//!
//! [promotion]
//! require_tests = true
//! require_all_pass = true
//! require_fast_forward = true
//!
//! [ci]
//! auto_rollback = true
//! recreate_workpad_on_rollback = true
//! ```
//!
//! The base directory (default `~/.trunkpad`) also fixes the on-disk state
//! layout: `data/repos/<repo_id>/` for working trees, `catalog/` for the
//! metadata catalog, `logs/` for operational logs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gate::PromotionRules;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Trunk branch name used when initializing new repositories.
    /// Immutable per repository after creation.
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch_name: String,

    /// Age in days after which an ACTIVE workpad becomes reclaimable.
    #[serde(default = "default_ttl_days")]
    pub workpad_ttl_days: u64,

    pub git: GitConfig,
    pub sandbox: SandboxConfig,
    pub promotion: PromotionRules,
    pub ci: CiConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            trunk_branch_name: default_trunk_branch(),
            workpad_ttl_days: default_ttl_days(),
            git: GitConfig::default(),
            sandbox: SandboxConfig::default(),
            promotion: PromotionRules::default(),
            ci: CiConfig::default(),
        }
    }
}

/// Git subprocess behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Wall-clock deadline for a single git invocation, in seconds.
    pub subprocess_timeout_seconds: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            subprocess_timeout_seconds: 60,
        }
    }
}

/// Sandbox resource policy for test execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Maximum number of concurrently running sandboxes.
    pub max_parallel: usize,
    /// Memory cap per sandbox, in MiB.
    pub mem_mib: u64,
    /// CPU cap per sandbox.
    pub cpus: u32,
    /// Whether sandboxed tests may reach the network.
    pub network_enabled: bool,
    /// Per-stream capture limit; output beyond this is truncated with a marker.
    pub output_capture_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            mem_mib: 2048,
            cpus: 1,
            network_enabled: false,
            output_capture_bytes: 1_048_576,
        }
    }
}

/// Post-promotion CI behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CiConfig {
    /// Revert trunk automatically when the smoke run fails.
    pub auto_rollback: bool,
    /// Recreate a workpad carrying the reverted change for fix-and-retry.
    pub recreate_workpad_on_rollback: bool,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            recreate_workpad_on_rollback: true,
        }
    }
}

fn default_trunk_branch() -> String {
    "main".to_string()
}

fn default_ttl_days() -> u64 {
    7
}

impl CoreConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidInput(format!("config: {e}")))
    }

    /// Load `<base>/config.toml`, falling back to defaults when absent.
    pub fn load(base: &Path) -> Result<Self> {
        let path = base.join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// On-disk state layout rooted at a base directory.
#[derive(Debug, Clone)]
pub struct StateLayout {
    base: PathBuf,
}

impl StateLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Default location: `<home>/.trunkpad`. Falls back to the current
    /// directory when no home directory can be determined (e.g. bare CI
    /// containers).
    pub fn default_location() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trunkpad");
        Self::new(base)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.base.join("data").join("repos")
    }

    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.repos_dir().join(repo_id)
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.base.join("catalog")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Create the directory skeleton if missing.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.repos_dir())?;
        std::fs::create_dir_all(self.catalog_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.trunk_branch_name, "main");
        assert_eq!(cfg.workpad_ttl_days, 7);
        assert_eq!(cfg.git.subprocess_timeout_seconds, 60);
        assert_eq!(cfg.sandbox.max_parallel, 4);
        assert_eq!(cfg.sandbox.mem_mib, 2048);
        assert_eq!(cfg.sandbox.cpus, 1);
        assert!(!cfg.sandbox.network_enabled);
        assert_eq!(cfg.sandbox.output_capture_bytes, 1_048_576);
        assert!(cfg.ci.auto_rollback);
        assert!(cfg.ci.recreate_workpad_on_rollback);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let cfg = CoreConfig::from_toml("").unwrap();
        assert_eq!(cfg, CoreConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg = CoreConfig::from_toml(
            r#"
            trunk_branch_name = "trunk"

            [sandbox]
            max_parallel = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.trunk_branch_name, "trunk");
        assert_eq!(cfg.sandbox.max_parallel, 2);
        assert_eq!(cfg.sandbox.mem_mib, 2048);
        assert_eq!(cfg.workpad_ttl_days, 7);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = CoreConfig::from_toml("no_such_option = true");
        assert!(result.is_err());
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CoreConfig::load(dir.path()).unwrap();
        assert_eq!(cfg, CoreConfig::default());
    }

    #[test]
    fn load_reads_config_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "workpad_ttl_days = 3").unwrap();
        let cfg = CoreConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.workpad_ttl_days, 3);
    }

    #[test]
    fn layout_paths() {
        let layout = StateLayout::new("/tmp/tp");
        assert_eq!(
            layout.repo_dir("repo_ab"),
            PathBuf::from("/tmp/tp/data/repos/repo_ab")
        );
        assert_eq!(layout.catalog_dir(), PathBuf::from("/tmp/tp/catalog"));
        assert_eq!(layout.logs_dir(), PathBuf::from("/tmp/tp/logs"));
    }
}
