//! Trunk-centric git workflow engine.
//!
//! trunkpad replaces branch/PR/review ceremony with three invariants: trunk
//! is the only durable line of history, short-lived *workpads* carry
//! in-progress changes, and a green test run is the sole gate for merging a
//! workpad into trunk. On top of those it automates patch application,
//! checkpoint tagging, sandboxed test execution, merge eligibility, and
//! post-merge smoke tests with automatic rollback.
//!
//! This crate is the engine only. CLIs, TUIs, and the AI layer that produces
//! patches are separate programs: they drive the engine through [`Core`] and
//! implement the capability traits in [`capabilities`].
//!
//! ```no_run
//! use trunkpad::{Core, testing::TestConfig};
//!
//! let core = Core::open_default()?;
//! let repo = core.store.init_from_zip(&std::fs::read("project.zip")?, "project")?;
//! let pad = core.store.create_workpad(&repo.id, "add greeter")?;
//! // ... apply patches via core.patches, then:
//! let tests = [TestConfig::new("unit", "pytest -q")];
//! let outcome = core.workflow.execute(&pad.id, &tests, true, true, &Default::default())?;
//! println!("{}", outcome.summary);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyzer;
pub mod capabilities;
pub mod ci;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod git;
pub mod ids;
pub mod pads;
pub mod patch;
pub mod store;
pub mod testing;
pub mod workflow;

pub use config::{CoreConfig, StateLayout};
pub use error::{Error, Result};

use std::sync::Arc;

use events::{EventSink, LogSink};
use store::RepoStore;

/// The engine context: one of these per process, created at startup.
///
/// Every subsystem hangs off the shared [`RepoStore`]; there is no other
/// process-wide state.
pub struct Core {
    pub config: CoreConfig,
    pub store: Arc<RepoStore>,
    pub pads: pads::WorkpadManager,
    pub patches: patch::PatchEngine,
    pub tests: testing::TestOrchestrator,
    pub workflow: workflow::AutoMergeWorkflow,
    pub ci: ci::CiOrchestrator,
    pub rollback: ci::RollbackHandler,
}

impl Core {
    /// Open the engine at the default base directory (`~/.trunkpad`),
    /// loading `config.toml` if present.
    pub fn open_default() -> Result<Self> {
        let layout = StateLayout::default_location();
        let config = CoreConfig::load(layout.base())?;
        Self::open(layout, config, Arc::new(LogSink))
    }

    /// Open the engine with an explicit layout, configuration, and event
    /// sink.
    pub fn open(
        layout: StateLayout,
        config: CoreConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let store = Arc::new(RepoStore::open(layout, config.clone(), events)?);
        Ok(Self {
            pads: pads::WorkpadManager::new(Arc::clone(&store)),
            patches: patch::PatchEngine::new(Arc::clone(&store)),
            tests: testing::TestOrchestrator::new(Arc::clone(&store)),
            workflow: workflow::AutoMergeWorkflow::new(Arc::clone(&store)),
            ci: ci::CiOrchestrator::new(Arc::clone(&store)),
            rollback: ci::RollbackHandler::new(Arc::clone(&store)),
            config,
            store,
        })
    }
}
