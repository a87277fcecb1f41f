//! Dependency resolution for test runs.
//!
//! Builds a name → dependency map from test configs, rejecting duplicate
//! names, unknown dependencies, and cycles up front so the scheduler can
//! assume a well-formed DAG.

use std::collections::{HashMap, HashSet};

/// Why a set of test configs does not form a runnable DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    DuplicateName(String),
    UnknownDependency { test: String, dependency: String },
    /// A dependency cycle; the names involved, in discovery order.
    Cycle(Vec<String>),
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "duplicate test name '{name}'"),
            Self::UnknownDependency { test, dependency } => {
                write!(f, "test '{test}' depends on unknown test '{dependency}'")
            }
            Self::Cycle(names) => write!(f, "dependency cycle involving: {}", names.join(" -> ")),
        }
    }
}

/// Validated dependency graph over test names.
#[derive(Debug, Clone)]
pub struct DependencyDag {
    /// Test name → its direct dependencies, in input order.
    deps: HashMap<String, Vec<String>>,
}

impl DependencyDag {
    /// Build and validate a DAG from `(name, depends_on)` pairs.
    pub fn build<'a, I>(entries: I) -> Result<Self, DagError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])> + Clone,
    {
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for (name, _) in entries.clone() {
            if deps
                .insert(name.to_string(), Vec::new())
                .is_some()
            {
                return Err(DagError::DuplicateName(name.to_string()));
            }
            order.push(name.to_string());
        }
        for (name, dependencies) in entries {
            for dep in dependencies {
                if !deps.contains_key(dep) {
                    return Err(DagError::UnknownDependency {
                        test: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
                deps.get_mut(name).expect("inserted above").push(dep.clone());
            }
        }

        let dag = Self { deps };
        dag.check_cycles(&order)?;
        Ok(dag)
    }

    /// Kahn-style cycle check; reports the residue when no topological order
    /// covers every node.
    fn check_cycles(&self, order: &[String]) -> Result<(), DagError> {
        let mut remaining: HashSet<&str> = self.deps.keys().map(String::as_str).collect();
        loop {
            let runnable: Vec<&str> = order
                .iter()
                .map(String::as_str)
                .filter(|n| remaining.contains(n))
                .filter(|n| self.deps[*n].iter().all(|d| !remaining.contains(d.as_str())))
                .collect();
            if runnable.is_empty() {
                break;
            }
            for name in runnable {
                remaining.remove(name);
            }
        }
        if remaining.is_empty() {
            Ok(())
        } else {
            let mut cycle: Vec<String> = order
                .iter()
                .filter(|n| remaining.contains(n.as_str()))
                .cloned()
                .collect();
            cycle.sort();
            Err(DagError::Cycle(cycle))
        }
    }

    /// Direct dependencies of a test.
    pub fn deps_of(&self, name: &str) -> &[String] {
        self.deps.get(name).map_or(&[], Vec::as_slice)
    }
}
