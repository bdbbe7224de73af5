//! # Stage: Experiment Registry
//!
//! ## Responsibility
//! Maps experiment names to live [`Experiment`]s. The host application owns
//! one registry and hands it (or an `Arc` of it) to every call site; tests
//! get a clean slate by building a new one or calling [`ExperimentRegistry::reset`].
//!
//! ## Guarantees
//! - Memoised: defining a name twice returns the first instance unchanged;
//!   definitions are never merged
//! - Thread-safe: lookups share a read lock; definitions take the write lock
//!   only long enough to insert
//!
//! ## NOT Responsible For
//! - Cross-experiment coordination (each experiment locks only itself)

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{ExperimentError, Result};
use crate::experiment::{Experiment, ExperimentBuilder, IdentifyFn};

/// Manages a collection of named experiments.
///
/// Use [`ExperimentRegistry::define`] to add experiments and
/// [`ExperimentRegistry::experiment`] to look them up by name.
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    experiments: RwLock<HashMap<String, Arc<Experiment>>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Experiment>>> {
        self.experiments.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Experiment>>> {
        self.experiments.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Define an experiment, or return the existing one with the same name.
    ///
    /// Only a new definition is validated; a repeated name short-circuits.
    pub fn define(&self, builder: ExperimentBuilder) -> Result<Arc<Experiment>> {
        let mut experiments = self.write();
        if let Some(existing) = experiments.get(builder.name()) {
            debug!(
                target: "split_decision::registry",
                experiment = %builder.name(),
                "already defined; returning existing experiment"
            );
            return Ok(Arc::clone(existing));
        }
        let experiment = Arc::new(builder.build()?);
        experiments.insert(experiment.name().to_string(), Arc::clone(&experiment));
        debug!(
            target: "split_decision::registry",
            experiment = %experiment.name(),
            alternatives = experiment.alternatives().len(),
            "experiment defined"
        );
        Ok(experiment)
    }

    /// Define every experiment in `config`, sharing one identity source.
    ///
    /// All or nothing: if any new definition is invalid, nothing from
    /// `config` is registered. Names already defined return the existing
    /// experiment, as with [`ExperimentRegistry::define`].
    pub fn define_from_config(
        &self,
        config: &EngineConfig,
        identify: Option<IdentifyFn>,
    ) -> Result<Vec<Arc<Experiment>>> {
        config.validate()?;
        let mut experiments = self.write();
        let mut defined = Vec::with_capacity(config.experiments.len());
        let mut staged = Vec::new();
        for exp in &config.experiments {
            if let Some(existing) = experiments.get(&exp.name) {
                defined.push(Arc::clone(existing));
                continue;
            }
            let mut builder = exp.builder();
            if let Some(identify) = identify.as_ref() {
                builder = builder.identify_fn(Arc::clone(identify));
            }
            let experiment = Arc::new(builder.build()?);
            staged.push(Arc::clone(&experiment));
            defined.push(experiment);
        }
        for experiment in staged {
            debug!(
                target: "split_decision::registry",
                experiment = %experiment.name(),
                alternatives = experiment.alternatives().len(),
                "experiment defined from config"
            );
            experiments.insert(experiment.name().to_string(), experiment);
        }
        Ok(defined)
    }

    /// Look up an experiment by name.
    pub fn experiment(&self, name: &str) -> Result<Arc<Experiment>> {
        self.get(name).ok_or_else(|| ExperimentError::NotFound { name: name.to_string() })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Experiment>> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of all defined experiments, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of experiments still running.
    pub fn active_count(&self) -> usize {
        self.read().values().filter(|e| e.is_active()).count()
    }

    /// Forget every experiment. Outstanding `Arc`s keep working but are no
    /// longer reachable by name.
    pub fn reset(&self) {
        let removed = {
            let mut experiments = self.write();
            let n = experiments.len();
            experiments.clear();
            n
        };
        debug!(target: "split_decision::registry", removed, "registry reset");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
