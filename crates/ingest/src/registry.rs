//! Name-to-stage registry with dependency ordering.

use crate::blame::Blame;
use crate::file_types::FileTypes;
use blamemux_types::{BlameConfig, BlamemuxError, Extension, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
pub struct Registry {
    stages: BTreeMap<&'static str, Arc<dyn Extension>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in stages.
    pub fn with_defaults(config: BlameConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileTypes));
        registry.register(Arc::new(Blame::new(config)));
        registry
    }

    /// Add a stage, replacing any stage registered under the same name.
    pub fn register(&mut self, stage: Arc<dyn Extension>) {
        self.stages.insert(stage.name(), stage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.stages.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.keys().copied().collect()
    }

    /// The requested stages plus everything they depend on, dependencies
    /// first.
    pub fn resolve(&self, requested: &[&str]) -> Result<Vec<Arc<dyn Extension>>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = Vec::new();
        for name in requested {
            self.visit(name, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    /// The requested stages in the order they must be backed out: dependents
    /// before the stages they depend on. Dependencies are not added.
    pub fn backout_order(&self, requested: &[&str]) -> Result<Vec<Arc<dyn Extension>>> {
        let wanted: HashSet<&str> = requested.iter().copied().collect();
        let mut order: Vec<Arc<dyn Extension>> = self
            .resolve(requested)?
            .into_iter()
            .filter(|stage| wanted.contains(stage.name()))
            .collect();
        order.reverse();
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visiting: &mut Vec<&'static str>,
        done: &mut HashSet<&'static str>,
        order: &mut Vec<Arc<dyn Extension>>,
    ) -> Result<()> {
        let stage = self.get(name).ok_or_else(|| {
            BlamemuxError::Dependency(format!(
                "unknown stage '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        let name = stage.name();
        if done.contains(name) {
            return Ok(());
        }
        if visiting.contains(&name) {
            visiting.push(name);
            return Err(BlamemuxError::Dependency(format!(
                "dependency cycle: {}",
                visiting.join(" -> ")
            )));
        }

        visiting.push(name);
        for dep in stage.deps() {
            self.visit(dep, visiting, done, order)?;
        }
        visiting.pop();

        done.insert(name);
        order.push(stage);
        Ok(())
    }
}
