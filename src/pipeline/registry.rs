use super::stage::{Stage, StageRole};
use crate::config::StageSpec;
use crate::error::{Result, TsError};
use std::collections::BTreeMap;

/// Builds a stage from its configuration entry.
pub type StageFactory = fn(&StageSpec) -> Result<Box<dyn Stage>>;

/// Stage factories keyed by role and plugin name.
///
/// The registry is a plain value built by the caller and handed to
/// [`Pipeline::build`](super::Pipeline::build). The same name may be
/// registered under several roles (`file` is both an input and an output).
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<(StageRole, String), StageFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every plugin shipped with the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry);
        registry
    }

    /// Adds or replaces a factory. Returns the factory previously
    /// registered under the same key.
    pub fn register(
        &mut self,
        role: StageRole,
        name: impl Into<String>,
        factory: StageFactory,
    ) -> Option<StageFactory> {
        self.factories.insert((role, name.into()), factory)
    }

    pub fn contains(&self, role: StageRole, name: &str) -> bool {
        self.factories.contains_key(&(role, name.to_string()))
    }

    /// Names registered for `role`, sorted.
    pub fn names(&self, role: StageRole) -> Vec<&str> {
        self.factories
            .keys()
            .filter(|(r, _)| *r == role)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Instantiates the stage described by `spec`.
    pub fn create(&self, role: StageRole, spec: &StageSpec) -> Result<Box<dyn Stage>> {
        let factory = self
            .factories
            .get(&(role, spec.name.clone()))
            .ok_or_else(|| TsError::Config(format!("unknown {} plugin '{}'", role, spec.name)))?;
        let stage = factory(spec)?;
        if stage.role() != role {
            return Err(TsError::Config(format!(
                "plugin '{}' has role {}, expected {}",
                spec.name,
                stage.role(),
                role
            )));
        }
        Ok(stage)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
