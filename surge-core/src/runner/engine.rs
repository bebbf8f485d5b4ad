use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::events::EventBus;
use super::hooks::ScenarioHooks;
use super::vu::{VuContext, VuError};
use crate::config::{ScenarioDefinition, ScriptConfig};

pub type VuFuture = Pin<Box<dyn Future<Output = (VuContext, Result<(), VuError>)> + Send>>;

/// One compiled scenario: called once per arriving VU.
pub type VuFn = Arc<dyn Fn(VuContext) -> VuFuture + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine `{0}` is not registered")]
    NotRegistered(String),

    #[error("failed to load engine `{engine}`: {message}")]
    Load { engine: String, message: String },

    #[error("{0}")]
    Compile(String),
}

/// A protocol driver. Compiles scenario definitions into VU lifecycle functions.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    fn create_scenario(
        &self,
        scenario: &ScenarioDefinition,
        hooks: ScenarioHooks,
        events: EventBus,
    ) -> Result<VuFn, EngineError>;
}

pub type EngineLoader =
    Arc<dyn Fn(&ScriptConfig, &serde_json::Value) -> Result<Arc<dyn Engine>, EngineError> + Send + Sync>;

/// Engines the runner may load, keyed by name.
///
/// Every registered engine is loaded eagerly when a runner is built, plus any
/// name listed under `config.engines`. Load failures are collected as warnings
/// and only become fatal when a scenario actually references that engine.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    loaders: BTreeMap<String, EngineLoader>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub type LoadedEngines = BTreeMap<String, Arc<dyn Engine>>;

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_loader<F>(mut self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn(&ScriptConfig, &serde_json::Value) -> Result<Arc<dyn Engine>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.loaders.insert(name.into(), Arc::new(loader));
        self
    }

    /// Registers an already-built engine under its own name.
    #[must_use]
    pub fn with_engine(self, engine: Arc<dyn Engine>) -> Self {
        let name = engine.name().to_string();
        self.with_loader(name, move |_, _| Ok(Arc::clone(&engine)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    pub fn load(&self, config: &ScriptConfig) -> (LoadedEngines, BTreeMap<String, String>) {
        let mut engines = LoadedEngines::new();
        let mut warnings = BTreeMap::new();

        let mut wanted: Vec<&str> = self.names().collect();
        wanted.extend(config.engines.keys().map(String::as_str));
        wanted.sort_unstable();
        wanted.dedup();

        for name in wanted {
            let engine_config = config
                .engines
                .get(name)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let loaded = match self.loaders.get(name) {
                Some(loader) => loader(config, &engine_config),
                None => Err(EngineError::NotRegistered(name.to_string())),
            };
            match loaded {
                Ok(engine) => {
                    tracing::debug!(engine = name, "engine loaded");
                    engines.insert(name.to_string(), engine);
                }
                Err(err) => {
                    tracing::warn!(engine = name, error = %err, "engine failed to load");
                    warnings.insert(name.to_string(), err.to_string());
                }
            }
        }

        (engines, warnings)
    }
}
