use std::collections::BTreeMap;
use std::sync::Arc;

use super::events::EventBus;
use super::vu::{VuContext, VuError};
use crate::error::{Error, Result};

pub type HookFn =
    Arc<dyn Fn(&mut VuContext, &EventBus) -> std::result::Result<(), VuError> + Send + Sync>;

/// Named functions scripts can reference from scenario hooks.
#[derive(Clone, Default)]
pub struct Processor {
    functions: BTreeMap<String, HookFn>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut VuContext, &EventBus) -> std::result::Result<(), VuError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<HookFn> {
        self.functions.get(name).cloned()
    }

    pub(crate) fn resolve(&self, scenario: &str, names: &[String]) -> Result<HookChain> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .map(|f| (Arc::<str>::from(name.as_str()), f))
                    .ok_or_else(|| Error::UnknownHook {
                        scenario: scenario.to_string(),
                        function: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(HookChain)
    }
}

/// Hooks that run in series; the first failure stops the chain.
#[derive(Clone, Default)]
pub struct HookChain(Vec<(Arc<str>, HookFn)>);

impl HookChain {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_ref())
    }

    pub fn run(&self, ctx: &mut VuContext, events: &EventBus) -> std::result::Result<(), VuError> {
        for (name, f) in &self.0 {
            f(ctx, events).map_err(|e| {
                tracing::debug!(hook = %name, vu = %ctx.id, error = %e, "hook failed");
                e
            })?;
        }
        Ok(())
    }
}

/// Per-request hooks handed to the engine when a scenario is compiled.
#[derive(Clone, Default)]
pub struct ScenarioHooks {
    pub before_request: HookChain,
    pub after_response: HookChain,
    pub on_error: HookChain,
}
