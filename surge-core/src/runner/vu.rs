use std::sync::Arc;

use surge_value::{ObjectMap, Value};
use uuid::Uuid;

use crate::config::ScenarioDefinition;
use crate::template::{EnvVars, Scope};

/// Per-VU state handed to the engine's lifecycle function and to hooks.
#[derive(Debug, Clone)]
pub struct VuContext {
    pub id: Uuid,
    pub scenario: Arc<ScenarioDefinition>,
    pub scenario_name: Arc<str>,
    pub vars: ObjectMap,
    pub env: EnvVars,
    /// Engine-private transient state (cookies, captured values, connections...).
    pub state: ObjectMap,
}

impl VuContext {
    pub fn new(
        scenario: Arc<ScenarioDefinition>,
        scenario_name: Arc<str>,
        vars: ObjectMap,
        env: EnvVars,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario,
            scenario_name,
            vars,
            env,
            state: ObjectMap::default(),
        }
    }

    pub fn scope(&self) -> Scope<'_> {
        Scope::new(&self.vars, &self.env)
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.vars.insert(Arc::from(name), value.into());
    }

    pub fn render(&self, template: &str) -> Value {
        self.scope().render(template)
    }

    pub fn render_string(&self, template: &str) -> String {
        self.scope().render_string(template)
    }
}

/// Failure that ends one VU. `code` becomes the `errors.<code>` counter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct VuError {
    pub code: String,
    pub message: String,
}

impl VuError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
