//! Load generation engine: arrival scheduling, VU orchestration and metrics plumbing.

pub mod config;
mod error;
pub mod phaser;
pub mod runner;
pub mod template;

pub use config::{
    DEFAULT_ENGINE, DurationValue, PayloadOrder, PayloadSpec, RawPhaseSpec, RunScript,
    ScenarioDefinition, ScriptConfig,
};
pub use error::{Error, Result};
pub use phaser::{PhaseInfo, PhaseKind, PhaseMode, PhaseSpec, Phaser, PhaserEvent, PhaserHandle, WorkerShare};
pub use runner::{
    Engine, EngineError, EngineRegistry, EventBus, Processor, RunHandle, RunOptions, RunReport,
    Runner, RunnerEvent, ScenarioHooks, VuContext, VuError, VuEvent, VuFn, VuFuture,
};
pub use template::{EnvVars, Scope, process_env_snapshot};

pub use surge_metrics as metrics;
pub use surge_value::{ObjectMap, Value};
