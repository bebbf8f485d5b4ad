use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use surge_metrics::MetricsSender;
use surge_value::{ObjectMap, Value};
use tokio::time::Instant;

use super::engine::{LoadedEngines, VuFn};
use super::events::EventBus;
use super::hooks::{HookChain, Processor, ScenarioHooks};
use super::payload::PayloadCursor;
use super::picker::{ScenarioPicker, resolve_override};
use super::vu::{VuContext, VuError};
use crate::config::{RunScript, ScenarioDefinition};
use crate::error::{Error, Result};
use crate::phaser::PhaseSpec;
use crate::template::{EnvVars, Scope};

pub(super) struct CompiledScenario {
    name: Arc<str>,
    definition: Arc<ScenarioDefinition>,
    vu: VuFn,
    before: HookChain,
    after: HookChain,
}

/// Shared state for one run. Everything is fixed before the first arrival except
/// the in-flight VU count.
pub(super) struct RunContext {
    scenarios: Vec<CompiledScenario>,
    picker: ScenarioPicker,
    payloads: Vec<PayloadCursor>,
    inline_vars: Vec<(Arc<str>, Value)>,
    initial_vars: ObjectMap,
    target: Option<Arc<str>>,
    env: EnvVars,
    pending: AtomicU64,
    metrics: MetricsSender,
    events: EventBus,
}

pub(super) struct PrepareArgs<'a> {
    pub script: &'a RunScript,
    pub engines: &'a LoadedEngines,
    pub processor: &'a Processor,
    pub scenario_override: Option<&'a str>,
    pub initial_vars: ObjectMap,
    pub env: EnvVars,
    pub metrics: MetricsSender,
}

fn scenario_name(index: usize, def: &ScenarioDefinition) -> Arc<str> {
    match &def.name {
        Some(name) => Arc::from(name.as_str()),
        None => Arc::from(format!("scenario-{index}")),
    }
}

impl RunContext {
    /// Resolves the scenario selection, hooks and engines. Any failure here is fatal
    /// for the run.
    pub(super) fn prepare(args: PrepareArgs<'_>) -> Result<Self> {
        let PrepareArgs {
            script,
            engines,
            processor,
            scenario_override,
            initial_vars,
            env,
            metrics,
        } = args;
        let events = EventBus::new(metrics.clone());

        let names: Vec<Arc<str>> = script
            .scenarios
            .iter()
            .enumerate()
            .map(|(i, def)| scenario_name(i, def))
            .collect();

        let selected: Vec<usize> = match scenario_override {
            Some(pattern) => {
                let index = resolve_override(&names, pattern)?;
                tracing::info!(scenario = %names[index], "running a single scenario");
                vec![index]
            }
            None => (0..script.scenarios.len()).collect(),
        };

        let scenarios = selected
            .iter()
            .map(|&index| {
                compile(
                    Arc::clone(&names[index]),
                    &script.scenarios[index],
                    engines,
                    processor,
                    &events,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let inline_vars: Vec<(Arc<str>, Value)> = script
            .config
            .variables
            .iter()
            .map(|(k, v)| (Arc::from(k.as_str()), Value::from(v)))
            .collect();
        let target = script.config.target.as_deref().map(Arc::from);
        let payloads: Vec<PayloadCursor> =
            script.config.payload.iter().map(PayloadCursor::new).collect();

        let picker = if scenario_override.is_some() {
            ScenarioPicker::Fixed(0)
        } else {
            let mut scope_vars = ObjectMap::default();
            if let Some(target) = &target {
                scope_vars.insert(Arc::from("target"), Value::String(Arc::clone(target)));
            }
            for payload in &payloads {
                payload.bind_first(&mut scope_vars);
            }
            scope_vars.extend(inline_vars.iter().cloned());
            scope_vars.extend(initial_vars.iter().map(|(k, v)| (Arc::clone(k), v.clone())));
            ScenarioPicker::weighted(
                scenarios.iter().map(|s| s.definition.weight.as_ref()),
                Scope::new(&scope_vars, &env),
            )?
        };

        Ok(Self {
            scenarios,
            picker,
            payloads,
            inline_vars,
            initial_vars,
            target,
            env,
            pending: AtomicU64::new(0),
            metrics,
            events,
        })
    }

    pub(super) fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    pub(super) fn metrics(&self) -> &MetricsSender {
        &self.metrics
    }

    pub(super) fn scenario_names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.iter().map(|s| s.name.as_ref())
    }

    /// Handles one arrival. Only the run loop calls this, so the `maxVusers` check
    /// and the increment cannot interleave with another arrival.
    pub(super) fn on_arrival(self: &Arc<Self>, phase: &PhaseSpec) {
        if let Some(max) = phase.max_vusers
            && self.pending() >= max
        {
            tracing::trace!(phase = phase.index, max, "arrival skipped");
            self.metrics.incr_counter("vusers.skipped", 1);
            return;
        }

        let index = self.picker.pick();
        let Some(scenario) = self.scenarios.get(index) else {
            tracing::error!(index, "picker chose a scenario that does not exist");
            return;
        };
        let ctx = self.new_vu(scenario);

        self.metrics.incr_counter("vusers.created", 1);
        self.metrics
            .incr_counter(format!("vusers.created_by_name.{}", scenario.name), 1);
        self.pending.fetch_add(1, Ordering::AcqRel);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise(index, ctx).await });
    }

    fn new_vu(&self, scenario: &CompiledScenario) -> VuContext {
        let mut ctx = VuContext::new(
            Arc::clone(&scenario.definition),
            Arc::clone(&scenario.name),
            ObjectMap::default(),
            Arc::clone(&self.env),
        );
        let id = ctx.id.to_string();
        ctx.set_var("$uuid", id);
        if let Some(target) = &self.target {
            ctx.vars
                .insert(Arc::from("target"), Value::String(Arc::clone(target)));
        }
        for payload in &self.payloads {
            payload.bind(&mut ctx.vars);
        }
        for (name, value) in &self.inline_vars {
            ctx.vars.insert(Arc::clone(name), pick_inline(value));
        }
        for (name, value) in &self.initial_vars {
            ctx.vars.insert(Arc::clone(name), value.clone());
        }
        ctx
    }

    /// Runs the VU on its own task so a panic is contained and still accounted for.
    async fn supervise(self: Arc<Self>, index: usize, ctx: VuContext) {
        let started = Instant::now();
        let vu_id = ctx.id;
        let this = Arc::clone(&self);
        let outcome = tokio::spawn(async move { this.lifecycle(index, ctx).await }).await;

        match outcome {
            Ok(Ok(())) => {
                self.metrics.observe_histogram(
                    "vusers.session_length",
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                self.metrics.incr_counter("vusers.completed", 1);
            }
            Ok(Err(err)) => {
                tracing::debug!(vu = %vu_id, error = %err, "vu failed");
                self.events.error(err.code);
                self.metrics.incr_counter("vusers.failed", 1);
            }
            Err(err) => {
                tracing::warn!(vu = %vu_id, error = %err, "vu task aborted");
                self.events.error("vu_panic");
                self.metrics.incr_counter("vusers.failed", 1);
            }
        }

        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    async fn lifecycle(&self, index: usize, mut ctx: VuContext) -> std::result::Result<(), VuError> {
        let Some(scenario) = self.scenarios.get(index) else {
            return Err(VuError::new("unknown_scenario", format!("no scenario #{index}")));
        };

        scenario.before.run(&mut ctx, &self.events)?;
        let (mut ctx, result) = (scenario.vu)(ctx).await;
        result?;
        scenario.after.run(&mut ctx, &self.events)
    }
}

fn compile(
    name: Arc<str>,
    def: &ScenarioDefinition,
    engines: &LoadedEngines,
    processor: &Processor,
    events: &EventBus,
) -> Result<CompiledScenario> {
    let engine = engines
        .get(def.engine_name())
        .ok_or_else(|| Error::UnknownEngine {
            scenario: name.to_string(),
            engine: def.engine_name().to_string(),
        })?;

    let hooks = ScenarioHooks {
        before_request: processor.resolve(&name, &def.before_request)?,
        after_response: processor.resolve(&name, &def.after_response)?,
        on_error: processor.resolve(&name, &def.on_error)?,
    };
    let before = processor.resolve(&name, &def.before_scenario)?;
    let after = processor.resolve(&name, &def.after_scenario)?;

    let vu = engine
        .create_scenario(def, hooks, events.clone())
        .map_err(|source| Error::Compile {
            scenario: name.to_string(),
            source,
        })?;
    tracing::debug!(scenario = %name, engine = engine.name(), "scenario compiled");

    Ok(CompiledScenario {
        name,
        definition: Arc::new(def.clone()),
        vu,
        before,
        after,
    })
}

/// Array-valued inline variables yield one random element per VU.
fn pick_inline(value: &Value) -> Value {
    match value.as_array() {
        Some([]) => Value::Null,
        Some(items) => items[rand::rng().random_range(0..items.len())].clone(),
        None => value.clone(),
    }
}
