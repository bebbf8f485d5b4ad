//! Run orchestration: wires the phaser, the scenario engines and the metrics hub
//! together and reports progress as [`RunnerEvent`]s.

mod context;
mod engine;
mod events;
mod hooks;
mod payload;
mod picker;
mod vu;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use surge_metrics::{AggregatorConfig, AggregatorHub, PeriodData, pack};
use surge_value::ObjectMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::RunScript;
use crate::error::Result;
use crate::phaser::{PhaseInfo, PhaseSpec, Phaser, PhaserEvent, WorkerShare};
use crate::template::{EnvVars, process_env_snapshot};
use context::{PrepareArgs, RunContext};

pub use engine::{Engine, EngineError, EngineLoader, EngineRegistry, LoadedEngines, VuFn, VuFuture};
pub use events::{EventBus, RunnerEvent, VuEvent};
pub use hooks::{HookChain, HookFn, Processor, ScenarioHooks};
pub use payload::PayloadCursor;
pub use picker::{ScenarioPicker, evaluate_weight, resolve_override};
pub use vu::{VuContext, VuError};

pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides `config.scenario`.
    pub scenario: Option<String>,
    pub aggregator: AggregatorConfig,
    pub worker_share: WorkerShare,
    /// How often the in-flight VU count is checked once the last phase ends.
    pub drain_poll: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scenario: None,
            aggregator: AggregatorConfig::default(),
            worker_share: WorkerShare::default(),
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }
}

pub struct Runner {
    script: RunScript,
    phaser: Phaser,
    engines: LoadedEngines,
    warnings: BTreeMap<String, String>,
    processor: Processor,
    options: RunOptions,
    env: EnvVars,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("phases", &self.phaser.phases().len())
            .field("scenarios", &self.script.scenarios.len())
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl Runner {
    /// Validates phases and loads engines. Engine load failures are kept as
    /// [`Runner::warnings`]; malformed phases fail here.
    pub fn new(
        script: RunScript,
        registry: &EngineRegistry,
        processor: Processor,
        options: RunOptions,
    ) -> Result<Self> {
        let phaser = Phaser::new(&script.config.phases)?.with_worker_share(options.worker_share);
        let (engines, warnings) = registry.load(&script.config);

        Ok(Self {
            script,
            phaser,
            engines,
            warnings,
            processor,
            options,
            env: process_env_snapshot(),
        })
    }

    #[must_use]
    pub fn with_env(mut self, env: EnvVars) -> Self {
        self.env = env;
        self
    }

    /// Engines that failed to load, keyed by engine name.
    pub fn warnings(&self) -> &BTreeMap<String, String> {
        &self.warnings
    }

    pub fn phases(&self) -> &[Arc<PhaseSpec>] {
        self.phaser.phases()
    }

    /// Starts the run. Scenario selection, hooks and compilation errors are
    /// returned here, before any arrival.
    pub async fn start(self, initial_vars: ObjectMap) -> Result<RunHandle> {
        let (hub, windows_rx) = AggregatorHub::spawn(self.options.aggregator);
        let scenario_override = self
            .options
            .scenario
            .as_deref()
            .or(self.script.config.scenario.as_deref());

        let prepared = RunContext::prepare(PrepareArgs {
            script: &self.script,
            engines: &self.engines,
            processor: &self.processor,
            scenario_override,
            initial_vars,
            env: Arc::clone(&self.env),
            metrics: hub.sender(),
        });
        let ctx = match prepared {
            Ok(ctx) => Arc::new(ctx),
            Err(err) => {
                hub.shutdown().await;
                return Err(err);
            }
        };

        tracing::info!(
            phases = self.phaser.phases().len(),
            scenarios = ?ctx.scenario_names().collect::<Vec<_>>(),
            "run starting"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(drive(Drive {
            ctx,
            phaser: self.phaser,
            hub,
            windows_rx,
            events: events_tx,
            stop_rx,
            drain_poll: self.options.drain_poll,
        }));

        Ok(RunHandle {
            events: events_rx,
            stop_tx,
            task,
        })
    }

    /// Runs to completion and collects every event.
    pub async fn run(self, initial_vars: ObjectMap) -> Result<RunReport> {
        self.start(initial_vars).await?.finish().await
    }
}

pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunnerEvent>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl RunHandle {
    pub async fn next_event(&mut self) -> Option<RunnerEvent> {
        self.events.recv().await
    }

    /// Halts the scheduler and the aggregator timers. In-flight VUs are not
    /// cancelled; `Done` still follows with whatever was recorded.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn finish(mut self) -> Result<RunReport> {
        let mut report = RunReport::default();
        while let Some(event) = self.events.recv().await {
            match event {
                RunnerEvent::PhaseStarted(_) => {}
                RunnerEvent::PhaseCompleted(info) => report.phases.push(info),
                RunnerEvent::Stats(window) => report.windows.push(window),
                RunnerEvent::Done(total) => report.total = total,
            }
        }
        self.task.await??;
        Ok(report)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub phases: Vec<PhaseInfo>,
    pub windows: Vec<PeriodData>,
    pub total: PeriodData,
}

struct Drive {
    ctx: Arc<RunContext>,
    phaser: Phaser,
    hub: AggregatorHub,
    windows_rx: mpsc::UnboundedReceiver<PeriodData>,
    events: mpsc::UnboundedSender<RunnerEvent>,
    stop_rx: watch::Receiver<bool>,
    drain_poll: Duration,
}

async fn wait_stop(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|stopped| *stopped).await.is_ok()
}

async fn drive(d: Drive) -> Result<()> {
    let Drive {
        ctx,
        phaser,
        hub,
        mut windows_rx,
        events,
        mut stop_rx,
        drain_poll,
    } = d;

    let (phaser_handle, mut phaser_rx) = phaser.run();

    let forward_tx = events.clone();
    let forwarder = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(window) = windows_rx.recv().await {
            let _ = forward_tx.send(RunnerEvent::Stats(window.clone()));
            seen.push(window);
        }
        seen
    });

    // `watching` goes false once the handle (and its stop sender) is dropped.
    let mut watching = true;
    let mut stopped = false;

    loop {
        tokio::select! {
            ev = phaser_rx.recv() => match ev {
                Some(PhaserEvent::Arrival(spec)) => ctx.on_arrival(&spec),
                Some(PhaserEvent::PhaseStarted(info)) => {
                    let _ = events.send(RunnerEvent::PhaseStarted(info));
                }
                Some(PhaserEvent::PhaseCompleted(info)) => {
                    let _ = events.send(RunnerEvent::PhaseCompleted(info));
                }
                Some(PhaserEvent::Done) | None => break,
            },
            ok = wait_stop(&mut stop_rx), if watching && !stopped => {
                if ok {
                    tracing::info!("run stopping");
                    stopped = true;
                    phaser_handle.stop();
                    hub.stop();
                } else {
                    watching = false;
                }
            }
        }
    }

    while !stopped && ctx.pending() > 0 {
        tracing::debug!(pending = ctx.pending(), "waiting for in-flight vus");
        tokio::select! {
            _ = tokio::time::sleep(drain_poll) => {}
            ok = wait_stop(&mut stop_rx), if watching => {
                if ok {
                    stopped = true;
                    hub.stop();
                } else {
                    watching = false;
                }
            }
        }
    }
    if stopped && ctx.pending() > 0 {
        tracing::info!(pending = ctx.pending(), "stopped with vus still in flight");
    }

    let flushed = ctx.metrics().flush().await?;
    hub.shutdown().await;
    let mut windows = forwarder.await?;
    for window in flushed {
        let _ = events.send(RunnerEvent::Stats(window.clone()));
        windows.push(window);
    }
    phaser_handle.join().await?;

    let total = pack(windows)?;
    tracing::info!(
        created = total.counter("vusers.created"),
        completed = total.counter("vusers.completed"),
        failed = total.counter("vusers.failed"),
        "run finished"
    );
    let _ = events.send(RunnerEvent::Done(total));
    Ok(())
}
