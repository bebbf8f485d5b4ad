//! Arrival scheduler: turns an ordered list of phases into a timed stream of events.

mod arrivals;
mod ramp;
mod spec;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RawPhaseSpec;
use crate::error::Result;
use surge_metrics::now_ms;

pub use ramp::{RampPlan, WorkerShare};
pub use spec::{PhaseKind, PhaseMode, PhaseSpec, parse_duration_value};

/// A running (or finished) phase. `id` and times are assigned when the phase starts.
#[derive(Debug, Clone)]
pub struct PhaseInfo {
    pub spec: Arc<PhaseSpec>,
    pub id: Uuid,
    /// Epoch ms.
    pub start_time: u64,
    /// Epoch ms; set on completion.
    pub end_time: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum PhaserEvent {
    PhaseStarted(PhaseInfo),
    Arrival(Arc<PhaseSpec>),
    PhaseCompleted(PhaseInfo),
    Done,
}

#[derive(Debug, Clone)]
pub struct Phaser {
    phases: Vec<Arc<PhaseSpec>>,
    share: WorkerShare,
}

impl Phaser {
    /// Validates every phase up front; the first malformed one fails construction.
    pub fn new(raw: &[RawPhaseSpec]) -> Result<Self> {
        let phases = raw
            .iter()
            .enumerate()
            .map(|(index, r)| PhaseSpec::from_raw(index, r).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            phases,
            share: WorkerShare::default(),
        })
    }

    #[must_use]
    pub fn with_worker_share(mut self, share: WorkerShare) -> Self {
        self.share = share;
        self
    }

    pub fn phases(&self) -> &[Arc<PhaseSpec>] {
        &self.phases
    }

    /// Runs the phases in series on a new task.
    pub fn run(self) -> (PhaserHandle, mpsc::UnboundedReceiver<PhaserEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.drive(arrivals::Emitter::new(tx, stop_rx)));
        (PhaserHandle { stop_tx, task }, rx)
    }

    async fn drive(self, mut emitter: arrivals::Emitter) {
        for spec in &self.phases {
            if emitter.is_stopped() {
                break;
            }

            let started = Instant::now();
            let mut info = PhaseInfo {
                spec: Arc::clone(spec),
                id: Uuid::new_v4(),
                start_time: now_ms(),
                end_time: None,
            };
            tracing::info!(
                phase = spec.index,
                name = %spec.display_name(),
                kind = spec.kind().label(),
                id = %info.id,
                "phase started"
            );
            emitter.send(PhaserEvent::PhaseStarted(info.clone()));

            if !arrivals::run_phase(&mut emitter, spec, self.share).await {
                tracing::info!(phase = spec.index, "phaser stopped");
                break;
            }

            // Span comes from the monotonic clock.
            info.end_time = Some(info.start_time + started.elapsed().as_millis() as u64);
            tracing::info!(phase = spec.index, id = %info.id, "phase completed");
            emitter.send(PhaserEvent::PhaseCompleted(info));
        }

        emitter.send(PhaserEvent::Done);
    }
}

pub struct PhaserHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PhaserHandle {
    /// Stops emitting arrivals; `Done` follows.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}
