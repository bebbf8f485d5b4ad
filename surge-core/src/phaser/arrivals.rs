use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::PhaserEvent;
use super::ramp::{RampPlan, WorkerShare};
use super::spec::{PhaseKind, PhaseMode, PhaseSpec};

/// Sends phaser events and sleeps until deadlines unless stopped.
pub(super) struct Emitter {
    tx: mpsc::UnboundedSender<PhaserEvent>,
    stop_rx: watch::Receiver<bool>,
    stopped: bool,
}

impl Emitter {
    pub(super) fn new(
        tx: mpsc::UnboundedSender<PhaserEvent>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tx,
            stop_rx,
            stopped: false,
        }
    }

    pub(super) fn is_stopped(&self) -> bool {
        self.stopped || *self.stop_rx.borrow() || self.tx.is_closed()
    }

    pub(super) fn send(&mut self, event: PhaserEvent) {
        if self.tx.send(event).is_err() {
            self.stopped = true;
        }
    }

    /// Returns `false` when the phaser was stopped while waiting.
    pub(super) async fn sleep_until(&mut self, deadline: Instant) -> bool {
        if self.is_stopped() {
            return false;
        }
        let stop_requested = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            res = self.stop_rx.wait_for(|stop| *stop) => res.is_ok(),
        };
        if stop_requested {
            self.stopped = true;
            return false;
        }
        // The stop handle may be gone without a stop; finish the wait.
        tokio::time::sleep_until(deadline).await;
        true
    }

    async fn arrival_at(&mut self, spec: &Arc<PhaseSpec>, at: Instant) -> bool {
        if !self.sleep_until(at).await {
            return false;
        }
        tracing::trace!(phase = spec.index, "arrival");
        self.send(PhaserEvent::Arrival(Arc::clone(spec)));
        !self.stopped
    }
}

/// Runs one phase to completion. Returns `false` if it was cut short by a stop.
pub(super) async fn run_phase(
    emitter: &mut Emitter,
    spec: &Arc<PhaseSpec>,
    share: WorkerShare,
) -> bool {
    let start = Instant::now();
    let finished = match spec.kind() {
        PhaseKind::Pause { .. } => true,
        PhaseKind::ArrivalCount { count: 0, .. } => return true,
        PhaseKind::ArrivalCount { count, duration } => {
            arrival_count(emitter, spec, start, count, duration).await
        }
        PhaseKind::ArrivalRate { rate, duration } => match spec.mode {
            PhaseMode::Uniform => uniform_rate(emitter, spec, start, rate, duration).await,
            PhaseMode::Poisson => poisson_rate(emitter, spec, start, rate, duration).await,
        },
        PhaseKind::Ramp { from, to, duration } => {
            ramp(emitter, spec, start, RampPlan::new(from, to, duration), share).await
        }
    };

    finished && emitter.sleep_until(start + spec.kind().duration()).await
}

/// `count` arrivals spread evenly over `duration`, the first one immediately.
async fn arrival_count(
    emitter: &mut Emitter,
    spec: &Arc<PhaseSpec>,
    start: Instant,
    count: u64,
    duration: Duration,
) -> bool {
    for k in 0..count {
        let at = start + duration.mul_f64(k as f64 / count as f64);
        if !emitter.arrival_at(spec, at).await {
            return false;
        }
    }
    true
}

async fn uniform_rate(
    emitter: &mut Emitter,
    spec: &Arc<PhaseSpec>,
    start: Instant,
    rate: f64,
    duration: Duration,
) -> bool {
    // Epsilon absorbs float error: 2s at 5/s is 10 arrivals.
    let count = (rate * duration.as_secs_f64() + 1e-9).floor() as u64;
    for k in 0..count {
        let at = start + Duration::from_secs_f64(k as f64 / rate);
        if !emitter.arrival_at(spec, at).await {
            return false;
        }
    }
    true
}

async fn poisson_rate(
    emitter: &mut Emitter,
    spec: &Arc<PhaseSpec>,
    start: Instant,
    rate: f64,
    duration: Duration,
) -> bool {
    let mean_gap = 1.0 / rate;
    let end = duration.as_secs_f64();
    let mut t = 0.0f64;
    loop {
        let u: f64 = rand::random();
        t += -mean_gap * (1.0 - u).ln();
        if t >= end {
            return true;
        }
        if !emitter
            .arrival_at(spec, start + Duration::from_secs_f64(t))
            .await
        {
            return false;
        }
    }
}

async fn ramp(
    emitter: &mut Emitter,
    spec: &Arc<PhaseSpec>,
    start: Instant,
    plan: RampPlan,
    share: WorkerShare,
) -> bool {
    for t in 0..plan.periods {
        let period_start = start + Duration::from_secs(t);
        let quota = plan.quota_at(t, share);
        let delay = RampPlan::tick_delay(quota);
        tracing::trace!(phase = spec.index, period = t, quota, "ramp period");

        for k in 0..quota {
            let at = period_start + delay * k as u32;
            if !emitter.arrival_at(spec, at).await {
                return false;
            }
        }
        if !emitter
            .sleep_until(period_start + Duration::from_secs(1))
            .await
        {
            return false;
        }
    }
    true
}
