//! Tokio driver for [`Aggregator`]: one task owns the state and every write reaches it
//! through a single channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::error::{Error, Result};
use crate::period::PeriodData;
use crate::window::now_ms;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Counter { name: String, value: u64, ts: u64 },
    Histogram { name: String, value: f64, ts: u64 },
    Rate { name: String, ts: u64 },
}

#[derive(Debug)]
enum Command {
    Event(MetricEvent),
    Aggregate {
        force_all: bool,
        reply: oneshot::Sender<usize>,
    },
    GetMetrics(u64, oneshot::Sender<Option<PeriodData>>),
    TakeMetrics(u64, oneshot::Sender<Option<PeriodData>>),
    BucketIds(oneshot::Sender<Vec<u64>>),
    Flush(oneshot::Sender<Vec<PeriodData>>),
    Shutdown,
}

/// Cloneable producer handle. Writes never block; they are dropped once the hub has exited.
#[derive(Debug, Clone)]
pub struct MetricsSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl MetricsSender {
    pub fn send(&self, event: MetricEvent) {
        let _ = self.tx.send(Command::Event(event));
    }

    pub fn incr_counter(&self, name: impl Into<String>, value: u64) {
        self.incr_counter_at(name, value, now_ms());
    }

    pub fn incr_counter_at(&self, name: impl Into<String>, value: u64, ts: u64) {
        self.send(MetricEvent::Counter {
            name: name.into(),
            value,
            ts,
        });
    }

    pub fn observe_histogram(&self, name: impl Into<String>, value: f64) {
        self.observe_histogram_at(name, value, now_ms());
    }

    pub fn observe_histogram_at(&self, name: impl Into<String>, value: f64, ts: u64) {
        self.send(MetricEvent::Histogram {
            name: name.into(),
            value,
            ts,
        });
    }

    pub fn observe_rate(&self, name: impl Into<String>) {
        self.observe_rate_at(name, now_ms());
    }

    pub fn observe_rate_at(&self, name: impl Into<String>, ts: u64) {
        self.send(MetricEvent::Rate {
            name: name.into(),
            ts,
        });
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| Error::HubClosed)?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    /// Folds buffered events; with `force_all` open windows are folded too.
    pub async fn aggregate(&self, force_all: bool) -> Result<usize> {
        self.request(|reply| Command::Aggregate { force_all, reply })
            .await
    }

    pub async fn get_metrics(&self, period: u64) -> Result<Option<PeriodData>> {
        self.request(|reply| Command::GetMetrics(period, reply))
            .await
    }

    /// Like [`Self::get_metrics`] but removes the window.
    pub async fn take_metrics(&self, period: u64) -> Result<Option<PeriodData>> {
        self.request(|reply| Command::TakeMetrics(period, reply))
            .await
    }

    pub async fn bucket_ids(&self) -> Result<Vec<u64>> {
        self.request(Command::BucketIds).await
    }

    /// Folds everything buffered and returns every window still held, ascending.
    pub async fn flush(&self) -> Result<Vec<PeriodData>> {
        self.request(Command::Flush).await
    }
}

pub struct AggregatorHub {
    sender: MetricsSender,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AggregatorHub {
    /// Spawns the aggregator task. Completed windows are pushed on the returned receiver
    /// unless the config is pull-only.
    pub fn spawn(config: AggregatorConfig) -> (Self, mpsc::UnboundedReceiver<PeriodData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(drive(Aggregator::new(config), rx, out_tx, stop_rx));

        (
            Self {
                sender: MetricsSender { tx },
                stop_tx,
                task,
            },
            out_rx,
        )
    }

    pub fn sender(&self) -> MetricsSender {
        self.sender.clone()
    }

    /// Halts the periodic timers. Commands are still served.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the task. Writes made after this point are dropped.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.sender.tx.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

async fn drive(
    mut agg: Aggregator,
    mut rx: mpsc::UnboundedReceiver<Command>,
    out_tx: mpsc::UnboundedSender<PeriodData>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let interval = agg.config().interval.max(Duration::from_millis(2));
    let mut aggregate_tick = tokio::time::interval(interval);
    aggregate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut emit_tick = tokio::time::interval(interval / 2);
    emit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let push = !agg.is_pull_only();
    let mut timers = true;

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    None | Some(Command::Shutdown) => break,
                    Some(cmd) => handle(&mut agg, cmd),
                }
            }
            _ = aggregate_tick.tick(), if timers => {
                agg.aggregate(now_ms(), false);
            }
            _ = emit_tick.tick(), if timers && push => {
                for data in agg.take_completed(now_ms()) {
                    tracing::debug!(period = data.period, counters = data.counters.len(), "metrics window completed");
                    let _ = out_tx.send(data);
                }
            }
            changed = stop_rx.changed(), if timers => {
                if changed.is_err() || *stop_rx.borrow() {
                    tracing::debug!("metrics timers stopped");
                    timers = false;
                }
            }
        }
    }
}

fn handle(agg: &mut Aggregator, cmd: Command) {
    match cmd {
        Command::Event(MetricEvent::Counter { name, value, ts }) => agg.incr_counter(name, value, ts),
        Command::Event(MetricEvent::Histogram { name, value, ts }) => {
            agg.observe_histogram(name, value, ts)
        }
        Command::Event(MetricEvent::Rate { name, ts }) => agg.observe_rate(name, ts),
        Command::Aggregate { force_all, reply } => {
            let _ = reply.send(agg.aggregate(now_ms(), force_all));
        }
        Command::GetMetrics(period, reply) => {
            let _ = reply.send(agg.get_metrics(period));
        }
        Command::TakeMetrics(period, reply) => {
            let _ = reply.send(agg.take_metrics(period));
        }
        Command::BucketIds(reply) => {
            let _ = reply.send(agg.bucket_ids());
        }
        Command::Flush(reply) => {
            let _ = reply.send(agg.flush(now_ms()));
        }
        Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_config() -> AggregatorConfig {
        AggregatorConfig {
            pull_only: true,
            ..AggregatorConfig::default()
        }
    }

    #[tokio::test]
    async fn flush_sees_every_prior_write() {
        let (hub, _out) = AggregatorHub::spawn(pull_config());
        let tx = hub.sender();
        for _ in 0..5 {
            tx.incr_counter("vusers.created", 1);
        }
        tx.observe_histogram("http.response_time", 12.5);

        let windows = tx.flush().await.unwrap_or_else(|e| panic!("flush failed: {e}"));
        let total: u64 = windows.iter().map(|w| w.counter("vusers.created")).sum();
        assert_eq!(total, 5);
        assert!(windows.iter().any(|w| w.histogram("http.response_time").is_some()));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn pull_mode_exposes_windows_for_explicit_reads() {
        let (hub, _out) = AggregatorHub::spawn(pull_config());
        let tx = hub.sender();
        tx.incr_counter_at("c", 3, 60_000);
        tx.aggregate(false).await.unwrap_or_else(|e| panic!("aggregate failed: {e}"));

        let ids = tx.bucket_ids().await.unwrap_or_else(|e| panic!("ids failed: {e}"));
        assert_eq!(ids, vec![60_000]);

        let got = tx.get_metrics(60_000).await.unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(got.map(|p| p.counter("c")), Some(3));

        let taken = tx.take_metrics(60_000).await.unwrap_or_else(|e| panic!("take failed: {e}"));
        assert!(taken.is_some());
        let ids = tx.bucket_ids().await.unwrap_or_else(|e| panic!("ids failed: {e}"));
        assert!(ids.is_empty());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn push_mode_emits_completed_windows() {
        let config = AggregatorConfig {
            interval: Duration::from_millis(20),
            ..AggregatorConfig::default()
        };
        let (hub, mut out) = AggregatorHub::spawn(config);
        let tx = hub.sender();
        // Long past, so the window is complete on the first tick.
        tx.incr_counter_at("c", 7, 120_000);

        let data = tokio::time::timeout(Duration::from_secs(2), out.recv())
            .await
            .unwrap_or_else(|_| panic!("no window pushed"))
            .unwrap_or_else(|| panic!("hub closed"));
        assert_eq!(data.period, 120_000);
        assert_eq!(data.counter("c"), 7);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn requests_fail_after_shutdown() {
        let (hub, _out) = AggregatorHub::spawn(pull_config());
        let tx = hub.sender();
        hub.shutdown().await;
        assert!(matches!(tx.bucket_ids().await, Err(Error::HubClosed)));
        // Writes after shutdown are silently dropped.
        tx.incr_counter("late", 1);
    }
}
