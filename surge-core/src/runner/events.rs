use surge_metrics::{MetricsSender, PeriodData};

use crate::phaser::PhaseInfo;

/// Signals engines and hooks raise while a VU runs.
#[derive(Debug, Clone, PartialEq)]
pub enum VuEvent {
    Started,
    Error(String),
    Counter { name: String, value: u64 },
    Rate(String),
    Histogram { name: String, value: f64 },
    Match { success: bool, detail: String },
}

/// Events the runner re-emits to reporters.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    PhaseStarted(PhaseInfo),
    PhaseCompleted(PhaseInfo),
    /// One completed metrics window.
    Stats(PeriodData),
    /// Packed totals for the whole run; always last.
    Done(PeriodData),
}

/// Routes [`VuEvent`]s into the metrics aggregator.
#[derive(Debug, Clone)]
pub struct EventBus {
    metrics: MetricsSender,
}

impl EventBus {
    pub fn new(metrics: MetricsSender) -> Self {
        Self { metrics }
    }

    pub fn emit(&self, event: VuEvent) {
        match event {
            VuEvent::Started => self.metrics.incr_counter("vusers.started", 1),
            VuEvent::Error(code) => self.metrics.incr_counter(format!("errors.{code}"), 1),
            VuEvent::Counter { name, value } => self.metrics.incr_counter(name, value),
            VuEvent::Rate(name) => self.metrics.observe_rate(name),
            VuEvent::Histogram { name, value } => self.metrics.observe_histogram(name, value),
            VuEvent::Match { success, detail } => {
                tracing::trace!(success, %detail, "match");
                let name = if success { "matches" } else { "matches.failed" };
                self.metrics.incr_counter(name, 1);
            }
        }
    }

    pub fn counter(&self, name: impl Into<String>, value: u64) {
        self.emit(VuEvent::Counter {
            name: name.into(),
            value,
        });
    }

    pub fn histogram(&self, name: impl Into<String>, value: f64) {
        self.emit(VuEvent::Histogram {
            name: name.into(),
            value,
        });
    }

    pub fn rate(&self, name: impl Into<String>) {
        self.emit(VuEvent::Rate(name.into()));
    }

    pub fn error(&self, code: impl Into<String>) {
        self.emit(VuEvent::Error(code.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_metrics::{AggregatorConfig, AggregatorHub};

    #[tokio::test]
    async fn events_map_to_metric_names() {
        let (hub, _out) = AggregatorHub::spawn(AggregatorConfig {
            pull_only: true,
            ..AggregatorConfig::default()
        });
        let bus = EventBus::new(hub.sender());
        bus.emit(VuEvent::Started);
        bus.error("ECONNREFUSED");
        bus.counter("http.requests", 2);
        bus.rate("http.request_rate");
        bus.histogram("http.response_time", 4.0);
        bus.emit(VuEvent::Match { success: true, detail: "ok".into() });
        bus.emit(VuEvent::Match { success: false, detail: "bad".into() });

        let total = surge_metrics::pack(
            hub.sender()
                .flush()
                .await
                .unwrap_or_else(|e| panic!("flush failed: {e}")),
        )
        .unwrap_or_else(|e| panic!("pack failed: {e}"));

        assert_eq!(total.counter("vusers.started"), 1);
        assert_eq!(total.counter("errors.ECONNREFUSED"), 1);
        assert_eq!(total.counter("http.requests"), 2);
        assert_eq!(total.counter("matches"), 1);
        assert_eq!(total.counter("matches.failed"), 1);
        assert!(total.rate("http.request_rate").is_some());
        assert!(total.histogram("http.response_time").is_some());
        hub.shutdown().await;
    }
}
