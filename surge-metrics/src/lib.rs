pub mod aggregator;
pub mod error;
pub mod hub;
pub mod legacy;
pub mod period;
pub mod sketch;
pub mod window;
pub mod wire;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use error::{Error, Result};
pub use hub::{AggregatorHub, MetricEvent, MetricsSender};
pub use legacy::LegacyReport;
pub use period::{PeriodData, merge_buckets, pack};
pub use sketch::{HistogramSummary, QuantileSketch, SketchParams};
pub use window::{normalize_ts, now_ms};
pub use wire::{deserialize_metrics, deserialize_metrics_list, serialize_metrics, serialize_metrics_list};
