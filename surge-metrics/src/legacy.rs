//! Flat, fixed-shape report derived from one (usually packed) window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::period::PeriodData;
use crate::sketch::{HistogramSummary, QuantileSketch};

pub const RESPONSE_TIME: &str = "http.response_time";
pub const SESSION_LENGTH: &str = "vusers.session_length";
pub const REQUEST_RATE: &str = "http.request_rate";

const SCENARIO_PREFIX: &str = "vusers.created_by_name.";
const CODE_PREFIX: &str = "http.codes.";
const ERROR_PREFIX: &str = "errors.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl LatencySummary {
    fn from_sketch(sketch: Option<&QuantileSketch>) -> Self {
        let Some(s) = sketch else {
            return Self::default();
        };
        let q = |p: f64| s.quantile(p).ok().flatten();
        Self {
            min: s.min(),
            max: s.max(),
            median: q(0.5),
            p95: q(0.95),
            p99: q(0.99),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpsSummary {
    pub count: u64,
    pub mean: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyReport {
    pub timestamp: u64,
    pub scenarios_created: u64,
    pub scenarios_completed: u64,
    pub scenarios_skipped: u64,
    pub requests_completed: u64,
    pub latency: LatencySummary,
    pub rps: RpsSummary,
    pub scenario_duration: LatencySummary,
    pub scenario_counts: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
    pub codes: BTreeMap<String, u64>,
    pub matches: u64,
    pub custom_stats: BTreeMap<String, HistogramSummary>,
    pub counters: BTreeMap<String, u64>,
}

fn by_prefix(data: &PeriodData, prefix: &str) -> BTreeMap<String, u64> {
    data.counters_with_prefix(prefix)
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn is_builtin_counter(name: &str) -> bool {
    name.starts_with("vusers.")
        || name.starts_with(CODE_PREFIX)
        || name.starts_with(ERROR_PREFIX)
        || name == "http.requests"
        || name == "http.responses"
        || name == "matches"
}

impl From<&PeriodData> for LegacyReport {
    fn from(data: &PeriodData) -> Self {
        let requests_completed = data.counter("http.responses");

        Self {
            timestamp: data.period,
            scenarios_created: data.counter("vusers.created"),
            scenarios_completed: data.counter("vusers.completed"),
            scenarios_skipped: data.counter("vusers.skipped"),
            requests_completed,
            latency: LatencySummary::from_sketch(data.histogram(RESPONSE_TIME)),
            rps: RpsSummary {
                count: requests_completed,
                mean: data.rate(REQUEST_RATE).unwrap_or(0) as f64,
            },
            scenario_duration: LatencySummary::from_sketch(data.histogram(SESSION_LENGTH)),
            scenario_counts: by_prefix(data, SCENARIO_PREFIX),
            errors: by_prefix(data, ERROR_PREFIX),
            codes: by_prefix(data, CODE_PREFIX),
            matches: data.counter("matches"),
            custom_stats: data
                .histograms
                .iter()
                .filter(|(name, _)| name.as_str() != RESPONSE_TIME && name.as_str() != SESSION_LENGTH)
                .map(|(name, s)| (name.clone(), s.summary()))
                .collect(),
            counters: data
                .counters
                .iter()
                .filter(|(name, _)| !is_builtin_counter(name))
                .map(|(name, v)| (name.clone(), *v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_flattens_well_known_metrics() {
        let mut data = PeriodData::new(42);
        for (name, v) in [
            ("vusers.created", 10),
            ("vusers.completed", 9),
            ("vusers.created_by_name.login", 4),
            ("vusers.created_by_name.browse", 6),
            ("http.codes.200", 8),
            ("http.codes.503", 1),
            ("errors.ETIMEDOUT", 1),
            ("http.responses", 9),
            ("matches", 3),
            ("cart.items", 17),
        ] {
            data.counters.insert(name.to_string(), v);
        }
        let mut rt = QuantileSketch::default();
        for v in [10.0, 20.0, 30.0] {
            rt.add(v);
        }
        data.histograms.insert(RESPONSE_TIME.into(), rt);
        let mut custom = QuantileSketch::default();
        custom.add(1.0);
        data.histograms.insert("db.query_ms".into(), custom);
        data.rates.insert(REQUEST_RATE.into(), 5);

        let r = LegacyReport::from(&data);
        assert_eq!(r.timestamp, 42);
        assert_eq!(r.scenarios_created, 10);
        assert_eq!(r.scenarios_completed, 9);
        assert_eq!(r.requests_completed, 9);
        assert_eq!(r.scenario_counts.get("login"), Some(&4));
        assert_eq!(r.codes.get("503"), Some(&1));
        assert_eq!(r.errors.get("ETIMEDOUT"), Some(&1));
        assert_eq!(r.matches, 3);
        assert_eq!(r.rps.mean, 5.0);
        assert_eq!(r.latency.min, Some(10.0));
        assert!(r.scenario_duration.median.is_none());
        assert_eq!(r.custom_stats.keys().collect::<Vec<_>>(), vec!["db.query_ms"]);
        assert_eq!(r.counters.keys().collect::<Vec<_>>(), vec!["cart.items"]);
    }

    #[test]
    fn report_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(LegacyReport::default())
            .unwrap_or_else(|e| panic!("serialize failed: {e}"));
        assert!(json.get("scenariosCreated").is_some());
        assert!(json.get("scenarioDuration").is_some());
        assert!(json.get("customStats").is_some());
    }
}
