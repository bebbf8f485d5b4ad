use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sketch::{HistogramSummary, QuantileSketch};

/// Aggregated metrics for one time window starting at `period` (epoch ms).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodData {
    pub period: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_counter_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_counter_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_histogram_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_histogram_at: Option<u64>,

    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub histograms: BTreeMap<String, QuantileSketch>,
    #[serde(default)]
    pub rates: BTreeMap<String, u64>,
}

impl PeriodData {
    pub fn new(period: u64) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn rate(&self, name: &str) -> Option<u64> {
        self.rates.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Option<&QuantileSketch> {
        self.histograms.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.histograms.is_empty() && self.rates.is_empty()
    }

    /// Counters whose name starts with `prefix`, keyed by the remainder of the name.
    pub fn counters_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, u64)> + 'a {
        self.counters
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .map_while(move |(k, v)| k.strip_prefix(prefix).map(|rest| (rest, *v)))
    }

    pub fn summaries(&self) -> BTreeMap<String, HistogramSummary> {
        self.histograms
            .iter()
            .map(|(name, sketch)| (name.clone(), sketch.summary()))
            .collect()
    }

    pub(crate) fn incr_counter(&mut self, name: &str, value: u64, ts: u64) {
        match self.counters.get_mut(name) {
            Some(v) => *v = v.saturating_add(value),
            None => {
                self.counters.insert(name.to_string(), value);
            }
        }
        self.first_counter_at = Some(self.first_counter_at.map_or(ts, |t| t.min(ts)));
        self.last_counter_at = Some(self.last_counter_at.map_or(ts, |t| t.max(ts)));
    }

    pub(crate) fn observe_histogram(
        &mut self,
        name: &str,
        value: f64,
        ts: u64,
        new_sketch: impl FnOnce() -> QuantileSketch,
    ) {
        match self.histograms.get_mut(name) {
            Some(s) => s.add(value),
            None => {
                let mut s = new_sketch();
                s.add(value);
                self.histograms.insert(name.to_string(), s);
            }
        }
        self.first_histogram_at = Some(self.first_histogram_at.map_or(ts, |t| t.min(ts)));
        self.last_histogram_at = Some(self.last_histogram_at.map_or(ts, |t| t.max(ts)));
    }
}

fn min_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Combines windows: counters summed, sketches merged, rates averaged over the inputs.
fn combine(items: Vec<PeriodData>, period: u64) -> Result<PeriodData> {
    let inputs = items.len().max(1) as u64;
    let mut out = PeriodData::new(period);
    let mut rate_sums: BTreeMap<String, u64> = BTreeMap::new();

    for item in items {
        out.first_counter_at = min_opt(out.first_counter_at, item.first_counter_at);
        out.last_counter_at = max_opt(out.last_counter_at, item.last_counter_at);
        out.first_histogram_at = min_opt(out.first_histogram_at, item.first_histogram_at);
        out.last_histogram_at = max_opt(out.last_histogram_at, item.last_histogram_at);

        for (name, value) in item.counters {
            let slot = out.counters.entry(name).or_insert(0);
            *slot = slot.saturating_add(value);
        }

        for (name, sketch) in item.histograms {
            match out.histograms.get_mut(&name) {
                Some(existing) => existing.merge(&sketch)?,
                None => {
                    out.histograms.insert(name, sketch);
                }
            }
        }

        for (name, rate) in item.rates {
            let slot = rate_sums.entry(name).or_insert(0);
            *slot = slot.saturating_add(rate);
        }
    }

    out.rates = rate_sums
        .into_iter()
        .map(|(name, sum)| (name, (sum as f64 / inputs as f64).round() as u64))
        .collect();

    Ok(out)
}

/// Merges windows from many sources, one output per distinct period, ascending.
pub fn merge_buckets(items: impl IntoIterator<Item = PeriodData>) -> Result<Vec<PeriodData>> {
    let mut by_period: BTreeMap<u64, Vec<PeriodData>> = BTreeMap::new();
    for item in items {
        by_period.entry(item.period).or_default().push(item);
    }

    by_period
        .into_iter()
        .map(|(period, group)| combine(group, period))
        .collect()
}

/// Folds a list of windows into one grand total whose period is the latest input period.
pub fn pack(items: impl IntoIterator<Item = PeriodData>) -> Result<PeriodData> {
    let items: Vec<PeriodData> = items.into_iter().collect();
    let period = items.iter().map(|p| p.period).max().unwrap_or(0);
    combine(items, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(period: u64, counters: &[(&str, u64)], samples: &[f64]) -> PeriodData {
        let mut p = PeriodData::new(period);
        for (name, v) in counters {
            p.incr_counter(name, *v, period + 1);
        }
        for s in samples {
            p.observe_histogram("latency", *s, period + 2, QuantileSketch::default);
        }
        p
    }

    #[test]
    fn merge_buckets_groups_by_period() {
        let out = merge_buckets([
            window(20_000, &[("a", 1)], &[1.0]),
            window(10_000, &[("a", 2)], &[]),
            window(20_000, &[("a", 3), ("b", 1)], &[2.0, 3.0]),
        ])
        .unwrap_or_else(|e| panic!("merge failed: {e}"));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].period, 10_000);
        assert_eq!(out[0].counter("a"), 2);
        assert_eq!(out[1].period, 20_000);
        assert_eq!(out[1].counter("a"), 4);
        assert_eq!(out[1].counter("b"), 1);
        assert_eq!(out[1].histogram("latency").map(QuantileSketch::count), Some(3));
    }

    #[test]
    fn rates_are_summed_then_divided_by_inputs() {
        let mut a = PeriodData::new(0);
        a.rates.insert("http.request_rate".into(), 10);
        let mut b = PeriodData::new(0);
        b.rates.insert("http.request_rate".into(), 20);
        let c = PeriodData::new(0);

        let out = merge_buckets([a, b, c]).unwrap_or_else(|e| panic!("merge failed: {e}"));
        assert_eq!(out[0].rate("http.request_rate"), Some(10));
    }

    #[test]
    fn pack_takes_latest_period_and_time_bounds() {
        let packed = pack([
            window(30_000, &[("x", 1)], &[]),
            window(10_000, &[("x", 1)], &[5.0]),
        ])
        .unwrap_or_else(|e| panic!("pack failed: {e}"));
        assert_eq!(packed.period, 30_000);
        assert_eq!(packed.counter("x"), 2);
        assert_eq!(packed.first_counter_at, Some(10_001));
        assert_eq!(packed.last_counter_at, Some(30_001));
        assert_eq!(packed.first_histogram_at, Some(10_002));
    }

    #[test]
    fn pack_of_nothing_is_empty() {
        let packed = pack(Vec::new()).unwrap_or_else(|e| panic!("pack failed: {e}"));
        assert_eq!(packed.period, 0);
        assert!(packed.is_empty());
    }

    #[test]
    fn prefix_iteration_strips_prefix() {
        let p = window(0, &[("http.codes.200", 4), ("http.codes.500", 1), ("vusers.created", 5)], &[]);
        let codes: Vec<(&str, u64)> = p.counters_with_prefix("http.codes.").collect();
        assert_eq!(codes, vec![("200", 4), ("500", 1)]);
    }
}
