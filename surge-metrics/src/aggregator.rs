use std::collections::BTreeMap;
use std::time::Duration;

use crate::period::PeriodData;
use crate::sketch::{QuantileSketch, SketchParams};
use crate::window::{DEFAULT_WINDOW, normalize_ts, window_end};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Window size; windows are aligned to the minute.
    pub window: Duration,
    /// How often buffered events are folded into windows.
    pub interval: Duration,
    /// When set, completed windows are kept for explicit reads instead of being pushed.
    pub pull_only: bool,
    pub sketch: SketchParams,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            interval: Duration::from_secs(5),
            pull_only: false,
            sketch: SketchParams::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RateAcc {
    count: u64,
    first: u64,
    last: u64,
}

impl RateAcc {
    fn observe(&mut self, ts: u64) {
        if self.count == 0 {
            self.first = ts;
            self.last = ts;
        } else {
            self.first = self.first.min(ts);
            self.last = self.last.max(ts);
        }
        self.count += 1;
    }

    /// Events per second over the observed span, with the span floored at one second.
    fn per_sec(&self) -> u64 {
        let span_ms = self.last.saturating_sub(self.first).max(1000);
        (self.count as f64 / (span_ms as f64 / 1000.0)).round() as u64
    }
}

#[derive(Debug)]
struct Window {
    data: PeriodData,
    rates: BTreeMap<String, RateAcc>,
}

impl Window {
    fn new(period: u64) -> Self {
        Self {
            data: PeriodData::new(period),
            rates: BTreeMap::new(),
        }
    }

    fn snapshot(&self) -> PeriodData {
        let mut out = self.data.clone();
        out.rates = self.finished_rates();
        out
    }

    fn finish(self) -> PeriodData {
        let rates = self.finished_rates();
        let mut out = self.data;
        out.rates = rates;
        out
    }

    fn finished_rates(&self) -> BTreeMap<String, u64> {
        self.rates
            .iter()
            .map(|(name, acc)| (name.clone(), acc.per_sec()))
            .collect()
    }
}

/// Windowed metrics state machine.
///
/// Events are buffered as they arrive and folded into windows by [`Aggregator::aggregate`]
/// once their window has elapsed. The tokio driver lives in [`crate::hub`].
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    counter_buf: Vec<(u64, String, u64)>,
    histogram_buf: Vec<(u64, String, f64)>,
    rate_buf: Vec<(u64, String)>,
    windows: BTreeMap<u64, Window>,
    last_taken: Option<u64>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            counter_buf: Vec::new(),
            histogram_buf: Vec::new(),
            rate_buf: Vec::new(),
            windows: BTreeMap::new(),
            last_taken: None,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn is_pull_only(&self) -> bool {
        self.config.pull_only
    }

    pub fn incr_counter(&mut self, name: impl Into<String>, value: u64, ts: u64) {
        self.counter_buf.push((ts, name.into(), value));
    }

    pub fn observe_histogram(&mut self, name: impl Into<String>, value: f64, ts: u64) {
        self.histogram_buf.push((ts, name.into(), value));
    }

    pub fn observe_rate(&mut self, name: impl Into<String>, ts: u64) {
        self.rate_buf.push((ts, name.into()));
    }

    pub fn buffered(&self) -> usize {
        self.counter_buf.len() + self.histogram_buf.len() + self.rate_buf.len()
    }

    /// Folds buffered events whose window has elapsed at `now` (or all of them when
    /// `force_all` is set). Returns the number of folded events.
    pub fn aggregate(&mut self, now: u64, force_all: bool) -> usize {
        let window_ms = self.config.window_ms();
        let params = self.config.sketch;
        let ready = |ts: u64| force_all || window_end(normalize_ts(ts, window_ms), window_ms) <= now;
        let mut folded = 0usize;

        for (ts, name, value) in drain_ready(&mut self.counter_buf, |e| ready(e.0)) {
            window_for(&mut self.windows, ts, window_ms, self.last_taken)
                .data
                .incr_counter(&name, value, ts);
            folded += 1;
        }
        for (ts, name, value) in drain_ready(&mut self.histogram_buf, |e| ready(e.0)) {
            window_for(&mut self.windows, ts, window_ms, self.last_taken)
                .data
                .observe_histogram(&name, value, ts, || QuantileSketch::new(params));
            folded += 1;
        }
        for (ts, name) in drain_ready(&mut self.rate_buf, |e| ready(e.0)) {
            window_for(&mut self.windows, ts, window_ms, self.last_taken)
                .rates
                .entry(name)
                .or_default()
                .observe(ts);
            folded += 1;
        }

        folded
    }

    /// Periods of the windows currently held, ascending.
    pub fn bucket_ids(&self) -> Vec<u64> {
        self.windows.keys().copied().collect()
    }

    pub fn get_metrics(&self, period: u64) -> Option<PeriodData> {
        self.windows.get(&period).map(Window::snapshot)
    }

    pub fn take_metrics(&mut self, period: u64) -> Option<PeriodData> {
        let window = self.windows.remove(&period)?;
        self.last_taken = Some(self.last_taken.map_or(period, |p| p.max(period)));
        Some(window.finish())
    }

    /// Removes and returns every window whose boundary has passed at `now`, ascending.
    pub fn take_completed(&mut self, now: u64) -> Vec<PeriodData> {
        let window_ms = self.config.window_ms();
        let done: Vec<u64> = self
            .windows
            .keys()
            .copied()
            .filter(|p| window_end(*p, window_ms) <= now)
            .collect();
        done.into_iter()
            .filter_map(|p| self.take_metrics(p))
            .collect()
    }

    /// Folds everything that is buffered and removes every window, ascending.
    pub fn flush(&mut self, now: u64) -> Vec<PeriodData> {
        self.aggregate(now, true);
        let periods = self.bucket_ids();
        periods
            .into_iter()
            .filter_map(|p| self.take_metrics(p))
            .collect()
    }
}

fn window_for(
    windows: &mut BTreeMap<u64, Window>,
    ts: u64,
    window_ms: u64,
    last_taken: Option<u64>,
) -> &mut Window {
    let period = normalize_ts(ts, window_ms);
    windows.entry(period).or_insert_with(|| {
        if last_taken.is_some_and(|taken| period <= taken) {
            tracing::debug!(period, "late metrics reopen an already emitted window");
        }
        Window::new(period)
    })
}

fn drain_ready<T>(buf: &mut Vec<T>, mut ready: impl FnMut(&T) -> bool) -> Vec<T> {
    let (out, keep): (Vec<T>, Vec<T>) = std::mem::take(buf).into_iter().partition(|e| ready(e));
    *buf = keep;
    out
}
