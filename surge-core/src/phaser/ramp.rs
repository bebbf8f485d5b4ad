use std::time::Duration;

/// This process's slot among parallel workers sharing one schedule. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerShare {
    pub index: u32,
    pub total: u32,
}

impl Default for WorkerShare {
    fn default() -> Self {
        Self { index: 1, total: 1 }
    }
}

impl WorkerShare {
    pub fn new(index: u32, total: u32) -> Self {
        let total = total.max(1);
        Self {
            index: index.clamp(1, total),
            total,
        }
    }

    /// This worker's whole-number slice of `total_rate`.
    ///
    /// Every worker gets the floor of its even share; the first `round(frac * total)`
    /// workers get one more, so the slices sum to the rounded total.
    pub fn split(&self, total_rate: f64) -> u64 {
        let per_worker = total_rate.max(0.0) / f64::from(self.total);
        let base = per_worker.floor();
        let frac = per_worker - base;
        let bumped = (frac * f64::from(self.total)).round() as u32;
        base as u64 + u64::from(self.index <= bumped)
    }
}

/// Linear rate ramp over one-second periods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampPlan {
    pub from: f64,
    pub to: f64,
    pub periods: u64,
}

impl RampPlan {
    pub fn new(from: f64, to: f64, duration: Duration) -> Self {
        Self {
            from,
            to,
            periods: duration.as_secs(),
        }
    }

    /// Total (all-worker) arrival rate for period `t`.
    pub fn rate_at(&self, t: u64) -> f64 {
        if self.periods <= 1 {
            return (self.from + self.to) / 2.0;
        }
        let slope = (self.to - self.from) / (self.periods - 1) as f64;
        slope * t as f64 + self.from
    }

    /// Arrivals this worker emits in period `t`.
    pub fn quota_at(&self, t: u64, share: WorkerShare) -> u64 {
        share.split(self.rate_at(t))
    }

    /// Gap between arrivals inside a period carrying `quota` arrivals.
    pub fn tick_delay(quota: u64) -> Duration {
        if quota == 0 {
            return Duration::from_secs(1);
        }
        Duration::from_millis((1000 / quota).min(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_interpolates_linearly_between_endpoints() {
        let plan = RampPlan::new(1.0, 20.0, Duration::from_secs(15));
        assert_eq!(plan.periods, 15);
        assert_eq!(plan.rate_at(0), 1.0);
        assert!((plan.rate_at(14) - 20.0).abs() < 1e-9);
        assert!((plan.rate_at(7) - 10.5).abs() < 1e-9);
    }

    #[test]
    fn one_second_ramp_uses_midpoint() {
        let plan = RampPlan::new(2.0, 8.0, Duration::from_secs(1));
        assert_eq!(plan.rate_at(0), 5.0);
    }

    #[test]
    fn worker_slices_sum_to_rounded_total() {
        for total_rate in [0.0, 0.4, 1.0, 7.0, 7.5, 10.2, 33.7] {
            for workers in 1..=6u32 {
                let sum: u64 = (1..=workers)
                    .map(|i| WorkerShare::new(i, workers).split(total_rate))
                    .sum();
                let per = total_rate / f64::from(workers);
                let expected = per.floor() as u64 * u64::from(workers)
                    + ((per - per.floor()) * f64::from(workers)).round() as u64;
                assert_eq!(sum, expected, "rate {total_rate} workers {workers}");
                assert!((sum as f64 - total_rate).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn low_rates_are_spread_deterministically() {
        // 1.5 arrivals per second over 3 workers: workers 1 and 2 (round(0.5 * 3) = 2) emit one.
        let slices: Vec<u64> = (1..=3).map(|i| WorkerShare::new(i, 3).split(1.5)).collect();
        assert_eq!(slices, vec![1, 1, 0]);
    }

    #[test]
    fn tick_delay_is_capped_at_one_second() {
        assert_eq!(RampPlan::tick_delay(1), Duration::from_millis(1000));
        assert_eq!(RampPlan::tick_delay(3), Duration::from_millis(333));
        assert_eq!(RampPlan::tick_delay(5000), Duration::ZERO);
    }
}
