use std::time::Duration;

use crate::config::{DurationValue, RawPhaseSpec};
use crate::error::{Error, Result};

/// How arrivals are spread inside a constant-rate phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PhaseMode {
    #[default]
    Uniform,
    Poisson,
}

/// What a phase does, decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseKind {
    Pause {
        pause: Duration,
    },
    ArrivalCount {
        count: u64,
        duration: Duration,
    },
    ArrivalRate {
        rate: f64,
        duration: Duration,
    },
    Ramp {
        from: f64,
        to: f64,
        duration: Duration,
    },
}

impl PhaseKind {
    /// Minimum wall-clock time the phase occupies.
    pub fn duration(&self) -> Duration {
        match *self {
            Self::Pause { pause } => pause,
            Self::ArrivalCount { count: 0, .. } => Duration::ZERO,
            Self::ArrivalCount { duration, .. }
            | Self::ArrivalRate { duration, .. }
            | Self::Ramp { duration, .. } => duration,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pause { .. } => "pause",
            Self::ArrivalCount { .. } => "arrival-count",
            Self::ArrivalRate { .. } => "arrival-rate",
            Self::Ramp { .. } => "ramp",
        }
    }
}

/// A validated phase. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub index: usize,
    pub name: Option<String>,
    pub mode: PhaseMode,
    pub duration: Option<Duration>,
    pub pause: Option<Duration>,
    pub arrival_rate: Option<f64>,
    pub ramp_to: Option<f64>,
    pub arrival_count: Option<u64>,
    pub max_vusers: Option<u64>,
    kind: PhaseKind,
}

impl PhaseSpec {
    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{}", self.index),
        }
    }

    pub fn from_raw(index: usize, raw: &RawPhaseSpec) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPhase {
            index,
            reason: reason.to_string(),
        };

        let duration = raw
            .duration
            .as_ref()
            .map(|v| parse_duration_value(index, "duration", v))
            .transpose()?;
        let pause = raw
            .pause
            .as_ref()
            .map(|v| parse_duration_value(index, "pause", v))
            .transpose()?;

        let mode = match raw.mode.as_deref() {
            None => PhaseMode::default(),
            Some(m) => m
                .parse::<PhaseMode>()
                .map_err(|_| invalid("`mode` must be `uniform` or `poisson`"))?,
        };

        for (field, value) in [("arrivalRate", raw.arrival_rate), ("rampTo", raw.ramp_to)] {
            if let Some(v) = value
                && (!v.is_finite() || v < 0.0)
            {
                return Err(invalid(&format!("`{field}` must be a non-negative number")));
            }
        }

        let kind = if let Some(pause) = pause {
            PhaseKind::Pause { pause }
        } else if let Some(count) = raw.arrival_count {
            let duration = duration.ok_or_else(|| invalid("`arrivalCount` requires `duration`"))?;
            PhaseKind::ArrivalCount { count, duration }
        } else if let Some(rate) = raw.arrival_rate {
            let duration = duration.ok_or_else(|| invalid("`arrivalRate` requires `duration`"))?;
            match raw.ramp_to {
                Some(to) => {
                    if duration.as_secs() == 0 {
                        return Err(invalid("a ramp needs a `duration` of at least 1s"));
                    }
                    PhaseKind::Ramp {
                        from: rate,
                        to,
                        duration,
                    }
                }
                None if rate == 0.0 => PhaseKind::Pause { pause: duration },
                None => {
                    if duration.is_zero() {
                        return Err(invalid("`duration` must be positive"));
                    }
                    PhaseKind::ArrivalRate { rate, duration }
                }
            }
        } else if raw.ramp_to.is_some() {
            return Err(invalid("`rampTo` requires `arrivalRate`"));
        } else {
            return Err(invalid(
                "phase needs one of `pause`, `arrivalCount` or `arrivalRate`",
            ));
        };

        Ok(Self {
            index,
            name: raw.name.clone(),
            mode,
            duration,
            pause,
            arrival_rate: raw.arrival_rate,
            ramp_to: raw.ramp_to,
            arrival_count: raw.arrival_count,
            max_vusers: raw.max_vusers,
            kind,
        })
    }
}

/// Plain numbers (or numeric strings) are seconds; anything else goes through humantime.
pub fn parse_duration_value(
    index: usize,
    field: &'static str,
    value: &DurationValue,
) -> Result<Duration> {
    let invalid = || Error::InvalidDuration {
        index,
        field,
        value: value.to_string(),
    };

    let secs_to_duration = |secs: f64| {
        if secs.is_finite() && secs >= 0.0 {
            Ok(Duration::from_secs_f64(secs))
        } else {
            Err(invalid())
        }
    };

    match value {
        DurationValue::Seconds(secs) => secs_to_duration(*secs),
        DurationValue::Text(text) => {
            let text = text.trim();
            if let Ok(secs) = text.parse::<f64>() {
                return secs_to_duration(secs);
            }
            humantime::parse_duration(text).map_err(|_| invalid())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawPhaseSpec {
        serde_json::from_value(json).unwrap_or_else(|e| panic!("bad phase json: {e}"))
    }

    #[test]
    fn durations_accept_seconds_and_human_strings() {
        let p = |v: DurationValue| parse_duration_value(0, "duration", &v).ok();
        assert_eq!(p(DurationValue::from(30)), Some(Duration::from_secs(30)));
        assert_eq!(p(DurationValue::from("30s")), Some(Duration::from_secs(30)));
        assert_eq!(p(DurationValue::from("5m")), Some(Duration::from_secs(300)));
        assert_eq!(p(DurationValue::from("1h 30m")), Some(Duration::from_secs(5400)));
        assert_eq!(p(DurationValue::from("12")), Some(Duration::from_secs(12)));
        assert_eq!(p(DurationValue::Seconds(-1.0)), None);
    }

    #[test]
    fn unparseable_duration_names_phase_and_field() {
        let err = PhaseSpec::from_raw(2, &raw(serde_json::json!({ "duration": "soon", "arrivalRate": 1 })))
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        match err {
            Error::InvalidDuration { index, field, value } => {
                assert_eq!(index, 2);
                assert_eq!(field, "duration");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn kinds_are_derived_from_fields() {
        let kind = |json| {
            PhaseSpec::from_raw(0, &raw(json))
                .unwrap_or_else(|e| panic!("invalid phase: {e}"))
                .kind()
        };
        assert_eq!(
            kind(serde_json::json!({ "pause": 5 })),
            PhaseKind::Pause { pause: Duration::from_secs(5) }
        );
        assert_eq!(
            kind(serde_json::json!({ "duration": 10, "arrivalCount": 5 })),
            PhaseKind::ArrivalCount { count: 5, duration: Duration::from_secs(10) }
        );
        assert_eq!(
            kind(serde_json::json!({ "duration": 2, "arrivalRate": 5 })),
            PhaseKind::ArrivalRate { rate: 5.0, duration: Duration::from_secs(2) }
        );
        assert_eq!(
            kind(serde_json::json!({ "duration": 15, "arrivalRate": 1, "rampTo": 20 })),
            PhaseKind::Ramp { from: 1.0, to: 20.0, duration: Duration::from_secs(15) }
        );
        assert_eq!(
            kind(serde_json::json!({ "duration": 3, "arrivalRate": 0 })),
            PhaseKind::Pause { pause: Duration::from_secs(3) }
        );
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        for json in [
            serde_json::json!({ "duration": 10 }),
            serde_json::json!({ "arrivalCount": 10 }),
            serde_json::json!({ "duration": 10, "rampTo": 10 }),
            serde_json::json!({ "duration": 10, "arrivalRate": -1 }),
            serde_json::json!({ "duration": 0, "arrivalRate": 1, "rampTo": 5 }),
            serde_json::json!({ "duration": 10, "arrivalRate": 1, "mode": "bursty" }),
        ] {
            assert!(
                matches!(PhaseSpec::from_raw(0, &raw(json.clone())), Err(Error::InvalidPhase { .. })),
                "accepted {json}"
            );
        }
    }

    #[test]
    fn zero_count_phase_takes_no_time() {
        let spec = PhaseSpec::from_raw(0, &raw(serde_json::json!({ "duration": 10, "arrivalCount": 0 })))
            .unwrap_or_else(|e| panic!("invalid phase: {e}"));
        assert_eq!(spec.kind().duration(), Duration::ZERO);
    }
}
