use std::sync::Arc;

use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use regex::Regex;

use crate::error::{Error, Result};
use crate::template::Scope;

/// Chooses which scenario each arriving VU runs.
#[derive(Debug, Clone)]
pub enum ScenarioPicker {
    Fixed(usize),
    Weighted(WeightedIndex<u64>),
}

impl ScenarioPicker {
    /// Builds a weighted picker. Weights are evaluated once, here.
    pub fn weighted<'a>(
        weights: impl IntoIterator<Item = Option<&'a serde_json::Value>>,
        scope: Scope<'_>,
    ) -> Result<Self> {
        let weights: Vec<u64> = weights
            .into_iter()
            .map(|w| evaluate_weight(w, scope))
            .collect();
        WeightedIndex::new(weights)
            .map(Self::Weighted)
            .map_err(|_| Error::NoSelectableScenario)
    }

    pub fn pick(&self) -> usize {
        match self {
            Self::Fixed(index) => *index,
            Self::Weighted(dist) => dist.sample(&mut rand::rng()),
        }
    }
}

/// Missing weight means 1. Templates are rendered first; anything that doesn't
/// parse as a non-negative integer counts as 0.
pub fn evaluate_weight(weight: Option<&serde_json::Value>, scope: Scope<'_>) -> u64 {
    let Some(weight) = weight else {
        return 1;
    };
    let parsed = match weight {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        serde_json::Value::String(s) => parse_weight(&scope.render_string(s)),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        tracing::warn!(weight = %weight, "scenario weight is not a number; treating as 0");
        0
    })
}

fn parse_weight(s: &str) -> Option<u64> {
    let s = s.trim();
    s.parse::<u64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.trunc() as u64)
    })
}

/// Resolves a single-scenario override: an exact name wins, otherwise the
/// pattern is a regex that must match exactly one scenario name.
pub fn resolve_override(names: &[Arc<str>], pattern: &str) -> Result<usize> {
    if let Some(index) = names.iter().position(|n| n.as_ref() == pattern) {
        return Ok(index);
    }

    let re = Regex::new(pattern).map_err(|source| Error::ScenarioOverridePattern {
        pattern: pattern.to_string(),
        source,
    })?;
    let matches: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| re.is_match(n))
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [] => Err(Error::ScenarioOverrideNoMatch(pattern.to_string())),
        [index] => Ok(*index),
        _ => Err(Error::ScenarioOverrideAmbiguous {
            pattern: pattern.to_string(),
            matches: matches.iter().map(|&i| names[i].to_string()).collect(),
        }),
    }
}
