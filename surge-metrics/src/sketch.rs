use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sketches_ddsketch::{Config as DDSketchConfig, DDSketch};

use crate::error::{Error, Result};
use crate::wire::{self, EnvelopeTag};

pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;
pub const DEFAULT_MAX_BINS: u32 = 2048;
pub const DEFAULT_MIN_VALUE: f64 = 1.0e-9;

/// Prefix marking a base64-encoded sketch envelope inside JSON.
pub const BASE64_TAG: &str = "b64:";

/// Accuracy parameters. Two sketches merge only when these are identical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SketchParams {
    pub relative_accuracy: f64,
    pub max_bins: u32,
    pub min_value: f64,
}

impl Default for SketchParams {
    fn default() -> Self {
        Self {
            relative_accuracy: DEFAULT_RELATIVE_ACCURACY,
            max_bins: DEFAULT_MAX_BINS,
            min_value: DEFAULT_MIN_VALUE,
        }
    }
}

/// Relative-accuracy streaming quantile estimator backed by DDSketch.
pub struct QuantileSketch {
    params: SketchParams,
    inner: DDSketch,
}

#[derive(Serialize)]
struct SketchPayloadRef<'a> {
    params: SketchParams,
    sketch: &'a DDSketch,
}

#[derive(Deserialize)]
struct SketchPayload {
    params: SketchParams,
    sketch: DDSketch,
}

impl QuantileSketch {
    pub fn new(params: SketchParams) -> Self {
        let config = DDSketchConfig::new(
            params.relative_accuracy,
            params.max_bins,
            params.min_value,
        );
        Self {
            params,
            inner: DDSketch::new(config),
        }
    }

    pub fn params(&self) -> SketchParams {
        self.params
    }

    pub fn add(&mut self, value: f64) {
        if value.is_finite() {
            self.inner.add(value);
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn min(&self) -> Option<f64> {
        self.inner.min()
    }

    pub fn max(&self) -> Option<f64> {
        self.inner.max()
    }

    pub fn sum(&self) -> Option<f64> {
        self.inner.sum()
    }

    pub fn mean(&self) -> Option<f64> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        self.sum().map(|s| s / count as f64)
    }

    /// Value at quantile `q` in `[0, 1]`; `None` when the sketch is empty.
    pub fn quantile(&self, q: f64) -> Result<Option<f64>> {
        self.inner
            .quantile(q)
            .map_err(|e| Error::Sketch(e.to_string()))
    }

    pub fn merge(&mut self, other: &QuantileSketch) -> Result<()> {
        if self.params != other.params {
            return Err(Error::SketchMismatch {
                left: self.params.relative_accuracy,
                right: other.params.relative_accuracy,
                left_bins: self.params.max_bins,
                right_bins: other.params.max_bins,
            });
        }
        self.inner
            .merge(&other.inner)
            .map_err(|e| Error::Sketch(e.to_string()))
    }

    pub fn summary(&self) -> HistogramSummary {
        let q = |p: f64| self.quantile(p).ok().flatten();
        HistogramSummary {
            min: self.min(),
            max: self.max(),
            count: self.count(),
            mean: self.mean(),
            p50: q(0.50),
            p75: q(0.75),
            p90: q(0.90),
            p95: q(0.95),
            p99: q(0.99),
            p999: q(0.999),
        }
    }

    /// Encodes the sketch into a self-describing binary envelope.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&SketchPayloadRef {
            params: self.params,
            sketch: &self.inner,
        })?;
        Ok(wire::encode_envelope(EnvelopeTag::DDSketch, &payload))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (tag, payload) = wire::decode_envelope(buf)?;
        match tag {
            EnvelopeTag::DDSketch => {
                let decoded: SketchPayload = bincode::deserialize(payload)?;
                Ok(Self {
                    params: decoded.params,
                    inner: decoded.sketch,
                })
            }
        }
    }

    /// Tagged base64 string form; an empty default sketch encodes as `""`.
    pub fn to_base64(&self) -> Result<String> {
        if self.is_empty() && self.params == SketchParams::default() {
            return Ok(String::new());
        }
        let bytes = self.to_bytes()?;
        Ok(format!("{BASE64_TAG}{}", STANDARD.encode(bytes)))
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let encoded = s
            .strip_prefix(BASE64_TAG)
            .ok_or(Error::Envelope("missing base64 tag"))?;
        let bytes = STANDARD.decode(encoded)?;
        Self::from_bytes(&bytes)
    }
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new(SketchParams::default())
    }
}

impl Clone for QuantileSketch {
    fn clone(&self) -> Self {
        let mut out = Self::new(self.params);
        // Same config on both sides, merge cannot fail.
        let _ = out.inner.merge(&self.inner);
        out
    }
}

impl fmt::Debug for QuantileSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantileSketch")
            .field("params", &self.params)
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish()
    }
}

impl Serialize for QuantileSketch {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = self.to_base64().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for QuantileSketch {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: u64,
    pub mean: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub p999: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: impl IntoIterator<Item = f64>) -> QuantileSketch {
        let mut s = QuantileSketch::default();
        for v in values {
            s.add(v);
        }
        s
    }

    fn within(actual: f64, expected: f64, rel: f64) -> bool {
        (actual - expected).abs() <= expected.abs() * rel
    }

    #[test]
    fn empty_sketch_has_no_stats() {
        let s = QuantileSketch::default();
        let summary = s.summary();
        assert_eq!(summary.count, 0);
        assert!(summary.p50.is_none());
        assert!(summary.min.is_none());
        assert!(summary.mean.is_none());
    }

    #[test]
    fn quantiles_stay_within_relative_accuracy() {
        let s = filled((1..=1000).map(f64::from));
        let p50 = s.quantile(0.5).ok().flatten().unwrap_or_else(|| panic!("p50"));
        let p99 = s.quantile(0.99).ok().flatten().unwrap_or_else(|| panic!("p99"));
        assert!(within(p50, 500.0, 0.02), "p50={p50}");
        assert!(within(p99, 990.0, 0.02), "p99={p99}");
        assert_eq!(s.count(), 1000);
        assert_eq!(s.min(), Some(1.0));
        assert_eq!(s.max(), Some(1000.0));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let s = filled([1.0, f64::NAN, f64::INFINITY, 2.0]);
        assert_eq!(s.count(), 2);
    }

    #[test]
    fn merge_combines_counts_and_extremes() {
        let mut a = filled((1..=100).map(f64::from));
        let b = filled((101..=200).map(f64::from));
        a.merge(&b).unwrap_or_else(|e| panic!("merge failed: {e}"));
        assert_eq!(a.count(), 200);
        assert_eq!(a.min(), Some(1.0));
        assert_eq!(a.max(), Some(200.0));
    }

    #[test]
    fn merge_rejects_mismatched_accuracy() {
        let mut a = QuantileSketch::default();
        let b = QuantileSketch::new(SketchParams {
            relative_accuracy: 0.05,
            ..SketchParams::default()
        });
        let err = a.merge(&b).err();
        assert!(matches!(err, Some(Error::SketchMismatch { .. })));
    }

    #[test]
    fn bytes_round_trip_preserves_quantiles() {
        let s = filled((1..=500).map(f64::from));
        let bytes = s.to_bytes().unwrap_or_else(|e| panic!("encode: {e}"));
        let back = QuantileSketch::from_bytes(&bytes).unwrap_or_else(|e| panic!("decode: {e}"));
        assert_eq!(back.count(), 500);
        assert_eq!(back.params(), s.params());
        assert_eq!(
            back.quantile(0.9).ok().flatten(),
            s.quantile(0.9).ok().flatten()
        );
    }

    #[test]
    fn empty_default_sketch_uses_empty_string_sentinel() {
        let s = QuantileSketch::default();
        assert_eq!(s.to_base64().ok().as_deref(), Some(""));
        let back = QuantileSketch::from_base64("").unwrap_or_else(|e| panic!("decode: {e}"));
        assert!(back.is_empty());
    }

    #[test]
    fn base64_form_is_tagged() {
        let s = filled([3.0]);
        let encoded = s.to_base64().unwrap_or_else(|e| panic!("encode: {e}"));
        assert!(encoded.starts_with(BASE64_TAG));
        assert!(QuantileSketch::from_base64(&encoded[BASE64_TAG.len()..]).is_err());
    }
}
