use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

/// A test script as handed over by the script loader.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScript {
    #[serde(default)]
    pub config: ScriptConfig,

    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub phases: Vec<RawPhaseSpec>,

    /// Already-loaded payload tables.
    #[serde(default, deserialize_with = "one_or_many")]
    pub payload: Vec<PayloadSpec>,

    /// Inline variables; an array value means "pick one element per VU".
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Custom engines declared by the script, with their engine-specific config.
    #[serde(default)]
    pub engines: BTreeMap<String, serde_json::Value>,

    /// Run a single scenario: exact name, otherwise a regex matching exactly one name.
    #[serde(default)]
    pub scenario: Option<String>,
}

/// Phase as written in the script. Validated and normalized by the phaser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPhaseSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub duration: Option<DurationValue>,
    #[serde(default)]
    pub pause: Option<DurationValue>,
    #[serde(default)]
    pub arrival_rate: Option<f64>,
    #[serde(default)]
    pub ramp_to: Option<f64>,
    #[serde(default)]
    pub arrival_count: Option<u64>,
    #[serde(default)]
    pub max_vusers: Option<u64>,
}

/// Either plain seconds or a human duration string (`"30s"`, `"5m"`, `"1h 30m"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(f64),
    Text(String),
}

impl From<u64> for DurationValue {
    fn from(value: u64) -> Self {
        Self::Seconds(value as f64)
    }
}

impl From<&str> for DurationValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PayloadOrder {
    #[default]
    Random,
    Sequence,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSpec {
    /// When set, each row is also exposed as one object variable under this name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub order: PayloadOrder,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Integer or template string; evaluated once when the picker is built.
    #[serde(default)]
    pub weight: Option<serde_json::Value>,

    /// Engine that runs this scenario; `http` when unset.
    #[serde(default)]
    pub engine: Option<String>,

    /// Engine-specific steps.
    #[serde(default)]
    pub flow: Vec<serde_json::Value>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub before_scenario: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub after_scenario: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub before_request: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub after_response: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub on_error: Vec<String>,
}

pub const DEFAULT_ENGINE: &str = "http";

impl ScenarioDefinition {
    pub fn engine_name(&self) -> &str {
        self.engine.as_deref().unwrap_or(DEFAULT_ENGINE)
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(v) => v,
    })
}
