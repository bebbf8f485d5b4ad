pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("phase #{index}: invalid `{field}` value `{value}` (expected seconds or a duration like `30s`, `5m`)")]
    InvalidDuration {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("phase #{index}: {reason}")]
    InvalidPhase { index: usize, reason: String },

    #[error("scenario `{scenario}` uses engine `{engine}` which is not loaded")]
    UnknownEngine { scenario: String, engine: String },

    #[error("scenario `{scenario}` references hook function `{function}` which is not defined")]
    UnknownHook { scenario: String, function: String },

    #[error("no scenario matches `{0}`")]
    ScenarioOverrideNoMatch(String),

    #[error("`{pattern}` matches more than one scenario: {matches:?}")]
    ScenarioOverrideAmbiguous {
        pattern: String,
        matches: Vec<String>,
    },

    #[error("invalid scenario pattern `{pattern}`: {source}")]
    ScenarioOverridePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no scenario has a positive weight")]
    NoSelectableScenario,

    #[error("scenario `{scenario}` could not be compiled: {source}")]
    Compile {
        scenario: String,
        #[source]
        source: crate::runner::EngineError,
    },

    #[error("metrics error: {0}")]
    Metrics(#[from] surge_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
