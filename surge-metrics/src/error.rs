pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "cannot merge sketches with different parameters (accuracy {left} vs {right}, bins {left_bins} vs {right_bins})"
    )]
    SketchMismatch {
        left: f64,
        right: f64,
        left_bins: u32,
        right_bins: u32,
    },

    #[error("sketch error: {0}")]
    Sketch(String),

    #[error("invalid sketch envelope: {0}")]
    Envelope(&'static str),

    #[error("unsupported sketch envelope version {0}")]
    EnvelopeVersion(u8),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("binary codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no metrics window for period {0}")]
    UnknownPeriod(u64),

    #[error("metrics aggregator is no longer running")]
    HubClosed,
}
