use thiserror::Error;

/// Failures surfaced to the caller of the pipeline.
///
/// Per-address entity and token lookup failures never appear here; they are
/// absorbed where they happen and recorded as "no annotation".
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, limit: u32 },

    #[error("upstream indexing API rate limited the request")]
    UpstreamRateLimited,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("processing exceeded the {budget_secs}s deadline during {stage}")]
    ProcessingTimeout {
        budget_secs: u64,
        stage: &'static str,
    },

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable identifier for clients and dashboards.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidTimeRange(_) => "INVALID_TIME_RANGE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::UpstreamRateLimited => "UPSTREAM_RATE_LIMITED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::ProcessingTimeout { .. } => "PROCESSING_TIMEOUT",
            Self::Unknown(_) => "UNKNOWN_FAILURE",
        }
    }

    /// Message that is safe to return to callers. Never includes credentials,
    /// upstream bodies or internal error chains.
    pub fn safe_message(&self) -> String {
        match self {
            Self::InvalidAddress(_) => {
                "Address must be a base58 string of 32 to 44 characters.".to_string()
            }
            Self::InvalidTimeRange(reason) => format!("Invalid time range: {reason}."),
            Self::RateLimited {
                retry_after_secs, ..
            } => format!("Too many requests. Retry in {retry_after_secs} seconds."),
            Self::UpstreamRateLimited => {
                "The transaction indexer is rate limiting requests. Try again shortly.".to_string()
            }
            Self::Configuration(_) => "The service is not configured correctly.".to_string(),
            Self::UpstreamTimeout => "The transaction indexer did not respond in time.".to_string(),
            Self::ProcessingTimeout { .. } => {
                "Processing took too long. Retry with a narrower time range.".to_string()
            }
            Self::Unknown(_) => "An unexpected error occurred.".to_string(),
        }
    }
}
