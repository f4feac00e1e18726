#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid destination URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Transport {
        url: String,
        reason: String,
        timeout: bool,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Timeouts, connection failures, 408, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::InvalidUrl { .. } | Self::Client(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Transport { timeout: true, .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::Client(_) => "client",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("event kind is empty")]
    EmptyKind,

    #[error("payload encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
