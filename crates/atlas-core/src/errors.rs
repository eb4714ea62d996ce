use std::time::Duration;

/// Typed error hierarchy for LLM provider calls.
/// Transient errors are retried by the client; fatal errors abort the turn.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    // Fatal — surfaced immediately, never retried
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("protocol translation failed: {0}")]
    Translation(String),

    // Transient — retried with backoff
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Overloaded(_)
                | Self::ServerError { .. }
                | Self::Network(_)
                | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Translation(_) => "translation",
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded(_) => "overloaded",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited {
                message: body,
                retry_after: None,
            },
            529 => Self::Overloaded(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
