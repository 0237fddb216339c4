use std::time::Duration;

/// Typed error hierarchy for provider operations.
///
/// Variants fall into three classes: transient overload (retried by the
/// adapter), fatal (surfaced immediately) and operational. Cancellation is not
/// an error anywhere in parley; a cancelled request returns its partial output.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    // Caller mistakes
    #[error("provider {0} is not initialized")]
    NotInitialized(String),
    #[error("invalid model string {0:?}: expected provider/model")]
    InvalidModelString(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    // Fatal, never retried
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Transient overload
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("overloaded: {0}")]
    Overloaded(String),

    // Other vendor / transport failures
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// User-facing error raised once overload retries are exhausted.
    #[error("{provider} is overloaded right now. Please try again in a moment.")]
    ProviderOverloaded { provider: String, attempts: u32 },
}

impl ProviderError {
    /// Transient overload / rate-limit errors, the only class that is retried.
    pub fn is_overload(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Overloaded(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::InvalidRequest(_)
                | Self::NotInitialized(_)
                | Self::InvalidModelString(_)
                | Self::UnknownProvider(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not_initialized",
            Self::InvalidModelString(_) => "invalid_model_string",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded(_) => "overloaded",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::ProviderOverloaded { .. } => "provider_overloaded",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 413 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }

    /// Once text has reached the caller an overload can no longer be retried
    /// transparently; demote it so the retry loop lets it through.
    pub fn committed(self) -> Self {
        if self.is_overload() {
            Self::StreamInterrupted(self.to_string())
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_overload());
        assert!(ProviderError::Overloaded("busy".into()).is_overload());
        assert!(!ProviderError::ServerError { status: 500, body: "err".into() }.is_overload());
        assert!(!ProviderError::NetworkError("tcp".into()).is_overload());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_overload());
    }

    #[test]
    fn fatal_classification() {
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(ProviderError::InvalidRequest("bad".into()).is_fatal());
        assert!(ProviderError::NotInitialized("openai".into()).is_fatal());
        assert!(!ProviderError::Overloaded("busy".into()).is_fatal());
    }

    #[test]
    fn from_status_mapping() {
        assert!(ProviderError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(ProviderError::from_status(400, "bad request".into()).is_fatal());
        assert!(ProviderError::from_status(429, "slow down".into()).is_overload());
        assert!(ProviderError::from_status(529, "overloaded".into()).is_overload());
        assert!(ProviderError::from_status(503, "unavailable".into()).is_overload());
        assert!(matches!(
            ProviderError::from_status(502, "bad gateway".into()),
            ProviderError::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn friendly_overload_message_is_distinct() {
        let err = ProviderError::ProviderOverloaded { provider: "anthropic".into(), attempts: 3 };
        assert_eq!(
            err.to_string(),
            "anthropic is overloaded right now. Please try again in a moment."
        );
        assert!(!err.is_overload());
        assert_eq!(err.error_kind(), "provider_overloaded");
    }

    #[test]
    fn committed_demotes_only_overloads() {
        let err = ProviderError::Overloaded("busy".into()).committed();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
        let err = ProviderError::AuthenticationFailed("nope".into()).committed();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = ProviderError::RateLimited { retry_after: Some(Duration::from_secs(5)) };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(ProviderError::Overloaded("x".into()).suggested_delay(), None);
    }
}
