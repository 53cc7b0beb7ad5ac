//! Unified error types for Kiln

use thiserror::Error;

/// Unified error type for all Kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    // Provider errors
    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Provider timed out after {0}ms")]
    ProviderTimeout(u64),

    #[error("Provider returned HTTP {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("Provider rate limit: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    // Generation errors
    #[error("No extractable code in provider response")]
    EmptyGeneration,

    // Sandbox errors
    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    // Memory errors
    #[error("Memory storage error: {0}")]
    MemoryStorage(String),

    // Trace errors
    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Trace {0} is closed")]
    TraceClosed(String),

    // Orchestrator errors
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KilnError {
    /// Whether this error must end a run instead of being absorbed as a failed attempt.
    ///
    /// Collaborator outages are fatal. A reply that arrived but held nothing
    /// usable only costs the attempt it happened in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedResponse(_) | Self::EmptyGeneration)
    }
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_errors_are_fatal() {
        assert!(KilnError::ProviderUnreachable("dns".into()).is_fatal());
        assert!(KilnError::ProviderTimeout(30_000).is_fatal());
        assert!(KilnError::ProviderStatus {
            status: 500,
            body: "boom".into()
        }
        .is_fatal());
        assert!(KilnError::SandboxUnavailable("python3 not found".into()).is_fatal());
    }

    #[test]
    fn test_empty_replies_are_absorbed() {
        assert!(!KilnError::EmptyGeneration.is_fatal());
        assert!(!KilnError::MalformedResponse("no choices".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = KilnError::ProviderStatus {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "Provider returned HTTP 503: unavailable");
    }
}
