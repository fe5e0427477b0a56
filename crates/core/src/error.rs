//! Pipeline error taxonomy.
//!
//! The queue retries `RateLimited` and `Transient` failures; everything
//! marked terminal rejects the item immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed webhook or bad input. Surfaced as 400; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Webhook HMAC did not match. Surfaced as 401; never retried.
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// Repo not user-enabled and not allow-listed.
    #[error("repository not enrolled: {0}")]
    NotEnrolled(String),

    /// Per-tenant hourly AI quota exhausted.
    #[error("hourly quota exceeded for tenant {0}")]
    QuotaExceeded(String),

    /// Downstream provider throttle. Retried with a raised delay floor.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport failure, 5xx, or timeout. Retried with standard backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Requested remote object does not exist (e.g. commit gone).
    #[error("not found: {0}")]
    NotFound(String),

    /// Refresh token missing or rejected; user must re-authorize.
    #[error("re-authorization required for {0}")]
    ReauthRequired(String),

    /// Provider refused the action for lack of scope.
    #[error("insufficient permissions: {0}")]
    PermissionsInsufficient(String),

    /// Commit already present in the posted-commit ledger.
    #[error("commit already posted: {0}")]
    Duplicate(String),

    /// Unexpected programmer error. Treated as transient by the queue.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Terminal errors reject a queue item without further retries.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SignatureMismatch
                | Self::NotEnrolled(_)
                | Self::QuotaExceeded(_)
                | Self::ReauthRequired(_)
                | Self::PermissionsInsufficient(_)
                | Self::Duplicate(_)
        )
    }

    /// Rate-limit-like failures get a raised retry-delay floor.
    pub fn is_rate_limit_like(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Transient(msg) | Self::Internal(msg) => message_is_rate_limit_like(msg),
            _ => false,
        }
    }
}

const RATE_LIMIT_MARKERS: [&str; 5] = [
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "resource exhausted",
];

/// Heuristic used when the error reaches the queue as an opaque message.
pub fn message_is_rate_limit_like(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(PipelineError::QuotaExceeded("t".into()).is_terminal());
        assert!(PipelineError::ReauthRequired("t".into()).is_terminal());
        assert!(PipelineError::Duplicate("abc".into()).is_terminal());
        assert!(!PipelineError::Transient("boom".into()).is_terminal());
        assert!(!PipelineError::RateLimited("429".into()).is_terminal());
        assert!(!PipelineError::NotFound("x".into()).is_terminal());
    }

    #[test]
    fn rate_limit_markers() {
        assert!(message_is_rate_limit_like("HTTP 429 Too Many Requests"));
        assert!(message_is_rate_limit_like("Rate Limit hit, back off"));
        assert!(message_is_rate_limit_like("RESOURCE EXHAUSTED"));
        assert!(!message_is_rate_limit_like("connection reset by peer"));
        assert!(PipelineError::Transient("provider quota exceeded".into()).is_rate_limit_like());
        assert!(!PipelineError::Transient("timeout".into()).is_rate_limit_like());
    }
}
