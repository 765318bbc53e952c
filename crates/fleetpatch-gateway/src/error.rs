//! Provider boundary errors.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// How a provider call can fail.
///
/// The split matters downstream: a transient failure is absorbed by the
/// next poll tick re-querying state, while a rejection fails the owning
/// stage immediately because waiting will not change the answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network-class failure; the same call may succeed moments later.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider refused the request outright.
    #[error("provider rejected request: {0}")]
    Rejection(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_transient() {
        assert!(GatewayError::Transient("connection reset".into()).is_transient());
        assert!(!GatewayError::Rejection("bad image id".into()).is_transient());
    }

    #[test]
    fn display_includes_detail() {
        let err = GatewayError::Rejection("no such fleet: web".to_string());
        assert_eq!(err.to_string(), "provider rejected request: no such fleet: web");
    }
}
