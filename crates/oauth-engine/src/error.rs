//! Error types for the OAuth engine.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use axum::http::StatusCode;

/// Errors produced by the token, consent and replication paths.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Malformed caller-supplied data (e.g. a secret that is too short).
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Unparseable or ill-formed claims envelope, or a token that does not resolve.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token lifetime has elapsed or the record is being deleted.
    #[error("Token has expired")]
    Expired,

    /// The resolved user is not the identity the record was issued to.
    #[error("User UID mismatch: expected {expected}, got {actual}")]
    UidMismatch {
        /// UID recorded at issuance
        expected: String,
        /// UID of the resolved user
        actual: String,
    },

    /// Registry record absent.
    #[error("{kind} \"{name}\" not found")]
    NotFound {
        /// Record kind
        kind: &'static str,
        /// Record name
        name: String,
    },

    /// Create of a name that is already taken.
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists {
        /// Record kind
        kind: &'static str,
        /// Record name
        name: String,
    },

    /// Optimistic-concurrency failure on update.
    #[error("Conflict updating {kind} \"{name}\": {message}")]
    Conflict {
        /// Record kind
        kind: &'static str,
        /// Record name
        name: String,
        /// Details of the version mismatch
        message: String,
    },

    /// Quorum of replicas did not observe a write in time.
    #[error("Replication quorum not reached ({observed}/{required} observed): {}", failures.join(", "))]
    ReplicationTimeout {
        /// Backends that observed the write
        observed: usize,
        /// Backends required to observe the write
        required: usize,
        /// `name: outcome` for every backend that did not observe the write
        failures: Vec<String>,
    },

    /// Resubmitted CSRF token does not match the issued one.
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// No authenticator accepted the request.
    #[error("Authentication required")]
    Unauthenticated,

    /// The resource owner or policy denied access.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Opaque passthrough from the registry collaborator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), message: message.into() }
    }

    /// Create an invalid token error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }

    /// Create an already exists error.
    #[must_use]
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists { kind, name: name.into() }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(kind: &'static str, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict { kind, name: name.into(), message: message.into() }
    }

    /// Create a UID mismatch error.
    #[must_use]
    pub fn uid_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UidMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true if this error is a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the caller may retry the operation that produced this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Stable machine-readable name of the failure kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::InvalidToken(_) => "invalid_token",
            Self::Expired => "expired",
            Self::UidMismatch { .. } => "uid_mismatch",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::ReplicationTimeout { .. } => "replication_timeout",
            Self::CsrfMismatch => "csrf_mismatch",
            Self::Unauthenticated => "unauthenticated",
            Self::AccessDenied(_) => "access_denied",
            Self::Storage(_) | Self::Serialization(_) => "storage_error",
        }
    }

    /// HTTP status used when this error is surfaced to an API caller.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidToken(_) | Self::Expired | Self::UidMismatch { .. } | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyExists { .. } | Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::CsrfMismatch | Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ReplicationTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OAuth 2.0 error code (RFC 6749 §5.2) for token endpoint responses.
    #[must_use]
    pub const fn oauth_error(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_request",
            Self::InvalidToken(_) | Self::Expired | Self::UidMismatch { .. } | Self::NotFound { .. } => {
                "invalid_grant"
            }
            Self::Unauthenticated => "invalid_client",
            Self::AccessDenied(_) => "access_denied",
            Self::ReplicationTimeout { .. } => "temporarily_unavailable",
            _ => "server_error",
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Extension for turning a registry `NotFound` into "not present".
pub trait OptionalExt<T> {
    /// `Ok(None)` for [`EngineError::NotFound`], the value or other errors unchanged.
    fn optional(self) -> EngineResult<Option<T>>;
}

impl<T> OptionalExt<T> for EngineResult<T> {
    fn optional(self) -> EngineResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        assert!(EngineError::conflict("clientauthorization", "alice:acme", "stale").is_retryable());

        assert!(!EngineError::Expired.is_retryable());
        assert!(!EngineError::not_found("client", "acme").is_retryable());
    }

    #[test]
    fn test_optional_maps_not_found_only() {
        let missing: EngineResult<u32> = Err(EngineError::not_found("client", "acme"));
        assert!(matches!(missing.optional(), Ok(None)));

        let present: EngineResult<u32> = Ok(7);
        assert!(matches!(present.optional(), Ok(Some(7))));

        let failed: EngineResult<u32> = Err(EngineError::storage("disk on fire"));
        assert!(failed.optional().is_err());
    }

    #[test]
    fn test_replication_timeout_names_backends() {
        let err = EngineError::ReplicationTimeout {
            observed: 1,
            required: 2,
            failures: vec!["replica-b: timed out".into(), "replica-c: timed out".into()],
        };
        let message = err.to_string();
        assert!(message.contains("1/2"));
        assert!(message.contains("replica-b"));
        assert!(message.contains("replica-c"));
        assert_eq!(err.kind(), "replication_timeout");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EngineError::CsrfMismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(EngineError::Expired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            EngineError::invalid_input("secret", "too short").status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
