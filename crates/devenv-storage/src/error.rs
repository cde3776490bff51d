//! Object storage errors and their classification

use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// S3 error codes worth another attempt
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "Throttling",
    "ThrottlingException",
];

/// S3 error codes that mean the credentials are wrong or lack permission
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

const TRANSIENT_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Failure talking to an object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid backup location '{uri}': {reason}")]
    InvalidLocation { uri: String, reason: String },

    /// Timeouts, throttling, 5xx and connection failures
    #[error("{operation} {key} failed (transient): {message}")]
    Transient {
        operation: String,
        key: String,
        message: String,
    },

    #[error("Access denied during {operation} {key}: {message}. Check your credentials and bucket policy")]
    Auth {
        operation: String,
        key: String,
        message: String,
    },

    #[error("Bucket '{bucket}' does not exist")]
    NoSuchBucket { bucket: String },

    #[error("{operation} {key} failed: {message}")]
    Other {
        operation: String,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn invalid_location(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(
        operation: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transient {
            operation: operation.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn auth(
        operation: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Auth {
            operation: operation.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn other(
        operation: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Other {
            operation: operation.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Classify a raw failure from its service code, HTTP status and message
    pub fn classify(
        operation: &str,
        key: &str,
        code: Option<&str>,
        status: Option<u16>,
        message: impl Into<String>,
        bucket: &str,
    ) -> Self {
        let message = message.into();

        if code == Some("NoSuchBucket") {
            return Self::NoSuchBucket {
                bucket: bucket.to_string(),
            };
        }
        if code.is_some_and(|c| AUTH_CODES.contains(&c)) || matches!(status, Some(401 | 403)) {
            return Self::auth(operation, key, message);
        }
        if code.is_some_and(|c| TRANSIENT_CODES.contains(&c))
            || status.is_some_and(|s| TRANSIENT_STATUS.contains(&s))
            || looks_like_network_failure(&message)
        {
            return Self::transient(operation, key, message);
        }
        Self::other(operation, key, message)
    }

    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Credentials or permissions problem; never retried, aborts the command
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::NoSuchBucket { .. })
    }
}

fn looks_like_network_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection", "dispatch failure", "broken pipe"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl From<StoreError> for devenv_core::Error {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::InvalidLocation { .. } => devenv_core::Error::invalid_config(err.to_string()),
            StoreError::Transient { operation, .. } => {
                devenv_core::Error::unreachable(operation.clone(), err.to_string(), true)
            }
            StoreError::Auth { operation, .. } | StoreError::Other { operation, .. } => {
                devenv_core::Error::unreachable(operation.clone(), err.to_string(), false)
            }
            StoreError::NoSuchBucket { .. } => {
                devenv_core::Error::unreachable("list", err.to_string(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: Option<&str>, status: Option<u16>, message: &str) -> StoreError {
        StoreError::classify("put", "k", code, status, message, "bucket")
    }

    #[test]
    fn test_transient_classification() {
        assert!(classify(Some("SlowDown"), Some(503), "slow down").is_transient());
        assert!(classify(None, Some(500), "internal").is_transient());
        assert!(classify(None, Some(429), "too many requests").is_transient());
        assert!(classify(None, None, "dispatch failure: connection reset").is_transient());
        assert!(classify(None, None, "operation timed out").is_transient());
    }

    #[test]
    fn test_auth_classification() {
        let err = classify(Some("AccessDenied"), Some(403), "Access Denied");
        assert!(err.is_auth());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Check your credentials"));

        assert!(classify(Some("ExpiredToken"), Some(400), "expired").is_auth());
        assert!(classify(None, Some(401), "unauthorized").is_auth());
    }

    #[test]
    fn test_missing_bucket() {
        let err = classify(Some("NoSuchBucket"), Some(404), "nope");
        assert_eq!(
            err,
            StoreError::NoSuchBucket {
                bucket: "bucket".into()
            }
        );
        assert!(err.is_auth());
    }

    #[test]
    fn test_other_is_not_retried() {
        let err = classify(Some("InvalidArgument"), Some(400), "bad request");
        assert!(!err.is_transient());
        assert!(!err.is_auth());
    }

    #[test]
    fn test_conversion_to_core_error() {
        let core: devenv_core::Error = classify(Some("AccessDenied"), None, "denied").into();
        assert!(core.is_fatal());
        let core: devenv_core::Error = classify(Some("SlowDown"), None, "slow").into();
        assert!(!core.is_fatal());
    }
}
