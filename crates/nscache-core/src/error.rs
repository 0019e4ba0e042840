//! Error types for the namespace-cache gateway.
//!
//! Every failure the engine can report is a variant of [`GatewayError`]. The
//! variants map onto JSON-RPC error codes for the admin interface and carry
//! enough context (bucket, key, resource) for the HTTP surface to pick a
//! status code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    // Resolver errors
    #[error("Namespace bucket not found: {bucket}")]
    UnknownBucket { bucket: String },

    #[error("Hub resource not found: {resource}")]
    UnknownResource { resource: String },

    #[error("Hub resource {resource} is unhealthy: {reason}")]
    UnhealthyResource { resource: String, reason: String },

    // Backend errors
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Backend unavailable for {resource}: {message}")]
    BackendUnavailable { resource: String, message: String },

    #[error("Hub resource {resource} rejected the request with {status}: {message}")]
    HubRejected {
        resource: String,
        status: u16,
        message: String,
    },

    // Validation errors
    #[error("Invalid TTL {ttl_ms}ms: TTL must be greater than zero")]
    InvalidTtl { ttl_ms: u64 },

    #[error("Invalid bucket name '{name}': {reason}")]
    InvalidBucketName { name: String, reason: String },

    #[error("Invalid resource name '{name}': {reason}")]
    InvalidResourceName { name: String, reason: String },

    #[error("Invalid object key: {reason}")]
    InvalidObjectKey { reason: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Lifecycle conflicts
    #[error("Namespace bucket already exists: {bucket}")]
    BucketAlreadyExists { bucket: String },

    #[error("Hub resource already exists: {resource}")]
    ResourceAlreadyExists { resource: String },

    #[error("Hub resource {resource} is referenced by buckets: {}", buckets.join(", "))]
    ResourceInUse {
        resource: String,
        buckets: Vec<String>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl GatewayError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a backend failure against a named resource.
    pub fn unavailable(resource: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::BackendUnavailable {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Backend unavailable
    /// - -32001: Bucket or resource not found
    /// - -32002: Object not found
    /// - -32003: Resource unhealthy
    /// - -32004: Conflict (already exists / in use)
    /// - -32005: Validation error
    /// - -32006: Request rejected by the hub
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            GatewayError::BackendUnavailable { .. } => -32000,

            GatewayError::UnknownBucket { .. } | GatewayError::UnknownResource { .. } => -32001,

            GatewayError::ObjectNotFound { .. } => -32002,

            GatewayError::UnhealthyResource { .. } => -32003,

            GatewayError::BucketAlreadyExists { .. }
            | GatewayError::ResourceAlreadyExists { .. }
            | GatewayError::ResourceInUse { .. } => -32004,

            GatewayError::InvalidTtl { .. }
            | GatewayError::InvalidBucketName { .. }
            | GatewayError::InvalidResourceName { .. }
            | GatewayError::InvalidObjectKey { .. } => -32005,

            GatewayError::HubRejected { .. } => -32006,

            GatewayError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only transport-level backend failures are retried; a missing object
    /// or a validation failure will not change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::BackendUnavailable { .. })
    }

    /// Whether this is a not-found condition (bucket, resource or object).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownBucket { .. }
                | GatewayError::UnknownResource { .. }
                | GatewayError::ObjectNotFound { .. }
        )
    }

    /// Duplicate this error for another waiter of a coalesced fetch.
    ///
    /// The variant and message are preserved; wrapped library errors lose
    /// their `source` because those types are not `Clone`.
    pub fn duplicate(&self) -> GatewayError {
        match self {
            GatewayError::UnknownBucket { bucket } => GatewayError::UnknownBucket {
                bucket: bucket.clone(),
            },
            GatewayError::UnknownResource { resource } => GatewayError::UnknownResource {
                resource: resource.clone(),
            },
            GatewayError::UnhealthyResource { resource, reason } => {
                GatewayError::UnhealthyResource {
                    resource: resource.clone(),
                    reason: reason.clone(),
                }
            }
            GatewayError::ObjectNotFound { bucket, key } => GatewayError::ObjectNotFound {
                bucket: bucket.clone(),
                key: key.clone(),
            },
            GatewayError::BackendUnavailable { resource, message } => {
                GatewayError::BackendUnavailable {
                    resource: resource.clone(),
                    message: message.clone(),
                }
            }
            GatewayError::HubRejected {
                resource,
                status,
                message,
            } => GatewayError::HubRejected {
                resource: resource.clone(),
                status: *status,
                message: message.clone(),
            },
            GatewayError::InvalidTtl { ttl_ms } => GatewayError::InvalidTtl { ttl_ms: *ttl_ms },
            GatewayError::InvalidBucketName { name, reason } => GatewayError::InvalidBucketName {
                name: name.clone(),
                reason: reason.clone(),
            },
            GatewayError::InvalidResourceName { name, reason } => {
                GatewayError::InvalidResourceName {
                    name: name.clone(),
                    reason: reason.clone(),
                }
            }
            GatewayError::InvalidObjectKey { reason } => GatewayError::InvalidObjectKey {
                reason: reason.clone(),
            },
            GatewayError::InvalidParams { message } => GatewayError::InvalidParams {
                message: message.clone(),
            },
            GatewayError::BucketAlreadyExists { bucket } => GatewayError::BucketAlreadyExists {
                bucket: bucket.clone(),
            },
            GatewayError::ResourceAlreadyExists { resource } => {
                GatewayError::ResourceAlreadyExists {
                    resource: resource.clone(),
                }
            }
            GatewayError::ResourceInUse { resource, buckets } => GatewayError::ResourceInUse {
                resource: resource.clone(),
                buckets: buckets.clone(),
            },
            GatewayError::Database { message, .. } => GatewayError::Database {
                message: message.clone(),
                source: None,
            },
            GatewayError::Io { message, path, .. } => GatewayError::Io {
                message: message.clone(),
                path: path.clone(),
                source: None,
            },
            GatewayError::Json { message, .. } => GatewayError::Json {
                message: message.clone(),
                source: None,
            },
            GatewayError::Config { message } => GatewayError::Config {
                message: message.clone(),
            },
            GatewayError::Other(message) => GatewayError::Other(message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::ObjectNotFound {
            bucket: "ns1".into(),
            key: "testfile0.txt".into(),
        };
        assert_eq!(err.to_string(), "Object not found: ns1/testfile0.txt");

        let err = GatewayError::ResourceInUse {
            resource: "h1".into(),
            buckets: vec!["ns1".into(), "ns2".into()],
        };
        assert_eq!(
            err.to_string(),
            "Hub resource h1 is referenced by buckets: ns1, ns2"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            GatewayError::UnknownBucket {
                bucket: "ns1".into()
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(
            GatewayError::unavailable("h1", "connection refused").to_rpc_error_code(),
            -32000
        );
        assert_eq!(GatewayError::InvalidTtl { ttl_ms: 0 }.to_rpc_error_code(), -32005);
        assert_eq!(GatewayError::Other("boom".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::unavailable("h1", "timeout").is_retryable());
        assert!(!GatewayError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into()
        }
        .is_retryable());
        assert!(!GatewayError::InvalidTtl { ttl_ms: 0 }.is_retryable());

        let rejected = GatewayError::HubRejected {
            resource: "h1".into(),
            status: 400,
            message: "PUT a.txt".into(),
        };
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.to_rpc_error_code(), -32006);
        assert_eq!(rejected.duplicate().to_string(), rejected.to_string());
    }

    #[test]
    fn test_duplicate_preserves_variant_and_message() {
        let original = GatewayError::Database {
            message: "disk I/O error".into(),
            source: None,
        };
        let copy = original.duplicate();
        assert!(matches!(copy, GatewayError::Database { .. }));
        assert_eq!(copy.to_string(), original.to_string());

        let original = GatewayError::unavailable("h1", "503 Service Unavailable");
        assert_eq!(original.duplicate().to_string(), original.to_string());
    }
}
