//! Error types for testbed-core.

use thiserror::Error;

/// All errors that can arise from a container runtime call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The referenced network, container or image does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A resource with the same name already exists.
    #[error("{kind} already exists: {name}")]
    Conflict { kind: &'static str, name: String },

    /// The runtime could not be reached at all (socket missing, daemon down).
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by the runtime API.
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },
}

impl GatewayError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
        }
    }

    /// `true` for [`GatewayError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A single failed readiness attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The service answered but is not usable yet.
    #[error("not ready: {0}")]
    NotReady(String),
}

/// Errors raised by a [`ServiceHandle`](crate::ServiceHandle) while starting or stopping.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The readiness probe kept failing until its retry budget ran out.
    #[error("waited too long for readiness check of {service}: {source}")]
    Readiness {
        service: String,
        #[source]
        source: ProbeError,
    },

    /// `stop` was called on a handle whose container never came up.
    #[error("service {service} was never started")]
    NotStarted { service: String },

    /// A one-shot helper container finished with a non-zero exit code.
    #[error("helper container {name} exited with status {code}")]
    HelperFailed { name: String, code: i64 },

    #[error("invalid configuration for {service}: {reason}")]
    InvalidConfig { service: String, reason: String },
}

impl ServiceError {
    pub fn not_started(service: impl Into<String>) -> Self {
        Self::NotStarted {
            service: service.into(),
        }
    }

    pub fn invalid_config(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_messages_name_the_resource() {
        let err = GatewayError::not_found("network", "testbed-net");
        assert_eq!(err.to_string(), "network not found: testbed-net");
        assert!(err.is_not_found());

        let err = GatewayError::api("create_container", "image pull denied");
        assert_eq!(err.to_string(), "create_container failed: image pull denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn readiness_error_keeps_probe_as_source() {
        let err = ServiceError::Readiness {
            service: "postgres".to_string(),
            source: ProbeError::NotReady("pg_isready exited with 2".to_string()),
        };
        assert!(err.to_string().contains("waited too long"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("pg_isready"));
    }
}
