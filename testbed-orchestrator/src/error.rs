use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use testbed_core::{GatewayError, ServiceError};

/// The unrecoverable failure that sent a group into teardown.
#[derive(Debug, Error)]
pub enum ProvisioningFailure {
    #[error("failed to create network {network}: {source}")]
    NetworkCreate {
        network: String,
        #[source]
        source: GatewayError,
    },

    #[error("failed to start service {service}: {source}")]
    ServiceStart {
        service: String,
        #[source]
        source: ServiceError,
    },

    #[error("failed to stop service {service}: {source}")]
    ServiceStop {
        service: String,
        #[source]
        source: ServiceError,
    },

    #[error("failed to remove network {network}: {source}")]
    NetworkRemove {
        network: String,
        #[source]
        source: GatewayError,
    },
}

/// Error surface of [`Orchestrator`](crate::Orchestrator) operations.
///
/// Cloneable so every caller of a one-shot operation receives the same
/// outcome.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// The group was torn down; the source is the failure that caused it.
    #[error("setup aborted: {0}")]
    SetupAborted(#[source] Arc<ProvisioningFailure>),

    /// Not every service container was running before the readiness deadline.
    #[error("services not ready after {waited:?} ({attempts} attempts)")]
    Timeout { attempts: u32, waited: Duration },

    /// `start` was called after `stop`.
    #[error("orchestrator is already {0}")]
    AlreadyStopped(testbed_core::OrchestratorState),
}

impl OrchestratorError {
    pub fn is_setup_aborted(&self) -> bool {
        matches!(self, Self::SetupAborted(_))
    }

    /// The provisioning failure behind a [`OrchestratorError::SetupAborted`].
    pub fn root_cause(&self) -> Option<&ProvisioningFailure> {
        match self {
            Self::SetupAborted(failure) => Some(failure.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn setup_aborted_exposes_sentinel_and_cause() {
        let failure = ProvisioningFailure::ServiceStart {
            service: "db".to_string(),
            source: ServiceError::not_started("db"),
        };
        let err = OrchestratorError::SetupAborted(Arc::new(failure));
        assert!(err.is_setup_aborted());
        assert!(matches!(
            err.root_cause(),
            Some(ProvisioningFailure::ServiceStart { .. })
        ));
        let source = err.source().expect("source");
        assert_eq!(
            source.to_string(),
            "failed to start service db: service db was never started"
        );
    }

    #[test]
    fn timeout_is_not_setup_aborted() {
        let err = OrchestratorError::Timeout {
            attempts: 3,
            waited: Duration::from_secs(1),
        };
        assert!(!err.is_setup_aborted());
        assert!(err.root_cause().is_none());
        assert_eq!(err.to_string(), "services not ready after 1s (3 attempts)");
    }
}
