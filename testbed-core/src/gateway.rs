//! The container runtime capability the rest of the workspace depends on.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::retry::RetryPolicy;
use crate::types::{
    ContainerFilter, ContainerRef, ContainerSpec, ExecOutput, Labels, NetworkHandle, RegistryAuth,
};

/// Networks and containers of one container runtime.
///
/// Every call is a single attempt. Callers that need to ride out transient
/// failures wrap the call in [`RuntimeGateway::retry_policy`].
#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Check the runtime is reachable.
    async fn ping(&self) -> Result<(), GatewayError>;

    async fn create_network(&self, name: &str, labels: &Labels)
        -> Result<NetworkHandle, GatewayError>;

    /// Remove a network by name or id.
    async fn remove_network(&self, name_or_id: &str) -> Result<(), GatewayError>;

    /// `Ok(None)` when no network with that name or id exists.
    async fn inspect_network(&self, name_or_id: &str)
        -> Result<Option<NetworkHandle>, GatewayError>;

    /// Pull the image if needed, then create and start the container.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        auth: &RegistryAuth,
    ) -> Result<ContainerRef, GatewayError>;

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRef>, GatewayError>;

    async fn kill_container(&self, id: &str) -> Result<(), GatewayError>;

    /// Force-remove a container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), GatewayError>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, GatewayError>;

    /// Run a command inside a running container.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, GatewayError>;

    /// Backoff used for readiness probes and network removal.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}
