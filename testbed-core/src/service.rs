//! The capability set of one manageable service instance.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::gateway::RuntimeGateway;
use crate::types::{Labels, RegistryAuth};

/// What a handle gets handed when it is asked to start.
#[derive(Clone)]
pub struct StartContext {
    pub auth: RegistryAuth,
    pub gateway: Arc<dyn RuntimeGateway>,
    /// Name of the group's private network.
    pub network: String,
}

impl std::fmt::Debug for StartContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartContext")
            .field("auth", &self.auth)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// One service container (database, broker, coordination node, ...).
///
/// Implementations own their launch configuration and readiness probe.
/// The orchestrator only drives them through this trait.
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    /// Short human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Hostname inside the private network; `None` until started.
    fn hostname(&self) -> Option<&str>;

    /// Ports published on the external host.
    fn ports(&self) -> Vec<u16>;

    /// Attach discovery labels. Called before [`ServiceHandle::start`].
    fn attach_labels(&mut self, labels: &Labels);

    /// Create the container and wait until it is ready.
    async fn start(&mut self, ctx: &StartContext) -> Result<(), ServiceError>;

    /// Remove the container.
    async fn stop(&mut self) -> Result<(), ServiceError>;

    /// Forget the container after a teardown removed it. Makes no runtime
    /// calls; afterwards [`ServiceHandle::hostname`] is `None`.
    fn release(&mut self);
}
