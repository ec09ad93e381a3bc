//! testbed core library: domain types, capability traits, errors.
//!
//! Public API surface:
//! - [`types`]: group identity, container specs, filters, lifecycle state
//! - [`gateway`]: [`RuntimeGateway`], the container runtime capability
//! - [`service`]: [`ServiceHandle`], one manageable service instance
//! - [`retry`]: [`RetryPolicy`], bounded exponential backoff
//! - [`environment`]: external hostname resolution
//! - [`error`]: [`GatewayError`], [`ServiceError`], [`ProbeError`]

pub mod environment;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod service;
pub mod types;

pub use environment::{external_host, external_host_from_process};
pub use error::{GatewayError, ProbeError, ServiceError};
pub use gateway::RuntimeGateway;
pub use retry::{Backoff, RetryPolicy};
pub use service::{ServiceHandle, StartContext};
pub use types::{
    ContainerFilter, ContainerRef, ContainerSpec, ExecOutput, GroupId, Labels, NetworkHandle,
    OrchestratorState, PortBinding, RegistryAuth, Role, SweepScope, GROUP_LABEL, ROLE_LABEL,
};
