//! Multi-container lifecycle orchestration for ephemeral test groups.

mod config;
mod error;
mod orchestrator;
pub mod sweep;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, ProvisioningFailure};
pub use orchestrator::{Orchestrator, ServiceInfo};
pub use sweep::{sweep, SweepReport};
pub use testbed_core::{OrchestratorState, SweepScope};
