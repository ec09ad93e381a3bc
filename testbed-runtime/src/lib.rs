//! Container runtime gateways: the Docker Engine API and an in-memory
//! simulation used by the test suites.

pub mod docker;
pub mod memory;

pub use docker::DockerGateway;
pub use memory::{Call, MemoryGateway};
