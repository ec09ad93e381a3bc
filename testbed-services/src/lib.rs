//! Concrete [`ServiceHandle`](testbed_core::ServiceHandle) implementations.
//!
//! - [`runner`]: create a container, probe it, expire it
//! - [`probe`]: readiness probes
//! - [`generic`], [`postgres`], [`zookeeper`], [`kafka`]: service kinds
//! - [`config`]: YAML group definition files

pub mod config;
pub mod generic;
pub mod kafka;
pub mod postgres;
pub mod probe;
pub mod runner;
pub mod zookeeper;

pub use config::{load_file, ConfigError, GroupFile, ProbeConfig, ServiceConfig};
pub use generic::GenericService;
pub use kafka::{Kafka, KafkaOpts};
pub use postgres::{postgres, supabase_postgres, PostgresOpts};
pub use probe::{AllOf, ExecProbe, NoProbe, ReadinessProbe, TcpProbe};
pub use runner::{run_container, ContainerOpts, RunningContainer, DEFAULT_LIFETIME};
pub use zookeeper::{zookeeper, ZookeeperOpts};
