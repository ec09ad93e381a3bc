//! YAML group definition files.
//!
//! ```yaml
//! network: it-net            # optional, defaults to the group id
//! readiness_timeout_secs: 90 # optional
//! sweep: group               # group | global
//! services:
//!   - kind: zookeeper
//!     name: zk
//!   - kind: kafka
//!     name: kafka
//!     external_port: 19092
//!     zookeeper: zk:2181
//!     topics: [orders]
//!   - kind: postgres
//!     name: db
//!     db_name: app
//!     user: tester
//!     password: secret
//!     external_port: 15432
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use testbed_core::{ContainerSpec, PortBinding, RegistryAuth, ServiceHandle, SweepScope};

use crate::generic::GenericService;
use crate::kafka::{Kafka, KafkaOpts};
use crate::postgres::{postgres, supabase_postgres, PostgresOpts};
use crate::probe::{ExecProbe, NoProbe, TcpProbe};
use crate::runner::ContainerOpts;
use crate::zookeeper::{zookeeper, ZookeeperOpts};

/// Errors raised while loading or validating a group file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error, with the file path and serde_yaml's line context.
    #[error("failed to parse group file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("group file not found at {path}")]
    NotFound { path: PathBuf },

    /// The file parsed but describes an unusable group.
    #[error("invalid group definition: {0}")]
    Invalid(String),
}

/// A group of services to run together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupFile {
    #[serde(default)]
    pub network: Option<String>,
    /// Host published ports are reached on; auto-detected when absent.
    #[serde(default)]
    pub external_host: Option<String>,
    #[serde(default)]
    pub readiness_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sweep: SweepScope,
    #[serde(default)]
    pub auth: Option<RegistryAuth>,
    pub services: Vec<ServiceConfig>,
}

/// One entry of [`GroupFile::services`], tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceConfig {
    Postgres {
        name: String,
        db_name: String,
        user: String,
        password: String,
        external_port: u16,
        #[serde(default = "default_postgres_port")]
        internal_port: u16,
        #[serde(default)]
        network: Option<String>,
    },
    SupabasePostgres {
        name: String,
        db_name: String,
        password: String,
        external_port: u16,
        #[serde(default = "default_postgres_port")]
        internal_port: u16,
        #[serde(default)]
        network: Option<String>,
    },
    Zookeeper {
        name: String,
        #[serde(default = "default_zookeeper_port")]
        port: u16,
        #[serde(default)]
        network: Option<String>,
    },
    Kafka {
        name: String,
        #[serde(default = "default_kafka_external_port")]
        external_port: u16,
        #[serde(default = "default_kafka_docker_port")]
        container_name_port: u16,
        /// `host:port` of a ZooKeeper node.
        #[serde(default)]
        zookeeper: Option<String>,
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        network: Option<String>,
    },
    Generic {
        name: String,
        repository: String,
        #[serde(default = "default_tag")]
        tag: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        ports: Vec<PortBinding>,
        #[serde(default)]
        cmd: Option<Vec<String>>,
        #[serde(default)]
        entrypoint: Option<Vec<String>>,
        #[serde(default)]
        ready: ProbeConfig,
        #[serde(default)]
        network: Option<String>,
    },
}

/// Readiness probe of a generic service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeConfig {
    #[default]
    None,
    /// TCP connect to the external host on `port`.
    Tcp { port: u16 },
    Exec { cmd: Vec<String> },
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_zookeeper_port() -> u16 {
    2181
}

fn default_kafka_external_port() -> u16 {
    9092
}

fn default_kafka_docker_port() -> u16 {
    29092
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ServiceConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Postgres { name, .. }
            | Self::SupabasePostgres { name, .. }
            | Self::Zookeeper { name, .. }
            | Self::Kafka { name, .. }
            | Self::Generic { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::SupabasePostgres { .. } => "supabase_postgres",
            Self::Zookeeper { .. } => "zookeeper",
            Self::Kafka { .. } => "kafka",
            Self::Generic { .. } => "generic",
        }
    }

    /// Image reference the service will run.
    pub fn image(&self) -> String {
        use crate::kafka::KAFKA_IMAGE;
        use crate::postgres::{POSTGRES_IMAGE, SUPABASE_IMAGE};
        use crate::zookeeper::ZOOKEEPER_IMAGE;

        let (repo, tag) = match self {
            Self::Postgres { .. } => POSTGRES_IMAGE,
            Self::SupabasePostgres { .. } => SUPABASE_IMAGE,
            Self::Zookeeper { .. } => ZOOKEEPER_IMAGE,
            Self::Kafka { .. } => KAFKA_IMAGE,
            Self::Generic {
                repository, tag, ..
            } => return format!("{repository}:{tag}"),
        };
        format!("{repo}:{tag}")
    }

    /// Host ports this service publishes.
    pub fn host_ports(&self) -> Vec<u16> {
        match self {
            Self::Postgres { external_port, .. }
            | Self::SupabasePostgres { external_port, .. }
            | Self::Kafka { external_port, .. } => vec![*external_port],
            Self::Zookeeper { port, .. } => vec![*port],
            Self::Generic { ports, .. } => ports.iter().map(|p| p.host_port).collect(),
        }
    }

    /// Build the service handle, resolving published ports against
    /// `external_host`.
    pub fn build(&self, external_host: &str) -> Result<Box<dyn ServiceHandle>, ConfigError> {
        let service: Box<dyn ServiceHandle> = match self.clone() {
            Self::Postgres {
                name,
                db_name,
                user,
                password,
                external_port,
                internal_port,
                network,
            } => Box::new(postgres(PostgresOpts {
                container_name: name,
                network,
                db_name,
                db_user: user,
                db_password: password,
                external_host: external_host.to_string(),
                external_port,
                internal_port,
            })),
            Self::SupabasePostgres {
                name,
                db_name,
                password,
                external_port,
                internal_port,
                network,
            } => Box::new(supabase_postgres(PostgresOpts {
                container_name: name,
                network,
                db_name,
                db_user: String::new(),
                db_password: password,
                external_host: external_host.to_string(),
                external_port,
                internal_port,
            })),
            Self::Zookeeper {
                name,
                port,
                network,
            } => Box::new(zookeeper(ZookeeperOpts {
                container_name: name,
                network,
                port,
            })),
            Self::Kafka {
                name,
                external_port,
                container_name_port,
                zookeeper: zookeeper_addr,
                topics,
                network,
            } => {
                let zookeeper = zookeeper_addr
                    .as_deref()
                    .map(|addr| parse_host_port(&name, addr))
                    .transpose()?;
                Box::new(Kafka::new(KafkaOpts {
                    container_name: name,
                    container_name_port,
                    external_host: external_host.to_string(),
                    external_port,
                    zookeeper,
                    network,
                    topics,
                }))
            }
            Self::Generic {
                name,
                repository,
                tag,
                env,
                ports,
                cmd,
                entrypoint,
                ready,
                network,
            } => {
                let mut spec = ContainerSpec::new(repository, tag);
                spec.name = Some(name.clone());
                spec.env = env;
                spec.ports = ports;
                spec.cmd = cmd;
                spec.entrypoint = entrypoint;
                spec.network = network;
                let opts = ContainerOpts::new(spec);
                let opts = match ready {
                    ProbeConfig::None => opts.with_probe(NoProbe),
                    ProbeConfig::Tcp { port } => {
                        opts.with_probe(TcpProbe::new(external_host, port))
                    }
                    ProbeConfig::Exec { cmd } => opts.with_probe(ExecProbe::new(cmd)),
                };
                Box::new(GenericService::new(name, opts))
            }
        };
        Ok(service)
    }
}

impl GroupFile {
    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }

    /// Reject groups that could never start: no services, duplicate names,
    /// or two services publishing the same host port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("no services defined".to_string()));
        }
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for service in &self.services {
            let name = service.name();
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} service without a name",
                    service.kind()
                )));
            }
            if !names.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service name `{name}`"
                )));
            }
            for port in service.host_ports() {
                if port == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "service `{name}` publishes port 0"
                    )));
                }
                if !ports.insert(port) {
                    return Err(ConfigError::Invalid(format!(
                        "host port {port} is published twice (again by `{name}`)"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and build every service handle, in file order.
    pub fn build_services(
        &self,
        external_host: &str,
    ) -> Result<Vec<Box<dyn ServiceHandle>>, ConfigError> {
        self.validate()?;
        self.services
            .iter()
            .map(|service| service.build(external_host))
            .collect()
    }
}

/// Load a group file.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path
/// and line context) if malformed.
pub fn load_file(path: &Path) -> Result<GroupFile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    GroupFile::from_yaml_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_host_port(service: &str, addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "service `{service}`: expected host:port, got `{addr}`"
        ))
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}
