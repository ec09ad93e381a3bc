//! Domain types shared by the gateway, the services and the orchestrator.
//!
//! Container and network references are plain data; nothing here talks to a
//! runtime. All label maps are `BTreeMap`s so rendered output is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label key carrying the group identifier on every member container.
pub const GROUP_LABEL: &str = "testbed.group";

/// Label key distinguishing managed services from short-lived helpers.
pub const ROLE_LABEL: &str = "testbed.role";

/// Container / network labels.
pub type Labels = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one orchestrator's group of containers.
///
/// Generated once per orchestrator and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// A fresh `testbed-<uuid>` identifier.
    pub fn generate() -> Self {
        Self(format!("testbed-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Discovery labels for a container of this group playing `role`.
    pub fn labels(&self, role: Role) -> Labels {
        let mut labels = Labels::new();
        labels.insert(GROUP_LABEL.to_string(), self.0.clone());
        labels.insert(ROLE_LABEL.to_string(), role.to_string());
        labels
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What a labelled container is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A managed service; counted by the readiness check.
    Service,
    /// A one-shot helper (topic initialisation and the like); never counted.
    Helper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Service => write!(f, "service"),
            Role::Helper => write!(f, "helper"),
        }
    }
}

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    #[default]
    NotStarted,
    Starting,
    Started,
    Failed,
    Stopping,
    Stopped,
}

impl OrchestratorState {
    /// `Failed` and `Stopped` are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which containers a failure-triggered teardown kills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SweepScope {
    /// Only members of the failing group.
    #[default]
    Group,
    /// Every container visible to the runtime.
    Global,
}

impl SweepScope {
    /// Listing filter covering this scope for `group`.
    pub fn filter(self, group: &GroupId) -> ContainerFilter {
        match self {
            Self::Group => ContainerFilter::group_members(group),
            Self::Global => ContainerFilter::everything(),
        }
    }
}

impl fmt::Display for SweepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Global => f.write_str("global"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime resources
// ---------------------------------------------------------------------------

/// Credentials used when pulling images from a private registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub server_address: Option<String>,
}

impl RegistryAuth {
    /// `true` when no field is set; the runtime then pulls anonymously.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.email.is_none()
            && self.server_address.is_none()
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("email", &self.email)
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// A created network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    /// Container name without the leading `/` the Docker API reports.
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub running: bool,
}

/// Publishes `container_port/tcp` on `host_port` of the runtime host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortBinding {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }
}

/// Everything the runtime needs to create and run one container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Explicit container name; the runtime picks one when `None`.
    pub name: Option<String>,
    pub repository: String,
    pub tag: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    /// Network to attach to; `None` means the group's private network.
    pub network: Option<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Labels,
    /// Remove the container as soon as it exits.
    #[serde(default)]
    pub auto_remove: bool,
}

impl ContainerSpec {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            auto_remove: true,
            ..Default::default()
        }
    }

    /// `repository:tag`
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// Environment in `KEY=VALUE` form, ordered by key.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Predicate for [`RuntimeGateway::list_containers`](crate::RuntimeGateway::list_containers).
///
/// Label predicates are `key` (present with any value) or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerFilter {
    pub labels: Vec<(String, Option<String>)>,
    /// Include exited / created containers, not just running ones.
    pub include_stopped: bool,
}

impl ContainerFilter {
    /// Every container the runtime knows about, running or not.
    pub fn everything() -> Self {
        Self {
            labels: Vec::new(),
            include_stopped: true,
        }
    }

    /// Running containers that are managed services of `group`.
    pub fn group_services(group: &GroupId) -> Self {
        Self::default()
            .with_label(GROUP_LABEL, group.as_str())
            .with_label(ROLE_LABEL, Role::Service.to_string())
    }

    /// Every container of `group` in any role or state.
    pub fn group_members(group: &GroupId) -> Self {
        Self::default()
            .with_label(GROUP_LABEL, group.as_str())
            .include_stopped()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), Some(value.into())));
        self
    }

    pub fn with_label_key(mut self, key: impl Into<String>) -> Self {
        self.labels.push((key.into(), None));
        self
    }

    pub fn include_stopped(mut self) -> Self {
        self.include_stopped = true;
        self
    }

    /// Label predicates in the `key` / `key=value` syntax the Docker API expects.
    pub fn label_predicates(&self) -> Vec<String> {
        self.labels
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.clone(),
            })
            .collect()
    }

    /// Evaluate the filter against a container locally.
    pub fn matches(&self, container: &ContainerRef) -> bool {
        if !self.include_stopped && !container.running {
            return false;
        }
        self.labels.iter().all(|(k, v)| match v {
            Some(v) => container.labels.get(k) == Some(v),
            None => container.labels.contains_key(k),
        })
    }
}

/// Result of a command executed inside a running container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
