//! An in-process [`RuntimeGateway`] that simulates networks and containers.
//!
//! Mirrors the Docker behaviours the orchestrator relies on (label filters,
//! auto-remove on kill, port allocation, networks with attached containers
//! refusing removal) and adds failure injection so lifecycle tests can run
//! without a daemon.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use testbed_core::{
    ContainerFilter, ContainerRef, ContainerSpec, ExecOutput, GatewayError, Labels, NetworkHandle,
    RegistryAuth, RetryPolicy, RuntimeGateway,
};

/// A gateway call as recorded in [`MemoryGateway::calls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateNetwork(String),
    RemoveNetwork(String),
    CreateContainer(String),
    KillContainer(String),
    RemoveContainer(String),
    ListContainers,
    WaitContainer(String),
    Exec(String),
}

#[derive(Debug, Clone)]
struct SimContainer {
    id: String,
    name: String,
    network: Option<String>,
    labels: Labels,
    ports: Vec<u16>,
    auto_remove: bool,
    running: bool,
    image: String,
}

impl SimContainer {
    fn to_ref(&self) -> ContainerRef {
        ContainerRef {
            id: self.id.clone(),
            name: self.name.clone(),
            labels: self.labels.clone(),
            running: self.running,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    networks: BTreeMap<String, NetworkHandle>,
    containers: BTreeMap<String, SimContainer>,
    calls: Vec<Call>,
    fail_create: HashSet<String>,
    exec_results: HashMap<String, Vec<ExecOutput>>,
    exit_codes: HashMap<String, i64>,
    network_remove_failures: u32,
    unavailable: bool,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn network_key(&self, name_or_id: &str) -> Option<String> {
        self.networks
            .iter()
            .find(|(name, net)| *name == name_or_id || net.id == name_or_id)
            .map(|(name, _)| name.clone())
    }

    fn container_key(&self, name_or_id: &str) -> Option<String> {
        self.containers
            .iter()
            .find(|(id, c)| *id == name_or_id || c.name == name_or_id)
            .map(|(id, _)| id.clone())
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable(
                "simulated runtime is down".to_string(),
            ));
        }
        Ok(())
    }

    fn stop(&mut self, id: &str) {
        let remove = match self.containers.get_mut(id) {
            Some(container) => {
                container.running = false;
                container.auto_remove
            }
            None => false,
        };
        if remove {
            self.containers.remove(id);
        }
    }
}

/// Simulated container runtime.
#[derive(Debug)]
pub struct MemoryGateway {
    state: Mutex<State>,
    retry: RetryPolicy,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// A gateway with a short retry budget suited to tests.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(10),
                multiplier: 1.5,
                max_delay: Duration::from_millis(100),
                max_elapsed: Duration::from_secs(2),
            },
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Make container creation fail for the given container name or image.
    pub async fn fail_create(&self, name_or_image: impl Into<String>) {
        self.state.lock().await.fail_create.insert(name_or_image.into());
    }

    /// Queue exec results for a container (by name). Once the queue holds a
    /// single entry that entry is returned for every further call.
    pub async fn push_exec_result(&self, container: impl Into<String>, output: ExecOutput) {
        self.state
            .lock()
            .await
            .exec_results
            .entry(container.into())
            .or_default()
            .push(output);
    }

    /// Exit code reported by `wait_container` for a container, matched by
    /// name first and image second.
    pub async fn set_exit_code(&self, container: impl Into<String>, code: i64) {
        self.state
            .lock()
            .await
            .exit_codes
            .insert(container.into(), code);
    }

    /// Fail the next `n` network removals with a transient error.
    pub async fn fail_network_removals(&self, n: u32) {
        self.state.lock().await.network_remove_failures = n;
    }

    /// Make every call fail as if the daemon were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Stop a container from outside, as if its process had exited.
    pub async fn crash_container(&self, name_or_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(id) = state.container_key(name_or_id) {
            state.stop(&id);
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Names of all networks that currently exist.
    pub async fn network_names(&self) -> Vec<String> {
        self.state.lock().await.networks.keys().cloned().collect()
    }

    /// All containers that currently exist, running or not.
    pub async fn containers(&self) -> Vec<ContainerRef> {
        self.state
            .lock()
            .await
            .containers
            .values()
            .map(SimContainer::to_ref)
            .collect()
    }

    /// Image (`repository:tag`) a container was created from.
    pub async fn image_of(&self, name_or_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .container_key(name_or_id)
            .and_then(|id| state.containers.get(&id).map(|c| c.image.clone()))
    }

    /// Network a container is attached to.
    pub async fn network_of(&self, name_or_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .container_key(name_or_id)
            .and_then(|id| state.containers.get(&id).and_then(|c| c.network.clone()))
    }
}

#[async_trait]
impl RuntimeGateway for MemoryGateway {
    async fn ping(&self) -> Result<(), GatewayError> {
        self.state.lock().await.check_available()
    }

    async fn create_network(
        &self,
        name: &str,
        _labels: &Labels,
    ) -> Result<NetworkHandle, GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::CreateNetwork(name.to_string()));
        if state.networks.contains_key(name) {
            return Err(GatewayError::conflict("network", name));
        }
        let handle = NetworkHandle {
            id: state.next_id("net"),
            name: name.to_string(),
        };
        state.networks.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn remove_network(&self, name_or_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::RemoveNetwork(name_or_id.to_string()));
        let key = state
            .network_key(name_or_id)
            .ok_or_else(|| GatewayError::not_found("network", name_or_id))?;
        if state.network_remove_failures > 0 {
            state.network_remove_failures -= 1;
            return Err(GatewayError::api(
                "remove_network",
                "simulated transient failure",
            ));
        }
        let attached = state
            .containers
            .values()
            .any(|c| c.running && c.network.as_deref() == Some(key.as_str()));
        if attached {
            return Err(GatewayError::api(
                "remove_network",
                format!("network {key} has active endpoints"),
            ));
        }
        state.networks.remove(&key);
        Ok(())
    }

    async fn inspect_network(
        &self,
        name_or_id: &str,
    ) -> Result<Option<NetworkHandle>, GatewayError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .network_key(name_or_id)
            .and_then(|key| state.networks.get(&key).cloned()))
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        _auth: &RegistryAuth,
    ) -> Result<ContainerRef, GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let image = spec.image();
        let label = spec.name.clone().unwrap_or_else(|| image.clone());
        state.calls.push(Call::CreateContainer(label.clone()));

        if state.fail_create.contains(&label) || state.fail_create.contains(&image) {
            return Err(GatewayError::api(
                "create_container",
                format!("simulated failure for {label}"),
            ));
        }
        let network = match &spec.network {
            Some(net) => Some(
                state
                    .network_key(net)
                    .ok_or_else(|| GatewayError::not_found("network", net.as_str()))?,
            ),
            None => None,
        };
        if let Some(name) = &spec.name {
            if state.containers.values().any(|c| &c.name == name) {
                return Err(GatewayError::conflict("container", name.as_str()));
            }
        }
        let ports: Vec<u16> = spec.ports.iter().map(|p| p.host_port).collect();
        for port in &ports {
            let taken = state
                .containers
                .values()
                .any(|c| c.running && c.ports.contains(port));
            if taken {
                return Err(GatewayError::api(
                    "create_container",
                    format!("Bind for 0.0.0.0:{port} failed: port is already allocated"),
                ));
            }
        }

        let id = state.next_id("ctr");
        let name = spec.name.clone().unwrap_or_else(|| id.clone());
        let container = SimContainer {
            id: id.clone(),
            name,
            network,
            labels: spec.labels.clone(),
            ports,
            auto_remove: spec.auto_remove,
            running: true,
            image,
        };
        let reference = container.to_ref();
        state.containers.insert(id, container);
        Ok(reference)
    }

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRef>, GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::ListContainers);
        Ok(state
            .containers
            .values()
            .map(SimContainer::to_ref)
            .filter(|c| filter.matches(c))
            .collect())
    }

    async fn kill_container(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::KillContainer(id.to_string()));
        let key = state
            .container_key(id)
            .ok_or_else(|| GatewayError::not_found("container", id))?;
        let running = state.containers.get(&key).is_some_and(|c| c.running);
        if !running {
            return Err(GatewayError::api(
                "kill_container",
                format!("container {id} is not running"),
            ));
        }
        state.stop(&key);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::RemoveContainer(id.to_string()));
        let key = state
            .container_key(id)
            .ok_or_else(|| GatewayError::not_found("container", id))?;
        state.containers.remove(&key);
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::WaitContainer(id.to_string()));
        let key = state
            .container_key(id)
            .ok_or_else(|| GatewayError::not_found("container", id))?;
        let code = state
            .containers
            .get(&key)
            .and_then(|c| {
                state
                    .exit_codes
                    .get(&c.name)
                    .or_else(|| state.exit_codes.get(&c.image))
            })
            .copied()
            .unwrap_or(0);
        state.stop(&key);
        Ok(code)
    }

    async fn exec(&self, id: &str, _cmd: &[String]) -> Result<ExecOutput, GatewayError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.calls.push(Call::Exec(id.to_string()));
        let key = state
            .container_key(id)
            .ok_or_else(|| GatewayError::not_found("container", id))?;
        let name = match state.containers.get(&key) {
            Some(c) if c.running => c.name.clone(),
            _ => {
                return Err(GatewayError::api(
                    "exec",
                    format!("container {id} is not running"),
                ))
            }
        };
        let output = match state.exec_results.get_mut(&name) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_default(),
            None => ExecOutput::default(),
        };
        Ok(output)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
