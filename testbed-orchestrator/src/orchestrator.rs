//! Lifecycle of one group of service containers.
//!
//! ```text
//! NotStarted --start--> Starting --ready--> Started --stop--> Stopping --> Stopped
//!                          |                                     |
//!                          +---------------> Failed <------------+
//! ```
//!
//! `start` and `stop` each run at most once; concurrent and repeated callers
//! share the first call's outcome. Any failure inside either one runs a full
//! teardown (kill sweep, then network removal) before the failure is
//! published, and the first recorded failure is kept for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::{watch, Mutex, OnceCell};

use testbed_core::{
    ContainerFilter, GroupId, Labels, OrchestratorState, Role, RuntimeGateway, ServiceHandle,
    StartContext, GROUP_LABEL,
};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, ProvisioningFailure};
use crate::sweep::sweep;

/// Snapshot of one managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub hostname: Option<String>,
    pub ports: Vec<u16>,
}

pub struct Orchestrator {
    group: GroupId,
    network: String,
    config: OrchestratorConfig,
    gateway: Arc<dyn RuntimeGateway>,
    services: Mutex<Vec<Box<dyn ServiceHandle>>>,
    service_count: usize,
    state: watch::Sender<OrchestratorState>,
    failure: OnceLock<Arc<ProvisioningFailure>>,
    /// Set once this orchestrator created the network.
    network_owned: AtomicBool,
    started: OnceCell<Result<(), OrchestratorError>>,
    stopped: OnceCell<Result<(), OrchestratorError>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("group", &self.group)
            .field("network", &self.network)
            .field("service_count", &self.service_count)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Services are started in the given order and stopped in the same order.
    pub fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn RuntimeGateway>,
        services: Vec<Box<dyn ServiceHandle>>,
    ) -> Self {
        let group = GroupId::generate();
        let network = config
            .network
            .clone()
            .unwrap_or_else(|| group.to_string());
        let (state, _) = watch::channel(OrchestratorState::NotStarted);
        Self {
            group,
            network,
            config,
            gateway,
            service_count: services.len(),
            services: Mutex::new(services),
            state,
            failure: OnceLock::new(),
            network_owned: AtomicBool::new(false),
            started: OnceCell::new(),
            stopped: OnceCell::new(),
        }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn service_count(&self) -> usize {
        self.service_count
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// The failure recorded by teardown, if any.
    pub fn failure(&self) -> Option<Arc<ProvisioningFailure>> {
        self.failure.get().cloned()
    }

    pub async fn services(&self) -> Vec<ServiceInfo> {
        self.services
            .lock()
            .await
            .iter()
            .map(|s| ServiceInfo {
                name: s.name().to_string(),
                hostname: s.hostname().map(str::to_string),
                ports: s.ports(),
            })
            .collect()
    }

    // ---- start ----

    /// Create the network and start every service in order.
    ///
    /// Only the first call does any work. On failure the whole group has been
    /// torn down by the time this returns `SetupAborted`.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.started.get_or_init(|| self.provision()).await.clone()
    }

    async fn provision(&self) -> Result<(), OrchestratorError> {
        let mut services = self.services.lock().await;
        if let Some(failure) = self.failure.get() {
            return Err(OrchestratorError::SetupAborted(failure.clone()));
        }
        match self.state() {
            OrchestratorState::NotStarted => {}
            other => return Err(OrchestratorError::AlreadyStopped(other)),
        }
        self.set_state(OrchestratorState::Starting);
        tracing::info!(
            group = %self.group,
            network = %self.network,
            services = self.service_count,
            "starting group",
        );

        let network_labels = Labels::from([(GROUP_LABEL.to_string(), self.group.to_string())]);
        if let Err(source) = self
            .gateway
            .create_network(&self.network, &network_labels)
            .await
        {
            drop(services);
            let failure = ProvisioningFailure::NetworkCreate {
                network: self.network.clone(),
                source,
            };
            return Err(self.abort(failure).await);
        }
        self.network_owned.store(true, Ordering::SeqCst);

        let labels = self.group.labels(Role::Service);
        for service in services.iter_mut() {
            service.attach_labels(&labels);
        }

        let ctx = StartContext {
            auth: self.config.auth.clone(),
            gateway: Arc::clone(&self.gateway),
            network: self.network.clone(),
        };
        let mut failed = None;
        for service in services.iter_mut() {
            tracing::info!(group = %self.group, service = %service.name(), "starting service");
            if let Err(source) = service.start(&ctx).await {
                failed = Some(ProvisioningFailure::ServiceStart {
                    service: service.name().to_string(),
                    source,
                });
                break;
            }
        }
        drop(services);
        if let Some(failure) = failed {
            return Err(self.abort(failure).await);
        }

        self.set_state(OrchestratorState::Started);
        tracing::info!(group = %self.group, "all services started");
        Ok(())
    }

    // ---- readiness ----

    /// Block until every service container of the group is running and
    /// `start` has finished.
    ///
    /// Returns `SetupAborted` as soon as a failure is recorded (including one
    /// recorded while this call is already polling), and `Timeout` once the
    /// readiness budget is spent.
    pub async fn wait_until_started(&self) -> Result<(), OrchestratorError> {
        let mut changes = self.state.subscribe();
        let filter = ContainerFilter::group_services(&self.group);
        let mut backoff = self.config.readiness.backoff();

        loop {
            if let Some(failure) = self.failure.get() {
                return Err(OrchestratorError::SetupAborted(failure.clone()));
            }
            match self.gateway.list_containers(&filter).await {
                // A container exists before its probe passes; only a finished
                // start counts.
                Ok(running)
                    if running.len() == self.service_count
                        && self.state() == OrchestratorState::Started =>
                {
                    tracing::debug!(group = %self.group, "group ready");
                    return Ok(());
                }
                Ok(running) if running.len() == self.service_count => tracing::debug!(
                    group = %self.group,
                    state = %self.state(),
                    "containers present, start still running",
                ),
                Ok(running) => tracing::debug!(
                    group = %self.group,
                    running = running.len(),
                    expected = self.service_count,
                    "group not ready yet",
                ),
                Err(err) => {
                    tracing::debug!(group = %self.group, error = %err, "readiness listing failed")
                }
            }

            let Some(delay) = backoff.next_delay() else {
                if let Some(failure) = self.failure.get() {
                    return Err(OrchestratorError::SetupAborted(failure.clone()));
                }
                return Err(OrchestratorError::Timeout {
                    attempts: backoff.attempts(),
                    waited: backoff.elapsed(),
                });
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = changes.changed() => {}
            }
        }
    }

    // ---- stop ----

    /// Stop every service in order, then remove the network.
    ///
    /// Only the first call does any work. Calling it on a failed group does
    /// nothing and returns the recorded failure.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        self.stopped.get_or_init(|| self.shutdown()).await.clone()
    }

    async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let mut services = self.services.lock().await;
        if let Some(failure) = self.failure.get() {
            tracing::info!(group = %self.group, "group already torn down");
            return Err(OrchestratorError::SetupAborted(failure.clone()));
        }
        self.set_state(OrchestratorState::Stopping);
        tracing::info!(group = %self.group, "stopping group");

        let mut failed = None;
        for service in services.iter_mut() {
            if let Err(source) = service.stop().await {
                failed = Some(ProvisioningFailure::ServiceStop {
                    service: service.name().to_string(),
                    source,
                });
                break;
            }
        }
        drop(services);
        if let Some(failure) = failed {
            return Err(self.abort(failure).await);
        }

        let policy = self
            .config
            .network_removal
            .unwrap_or_else(|| self.gateway.retry_policy());
        let removed = policy
            .retry("remove_network", || self.gateway.remove_network(&self.network))
            .await;
        if let Err(source) = removed {
            let failure = ProvisioningFailure::NetworkRemove {
                network: self.network.clone(),
                source,
            };
            return Err(self.abort(failure).await);
        }

        self.set_state(OrchestratorState::Stopped);
        tracing::info!(group = %self.group, "group stopped");
        Ok(())
    }

    // ---- teardown ----

    /// Kill and remove the group's containers, remove the network, then
    /// record `cause` and publish `Failed`. Every handle forgets its
    /// container, so [`Orchestrator::services`] reports no hostnames.
    ///
    /// Never fails: cleanup errors are logged and dropped. When a failure was
    /// already recorded it is kept and returned instead of `cause`.
    pub async fn teardown(&self, cause: ProvisioningFailure) -> Arc<ProvisioningFailure> {
        let filter = self.config.sweep.filter(&self.group);
        match sweep(self.gateway.as_ref(), &filter).await {
            Ok(report) => tracing::info!(
                group = %self.group,
                scope = %self.config.sweep,
                killed = report.killed.len(),
                removed = report.removed.len(),
                failures = report.failures,
                "teardown sweep finished",
            ),
            Err(err) => {
                tracing::warn!(group = %self.group, error = %err, "teardown could not list containers")
            }
        }

        if !self.network_owned.load(Ordering::SeqCst) {
            tracing::debug!(group = %self.group, network = %self.network, "network was never created here");
        } else {
            match self.gateway.remove_network(&self.network).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    tracing::debug!(group = %self.group, network = %self.network, "network already gone")
                }
                Err(err) => tracing::warn!(
                    group = %self.group,
                    network = %self.network,
                    error = %err,
                    "teardown could not remove network",
                ),
            }
        }

        for service in self.services.lock().await.iter_mut() {
            service.release();
        }

        let recorded = Arc::clone(self.failure.get_or_init(|| Arc::new(cause)));
        self.state.send_if_modified(|state| {
            let changed = *state != OrchestratorState::Failed;
            *state = OrchestratorState::Failed;
            changed
        });
        recorded
    }

    async fn abort(&self, cause: ProvisioningFailure) -> OrchestratorError {
        tracing::error!(group = %self.group, error = %cause, "provisioning failed, tearing down group");
        OrchestratorError::SetupAborted(self.teardown(cause).await)
    }

    /// Terminal states are never left, except by teardown.
    fn set_state(&self, next: OrchestratorState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            tracing::debug!(group = %self.group, from = %state, to = %next, "state change");
            *state = next;
            true
        });
    }
}
