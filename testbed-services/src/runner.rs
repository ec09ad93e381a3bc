//! Generic "run one container and wait for it" routine shared by every
//! service kind.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use testbed_core::{
    ContainerRef, ContainerSpec, GatewayError, RetryPolicy, RuntimeGateway, ServiceError,
    StartContext,
};

use crate::probe::{NoProbe, ReadinessProbe};

/// Hard lifetime applied to service containers unless overridden.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Launch options for [`run_container`].
pub struct ContainerOpts {
    pub spec: ContainerSpec,
    /// Kill the container once this much time has passed, whether or not
    /// anyone stopped it.
    pub lifetime: Option<Duration>,
    pub probe: Box<dyn ReadinessProbe>,
    /// Overrides the gateway's retry policy for the probe.
    pub retry: Option<RetryPolicy>,
}

impl ContainerOpts {
    pub fn new(spec: ContainerSpec) -> Self {
        Self {
            spec,
            lifetime: Some(DEFAULT_LIFETIME),
            probe: Box::new(NoProbe),
            retry: None,
        }
    }

    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl std::fmt::Debug for ContainerOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerOpts")
            .field("spec", &self.spec)
            .field("lifetime", &self.lifetime)
            .field("probe", &self.probe.describe())
            .field("retry", &self.retry)
            .finish()
    }
}

/// A started container that passed its readiness probe.
pub struct RunningContainer {
    pub container: ContainerRef,
    /// Name other members of the network reach it under.
    pub hostname: String,
    gateway: Arc<dyn RuntimeGateway>,
    reaper: Option<JoinHandle<()>>,
}

impl RunningContainer {
    /// Force-remove the container. A container that is already gone (expired
    /// or auto-removed) counts as removed.
    pub async fn remove(mut self) -> Result<(), GatewayError> {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        match self.gateway.remove_container(&self.container.id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(container = %self.hostname, "container already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the record of a container that was removed by someone else,
    /// without touching the runtime.
    pub fn discard(mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        debug!(container = %self.hostname, "container record discarded");
    }

    /// Block until the container exits and return its exit code.
    pub async fn wait(&self) -> Result<i64, GatewayError> {
        self.gateway.wait_container(&self.container.id).await
    }
}

impl std::fmt::Debug for RunningContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningContainer")
            .field("container", &self.container)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// Create and start a container, then run its readiness probe until it
/// passes or the retry budget is spent.
///
/// When `opts.spec.network` is `None` the container joins the group network
/// from `ctx`. On probe failure the container is removed before the error is
/// returned.
pub async fn run_container(
    ctx: &StartContext,
    opts: &ContainerOpts,
) -> Result<RunningContainer, ServiceError> {
    let mut spec = opts.spec.clone();
    if spec.network.is_none() {
        spec.network = Some(ctx.network.clone());
    }
    let gateway = Arc::clone(&ctx.gateway);
    let container = gateway.create_container(&spec, &ctx.auth).await?;
    let hostname = container.name.trim_start_matches('/').to_string();

    let reaper = opts.lifetime.map(|lifetime| {
        let gateway = Arc::clone(&gateway);
        let id = container.id.clone();
        let name = hostname.clone();
        tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            info!(container = %name, "lifetime elapsed, killing container");
            if let Err(err) = gateway.kill_container(&id).await {
                debug!(container = %name, error = %err, "expiry kill failed");
            }
        })
    });

    let policy = opts.retry.unwrap_or_else(|| gateway.retry_policy());
    debug!(container = %hostname, probe = %opts.probe.describe(), "waiting for readiness");
    let probed = policy
        .retry("readiness", || opts.probe.check(gateway.as_ref(), &container))
        .await;

    let running = RunningContainer {
        container,
        hostname,
        gateway,
        reaper,
    };
    match probed {
        Ok(()) => {
            info!(container = %running.hostname, "container ready");
            Ok(running)
        }
        Err(source) => {
            let service = running.hostname.clone();
            if let Err(err) = running.remove().await {
                warn!(container = %service, error = %err, "failed to remove unready container");
            }
            Err(ServiceError::Readiness { service, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ExecProbe;
    use testbed_core::{ExecOutput, Labels, PortBinding, RegistryAuth};
    use testbed_runtime::MemoryGateway;

    async fn context(gw: &Arc<MemoryGateway>) -> StartContext {
        gw.create_network("group-net", &Labels::new())
            .await
            .expect("network");
        StartContext {
            auth: RegistryAuth::default(),
            gateway: gw.clone(),
            network: "group-net".to_string(),
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(5),
            multiplier: 1.5,
            max_delay: Duration::from_millis(20),
            max_elapsed: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn joins_group_network_and_reports_hostname() {
        let gw = Arc::new(MemoryGateway::new());
        let ctx = context(&gw).await;
        let mut spec = ContainerSpec::new("redis", "7");
        spec.name = Some("cache".to_string());
        spec.ports.push(PortBinding::new(16379, 6379));

        let running = run_container(&ctx, &ContainerOpts::new(spec))
            .await
            .expect("run");
        assert_eq!(running.hostname, "cache");
        assert_eq!(gw.network_of("cache").await.as_deref(), Some("group-net"));

        running.remove().await.expect("remove");
        assert!(gw.containers().await.is_empty());
    }

    #[tokio::test]
    async fn unready_container_is_removed() {
        let gw = Arc::new(MemoryGateway::new());
        let ctx = context(&gw).await;
        gw.push_exec_result(
            "db",
            ExecOutput {
                exit_code: 2,
                ..Default::default()
            },
        )
        .await;
        let mut spec = ContainerSpec::new("postgres", "13.1");
        spec.name = Some("db".to_string());
        let opts = ContainerOpts::new(spec)
            .with_probe(ExecProbe::new(["pg_isready"]))
            .with_retry(fast());

        let err = run_container(&ctx, &opts).await.expect_err("never ready");
        assert!(err.to_string().starts_with("waited too long for readiness check"));
        assert!(gw.containers().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_unknown_network_fails_creation() {
        let gw = Arc::new(MemoryGateway::new());
        let ctx = context(&gw).await;
        let mut spec = ContainerSpec::new("redis", "7");
        spec.network = Some("no-such-network".to_string());

        let err = run_container(&ctx, &ContainerOpts::new(spec))
            .await
            .expect_err("bogus network");
        assert!(matches!(err, ServiceError::Gateway(ref e) if e.is_not_found()));
    }

    #[tokio::test(start_paused = true)]
    async fn container_is_killed_when_lifetime_elapses() {
        let gw = Arc::new(MemoryGateway::new());
        let ctx = context(&gw).await;
        let mut spec = ContainerSpec::new("redis", "7");
        spec.name = Some("short-lived".to_string());
        let opts = ContainerOpts::new(spec).with_lifetime(Some(Duration::from_secs(30)));

        let _running = run_container(&ctx, &opts).await.expect("run");
        assert_eq!(gw.containers().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(gw.containers().await.is_empty());
    }
}
