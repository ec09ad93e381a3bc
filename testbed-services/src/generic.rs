//! A service backed by a single container with caller-supplied options.
//!
//! The database and coordination services are thin constructors around
//! [`GenericService`].

use async_trait::async_trait;
use tracing::info;

use testbed_core::{Labels, ServiceError, ServiceHandle, StartContext};

use crate::runner::{run_container, ContainerOpts, RunningContainer};

#[derive(Debug)]
pub struct GenericService {
    name: String,
    opts: ContainerOpts,
    ports: Vec<u16>,
    running: Option<RunningContainer>,
}

impl GenericService {
    /// Ports reported by [`ServiceHandle::ports`] default to the host side of
    /// every binding in `opts.spec`.
    pub fn new(name: impl Into<String>, opts: ContainerOpts) -> Self {
        let ports = opts.spec.ports.iter().map(|p| p.host_port).collect();
        Self {
            name: name.into(),
            opts,
            ports,
            running: None,
        }
    }

    /// Override the externally advertised ports.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn opts(&self) -> &ContainerOpts {
        &self.opts
    }

    /// The running container, once started.
    pub fn running(&self) -> Option<&RunningContainer> {
        self.running.as_ref()
    }
}

#[async_trait]
impl ServiceHandle for GenericService {
    fn name(&self) -> &str {
        &self.name
    }

    fn hostname(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.hostname.as_str())
    }

    fn ports(&self) -> Vec<u16> {
        self.ports.clone()
    }

    fn attach_labels(&mut self, labels: &Labels) {
        self.opts.spec.labels = labels.clone();
    }

    async fn start(&mut self, ctx: &StartContext) -> Result<(), ServiceError> {
        if self.running.is_some() {
            return Ok(());
        }
        info!(service = %self.name, image = %self.opts.spec.image(), "starting service");
        self.running = Some(run_container(ctx, &self.opts).await?);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        let running = self
            .running
            .take()
            .ok_or_else(|| ServiceError::not_started(&self.name))?;
        running.remove().await?;
        info!(service = %self.name, "service stopped");
        Ok(())
    }

    fn release(&mut self) {
        if let Some(running) = self.running.take() {
            running.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use testbed_core::{ContainerSpec, GroupId, PortBinding, RegistryAuth, Role, RuntimeGateway};
    use testbed_runtime::MemoryGateway;

    #[tokio::test]
    async fn start_applies_labels_and_stop_removes() {
        let gw = Arc::new(MemoryGateway::new());
        gw.create_network("n", &Labels::new()).await.expect("network");
        let ctx = StartContext {
            auth: RegistryAuth::default(),
            gateway: gw.clone(),
            network: "n".to_string(),
        };
        let mut spec = ContainerSpec::new("nginx", "1.25");
        spec.name = Some("web".to_string());
        spec.ports.push(PortBinding::new(18080, 80));
        let mut service = GenericService::new("web", ContainerOpts::new(spec));
        let group = GroupId::from("g");
        service.attach_labels(&group.labels(Role::Service));

        assert_eq!(service.hostname(), None);
        assert_eq!(service.ports(), vec![18080]);
        service.start(&ctx).await.expect("start");
        assert_eq!(service.hostname(), Some("web"));
        let listed = gw
            .list_containers(&testbed_core::ContainerFilter::group_services(&group))
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);

        service.stop().await.expect("stop");
        assert!(gw.containers().await.is_empty());
        assert!(matches!(
            service.stop().await,
            Err(ServiceError::NotStarted { .. })
        ));
    }

    #[tokio::test]
    async fn release_forgets_container_without_runtime_calls() {
        let gw = Arc::new(MemoryGateway::new());
        gw.create_network("n", &Labels::new()).await.expect("network");
        let ctx = StartContext {
            auth: RegistryAuth::default(),
            gateway: gw.clone(),
            network: "n".to_string(),
        };
        let mut spec = ContainerSpec::new("redis", "7");
        spec.name = Some("cache".to_string());
        let mut service = GenericService::new("cache", ContainerOpts::new(spec));
        service.start(&ctx).await.expect("start");
        let calls_before = gw.calls().await.len();

        service.release();
        assert_eq!(service.hostname(), None);
        assert!(service.running().is_none());
        assert_eq!(gw.calls().await.len(), calls_before);
        assert_eq!(gw.containers().await.len(), 1, "runtime untouched");
        assert!(matches!(
            service.stop().await,
            Err(ServiceError::NotStarted { .. })
        ));
    }
}
