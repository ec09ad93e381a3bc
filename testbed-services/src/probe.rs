//! Readiness probes.
//!
//! A probe performs one attempt; [`crate::run_container`] drives it under the
//! gateway's [`RetryPolicy`](testbed_core::RetryPolicy).

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use testbed_core::{ContainerRef, ProbeError, RuntimeGateway};

/// Upper bound for a single TCP connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One readiness check against a freshly started container.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    async fn check(
        &self,
        gateway: &dyn RuntimeGateway,
        container: &ContainerRef,
    ) -> Result<(), ProbeError>;
}

/// Always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl ReadinessProbe for NoProbe {
    fn describe(&self) -> String {
        "none".to_string()
    }

    async fn check(&self, _: &dyn RuntimeGateway, _: &ContainerRef) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Ready once a TCP connection to `host:port` succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub host: String,
    pub port: u16,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }

    async fn check(&self, _: &dyn RuntimeGateway, _: &ContainerRef) -> Result<(), ProbeError> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(ProbeError::Io(err)),
            Err(_) => Err(ProbeError::NotReady(format!(
                "connect to {}:{} timed out",
                self.host, self.port
            ))),
        }
    }
}

/// Ready once a command executed inside the container exits with status 0.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    pub cmd: Vec<String>,
}

impl ExecProbe {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for ExecProbe {
    fn describe(&self) -> String {
        format!("exec {}", self.cmd.join(" "))
    }

    async fn check(
        &self,
        gateway: &dyn RuntimeGateway,
        container: &ContainerRef,
    ) -> Result<(), ProbeError> {
        let output = gateway.exec(&container.id, &self.cmd).await?;
        if output.success() {
            return Ok(());
        }
        let detail = output.stderr.trim();
        Err(ProbeError::NotReady(if detail.is_empty() {
            format!("`{}` exited with {}", self.cmd.join(" "), output.exit_code)
        } else {
            format!(
                "`{}` exited with {}: {detail}",
                self.cmd.join(" "),
                output.exit_code
            )
        }))
    }
}

/// Ready once every inner probe passes, checked in order.
pub struct AllOf(pub Vec<Box<dyn ReadinessProbe>>);

#[async_trait]
impl ReadinessProbe for AllOf {
    fn describe(&self) -> String {
        self.0
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join(" + ")
    }

    async fn check(
        &self,
        gateway: &dyn RuntimeGateway,
        container: &ContainerRef,
    ) -> Result<(), ProbeError> {
        for probe in &self.0 {
            probe.check(gateway, container).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::{ContainerSpec, ExecOutput, RegistryAuth};
    use testbed_runtime::MemoryGateway;

    async fn running(gw: &MemoryGateway, name: &str) -> ContainerRef {
        let mut spec = ContainerSpec::new("postgres", "13.1");
        spec.name = Some(name.to_string());
        gw.create_container(&spec, &RegistryAuth::default())
            .await
            .expect("container")
    }

    #[tokio::test]
    async fn tcp_probe_reaches_a_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let gw = MemoryGateway::new();
        let c = running(&gw, "db").await;

        TcpProbe::new("127.0.0.1", port)
            .check(&gw, &c)
            .await
            .expect("listener is up");

        drop(listener);
        assert!(TcpProbe::new("127.0.0.1", port).check(&gw, &c).await.is_err());
    }

    #[tokio::test]
    async fn exec_probe_reports_exit_code_and_stderr() {
        let gw = MemoryGateway::new();
        let c = running(&gw, "db").await;
        gw.push_exec_result(
            "db",
            ExecOutput {
                exit_code: 2,
                stdout: String::new(),
                stderr: "no response\n".to_string(),
            },
        )
        .await;

        let err = ExecProbe::new(["pg_isready"])
            .check(&gw, &c)
            .await
            .expect_err("not ready");
        assert_eq!(err.to_string(), "not ready: `pg_isready` exited with 2: no response");
    }

    #[tokio::test]
    async fn all_of_stops_at_first_failure() {
        let gw = MemoryGateway::new();
        let c = running(&gw, "db").await;
        gw.push_exec_result(
            "db",
            ExecOutput {
                exit_code: 1,
                ..Default::default()
            },
        )
        .await;
        let probe = AllOf(vec![Box::new(NoProbe), Box::new(ExecProbe::new(["true"]))]);
        assert_eq!(probe.describe(), "none + exec true");
        assert!(probe.check(&gw, &c).await.is_err());
    }
}
