//! `testbed up`: start a group and hold it until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use testbed_core::{external_host_from_process, RegistryAuth};
use testbed_orchestrator::{Orchestrator, OrchestratorConfig, ServiceInfo};
use testbed_runtime::DockerGateway;

use super::validate::load_group;

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Group definition file (YAML).
    pub file: PathBuf,

    /// Print the running services as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Registry credentials; any value given here replaces the file's `auth`.
#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    #[arg(long = "registry-user", env = "TESTBED_REGISTRY_USER")]
    pub username: Option<String>,

    #[arg(long = "registry-password", env = "TESTBED_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "registry-email", env = "TESTBED_REGISTRY_EMAIL")]
    pub email: Option<String>,

    #[arg(long = "registry-server", env = "TESTBED_REGISTRY_SERVER")]
    pub server_address: Option<String>,
}

impl RegistryArgs {
    fn resolve(self, from_file: Option<RegistryAuth>) -> RegistryAuth {
        let given = RegistryAuth {
            username: self.username,
            password: self.password,
            email: self.email,
            server_address: self.server_address,
        };
        if given.is_anonymous() {
            from_file.unwrap_or_default()
        } else {
            given
        }
    }
}

#[derive(Debug, Serialize)]
struct UpJson {
    group: String,
    network: String,
    services: Vec<ServiceInfo>,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Host ports")]
    ports: String,
}

impl UpArgs {
    pub async fn run(self) -> Result<()> {
        let group = load_group(&self.file)?;
        let external_host = external_host_from_process(group.external_host.as_deref());
        let services = group
            .build_services(&external_host)
            .with_context(|| format!("failed to build services from {}", self.file.display()))?;

        let mut config = OrchestratorConfig::default()
            .with_sweep(group.sweep)
            .with_auth(self.registry.resolve(group.auth.clone()));
        if let Some(network) = &group.network {
            config = config.with_network(network.clone());
        }
        if let Some(timeout) = group.readiness_timeout() {
            config = config.with_readiness_timeout(timeout);
        }

        let gateway = DockerGateway::connect()
            .await
            .context("could not reach the Docker daemon")?;
        let orchestrator = Orchestrator::new(config, Arc::new(gateway), services);
        tracing::info!(group = %orchestrator.group(), file = %self.file.display(), "bringing group up");

        orchestrator.start().await.context("group failed to start")?;

        let ready = tokio::select! {
            ready = orchestrator.wait_until_started() => ready.context("group never became ready"),
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!(group = %orchestrator.group(), "interrupted before the group was ready");
                orchestrator.stop().await.context("group failed to stop cleanly")?;
                return Ok(());
            }
        };
        if let Err(err) = ready {
            if let Err(stop_err) = orchestrator.stop().await {
                tracing::warn!(group = %orchestrator.group(), error = %stop_err, "cleanup after readiness failure failed");
            }
            return Err(err);
        }

        let services = orchestrator.services().await;
        if self.json {
            let payload = UpJson {
                group: orchestrator.group().to_string(),
                network: orchestrator.network().to_string(),
                services,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize group JSON")?
            );
        } else {
            print_table(&orchestrator, services);
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        tracing::info!(group = %orchestrator.group(), "stopping on Ctrl-C");
        orchestrator
            .stop()
            .await
            .context("group failed to stop cleanly")?;
        Ok(())
    }
}

fn print_table(orchestrator: &Orchestrator, services: Vec<ServiceInfo>) {
    println!(
        "{} group {} on network {}",
        "ready".green().bold(),
        orchestrator.group(),
        orchestrator.network(),
    );
    let rows: Vec<ServiceRow> = services
        .into_iter()
        .map(|service| ServiceRow {
            name: service.name,
            hostname: service.hostname.unwrap_or_else(|| "-".to_string()),
            ports: if service.ports.is_empty() {
                "-".to_string()
            } else {
                service
                    .ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{}", "Press Ctrl-C to stop the group.".bright_black());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(user: &str) -> RegistryAuth {
        RegistryAuth {
            username: Some(user.to_string()),
            ..RegistryAuth::default()
        }
    }

    #[test]
    fn file_auth_used_when_no_flags_given() {
        let resolved = RegistryArgs::default().resolve(Some(auth("from-file")));
        assert_eq!(resolved, auth("from-file"));
    }

    #[test]
    fn flags_replace_file_auth() {
        let args = RegistryArgs {
            username: Some("from-flag".to_string()),
            ..RegistryArgs::default()
        };
        assert_eq!(args.resolve(Some(auth("from-file"))), auth("from-flag"));
    }

    #[test]
    fn anonymous_without_any_source() {
        assert!(RegistryArgs::default().resolve(None).is_anonymous());
    }
}
