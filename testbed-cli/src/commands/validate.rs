//! `testbed validate`: parse a group file and print the resolved plan.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use testbed_core::{external_host_from_process, SweepScope};
use testbed_services::{load_file, GroupFile};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Group definition file (YAML).
    pub file: PathBuf,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PlanJson {
    network: Option<String>,
    external_host: String,
    readiness_timeout_secs: Option<u64>,
    sweep: SweepScope,
    services: Vec<PlannedService>,
}

#[derive(Debug, Serialize, Tabled)]
struct PlannedService {
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Host ports", display_with = "display_ports")]
    ports: Vec<u16>,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let group = load_group(&self.file)?;
        let external_host = external_host_from_process(group.external_host.as_deref());
        let services = plan(&group);

        if self.json {
            let payload = PlanJson {
                network: group.network.clone(),
                external_host,
                readiness_timeout_secs: group.readiness_timeout_secs,
                sweep: group.sweep,
                services,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        println!(
            "{} {} | {} services | host {} | sweep {}",
            "valid".green().bold(),
            self.file.display(),
            services.len(),
            external_host,
            group.sweep,
        );
        let mut table = Table::new(services);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

/// Load and validate a group file.
pub(crate) fn load_group(path: &Path) -> Result<GroupFile> {
    let group = load_file(path)
        .with_context(|| format!("failed to load group file {}", path.display()))?;
    group
        .validate()
        .with_context(|| format!("group file {} is not usable", path.display()))?;
    Ok(group)
}

fn plan(group: &GroupFile) -> Vec<PlannedService> {
    group
        .services
        .iter()
        .map(|service| PlannedService {
            name: service.name().to_string(),
            kind: service.kind(),
            image: service.image(),
            ports: service.host_ports(),
        })
        .collect()
}

fn display_ports(ports: &[u16]) -> String {
    if ports.is_empty() {
        return "-".to_string();
    }
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
