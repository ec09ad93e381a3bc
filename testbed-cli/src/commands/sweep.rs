//! `testbed sweep`: remove what a crashed run left behind.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use testbed_core::{GroupId, SweepScope};
use testbed_orchestrator::sweep;
use testbed_runtime::DockerGateway;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Group id, as printed by `testbed up`.
    pub group: String,

    /// Sweep every container on the host instead of just the group's.
    #[arg(long)]
    pub global: bool,
}

impl SweepArgs {
    pub async fn run(self) -> Result<()> {
        let scope = if self.global {
            SweepScope::Global
        } else {
            SweepScope::Group
        };
        let group = GroupId::from(self.group.as_str());
        let gateway = DockerGateway::connect()
            .await
            .context("could not reach the Docker daemon")?;

        tracing::info!(group = %group, scope = %scope, "sweeping containers");
        let report = sweep(&gateway, &scope.filter(&group))
            .await
            .context("failed to list containers")?;

        println!(
            "{} killed {} | removed {} | {} failures",
            "swept".green().bold(),
            report.killed.len(),
            report.removed.len(),
            report.failures,
        );
        for name in &report.removed {
            println!("  {name}");
        }
        if report.failures > 0 {
            anyhow::bail!("{} containers could not be removed", report.failures);
        }
        Ok(())
    }
}
