//! Best-effort removal of containers matching a filter.

use testbed_core::{ContainerFilter, GatewayError, RuntimeGateway};

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Names of containers that were running and got killed.
    pub killed: Vec<String>,
    /// Names of containers confirmed gone afterwards.
    pub removed: Vec<String>,
    /// Kill or remove calls that failed for another reason than "not found".
    pub failures: usize,
}

/// Kill every matching running container, then force-remove every match.
///
/// Only the listing can fail; per-container errors are logged at `warn` and
/// counted in the report.
pub async fn sweep(
    gateway: &dyn RuntimeGateway,
    filter: &ContainerFilter,
) -> Result<SweepReport, GatewayError> {
    let containers = gateway.list_containers(filter).await?;
    let mut report = SweepReport::default();

    for container in containers {
        if container.running {
            match gateway.kill_container(&container.id).await {
                Ok(()) => report.killed.push(container.name.clone()),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(container = %container.name, error = %err, "kill failed");
                }
            }
        }
        // Auto-remove containers are usually gone once killed.
        match gateway.remove_container(&container.id).await {
            Ok(()) => report.removed.push(container.name),
            Err(err) if err.is_not_found() => report.removed.push(container.name),
            Err(err) => {
                report.failures += 1;
                tracing::warn!(container = %container.name, error = %err, "remove failed");
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::{ContainerSpec, GroupId, RegistryAuth, Role};
    use testbed_runtime::MemoryGateway;

    #[tokio::test]
    async fn sweeps_only_matching_containers() {
        let gw = MemoryGateway::new();
        let group = GroupId::from("g");
        for (name, labelled, auto_remove) in [("a", true, true), ("b", true, false), ("c", false, true)] {
            let mut spec = ContainerSpec::new("busybox", "latest");
            spec.name = Some(name.to_string());
            spec.auto_remove = auto_remove;
            if labelled {
                spec.labels = group.labels(Role::Service);
            }
            gw.create_container(&spec, &RegistryAuth::default())
                .await
                .expect("create");
        }

        let report = sweep(&gw, &ContainerFilter::group_members(&group))
            .await
            .expect("sweep");
        assert_eq!(report.killed, vec!["a", "b"]);
        assert_eq!(report.removed, vec!["a", "b"]);
        assert_eq!(report.failures, 0);

        let left: Vec<_> = gw.containers().await.into_iter().map(|c| c.name).collect();
        assert_eq!(left, vec!["c"]);
    }

    #[tokio::test]
    async fn listing_failure_is_returned() {
        let gw = MemoryGateway::new();
        gw.set_unavailable(true).await;
        assert!(sweep(&gw, &ContainerFilter::everything()).await.is_err());
    }
}
