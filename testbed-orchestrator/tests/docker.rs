//! End-to-end scenarios against a real Docker daemon.
//!
//! Run with `cargo test -p testbed-orchestrator -- --ignored`.

use std::sync::Arc;

use testbed_core::{external_host_from_process, ContainerFilter, RuntimeGateway, ServiceHandle};
use testbed_orchestrator::{Orchestrator, OrchestratorConfig, ProvisioningFailure};
use testbed_runtime::DockerGateway;
use testbed_services::{postgres, zookeeper, PostgresOpts, ZookeeperOpts};

fn pg(name: &str, port: u16, network: Option<&str>) -> Box<dyn ServiceHandle> {
    Box::new(postgres(PostgresOpts {
        container_name: name.to_string(),
        network: network.map(str::to_string),
        db_name: "testbed".to_string(),
        db_user: "testbed".to_string(),
        db_password: "testbed".to_string(),
        external_host: external_host_from_process(None),
        external_port: port,
        internal_port: 5432,
    }))
}

fn zk(name: &str, port: u16) -> Box<dyn ServiceHandle> {
    Box::new(zookeeper(ZookeeperOpts {
        container_name: name.to_string(),
        network: None,
        port,
    }))
}

async fn gateway() -> Arc<DockerGateway> {
    Arc::new(DockerGateway::connect().await.expect("docker daemon"))
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn two_services_start_and_stop() {
    let gw = gateway().await;
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        gw.clone(),
        vec![pg("testbed-it-pg", 25432, None), zk("testbed-it-zk", 22181)],
    );

    orch.start().await.expect("start");
    orch.wait_until_started().await.expect("ready");
    let services = orch.services().await;
    assert_eq!(services[0].hostname.as_deref(), Some("testbed-it-pg"));

    orch.stop().await.expect("stop");
    let left = gw
        .list_containers(&ContainerFilter::group_members(orch.group()))
        .await
        .expect("list");
    assert!(left.is_empty(), "left behind: {left:?}");
    assert!(gw
        .inspect_network(orch.network())
        .await
        .expect("inspect")
        .is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn bogus_network_tears_down_earlier_services() {
    let gw = gateway().await;
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        gw.clone(),
        vec![
            zk("testbed-it-zk-ok", 22182),
            pg("testbed-it-pg-bad", 25433, Some("testbed-no-such-network")),
        ],
    );

    let err = orch.start().await.expect_err("bogus network");
    assert!(err.is_setup_aborted());
    assert!(matches!(
        err.root_cause(),
        Some(ProvisioningFailure::ServiceStart { service, .. }) if service == "testbed-it-pg-bad"
    ));
    assert!(orch
        .wait_until_started()
        .await
        .expect_err("failed")
        .is_setup_aborted());

    let left = gw
        .list_containers(&ContainerFilter::group_members(orch.group()))
        .await
        .expect("list");
    assert!(left.is_empty(), "left behind: {left:?}");
    assert!(gw
        .inspect_network(orch.network())
        .await
        .expect("inspect")
        .is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn concurrent_groups_keep_their_ports_apart() {
    let gw = gateway().await;
    let one = Orchestrator::new(
        OrchestratorConfig::default(),
        gw.clone(),
        vec![pg("testbed-it-pg-one", 25434, None)],
    );
    let two = Orchestrator::new(
        OrchestratorConfig::default(),
        gw.clone(),
        vec![pg("testbed-it-pg-two", 25435, None)],
    );

    let (a, b) = tokio::join!(one.start(), two.start());
    a.expect("one");
    b.expect("two");
    let (a, b) = tokio::join!(one.wait_until_started(), two.wait_until_started());
    a.expect("one ready");
    b.expect("two ready");
    assert_eq!(one.services().await[0].ports, vec![25434]);
    assert_eq!(two.services().await[0].ports, vec![25435]);

    let (a, b) = tokio::join!(one.stop(), two.stop());
    a.expect("stop one");
    b.expect("stop two");
}
