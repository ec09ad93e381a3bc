use testbed_core::{
    ContainerFilter, ContainerSpec, ExecOutput, GatewayError, GroupId, Labels, PortBinding,
    RegistryAuth, Role, RuntimeGateway,
};
use testbed_runtime::{Call, MemoryGateway};

fn spec(name: &str, network: Option<&str>) -> ContainerSpec {
    let mut spec = ContainerSpec::new("busybox", "latest");
    spec.name = Some(name.to_string());
    spec.network = network.map(str::to_string);
    spec
}

#[tokio::test]
async fn containers_require_an_existing_network() {
    let gw = MemoryGateway::new();
    let err = gw
        .create_container(&spec("a", Some("missing")), &RegistryAuth::default())
        .await
        .expect_err("unknown network must fail");
    assert!(err.is_not_found());

    gw.create_network("net", &Labels::new()).await.expect("network");
    let created = gw
        .create_container(&spec("a", Some("net")), &RegistryAuth::default())
        .await
        .expect("container");
    assert!(created.running);
    assert_eq!(gw.network_of("a").await.as_deref(), Some("net"));
}

#[tokio::test]
async fn duplicate_names_and_ports_conflict() {
    let gw = MemoryGateway::new();
    let mut first = spec("a", None);
    first.ports.push(PortBinding::new(15432, 5432));
    gw.create_container(&first, &RegistryAuth::default())
        .await
        .expect("first");

    let err = gw
        .create_container(&spec("a", None), &RegistryAuth::default())
        .await
        .expect_err("duplicate name");
    assert!(matches!(err, GatewayError::Conflict { .. }));

    let mut second = spec("b", None);
    second.ports.push(PortBinding::new(15432, 5432));
    let err = gw
        .create_container(&second, &RegistryAuth::default())
        .await
        .expect_err("port clash");
    assert!(err.to_string().contains("port is already allocated"));
}

#[tokio::test]
async fn kill_removes_auto_remove_containers() {
    let gw = MemoryGateway::new();
    let auto = gw
        .create_container(&spec("auto", None), &RegistryAuth::default())
        .await
        .expect("auto");
    let mut keep_spec = spec("keep", None);
    keep_spec.auto_remove = false;
    let keep = gw
        .create_container(&keep_spec, &RegistryAuth::default())
        .await
        .expect("keep");

    gw.kill_container(&auto.id).await.expect("kill auto");
    gw.kill_container(&keep.id).await.expect("kill keep");

    let remaining = gw.containers().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "keep");
    assert!(!remaining[0].running);
}

#[tokio::test]
async fn list_applies_label_filters() {
    let gw = MemoryGateway::new();
    let group = GroupId::from("g1");
    let mut service = spec("svc", None);
    service.labels = group.labels(Role::Service);
    let mut helper = spec("helper", None);
    helper.labels = group.labels(Role::Helper);
    gw.create_container(&service, &RegistryAuth::default())
        .await
        .expect("service");
    gw.create_container(&helper, &RegistryAuth::default())
        .await
        .expect("helper");
    gw.create_container(&spec("stranger", None), &RegistryAuth::default())
        .await
        .expect("stranger");

    let services = gw
        .list_containers(&ContainerFilter::group_services(&group))
        .await
        .expect("list");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].name, "svc");

    let members = gw
        .list_containers(&ContainerFilter::group_members(&group))
        .await
        .expect("list");
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn network_removal_refuses_attached_containers() {
    let gw = MemoryGateway::new();
    gw.create_network("net", &Labels::new()).await.expect("network");
    let c = gw
        .create_container(&spec("a", Some("net")), &RegistryAuth::default())
        .await
        .expect("container");

    assert!(gw.remove_network("net").await.is_err());
    gw.remove_container(&c.id).await.expect("remove");
    gw.remove_network("net").await.expect("network removal");
    assert!(gw.inspect_network("net").await.expect("inspect").is_none());
}

#[tokio::test]
async fn transient_network_removal_failures_are_counted_down() {
    let gw = MemoryGateway::new();
    gw.create_network("net", &Labels::new()).await.expect("network");
    gw.fail_network_removals(2).await;

    assert!(gw.remove_network("net").await.is_err());
    assert!(gw.remove_network("net").await.is_err());
    gw.remove_network("net").await.expect("third attempt");
}

#[tokio::test]
async fn injected_failures_and_scripted_results() {
    let gw = MemoryGateway::new();
    gw.fail_create("broken:1").await;
    let err = gw
        .create_container(&ContainerSpec::new("broken", "1"), &RegistryAuth::default())
        .await
        .expect_err("injected");
    assert!(err.to_string().contains("simulated failure"));

    let c = gw
        .create_container(&spec("db", None), &RegistryAuth::default())
        .await
        .expect("db");
    gw.push_exec_result(
        "db",
        ExecOutput {
            exit_code: 2,
            ..Default::default()
        },
    )
    .await;
    gw.push_exec_result("db", ExecOutput::default()).await;
    let cmd = vec!["pg_isready".to_string()];
    assert_eq!(gw.exec(&c.id, &cmd).await.expect("exec").exit_code, 2);
    assert!(gw.exec(&c.id, &cmd).await.expect("exec").success());
    assert!(gw.exec(&c.id, &cmd).await.expect("exec").success());

    gw.set_exit_code("db", 3).await;
    assert_eq!(gw.wait_container(&c.id).await.expect("wait"), 3);

    let calls = gw.calls().await;
    assert_eq!(calls.first(), Some(&Call::CreateContainer("broken:1".into())));
    assert_eq!(calls.last(), Some(&Call::WaitContainer(c.id.clone())));
}

#[tokio::test]
async fn unavailable_runtime_fails_every_call() {
    let gw = MemoryGateway::new();
    gw.set_unavailable(true).await;
    assert!(matches!(gw.ping().await, Err(GatewayError::Unavailable(_))));
    assert!(gw.list_containers(&ContainerFilter::everything()).await.is_err());
}
