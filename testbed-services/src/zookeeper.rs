//! Confluent ZooKeeper node.

use testbed_core::{ContainerSpec, PortBinding};

use crate::generic::GenericService;
use crate::runner::ContainerOpts;

pub const ZOOKEEPER_IMAGE: (&str, &str) = ("confluentinc/cp-zookeeper", "7.3.1");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZookeeperOpts {
    pub container_name: String,
    pub network: Option<String>,
    /// Client port, both published and configured inside the node.
    pub port: u16,
}

/// ZooKeeper is only consumed from inside the network (by Kafka), so it
/// has no readiness probe and advertises no external ports.
pub fn zookeeper(opts: ZookeeperOpts) -> GenericService {
    let mut spec = ContainerSpec::new(ZOOKEEPER_IMAGE.0, ZOOKEEPER_IMAGE.1);
    spec.name = Some(opts.container_name.clone());
    spec.network = opts.network;
    spec.ports.push(PortBinding::new(opts.port, 2181));
    spec.env
        .insert("ZOOKEEPER_CLIENT_PORT".to_string(), opts.port.to_string());
    spec.env
        .insert("ZOOKEEPER_TICK_TIME".to_string(), "2000".to_string());

    GenericService::new(opts.container_name, ContainerOpts::new(spec)).with_ports(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::ServiceHandle;

    #[test]
    fn zookeeper_publishes_client_port_but_reports_none() {
        let service = zookeeper(ZookeeperOpts {
            container_name: "zk".to_string(),
            network: None,
            port: 2181,
        });
        let spec = &service.opts().spec;
        assert_eq!(spec.image(), "confluentinc/cp-zookeeper:7.3.1");
        assert_eq!(
            spec.env_list(),
            vec!["ZOOKEEPER_CLIENT_PORT=2181", "ZOOKEEPER_TICK_TIME=2000"]
        );
        assert_eq!(spec.ports, vec![PortBinding::new(2181, 2181)]);
        assert!(service.ports().is_empty());
        assert_eq!(service.opts().probe.describe(), "none");
    }
}
