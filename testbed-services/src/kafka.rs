//! Confluent Kafka broker with optional topic initialisation.
//!
//! The broker exposes three listeners:
//!
//! | listener           | bound on                   | advertised as                     |
//! |--------------------|----------------------------|-----------------------------------|
//! | `PLAINTEXT`        | `:9092` (published)        | `<external host>:<external port>` |
//! | `PLAINTEXT_DOCKER` | `:<container name port>`   | `<container name>:<same port>`    |
//! | `INTERNAL`         | `:<random 29000..29100>`   | `<container name>:<same port>`    |
//!
//! Topics are created by a one-shot helper container that talks to the
//! `INTERNAL` listener from inside the network.

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use testbed_core::{
    ContainerSpec, Labels, PortBinding, Role, ServiceError, ServiceHandle, StartContext,
    ROLE_LABEL,
};

use crate::generic::GenericService;
use crate::probe::TcpProbe;
use crate::runner::{run_container, ContainerOpts};

pub const KAFKA_IMAGE: (&str, &str) = ("confluentinc/cp-kafka", "7.2.1");

/// Port the `PLAINTEXT` listener binds inside the container.
const PLAINTEXT_PORT: u16 = 9092;

/// Range the `INTERNAL` listener port is drawn from.
const INTERNAL_PORTS: std::ops::Range<u16> = 29000..29100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaOpts {
    /// Also the broker's hostname inside the network.
    pub container_name: String,
    /// Port of the `PLAINTEXT_DOCKER` listener.
    pub container_name_port: u16,
    pub external_host: String,
    pub external_port: u16,
    /// `host:port` of a ZooKeeper node, if any.
    pub zookeeper: Option<(String, u16)>,
    pub network: Option<String>,
    pub topics: Vec<String>,
}

#[derive(Debug)]
pub struct Kafka {
    broker: GenericService,
    topics: Vec<String>,
    internal_port: u16,
    network: Option<String>,
}

impl Kafka {
    pub fn new(opts: KafkaOpts) -> Self {
        let internal_port = rand::thread_rng().gen_range(INTERNAL_PORTS);
        Self::with_internal_port(opts, internal_port)
    }

    /// Like [`Kafka::new`] with a fixed `INTERNAL` listener port.
    pub fn with_internal_port(opts: KafkaOpts, internal_port: u16) -> Self {
        let name = &opts.container_name;
        let mut spec = ContainerSpec::new(KAFKA_IMAGE.0, KAFKA_IMAGE.1);
        spec.name = Some(name.clone());
        spec.network = opts.network.clone();
        spec.ports
            .push(PortBinding::new(opts.external_port, PLAINTEXT_PORT));

        let mut env = vec![
            (
                "KAFKA_LISTENER_SECURITY_PROTOCOL_MAP",
                "PLAINTEXT:PLAINTEXT,PLAINTEXT_DOCKER:PLAINTEXT,INTERNAL:PLAINTEXT".to_string(),
            ),
            (
                "KAFKA_LISTENERS",
                format!(
                    "PLAINTEXT://:{PLAINTEXT_PORT},PLAINTEXT_DOCKER://:{},INTERNAL://:{internal_port}",
                    opts.container_name_port
                ),
            ),
            (
                "KAFKA_ADVERTISED_LISTENERS",
                format!(
                    "PLAINTEXT://{}:{},PLAINTEXT_DOCKER://{name}:{},INTERNAL://{name}:{internal_port}",
                    opts.external_host, opts.external_port, opts.container_name_port
                ),
            ),
            ("KAFKA_INTER_BROKER_LISTENER_NAME", "INTERNAL".to_string()),
            ("KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR", "1".to_string()),
            ("KAFKA_TRANSACTION_STATE_LOG_MIN_ISR", "1".to_string()),
            ("KAFKA_TRANSACTION_STATE_LOG_REPLICATION_FACTOR", "1".to_string()),
        ];
        if let Some((host, port)) = &opts.zookeeper {
            env.push(("KAFKA_ZOOKEEPER_CONNECT", format!("{host}:{port}")));
        }
        spec.env = env
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let probe = TcpProbe::new(opts.external_host.clone(), opts.external_port);
        let broker = GenericService::new(name.clone(), ContainerOpts::new(spec).with_probe(probe));
        Self {
            broker,
            topics: opts.topics,
            internal_port,
            network: opts.network,
        }
    }

    pub fn internal_port(&self) -> u16 {
        self.internal_port
    }

    pub fn broker(&self) -> &GenericService {
        &self.broker
    }

    /// Shell command creating every configured topic through `bootstrap`.
    pub fn topic_command(&self, bootstrap: &str) -> String {
        let mut command = format!("kafka-topics --bootstrap-server {bootstrap} --list");
        for topic in &self.topics {
            command.push_str(&format!(
                " && kafka-topics --bootstrap-server {bootstrap} --create --if-not-exists \
                 --topic {topic} --replication-factor 1 --partitions 1"
            ));
        }
        command
    }

    /// Spec of the helper container that creates the topics.
    fn topic_helper(&self, bootstrap: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new(KAFKA_IMAGE.0, KAFKA_IMAGE.1);
        spec.network = self.network.clone();
        spec.entrypoint = Some(vec!["/bin/sh".to_string(), "-c".to_string()]);
        spec.cmd = Some(vec![self.topic_command(bootstrap)]);
        let mut labels = self.broker.opts().spec.labels.clone();
        labels.insert(ROLE_LABEL.to_string(), Role::Helper.to_string());
        spec.labels = labels;
        // Kept after exit so the exit code can be collected.
        spec.auto_remove = false;
        spec
    }

    async fn init_topics(&self, ctx: &StartContext, broker_host: &str) -> Result<(), ServiceError> {
        let bootstrap = format!("{broker_host}:{}", self.internal_port);
        let opts = ContainerOpts::new(self.topic_helper(&bootstrap));
        let helper = run_container(ctx, &opts).await?;
        let name = helper.hostname.clone();
        info!(service = %self.broker.name(), helper = %name, topics = ?self.topics, "initialising topics");

        let waited = helper.wait().await;
        if let Err(err) = helper.remove().await {
            warn!(helper = %name, error = %err, "failed to remove topic helper");
        }
        match waited? {
            0 => Ok(()),
            code => Err(ServiceError::HelperFailed { name, code }),
        }
    }
}

#[async_trait]
impl ServiceHandle for Kafka {
    fn name(&self) -> &str {
        self.broker.name()
    }

    fn hostname(&self) -> Option<&str> {
        self.broker.hostname()
    }

    fn ports(&self) -> Vec<u16> {
        self.broker.ports()
    }

    fn attach_labels(&mut self, labels: &Labels) {
        self.broker.attach_labels(labels);
    }

    async fn start(&mut self, ctx: &StartContext) -> Result<(), ServiceError> {
        self.broker.start(ctx).await?;
        if self.topics.is_empty() {
            return Ok(());
        }
        let host = self
            .broker
            .hostname()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::not_started(self.broker.name()))?;
        self.init_topics(ctx, &host).await
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        self.broker.stop().await
    }

    fn release(&mut self) {
        self.broker.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(topics: &[&str]) -> KafkaOpts {
        KafkaOpts {
            container_name: "kafka".to_string(),
            container_name_port: 29092,
            external_host: "docker".to_string(),
            external_port: 19092,
            zookeeper: Some(("zk".to_string(), 2181)),
            network: None,
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn listeners_are_advertised_per_audience() {
        let kafka = Kafka::with_internal_port(opts(&[]), 29042);
        let env = &kafka.broker().opts().spec.env;
        assert_eq!(
            env.get("KAFKA_LISTENERS").map(String::as_str),
            Some("PLAINTEXT://:9092,PLAINTEXT_DOCKER://:29092,INTERNAL://:29042")
        );
        assert_eq!(
            env.get("KAFKA_ADVERTISED_LISTENERS").map(String::as_str),
            Some("PLAINTEXT://docker:19092,PLAINTEXT_DOCKER://kafka:29092,INTERNAL://kafka:29042")
        );
        assert_eq!(
            env.get("KAFKA_ZOOKEEPER_CONNECT").map(String::as_str),
            Some("zk:2181")
        );
        assert_eq!(
            kafka.broker().opts().spec.ports,
            vec![PortBinding::new(19092, 9092)]
        );
        assert_eq!(kafka.ports(), vec![19092]);
    }

    #[test]
    fn internal_port_is_drawn_from_range() {
        for _ in 0..20 {
            let port = Kafka::new(opts(&[])).internal_port();
            assert!(INTERNAL_PORTS.contains(&port), "port {port} out of range");
        }
    }

    #[test]
    fn topic_command_lists_then_creates_each_topic() {
        let kafka = Kafka::with_internal_port(opts(&["orders", "events"]), 29001);
        assert_eq!(
            kafka.topic_command("kafka:29001"),
            "kafka-topics --bootstrap-server kafka:29001 --list \
             && kafka-topics --bootstrap-server kafka:29001 --create --if-not-exists --topic orders --replication-factor 1 --partitions 1 \
             && kafka-topics --bootstrap-server kafka:29001 --create --if-not-exists --topic events --replication-factor 1 --partitions 1"
        );
    }

    #[test]
    fn helper_is_labelled_as_helper() {
        let mut kafka = Kafka::with_internal_port(opts(&["orders"]), 29001);
        let group = testbed_core::GroupId::from("g");
        kafka.attach_labels(&group.labels(Role::Service));
        let helper = kafka.topic_helper("kafka:29001");
        assert_eq!(
            helper.labels.get(ROLE_LABEL).map(String::as_str),
            Some("helper")
        );
        assert_eq!(
            helper.labels.get(testbed_core::GROUP_LABEL).map(String::as_str),
            Some("g")
        );
        assert!(!helper.auto_remove);
        assert_eq!(
            helper.entrypoint,
            Some(vec!["/bin/sh".to_string(), "-c".to_string()])
        );
    }
}
