//! [`RuntimeGateway`] backed by the Docker Engine API (via bollard).

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use testbed_core::{
    ContainerFilter, ContainerRef, ContainerSpec, ExecOutput, GatewayError, Labels, NetworkHandle,
    RegistryAuth, RetryPolicy, RuntimeGateway,
};

/// Docker daemon reached through the local socket (or `DOCKER_HOST`).
#[derive(Debug, Clone)]
pub struct DockerGateway {
    docker: Docker,
    retry: RetryPolicy,
}

impl DockerGateway {
    /// Connect with bollard's local defaults and verify the daemon answers.
    pub async fn connect() -> Result<Self, GatewayError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let gateway = Self::with_client(docker);
        gateway.ping().await?;
        info!("connected to Docker daemon");
        Ok(gateway)
    }

    /// Wrap an already configured client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn ensure_image(&self, image: &str, auth: &RegistryAuth) -> Result<(), GatewayError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(err) if is_status(&err, 404) => {}
            Err(err) => return Err(map_err("inspect_image", "image", image, err)),
        }

        info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let credentials = (!auth.is_anonymous()).then(|| credentials(auth));
        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image, status = %status, "pull progress");
                    }
                }
                Err(err) => return Err(map_err("pull_image", "image", image, err)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeGateway for DockerGateway {
    async fn ping(&self) -> Result<(), GatewayError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &Labels,
    ) -> Result<NetworkHandle, GatewayError> {
        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let options = CreateNetworkOptions {
            name,
            check_duplicate: true,
            driver: "bridge",
            labels,
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| map_err("create_network", "network", name, e))?;
        let id = network_id(response.id).ok_or_else(|| {
            GatewayError::api(
                "create_network",
                format!("no id returned for network {name}"),
            )
        })?;
        info!(network = name, id = %id, "created network");
        Ok(NetworkHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, name_or_id: &str) -> Result<(), GatewayError> {
        self.docker
            .remove_network(name_or_id)
            .await
            .map_err(|e| map_err("remove_network", "network", name_or_id, e))?;
        info!(network = name_or_id, "removed network");
        Ok(())
    }

    async fn inspect_network(
        &self,
        name_or_id: &str,
    ) -> Result<Option<NetworkHandle>, GatewayError> {
        match self
            .docker
            .inspect_network(name_or_id, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(Some(NetworkHandle {
                id: network.id.unwrap_or_default(),
                name: network.name.unwrap_or_else(|| name_or_id.to_string()),
            })),
            Err(err) if is_status(&err, 404) => Ok(None),
            Err(err) => Err(map_err("inspect_network", "network", name_or_id, err)),
        }
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        auth: &RegistryAuth,
    ) -> Result<ContainerRef, GatewayError> {
        let image = spec.image();
        self.ensure_image(&image, auth).await?;

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p.container_port), HashMap::new()))
            .collect();
        let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                let binding = bollard::models::PortBinding {
                    host_ip: None,
                    host_port: Some(p.host_port.to_string()),
                };
                (format!("{}/tcp", p.container_port), Some(vec![binding]))
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: spec.network.clone(),
            auto_remove: Some(spec.auto_remove),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.clone()),
            env: Some(spec.env_list()),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            labels: Some(spec.labels.clone().into_iter().collect()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = spec.name.as_deref().map(|name| CreateContainerOptions {
            name,
            platform: None,
        });
        let label = spec.name.clone().unwrap_or_else(|| image.clone());
        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| map_err("create_container", "container", &label, e))?;

        if let Err(err) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A created-but-never-started container is not auto-removed.
            if let Err(cleanup) = self.remove_container(&response.id).await {
                warn!(container = %label, error = %cleanup, "could not remove unstarted container");
            }
            return Err(map_err("start_container", "container", &label, err));
        }

        let name = match self.docker.inspect_container(&response.id, None).await {
            Ok(inspect) => inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| label.clone()),
            Err(_) => label.clone(),
        };
        info!(container = %name, id = %response.id, image = %image, "started container");

        Ok(ContainerRef {
            id: response.id,
            name,
            labels: spec.labels.clone(),
            running: true,
        })
    }

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRef>, GatewayError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        let labels = filter.label_predicates();
        if !labels.is_empty() {
            filters.insert("label".to_string(), labels);
        }
        let options = ListContainersOptions {
            all: filter.include_stopped,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_err("list_containers", "container", "*", e))?;

        Ok(summaries
            .into_iter()
            .map(|summary| ContainerRef {
                id: summary.id.unwrap_or_default(),
                name: summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                labels: summary.labels.unwrap_or_default().into_iter().collect(),
                running: summary.state.as_deref() == Some("running"),
            })
            .collect())
    }

    async fn kill_container(&self, id: &str) -> Result<(), GatewayError> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| map_err("kill_container", "container", id, e))
    }

    async fn remove_container(&self, id: &str) -> Result<(), GatewayError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_err("remove_container", "container", id, e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, GatewayError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        let mut code = 0;
        while let Some(next) = stream.next().await {
            match next {
                Ok(response) => code = response.status_code,
                // bollard reports non-zero exits as an error carrying the code.
                Err(bollard::errors::Error::DockerContainerWaitError { code: exit, .. }) => {
                    code = exit
                }
                Err(err) => return Err(map_err("wait_container", "container", id, err)),
            }
        }
        Ok(code)
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, GatewayError> {
        debug!(container = id, cmd = ?cmd, "executing command");
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| map_err("create_exec", "container", id, e))?;
        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err("start_exec", "container", id, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(err) => return Err(map_err("exec", "container", id, err)),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_err("inspect_exec", "container", id, e))?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

/// Docker leaves the id out (or empty) when network creation misbehaves.
fn network_id(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.is_empty())
}

fn credentials(auth: &RegistryAuth) -> DockerCredentials {
    DockerCredentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
        email: auth.email.clone(),
        serveraddress: auth.server_address.clone(),
        ..Default::default()
    }
}

fn is_status(err: &bollard::errors::Error, status: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

fn map_err(
    operation: &'static str,
    kind: &'static str,
    name: &str,
    err: bollard::errors::Error,
) -> GatewayError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => GatewayError::not_found(kind, name),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } if message.contains("already") => GatewayError::conflict(kind, name),
        other => GatewayError::api(operation, other.to_string()),
    }
}
