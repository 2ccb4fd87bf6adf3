use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;

use async_trait::async_trait;
use futures_util::StreamExt;
use svcboot_models::{BootstrapError, Config as AppConfig};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Everything needed to start one service container. Env is fixed at
/// creation and immutable for the container's lifetime.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    /// Container port the server binds; published to the same host port.
    pub port: u16,
}

impl LaunchSpec {
    /// Spec for one service container; env and port come straight from
    /// the recipe.
    pub fn for_service(
        service: &str,
        image: &str,
        env: Vec<(String, String)>,
        port: u16,
    ) -> Self {
        Self {
            image: image.to_string(),
            name: format!("svcboot-{}-{}", service, uuid::Uuid::new_v4()),
            env,
            port,
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn create(&self, spec: LaunchSpec) -> anyhow::Result<String>; // returns container_id
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()>;
}

/// Best-effort teardown: stop with a grace period, then force-remove. A
/// failed stop (already-exited container, for instance) is logged and the
/// removal still happens; only a failed remove is an error.
pub async fn teardown<R: ContainerRuntime>(
    runtime: &R,
    container_id: &str,
) -> Result<(), BootstrapError> {
    if let Err(e) = runtime.stop(container_id, 10).await {
        warn!(
            container_id = %container_id,
            error = %e,
            "Stop failed; removing container anyway"
        );
    }
    runtime.remove(container_id, true).await.map_err(docker_err)?;
    info!(container_id = %container_id, "Removed service container");
    Ok(())
}

pub struct Launcher {
    docker: Docker,
    _config: AppConfig,
}

impl Launcher {
    pub async fn new(config: AppConfig) -> Result<Self, BootstrapError> {
        let docker = if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            if docker_host.starts_with("tcp://") {
                Docker::connect_with_http(&docker_host, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| BootstrapError::DockerError {
                        message: format!("Failed to connect to Docker at {docker_host}: {e}"),
                    })?
            } else {
                Docker::connect_with_socket_defaults().map_err(|e| BootstrapError::DockerError {
                    message: e.to_string(),
                })?
            }
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| BootstrapError::DockerError {
                message: e.to_string(),
            })?
        };

        Ok(Self {
            docker,
            _config: config,
        })
    }

    /// Creates and starts the service container. The launch replaces the
    /// container's initial process and runs until external termination.
    #[instrument(skip(self, spec))]
    pub async fn launch(&self, spec: LaunchSpec) -> Result<String, BootstrapError> {
        let container_id = self.create(spec.clone()).await.map_err(docker_err)?;
        self.start(&container_id).await.map_err(docker_err)?;
        info!(
            container_id = %container_id,
            image = %spec.image,
            port = spec.port,
            "Launched service container"
        );
        Ok(container_id)
    }

    #[instrument(skip(self))]
    pub async fn teardown(&self, container_id: &str) -> Result<(), BootstrapError> {
        teardown(self, container_id).await
    }

    pub async fn container_logs(&self, container_id: &str) -> Result<String, BootstrapError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut logs = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| BootstrapError::DockerError {
                message: e.to_string(),
            })? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    logs.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(logs)
    }
}

fn docker_err(e: anyhow::Error) -> BootstrapError {
    BootstrapError::DockerError {
        message: e.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for Launcher {
    async fn create(&self, spec: LaunchSpec) -> anyhow::Result<String> {
        let port_key = format!("{}/tcp", spec.port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.port.to_string()),
            }]),
        );

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker.stop_container(container_id, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }
}
