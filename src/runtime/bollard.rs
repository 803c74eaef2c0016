// ABOUTME: Bollard-based container runtime implementation.
// ABOUTME: Docker-compatible API; maps server status codes onto the contract's categories.

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::error::RuntimeError;
use super::traits::{ContainerOps, ImageOps};
use super::types::{ContainerDetails, ContainerSummary, CreateSpec, LogOptions, PublishedPort};
use crate::types::{ContainerId, ImageRef};

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_create_error(e: bollard::errors::Error) -> RuntimeError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => RuntimeError::ImageNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 500 && message.contains("port is already allocated") => {
            RuntimeError::PortAllocated(message.clone())
        }
        _ => RuntimeError::Other(e.to_string()),
    }
}

fn map_start_error(e: bollard::errors::Error) -> Result<(), RuntimeError> {
    match &e {
        // 304: already in the requested state. Idempotent success.
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        } => Ok(()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => Err(RuntimeError::NotFound(message.clone())),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 500 && message.contains("port is already allocated") => {
            Err(RuntimeError::PortAllocated(message.clone()))
        }
        _ => Err(RuntimeError::Other(e.to_string())),
    }
}

fn map_stop_error(e: bollard::errors::Error) -> Result<(), RuntimeError> {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        } => Ok(()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => Err(RuntimeError::NotFound(message.clone())),
        _ => Err(RuntimeError::Other(e.to_string())),
    }
}

fn map_not_found_error(e: bollard::errors::Error) -> RuntimeError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => RuntimeError::NotFound(message.clone()),
        _ => RuntimeError::Other(e.to_string()),
    }
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Container runtime implementation using bollard.
pub struct BollardRuntime {
    client: Docker,
}

impl BollardRuntime {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Connect to the runtime over a unix socket.
    pub fn connect(socket_path: &str) -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_unix(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| RuntimeError::Other(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Connect using the platform's default socket discovery.
    pub fn connect_local() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Other(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, RuntimeError> {
        match self.client.inspect_image(reference.as_str()).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::Other(format!(
                "failed to inspect {}: {}",
                reference, e
            ))),
        }
    }

    async fn pull_image(&self, reference: &ImageRef) -> Result<(), RuntimeError> {
        let image_name = reference.with_default_tag();
        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };

        // Pull returns a stream of progress updates - consume it.
        let mut stream = self.client.create_image(Some(opts), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| RuntimeError::PullFailed(format!("{}: {}", image_name, e)))?;
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let opts = ListContainersOptions {
            all,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(|e| RuntimeError::Other(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: ContainerId::new(c.id.unwrap_or_default()),
                names: c.names.unwrap_or_default(),
                state: c
                    .state
                    .map(|s| format!("{:?}", s).to_lowercase())
                    .unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PublishedPort {
                        private_port: p.private_port,
                        public_port: p.public_port,
                        protocol: p
                            .typ
                            .map(|t| format!("{:?}", t).to_lowercase())
                            .unwrap_or_else(|| "tcp".to_string()),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_container(&self, spec: &CreateSpec) -> Result<ContainerId, RuntimeError> {
        let port_key = format!("{}/tcp", spec.container_port);

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mounts: Vec<Mount> = spec
            .binds
            .iter()
            .filter_map(|b| {
                let mut parts = b.splitn(3, ':');
                let source = parts.next()?;
                let target = parts.next()?;
                let read_only = parts.next() == Some("ro");
                Some(Mount {
                    source: Some(source.to_string()),
                    target: Some(target.to_string()),
                    typ: Some(MountTypeEnum::BIND),
                    read_only: Some(read_only),
                    ..Default::default()
                })
            })
            .collect();

        let host_config = HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(spec.max_restarts as i64),
            }),
            memory: (spec.memory_bytes > 0).then_some(spec.memory_bytes as i64),
            nano_cpus: (spec.nano_cpus > 0).then_some(spec.nano_cpus as i64),
            port_bindings: Some(port_bindings),
            mounts: (!mounts.is_empty()).then_some(mounts),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.with_default_tag()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            user: spec.user.clone(),
            host_config: Some(host_config),
            exposed_ports: Some(vec![port_key]),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(map_create_error)?;

        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        match self
            .client
            .start_container(
                id.as_str(),
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => map_start_error(e),
        }
    }

    async fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<(), RuntimeError> {
        let opts = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };

        match self.client.stop_container(id.as_str(), Some(opts)).await {
            Ok(()) => Ok(()),
            Err(e) => map_stop_error(e),
        }
    }

    async fn restart_container(
        &self,
        id: &ContainerId,
        grace: Duration,
    ) -> Result<(), RuntimeError> {
        let opts = RestartContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };

        self.client
            .restart_container(id.as_str(), Some(opts))
            .await
            .map_err(map_not_found_error)
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), RuntimeError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_not_found_error)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_not_found_error)?;

        let state = details.state.as_ref();
        Ok(ContainerDetails {
            id: id.clone(),
            name: details
                .name
                .clone()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            running: state.and_then(|s| s.running).unwrap_or(false),
            exit_code: state.and_then(|s| s.exit_code),
        })
    }

    async fn container_logs(
        &self,
        id: &ContainerId,
        options: LogOptions,
    ) -> Result<String, RuntimeError> {
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: options.timestamps,
            tail: options
                .tail
                .map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };

        let mut stream = self.client.logs(id.as_str(), Some(opts));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let line = chunk.map_err(map_not_found_error)?;
            text.push_str(&String::from_utf8_lossy(&line.into_bytes()));
        }

        Ok(text)
    }
}
