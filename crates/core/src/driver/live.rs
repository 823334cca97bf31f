//! Live — Bollard-backed `ContainerDriver`, the real container runtime.

use std::pin::Pin;

use bollard::Docker;
use futures_util::stream::StreamExt;

use super::{ContainerDriver, ContainerSpec, ContainerState, DriverError};

#[derive(Debug, Clone)]
pub struct DockerDriver {
    client: Docker,
}

impl DockerDriver {
    pub fn connect(docker_host: &str) -> Result<Self, DriverError> {
        let client = if docker_host.is_empty() {
            Docker::connect_with_defaults()
                .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?
        } else {
            let clean_path = docker_host.trim_start_matches("unix://");
            Docker::connect_with_socket(clean_path, 120, &bollard::API_DEFAULT_VERSION)
                .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?
        };
        Ok(Self { client })
    }

    fn map_404(container_id: &str) -> impl Fn(bollard::errors::Error) -> DriverError + '_ {
        move |e| match e {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                DriverError::ContainerNotFound(container_id.to_string())
            }
            other => DriverError::BollardError(other),
        }
    }
}

impl ContainerDriver for DockerDriver {
    fn ensure_image<'a>(
        &'a self,
        image: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::{CreateImageOptions, InspectImageOptions};

            if self
                .client
                .inspect_image(image, None::<InspectImageOptions>)
                .await
                .is_ok()
            {
                return Ok(());
            }

            let options = Some(CreateImageOptions {
                from_image: Some(image.to_string()),
                ..Default::default()
            });

            let mut stream = self.client.create_image(options, None, None);
            while let Some(result) = stream.next().await {
                if let Err(e) = result {
                    return Err(DriverError::BollardError(e));
                }
            }
            Ok(())
        })
    }

    fn list_images(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, DriverError>> + Send + '_>> {
        Box::pin(async {
            use bollard::query_parameters::ListImagesOptions;

            let images = self
                .client
                .list_images(Some(ListImagesOptions { all: false, ..Default::default() }))
                .await?;
            Ok(images.into_iter().flat_map(|i| i.repo_tags).collect())
        })
    }

    fn create_container<'a>(
        &'a self,
        spec: &'a ContainerSpec,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::models::{ContainerCreateBody, HostConfig};
            use bollard::query_parameters::CreateContainerOptions;

            let host_config = HostConfig {
                memory: spec.memory_mb.map(|mb| mb * 1024 * 1024),
                cpu_shares: spec.cpu_shares,
                ..Default::default()
            };

            let body = ContainerCreateBody {
                image: Some(spec.image.clone()),
                env: Some(spec.env.clone()),
                labels: Some(spec.labels.clone()),
                host_config: Some(host_config),
                ..Default::default()
            };

            let options = Some(CreateContainerOptions {
                name: Some(spec.name.clone()),
                ..Default::default()
            });

            let response = self
                .client
                .create_container(options, body)
                .await
                .map_err(DriverError::from)?;

            Ok(response.id)
        })
    }

    fn start_container<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            self.client
                .start_container(container_id, None)
                .await
                .map_err(Self::map_404(container_id))
        })
    }

    fn stop_container<'a>(
        &'a self,
        container_id: &'a str,
        timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::StopContainerOptions;

            let options = timeout_secs.map(|t| StopContainerOptions {
                t: Some(t as i32),
                ..Default::default()
            });

            self.client
                .stop_container(container_id, options)
                .await
                .map_err(Self::map_404(container_id))
        })
    }

    fn remove_container<'a>(
        &'a self,
        container_id: &'a str,
        force: bool,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::query_parameters::RemoveContainerOptions;

            self.client
                .remove_container(container_id, Some(RemoveContainerOptions { force, ..Default::default() }))
                .await
                .map_err(Self::map_404(container_id))
        })
    }

    fn inspect_container<'a>(
        &'a self,
        container_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerState, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            match self.client.inspect_container(container_id, None).await {
                Ok(details) => {
                    let running = details
                        .state
                        .as_ref()
                        .and_then(|s| s.status.as_ref())
                        .map(|s| matches!(s, bollard::models::ContainerStateStatusEnum::RUNNING))
                        .unwrap_or(false);
                    Ok(if running { ContainerState::Running } else { ContainerState::Stopped })
                }
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                    Ok(ContainerState::Gone)
                }
                Err(other) => Err(DriverError::BollardError(other)),
            }
        })
    }

    fn create_network<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::models::NetworkCreateRequest;

            let request = NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            };

            let response = self.client.create_network(request).await?;
            Ok(response.id)
        })
    }

    fn remove_network<'a>(
        &'a self,
        network_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move { self.client.remove_network(network_id).await.map_err(DriverError::from) })
    }

    fn attach_to_network<'a>(
        &'a self,
        container_id: &'a str,
        network_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::models::NetworkConnectRequest;

            let request = NetworkConnectRequest { container: container_id.to_string(), ..Default::default() };
            self.client
                .connect_network(network_id, request)
                .await
                .map_err(DriverError::from)
        })
    }

    fn detach_from_network<'a>(
        &'a self,
        container_id: &'a str,
        network_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + 'a>> {
        Box::pin(async move {
            use bollard::models::NetworkDisconnectRequest;

            let request = NetworkDisconnectRequest {
                container: container_id.to_string(),
                force: Some(false),
            };
            self.client
                .disconnect_network(network_id, request)
                .await
                .map_err(DriverError::from)
        })
    }
}
