//! Fake — in-memory test double for `ContainerDriver`.
//!
//! Deterministic, no Docker daemon required. Used throughout the compute
//! and VPC unit tests.

use std::collections::HashMap;
use std::pin::Pin;

use tokio::sync::Mutex;

use super::{ContainerDriver, ContainerSpec, ContainerState, DriverError};

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
    networks: Vec<String>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, String>,
    images: Vec<String>,
    next_id: u64,
}

/// A fake container driver for deterministic testing.
pub struct FakeContainerDriver {
    inner: Mutex<Inner>,
}

impl FakeContainerDriver {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Seed an image as already present, skipping the pull-on-demand path.
    pub async fn seed_image(&self, image: &str) {
        self.inner.lock().await.images.push(image.to_string());
    }

    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }

    /// Force a container's observed state, simulating out-of-band drift
    /// (e.g. an operator running `docker stop` directly) for reconciler tests.
    pub async fn force_state(&self, container_id: &str, running: bool) {
        if let Some(c) = self.inner.lock().await.containers.get_mut(container_id) {
            c.running = running;
        }
    }

    pub async fn forget(&self, container_id: &str) {
        self.inner.lock().await.containers.remove(container_id);
    }

    /// Docker network ids a container is currently attached to, for tests
    /// that assert on peering splice/unsplice behavior.
    pub async fn networks_of(&self, container_id: &str) -> Vec<String> {
        self.inner.lock().await.containers.get(container_id).map(|c| c.networks.clone()).unwrap_or_default()
    }
}

impl Default for FakeContainerDriver {
    fn default() -> Self {
        Self::new()
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = Result<T, DriverError>> + Send + 'a>>;

impl ContainerDriver for FakeContainerDriver {
    fn ensure_image<'a>(&'a self, image: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if !state.images.iter().any(|i| i == image) {
                state.images.push(image.to_string());
            }
            Ok(())
        })
    }

    fn list_images(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async { Ok(self.inner.lock().await.images.clone()) })
    }

    fn create_container<'a>(&'a self, spec: &'a ContainerSpec) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.next_id += 1;
            let id = format!("fake-container-{}", state.next_id);
            state.containers.insert(
                id.clone(),
                FakeContainer { spec: spec.clone(), running: false, networks: Vec::new() },
            );
            Ok(id)
        })
    }

    fn start_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(container_id) {
                Some(c) => {
                    c.running = true;
                    Ok(())
                }
                None => Err(DriverError::ContainerNotFound(container_id.to_string())),
            }
        })
    }

    fn stop_container<'a>(&'a self, container_id: &'a str, _timeout_secs: Option<u32>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(container_id) {
                Some(c) => {
                    c.running = false;
                    Ok(())
                }
                None => Err(DriverError::ContainerNotFound(container_id.to_string())),
            }
        })
    }

    fn remove_container<'a>(&'a self, container_id: &'a str, _force: bool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state
                .containers
                .remove(container_id)
                .map(|_| ())
                .ok_or_else(|| DriverError::ContainerNotFound(container_id.to_string()))
        })
    }

    fn inspect_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, ContainerState> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            match state.containers.get(container_id) {
                Some(c) if c.running => Ok(ContainerState::Running),
                Some(_) => Ok(ContainerState::Stopped),
                None => Ok(ContainerState::Gone),
            }
        })
    }

    fn create_network<'a>(&'a self, name: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let id = format!("fake-net-{name}");
            state.networks.insert(id.clone(), name.to_string());
            Ok(id)
        })
    }

    fn remove_network<'a>(&'a self, network_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.inner.lock().await.networks.remove(network_id);
            Ok(())
        })
    }

    fn attach_to_network<'a>(&'a self, container_id: &'a str, network_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(container_id) {
                Some(c) => {
                    if !c.networks.iter().any(|n| n == network_id) {
                        c.networks.push(network_id.to_string());
                    }
                    Ok(())
                }
                None => Err(DriverError::ContainerNotFound(container_id.to_string())),
            }
        })
    }

    fn detach_from_network<'a>(&'a self, container_id: &'a str, network_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(container_id) {
                Some(c) => {
                    c.networks.retain(|n| n != network_id);
                    Ok(())
                }
                None => Err(DriverError::ContainerNotFound(container_id.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "emulator/vm-base:latest".to_string(),
            cpu_shares: None,
            memory_mb: Some(512),
            env: vec![],
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let driver = FakeContainerDriver::new();
        let id = driver.create_container(&spec("vm1")).await.unwrap();
        assert_eq!(driver.inspect_container(&id).await.unwrap(), ContainerState::Stopped);

        driver.start_container(&id).await.unwrap();
        assert_eq!(driver.inspect_container(&id).await.unwrap(), ContainerState::Running);

        driver.stop_container(&id, Some(5)).await.unwrap();
        assert_eq!(driver.inspect_container(&id).await.unwrap(), ContainerState::Stopped);

        driver.remove_container(&id, false).await.unwrap();
        assert_eq!(driver.inspect_container(&id).await.unwrap(), ContainerState::Gone);
    }

    #[tokio::test]
    async fn missing_container_errors() {
        let driver = FakeContainerDriver::new();
        assert!(driver.start_container("nope").await.is_err());
    }

    #[tokio::test]
    async fn network_attach_detach() {
        let driver = FakeContainerDriver::new();
        let id = driver.create_container(&spec("vm1")).await.unwrap();
        let net = driver.create_network("peer-splice").await.unwrap();
        driver.attach_to_network(&id, &net).await.unwrap();
        driver.detach_from_network(&id, &net).await.unwrap();
    }
}
