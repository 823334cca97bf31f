//! Driver — abstract interface over the container runtime backing compute
//! instances, plus the network-fabric operations VPC peering needs.
//!
//! `live` provides the real Bollard-backed implementation; `fake` provides
//! an in-memory test double. Every method returns a boxed future so the
//! trait stays object-safe and implementations can live behind `Arc<dyn
//! ContainerDriver>`.

pub mod live;
pub mod fake;

use std::collections::HashMap;
use std::pin::Pin;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("network not found: {0}")]
    NetworkNotFound(String),
    #[error("operation '{0}' timed out")]
    Timeout(String),
    #[error("runtime error: {0}")]
    BollardError(#[from] bollard::errors::Error),
}

/// Observed state of a container, collapsed to the three buckets the
/// compute orchestrator's reconciler cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Gone,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cpu_shares: Option<i64>,
    pub memory_mb: Option<i64>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Unified async interface over the container runtime.
///
/// Object-safe thanks to `Pin<Box<…>>` returns. Implementations must be
/// `Send + Sync` so they can live inside `Arc<AppState>`.
pub trait ContainerDriver: Send + Sync {
    /// Pull `image` if it is not already present locally.
    fn ensure_image<'a>(&'a self, image: &'a str) -> BoxFuture<'a, ()>;

    fn list_images(&self) -> BoxFuture<'_, Vec<String>>;

    fn create_container<'a>(&'a self, spec: &'a ContainerSpec) -> BoxFuture<'a, String>;

    fn start_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, ()>;

    fn stop_container<'a>(
        &'a self,
        container_id: &'a str,
        timeout_secs: Option<u32>,
    ) -> BoxFuture<'a, ()>;

    fn remove_container<'a>(&'a self, container_id: &'a str, force: bool) -> BoxFuture<'a, ()>;

    fn inspect_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, ContainerState>;

    fn create_network<'a>(&'a self, name: &'a str) -> BoxFuture<'a, String>;

    fn remove_network<'a>(&'a self, network_id: &'a str) -> BoxFuture<'a, ()>;

    fn attach_to_network<'a>(
        &'a self,
        container_id: &'a str,
        network_id: &'a str,
    ) -> BoxFuture<'a, ()>;

    fn detach_from_network<'a>(
        &'a self,
        container_id: &'a str,
        network_id: &'a str,
    ) -> BoxFuture<'a, ()>;
}
