//! Compute — the instance lifecycle orchestrator: an FSM bound to container
//! runtime primitives, plus the periodic reconciler that keeps the DB
//! honest against whatever the runtime actually reports.
//!
//! Mirrors the objectstore/vpc service shape: one narrow service type
//! holding its repository, the container driver, the VPC service it leans
//! on for NIC/IP allocation, per-instance striped locks, and a clock.

pub mod fsm;
pub mod orchestrator;
pub mod reconcile;

use std::sync::Arc;

use crate::catalog;
use crate::clock::Clock;
use crate::driver::ContainerDriver;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::repo::InstanceRepo;
use crate::vpc::VpcService;

#[derive(Clone)]
pub struct ComputeService {
    pub(crate) instances: InstanceRepo,
    pub(crate) vpc: VpcService,
    pub(crate) driver: Arc<dyn ContainerDriver>,
    pub(crate) locks: Arc<KeyedLocks>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Per-call timeout for every container-driver round trip; exceeding it
    /// classifies the failure as retryable rather than fatal.
    pub(crate) driver_call_timeout: std::time::Duration,
}

impl ComputeService {
    pub fn new(
        instances: InstanceRepo,
        vpc: VpcService,
        driver: Arc<dyn ContainerDriver>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        driver_call_timeout: std::time::Duration,
    ) -> Self {
        Self { instances, vpc, driver, locks, clock, driver_call_timeout }
    }

    pub(crate) fn instance_lock_key(instance_id: &str) -> String {
        format!("instance/{instance_id}")
    }

    pub(crate) fn validate_catalog(zone: &str, machine_type: &str) -> Result<()> {
        if !catalog::zone_exists(zone) {
            return Err(Error::InvalidArgument(format!(
                "unknown zone {zone:?}; available zones: {}",
                catalog::available_zones()
            )));
        }
        if !catalog::machine_type_exists(machine_type) {
            return Err(Error::InvalidArgument(format!(
                "unknown machine type {machine_type:?}; available machine types: {}",
                catalog::available_machine_types()
            )));
        }
        Ok(())
    }

    /// Runs a container-driver call under the service's configured
    /// per-call timeout, translating an expiry into a retryable `Internal`
    /// error rather than hanging the orchestrator.
    pub(crate) async fn with_driver_timeout<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.driver_call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!("container operation '{op}' timed out"))),
        }
    }
}

pub use fsm::InstanceEvent;
pub use crate::repo::compute::{Instance, InstanceStatus};
