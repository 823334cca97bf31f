//! State reconciliation — the periodic background pass that inspects every
//! non-terminated instance's container and writes through whatever the
//! runtime actually reports (§4.2).
//!
//! An observed drift is authoritative: if an operator ran `docker stop`
//! directly, the next tick moves the DB row to `STOPPED` even though no
//! `stop_instance` call happened. The per-instance lock means an
//! in-flight operator transition always wins over a concurrent tick.

use crate::driver::ContainerState;
use crate::error::Result;
use crate::repo::compute::InstanceStatus;

use super::ComputeService;

#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub instances_inspected: u64,
    pub instances_changed: u64,
}

impl ComputeService {
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let instances = self.instances.list_non_terminated().await?;

        for instance in instances {
            summary.instances_inspected += 1;

            let Some(container_id) = &instance.container_id else { continue };

            // Best-effort: a single instance's reconcile failure (e.g. the
            // driver call timing out) must not abort the whole sweep.
            let observed = match self.with_driver_timeout("inspect_container", async {
                self.observed_state(container_id).await
            }).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(instance = %instance.id, error = %e, "reconcile: inspect failed, skipping");
                    continue;
                }
            };

            let mapped = match observed {
                ContainerState::Running => InstanceStatus::Running,
                ContainerState::Stopped => InstanceStatus::Stopped,
                ContainerState::Gone => InstanceStatus::Terminated,
            };

            if mapped == instance.status {
                continue;
            }

            let _guard = self.locks.acquire(&Self::instance_lock_key(&instance.id)).await;
            // Re-read under the lock: an operator-initiated transition may
            // have landed between the inspect above and acquiring the lock.
            let current = self.instances.get_by_id(&instance.id).await?;
            if current.status != instance.status {
                continue;
            }

            self.instances.set_status(&instance.id, mapped).await?;
            summary.instances_changed += 1;
            tracing::info!(instance = %instance.id, from = ?instance.status, to = ?mapped, "reconciler updated instance state");
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::driver::fake::FakeContainerDriver;
    use crate::locks::KeyedLocks;
    use crate::repo::vpc::RoutingMode;
    use crate::repo::{
        AddressRepo, FirewallRepo, InstanceRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo,
        VpnTunnelRepo,
    };
    use crate::vpc::VpcService;

    use super::super::orchestrator::RunInstanceRequest;
    use super::*;

    async fn service() -> (ComputeService, Arc<FakeContainerDriver>) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();

        let driver = Arc::new(FakeContainerDriver::new());
        let vpc = VpcService::new(
            NetworkRepo::new(pool.clone()),
            SubnetRepo::new(pool.clone()),
            NicRepo::new(pool.clone()),
            AddressRepo::new(pool.clone()),
            FirewallRepo::new(pool.clone()),
            RouteRepo::new(pool.clone()),
            PeeringRepo::new(pool.clone()),
            RouterRepo::new(pool.clone()),
            VpnTunnelRepo::new(pool.clone()),
            Arc::new(KeyedLocks::new()),
            driver.clone(),
            Arc::new(SystemClock),
        );
        vpc.create_network("p1", "default", true, RoutingMode::Regional, 1460).await.unwrap();

        let svc = ComputeService::new(
            InstanceRepo::new(pool.clone()),
            vpc,
            driver.clone(),
            Arc::new(KeyedLocks::new()),
            Arc::new(SystemClock),
            std::time::Duration::from_secs(5),
        );
        (svc, driver)
    }

    #[tokio::test]
    async fn out_of_band_stop_is_observed_and_written_through() {
        let (svc, driver) = service().await;
        let inst = svc
            .run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::Running);

        driver.force_state(inst.container_id.as_deref().unwrap(), false).await;

        let summary = svc.reconcile_once().await.unwrap();
        assert_eq!(summary.instances_changed, 1);

        let refreshed = svc.instances.get_by_id(&inst.id).await.unwrap();
        assert_eq!(refreshed.status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn missing_container_terminates_the_instance() {
        let (svc, driver) = service().await;
        let inst = svc
            .run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();

        driver.forget(inst.container_id.as_deref().unwrap()).await;

        svc.reconcile_once().await.unwrap();
        let refreshed = svc.instances.get_by_id(&inst.id).await.unwrap();
        assert_eq!(refreshed.status, InstanceStatus::Terminated);
    }

    #[tokio::test]
    async fn unchanged_state_is_a_no_op() {
        let (svc, _driver) = service().await;
        svc.run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();

        let summary = svc.reconcile_once().await.unwrap();
        assert_eq!(summary.instances_changed, 0);
        assert_eq!(summary.instances_inspected, 1);
    }
}
