//! Network interfaces — attachment of an instance to a subnet. `nic0` is
//! mandatory and not independently detachable (§4.1 data model); the
//! orchestrator enforces that by never calling `delete_nic` on it directly,
//! only tearing every NIC down together via `release_nics_for_instance`.

use crate::error::{Error, Result};
use crate::repo::vpc::NetworkInterface;

use super::VpcService;

impl VpcService {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_nic(
        &self,
        instance_id: &str,
        network_id: &str,
        subnet_id: &str,
        name: &str,
        internal_ip: &str,
        nic_index: i64,
    ) -> Result<NetworkInterface> {
        self.nics.create(instance_id, network_id, subnet_id, name, internal_ip, nic_index).await
    }

    pub async fn list_nics(&self, instance_id: &str) -> Result<Vec<NetworkInterface>> {
        self.nics.list_for_instance(instance_id).await
    }

    /// Detaches a single NIC, freeing its internal IP back to the subnet's
    /// pool. Rejects `nic0`: it is the mandatory primary interface and is
    /// only ever removed as part of whole-instance teardown.
    pub async fn delete_nic(&self, instance_id: &str, nic_id: &str) -> Result<()> {
        let nics = self.nics.list_for_instance(instance_id).await?;
        let nic = nics
            .iter()
            .find(|n| n.id == nic_id)
            .ok_or_else(|| Error::NotFound(format!("network interface {nic_id}")))?;
        if nic.nic_index == 0 {
            return Err(Error::FailedPrecondition("nic0 cannot be detached".to_string()));
        }
        self.release_internal_ip(&nic.subnet_id, &nic.internal_ip).await;
        self.nics.delete(nic_id).await
    }

    /// Tears down every NIC an instance owns, freeing their internal IPs.
    /// Called from instance deletion, where removing `nic0` along with the
    /// rest is legal.
    pub async fn release_nics_for_instance(&self, instance_id: &str) -> Result<()> {
        let nics = self.nics.list_for_instance(instance_id).await?;
        for nic in &nics {
            self.release_internal_ip(&nic.subnet_id, &nic.internal_ip).await;
        }
        self.nics.delete_for_instance(instance_id).await
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
        AddressRepo, FirewallRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo, VpnTunnelRepo,
    };

    use super::*;

    async fn service() -> VpcService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        VpcService::new(
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
            Arc::new(FakeContainerDriver::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn nic0_cannot_be_detached() {
        let svc = service().await;
        let net = svc.create_network("p1", "n1", false, RoutingMode::Regional, 1460).await.unwrap();
        let sub = svc.create_subnet(&net.id, "s1", "us-central1", "10.0.0.0/28").await.unwrap();
        let nic = svc.create_nic("inst-1", &net.id, &sub.id, "nic0", "10.0.0.2", 0).await.unwrap();

        let err = svc.delete_nic("inst-1", &nic.id).await;
        assert!(matches!(err, Err(Error::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn releasing_instance_nics_frees_their_ips() {
        let svc = service().await;
        let net = svc.create_network("p1", "n1", false, RoutingMode::Regional, 1460).await.unwrap();
        let sub = svc.create_subnet(&net.id, "s1", "us-central1", "10.0.0.0/28").await.unwrap();
        let ip = svc.allocate_internal_ip(&sub.id).await.unwrap();
        svc.create_nic("inst-1", &net.id, &sub.id, "nic0", &ip, 0).await.unwrap();

        svc.release_nics_for_instance("inst-1").await.unwrap();
        assert!(svc.list_nics("inst-1").await.unwrap().is_empty());
        assert_eq!(svc.allocate_internal_ip(&sub.id).await.unwrap(), ip);
    }
}
