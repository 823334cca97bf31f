//! External IP address pool — a synthetic `34.0.0.0/8` range sliced out
//! for ephemeral and statically reserved addresses, since there is no real
//! internet-facing allocator behind a local emulator.

use std::net::Ipv4Addr;

use rand::Rng;

use crate::error::{Error, Result};
use crate::repo::vpc::{Address, AddressStatus};

use super::VpcService;

const EXTERNAL_POOL_BASE: u32 = 0x2200_0000; // 34.0.0.0
const EXTERNAL_POOL_SIZE: u32 = 1 << 24; // /8
const EPHEMERAL_ALLOCATION_ATTEMPTS: usize = 20;

fn random_pool_ip() -> Ipv4Addr {
    let offset = rand::thread_rng().gen_range(1..EXTERNAL_POOL_SIZE - 1);
    Ipv4Addr::from(EXTERNAL_POOL_BASE + offset)
}

impl VpcService {
    /// Reserves a named static external address.
    pub async fn reserve_address(&self, project_id: &str, region: &str, name: &str) -> Result<Address> {
        let in_use = self.addresses.all_ips_in_use().await?;
        for _ in 0..EPHEMERAL_ALLOCATION_ATTEMPTS {
            let candidate = random_pool_ip().to_string();
            if !in_use.contains(&candidate) {
                return self.addresses.create(project_id, region, Some(name), &candidate, AddressStatus::Reserved).await;
            }
        }
        Err(Error::ResourceExhausted("external IP pool exhausted".to_string()))
    }

    /// Mints a throwaway ephemeral address for an instance that doesn't ask
    /// for a named reservation; bound immediately since ephemeral addresses
    /// have no independent lifetime of their own.
    pub async fn allocate_ephemeral_address(&self, project_id: &str, region: &str, instance_id: &str) -> Result<Address> {
        let in_use = self.addresses.all_ips_in_use().await?;
        for _ in 0..EPHEMERAL_ALLOCATION_ATTEMPTS {
            let candidate = random_pool_ip().to_string();
            if !in_use.contains(&candidate) {
                let addr = self.addresses.create(project_id, region, None, &candidate, AddressStatus::InUse).await?;
                self.addresses.bind_to_instance(&addr.id, instance_id).await?;
                return self.addresses.get_by_id(&addr.id).await;
            }
        }
        Err(Error::ResourceExhausted("external IP pool exhausted".to_string()))
    }

    pub async fn get_address(&self, project_id: &str, region: &str, name: &str) -> Result<Address> {
        self.addresses.get_by_name(project_id, region, name).await
    }

    pub async fn list_addresses(&self, project_id: &str, region: &str) -> Result<Vec<Address>> {
        self.addresses.list(project_id, region).await
    }

    pub async fn release_address(&self, address_id: &str) -> Result<()> {
        let addr = self.addresses.get_by_id(address_id).await?;
        if addr.status == AddressStatus::InUse {
            return Err(Error::FailedPrecondition(format!("address {address_id} is still in use")));
        }
        self.addresses.delete(address_id).await
    }

    /// Tears down whatever ephemeral or reserved address is currently bound
    /// to an instance, for the `deleteAccessConfig` surface. A no-op if the
    /// instance has no external IP.
    pub async fn release_instance_address(&self, instance_id: &str) -> Result<()> {
        if let Some(addr) = self.addresses.get_by_instance_id(instance_id).await? {
            self.addresses.delete(&addr.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::driver::fake::FakeContainerDriver;
    use crate::locks::KeyedLocks;
    use crate::repo::{AddressRepo, FirewallRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo, VpnTunnelRepo};

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
    async fn reserved_addresses_fall_within_the_synthetic_pool() {
        let svc = service().await;
        let addr = svc.reserve_address("p1", "us-central1", "my-ip").await.unwrap();
        assert!(addr.ip.starts_with("34."));
        assert_eq!(addr.status, AddressStatus::Reserved);
    }

    #[tokio::test]
    async fn releasing_in_use_address_is_rejected() {
        let svc = service().await;
        let addr = svc.allocate_ephemeral_address("p1", "us-central1", "instance-1").await.unwrap();
        let err = svc.release_address(&addr.id).await;
        assert!(matches!(err, Err(Error::FailedPrecondition(_))));
    }
}
