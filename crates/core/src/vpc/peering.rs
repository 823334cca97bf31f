//! VPC peering — connects two networks' subnet CIDR spaces, guarded
//! against self-peering and CIDR overlap, and spliced into the container
//! fabric so peered instances can actually reach each other.

use crate::error::{Error, Result};
use crate::repo::vpc::VpcPeering;

use super::{cidrs_overlap, parse_cidr, VpcService};

impl VpcService {
    pub async fn create_peering(
        &self,
        network_id: &str,
        name: &str,
        peer_network_id: &str,
        auto_create_routes: bool,
        exchange_subnet_routes: bool,
    ) -> Result<VpcPeering> {
        if network_id == peer_network_id {
            return Err(Error::InvalidArgument("a network cannot peer with itself".to_string()));
        }
        if self.peerings.find_by_name(network_id, name).await?.is_some() {
            return Err(Error::AlreadyExists(format!("peering {name}")));
        }
        if self.peerings.find_by_peer(network_id, peer_network_id).await?.is_some() {
            return Err(Error::AlreadyExists(format!(
                "a peering between {network_id} and {peer_network_id} already exists"
            )));
        }

        let own_subnets = self.subnets.list_for_network(network_id).await?;
        let peer_subnets = self.subnets.list_for_network(peer_network_id).await?;
        for own in &own_subnets {
            let own_net = parse_cidr(&own.cidr)?;
            for peer in &peer_subnets {
                let peer_net = parse_cidr(&peer.cidr)?;
                if cidrs_overlap(&own_net, &peer_net) {
                    return Err(Error::InvalidArgument(format!(
                        "peering would overlap CIDRs: {} ({}) vs {} ({})",
                        own.name, own.cidr, peer.name, peer.cidr
                    )));
                }
            }
        }

        let peering = self.peerings.create(network_id, name, peer_network_id, auto_create_routes, exchange_subnet_routes).await?;

        if let (Some(own_docker), Some(peer_docker)) = (self.fabric_id(network_id), self.fabric_id(peer_network_id)) {
            // Splice the two fabrics: every container already running on
            // one side attaches to the other side's docker network, and new
            // containers created on either side do the same as they're
            // provisioned (`compute::orchestrator::provision_container`
            // consults `peered_docker_networks` for exactly this).
            self.fabric.insert(format!("{network_id}:peer:{peer_network_id}"), peer_docker.clone());
            self.fabric.insert(format!("{peer_network_id}:peer:{network_id}"), own_docker.clone());

            for container_id in self.containers_in(network_id) {
                self.splice_attach(&container_id, &peer_docker).await?;
            }
            for container_id in self.containers_in(peer_network_id) {
                self.splice_attach(&container_id, &own_docker).await?;
            }
        }

        Ok(peering)
    }

    pub async fn get_peering(&self, network_id: &str, name: &str) -> Result<VpcPeering> {
        self.peerings
            .find_by_name(network_id, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("peering {name}")))
    }

    pub async fn list_peerings(&self, network_id: &str) -> Result<Vec<VpcPeering>> {
        self.peerings.list(network_id).await
    }

    pub async fn delete_peering(&self, network_id: &str, name: &str) -> Result<()> {
        let peering = self.get_peering(network_id, name).await?;
        let own_docker = self.fabric.remove(&format!("{network_id}:peer:{}", peering.peer_network_id)).map(|(_, v)| v);
        let peer_docker = self.fabric.remove(&format!("{}:peer:{network_id}", peering.peer_network_id)).map(|(_, v)| v);

        // Reverse the splice: detach every container tracked on each side
        // from the other side's docker network.
        if let Some(peer_docker) = &peer_docker {
            for container_id in self.containers_in(network_id) {
                self.splice_detach(&container_id, peer_docker).await?;
            }
        }
        if let Some(own_docker) = &own_docker {
            for container_id in self.containers_in(&peering.peer_network_id) {
                self.splice_detach(&container_id, own_docker).await?;
            }
        }

        self.peerings.delete_by_name(network_id, name).await
    }

    /// Docker network ids a NIC on `network_id` should also attach to,
    /// because of active peerings.
    pub(crate) fn peered_docker_networks(&self, network_id: &str) -> Vec<String> {
        self.fabric
            .iter()
            .filter_map(|entry| {
                let key = entry.key();
                key.starts_with(&format!("{network_id}:peer:")).then(|| entry.value().clone())
            })
            .collect()
    }

    /// Attaches `container_id` to `docker_network_id`, treating a container
    /// that no longer exists as a no-op rather than a failed splice.
    async fn splice_attach(&self, container_id: &str, docker_network_id: &str) -> Result<()> {
        match self.driver.attach_to_network(container_id, docker_network_id).await {
            Ok(()) => Ok(()),
            Err(crate::driver::DriverError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Detaches `container_id` from `docker_network_id`, treating a
    /// container that no longer exists as a no-op rather than a failed
    /// unsplice.
    async fn splice_detach(&self, container_id: &str, docker_network_id: &str) -> Result<()> {
        match self.driver.detach_from_network(container_id, docker_network_id).await {
            Ok(()) => Ok(()),
            Err(crate::driver::DriverError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::driver::fake::FakeContainerDriver;
    use crate::driver::ContainerDriver;
    use crate::locks::KeyedLocks;
    use crate::repo::vpc::RoutingMode;
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
    async fn self_peering_rejected() {
        let svc = service().await;
        let net = svc.create_network("p1", "a", false, RoutingMode::Regional, 1460).await.unwrap();
        let err = svc.create_peering(&net.id, "self", &net.id, true, true).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn overlapping_cidrs_rejected() {
        let svc = service().await;
        let a = svc.create_network("p1", "a", false, RoutingMode::Regional, 1460).await.unwrap();
        let b = svc.create_network("p1", "b", false, RoutingMode::Regional, 1460).await.unwrap();
        svc.create_subnet(&a.id, "sub", "us-central1", "10.0.0.0/24").await.unwrap();
        svc.create_subnet(&b.id, "sub", "us-central1", "10.0.0.0/25").await.unwrap();

        let err = svc.create_peering(&a.id, "a-to-b", &b.id, true, true).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn non_overlapping_peering_splices_fabric() {
        let svc = service().await;
        let a = svc.create_network("p1", "a", false, RoutingMode::Regional, 1460).await.unwrap();
        let b = svc.create_network("p1", "b", false, RoutingMode::Regional, 1460).await.unwrap();
        svc.create_subnet(&a.id, "sub", "us-central1", "10.0.0.0/24").await.unwrap();
        svc.create_subnet(&b.id, "sub", "us-central1", "10.1.0.0/24").await.unwrap();

        svc.create_peering(&a.id, "a-to-b", &b.id, true, true).await.unwrap();
        assert_eq!(svc.peered_docker_networks(&a.id).len(), 1);
        assert_eq!(svc.peered_docker_networks(&b.id).len(), 1);
    }

    #[tokio::test]
    async fn peering_attaches_and_removal_detaches_existing_containers() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let driver = Arc::new(FakeContainerDriver::new());
        let svc = VpcService::new(
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

        let a = svc.create_network("p1", "a", false, RoutingMode::Regional, 1460).await.unwrap();
        let b = svc.create_network("p1", "b", false, RoutingMode::Regional, 1460).await.unwrap();
        svc.create_subnet(&a.id, "sub", "us-central1", "10.0.0.0/24").await.unwrap();
        svc.create_subnet(&b.id, "sub", "us-central1", "10.1.0.0/24").await.unwrap();

        let container_a = driver
            .create_container(&crate::driver::ContainerSpec {
                name: "vm-a".to_string(),
                image: "emulator/vm-base:latest".to_string(),
                cpu_shares: None,
                memory_mb: None,
                env: vec![],
                labels: Default::default(),
            })
            .await
            .unwrap();
        svc.track_container(&a.id, &container_a);

        svc.create_peering(&a.id, "a-to-b", &b.id, true, true).await.unwrap();
        let peer_docker = svc.fabric_id(&b.id).unwrap();
        assert!(driver.networks_of(&container_a).await.contains(&peer_docker));

        svc.delete_peering(&a.id, "a-to-b").await.unwrap();
        assert!(!driver.networks_of(&container_a).await.contains(&peer_docker));
    }
}
