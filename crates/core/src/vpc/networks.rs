//! Network and subnetwork creation, including the container-runtime fabric
//! each GCP network is backed by and the sequential per-subnet IP pool.

use crate::catalog::DEFAULT_SUBNET_REGIONS;
use crate::error::Result;
use crate::repo::vpc::{Network, RoutingMode, Subnetwork};

use super::{nth_host_ip, parse_cidr, VpcService};

fn validate_network_name(name: &str) -> Result<()> {
    validate_rfc1035(name, "network")
}

pub(crate) fn validate_rfc1035(name: &str, kind: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && name.chars().last().is_some_and(|c| c != '-');
    if !ok {
        return Err(crate::error::Error::InvalidArgument(format!(
            "invalid {kind} name {name:?}: must match RFC1035 (lowercase letter, then letters/digits/hyphens, no trailing hyphen)"
        )));
    }
    Ok(())
}

impl VpcService {
    pub async fn create_network(
        &self,
        project_id: &str,
        name: &str,
        auto_create_subnets: bool,
        routing_mode: RoutingMode,
        mtu: i64,
    ) -> Result<Network> {
        validate_network_name(name)?;
        let network = self.networks.create(project_id, name, auto_create_subnets, routing_mode, mtu).await?;

        let docker_name = Self::docker_network_name(&network.id);
        let docker_id = self.driver.create_network(&docker_name).await?;
        self.fabric.insert(network.id.clone(), docker_id);

        if auto_create_subnets {
            for (region, cidr) in DEFAULT_SUBNET_REGIONS {
                let net = parse_cidr(cidr)?;
                let gateway = nth_host_ip(&net, 1)?;
                let subnet_name = format!("default-{region}");
                self.subnets.create(&network.id, &subnet_name, region, cidr, &gateway.to_string()).await?;
            }
        }

        Ok(network)
    }

    pub async fn get_network(&self, project_id: &str, name: &str) -> Result<Network> {
        self.networks.get_by_name(project_id, name).await
    }

    pub async fn list_networks(&self, project_id: &str) -> Result<Vec<Network>> {
        self.networks.list(project_id).await
    }

    /// Deletes a network's docker fabric along with its row. Callers are
    /// responsible for checking no subnets/instances reference it first.
    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        if let Some((_, docker_id)) = self.fabric.remove(network_id) {
            self.driver.remove_network(&docker_id).await?;
        }
        self.networks.delete(network_id).await
    }

    pub async fn create_subnet(&self, network_id: &str, name: &str, region: &str, cidr: &str) -> Result<Subnetwork> {
        validate_rfc1035(name, "subnetwork")?;
        let requested = parse_cidr(cidr)?;
        let prefix_len = requested.prefix_len();
        if !(8..=29).contains(&prefix_len) {
            return Err(crate::error::Error::InvalidArgument(format!(
                "subnet CIDR {cidr} has prefix length {prefix_len}; must be in [8,29]"
            )));
        }

        let existing = self.subnets.list_for_network(network_id).await?;
        for other in &existing {
            let other_net = parse_cidr(&other.cidr)?;
            if super::cidrs_overlap(&requested, &other_net) {
                return Err(crate::error::Error::InvalidArgument(format!(
                    "{cidr} overlaps existing subnet {} ({})",
                    other.name, other.cidr
                )));
            }
        }

        let gateway = nth_host_ip(&requested, 1)?;
        self.subnets.create(network_id, name, region, cidr, &gateway.to_string()).await
    }

    pub async fn get_subnet(&self, network_id: &str, name: &str) -> Result<Subnetwork> {
        self.subnets.get_by_name(network_id, name).await
    }

    pub async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnetwork>> {
        self.subnets.list_for_network(network_id).await
    }

    /// Allocates an internal IP in `subnet_id`: first-available among IPs
    /// freed by prior NIC teardown, falling back to the next sequential
    /// address. Serialized under a per-subnet lock so concurrent NIC
    /// creation never double-allocates.
    pub async fn allocate_internal_ip(&self, subnet_id: &str) -> Result<String> {
        let _guard = self.locks.acquire(&Self::subnet_lock_key(subnet_id)).await;

        if let Some(mut freed) = self.freed_ips.get_mut(subnet_id) {
            if !freed.is_empty() {
                return Ok(freed.remove(0));
            }
        }

        let subnet = self.subnets.get_by_id(subnet_id).await?;
        let net = parse_cidr(&subnet.cidr)?;
        let ip = nth_host_ip(&net, subnet.next_ip_index)?;
        self.subnets.advance_next_ip_index(subnet_id, subnet.next_ip_index + 1).await?;
        Ok(ip.to_string())
    }

    /// Returns an internal IP to `subnet_id`'s free list, making it eligible
    /// for reuse by a subsequent `allocate_internal_ip` before the subnet's
    /// sequential cursor is touched again.
    pub(crate) async fn release_internal_ip(&self, subnet_id: &str, ip: &str) {
        let _guard = self.locks.acquire(&Self::subnet_lock_key(subnet_id)).await;
        self.freed_ips.entry(subnet_id.to_string()).or_default().push(ip.to_string());
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
    async fn auto_mode_seeds_default_subnets() {
        let svc = service().await;
        let net = svc.create_network("p1", "default", true, RoutingMode::Regional, 1460).await.unwrap();
        let subs = svc.list_subnets(&net.id).await.unwrap();
        assert_eq!(subs.len(), DEFAULT_SUBNET_REGIONS.len());
    }

    #[tokio::test]
    async fn overlapping_subnet_rejected() {
        let svc = service().await;
        let net = svc.create_network("p1", "custom", false, RoutingMode::Regional, 1460).await.unwrap();
        svc.create_subnet(&net.id, "sub-a", "us-central1", "10.0.0.0/24").await.unwrap();
        let err = svc.create_subnet(&net.id, "sub-b", "us-central1", "10.0.0.128/25").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn ip_allocation_is_sequential() {
        let svc = service().await;
        let net = svc.create_network("p1", "custom", false, RoutingMode::Regional, 1460).await.unwrap();
        let sub = svc.create_subnet(&net.id, "sub-a", "us-central1", "10.0.0.0/29").await.unwrap();

        assert_eq!(svc.allocate_internal_ip(&sub.id).await.unwrap(), "10.0.0.2");
        assert_eq!(svc.allocate_internal_ip(&sub.id).await.unwrap(), "10.0.0.3");
    }

    #[tokio::test]
    async fn released_ip_is_reused_before_advancing() {
        let svc = service().await;
        let net = svc.create_network("p1", "custom", false, RoutingMode::Regional, 1460).await.unwrap();
        let sub = svc.create_subnet(&net.id, "sub-a", "us-central1", "10.0.0.0/29").await.unwrap();

        let first = svc.allocate_internal_ip(&sub.id).await.unwrap();
        svc.allocate_internal_ip(&sub.id).await.unwrap();
        svc.release_internal_ip(&sub.id, &first).await;

        assert_eq!(svc.allocate_internal_ip(&sub.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn invalid_network_name_rejected() {
        let svc = service().await;
        let err = svc.create_network("p1", "Has-Upper", false, RoutingMode::Regional, 1460).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn subnet_prefix_out_of_range_rejected() {
        let svc = service().await;
        let net = svc.create_network("p1", "custom", false, RoutingMode::Regional, 1460).await.unwrap();

        let too_narrow = svc.create_subnet(&net.id, "sub-a", "us-central1", "10.0.0.0/30").await;
        assert!(too_narrow.is_err());

        let too_wide = svc.create_subnet(&net.id, "sub-b", "us-central1", "10.0.0.0/7").await;
        assert!(too_wide.is_err());

        let ok = svc.create_subnet(&net.id, "sub-c", "us-central1", "10.0.0.0/29").await;
        assert!(ok.is_ok());
    }
}
