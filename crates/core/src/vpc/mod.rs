//! Vpc — the networking control plane: networks, subnets, NICs, external
//! IP addresses, firewall rules, routes, peering, and routers/VPN tunnels.
//!
//! Mirrors the objectstore service's shape: one narrow service type holding
//! every repository plus the container driver it splices peered networks'
//! fabric through, with per-key striped locks guarding the read-modify-write
//! sequences (IP allocation, CIDR overlap checks) that a bare repository
//! can't make atomic on its own.

pub mod addresses;
pub mod firewall;
pub mod networks;
pub mod nics;
pub mod peering;
pub mod router;

use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use ipnet::Ipv4Net;

use crate::clock::Clock;
use crate::driver::ContainerDriver;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::repo::{
    AddressRepo, FirewallRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo, VpnTunnelRepo,
};

#[derive(Clone)]
pub struct VpcService {
    pub(crate) networks: NetworkRepo,
    pub(crate) subnets: SubnetRepo,
    pub(crate) nics: NicRepo,
    pub(crate) addresses: AddressRepo,
    pub(crate) firewall: FirewallRepo,
    pub(crate) routes: RouteRepo,
    pub(crate) peerings: PeeringRepo,
    pub(crate) routers: RouterRepo,
    pub(crate) vpn_tunnels: VpnTunnelRepo,
    pub(crate) locks: Arc<KeyedLocks>,
    pub(crate) driver: Arc<dyn ContainerDriver>,
    pub(crate) clock: Arc<dyn Clock>,
    /// GCP network id -> backing container-runtime network id. Populated on
    /// network creation; lost on process restart, which is fine since the
    /// container runtime itself is wiped along with it in local dev.
    pub(crate) fabric: DashMap<String, String>,
    /// Subnet id -> IPs freed by NIC teardown, offered back out in
    /// first-available order before `next_ip_index` advances further.
    pub(crate) freed_ips: DashMap<String, Vec<String>>,
    /// GCP network id -> container ids whose instance's primary NIC lives on
    /// that network. Lets peering splice/unsplice attach and detach exactly
    /// the containers that exist at the time a peering is added or removed.
    pub(crate) attached_containers: DashMap<String, Vec<String>>,
}

impl VpcService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        networks: NetworkRepo,
        subnets: SubnetRepo,
        nics: NicRepo,
        addresses: AddressRepo,
        firewall: FirewallRepo,
        routes: RouteRepo,
        peerings: PeeringRepo,
        routers: RouterRepo,
        vpn_tunnels: VpnTunnelRepo,
        locks: Arc<KeyedLocks>,
        driver: Arc<dyn ContainerDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            networks,
            subnets,
            nics,
            addresses,
            firewall,
            routes,
            peerings,
            routers,
            vpn_tunnels,
            locks,
            driver,
            clock,
            fabric: DashMap::new(),
            freed_ips: DashMap::new(),
            attached_containers: DashMap::new(),
        }
    }

    pub(crate) fn docker_network_name(network_id: &str) -> String {
        format!("emu-net-{network_id}")
    }

    pub(crate) fn subnet_lock_key(subnet_id: &str) -> String {
        format!("subnet/{subnet_id}")
    }

    /// Backing container-runtime network id for a GCP network, if its
    /// fabric has been provisioned.
    pub fn fabric_id(&self, network_id: &str) -> Option<String> {
        self.fabric.get(network_id).map(|v| v.value().clone())
    }

    /// Records that `container_id` backs an instance whose primary NIC
    /// lives on `network_id`. Called once the container exists, so a
    /// peering added later knows which containers to splice.
    pub(crate) fn track_container(&self, network_id: &str, container_id: &str) {
        self.attached_containers.entry(network_id.to_string()).or_default().push(container_id.to_string());
    }

    /// Forgets a container, e.g. once its instance has been deleted.
    pub(crate) fn untrack_container(&self, container_id: &str) {
        for mut entry in self.attached_containers.iter_mut() {
            entry.value_mut().retain(|c| c != container_id);
        }
    }

    /// Containers currently tracked as living on `network_id`.
    pub(crate) fn containers_in(&self, network_id: &str) -> Vec<String> {
        self.attached_containers.get(network_id).map(|v| v.clone()).unwrap_or_default()
    }
}

pub(crate) fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    cidr.parse().map_err(|_| Error::InvalidArgument(format!("invalid CIDR: {cidr}")))
}

pub(crate) fn cidrs_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    let (a_lo, a_hi) = (u32::from(a.network()), u32::from(a.broadcast()));
    let (b_lo, b_hi) = (u32::from(b.network()), u32::from(b.broadcast()));
    a_lo <= b_hi && b_lo <= a_hi
}

/// Host address at `index` within `net` (0 = network address, 1 = gateway
/// by convention). Errors once the index runs past the subnet's broadcast
/// address.
pub(crate) fn nth_host_ip(net: &Ipv4Net, index: i64) -> Result<Ipv4Addr> {
    let base = u32::from(net.network());
    let offset = u32::try_from(index).map_err(|_| Error::ResourceExhausted("subnet exhausted".to_string()))?;
    let candidate = base
        .checked_add(offset)
        .ok_or_else(|| Error::ResourceExhausted("subnet exhausted".to_string()))?;
    let candidate_ip = Ipv4Addr::from(candidate);
    if candidate_ip == net.broadcast() || !net.contains(&candidate_ip) {
        return Err(Error::ResourceExhausted(format!("no free addresses remain in {net}")));
    }
    Ok(candidate_ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_detection() {
        let a = parse_cidr("10.128.0.0/20").unwrap();
        let b = parse_cidr("10.128.8.0/24").unwrap();
        let c = parse_cidr("10.129.0.0/20").unwrap();
        assert!(cidrs_overlap(&a, &b));
        assert!(!cidrs_overlap(&a, &c));
    }

    #[test]
    fn host_allocation_respects_broadcast() {
        let net = parse_cidr("10.0.0.0/30").unwrap(); // 4 addresses: .0 net, .1, .2, .3 broadcast
        assert_eq!(nth_host_ip(&net, 1).unwrap(), "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(nth_host_ip(&net, 2).unwrap(), "10.0.0.2".parse::<Ipv4Addr>().unwrap());
        assert!(nth_host_ip(&net, 3).is_err());
    }
}
