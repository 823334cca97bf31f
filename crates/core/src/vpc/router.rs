//! Cloud routers and VPN tunnels. Metadata-only constructs: a router's BGP
//! session and a tunnel's IPsec state are never actually established, only
//! recorded, since there is no second endpoint to negotiate with locally.

use rand::Rng;

use crate::error::Result;
use crate::repo::vpc::{Router, VpnTunnel};

use super::networks::validate_rfc1035;
use super::VpcService;

const VPN_GATEWAY_POOL_BASE: u32 = 0xa9fe_fe00; // 169.254.254.0
const VPN_GATEWAY_POOL_SIZE: u32 = 256;

fn synthetic_gateway_ip() -> std::net::Ipv4Addr {
    let offset = rand::thread_rng().gen_range(1..VPN_GATEWAY_POOL_SIZE - 1);
    std::net::Ipv4Addr::from(VPN_GATEWAY_POOL_BASE + offset)
}

impl VpcService {
    pub async fn create_router(&self, network_id: &str, name: &str, region: &str, bgp_asn: i64) -> Result<Router> {
        validate_rfc1035(name, "router")?;
        self.routers.create(network_id, name, region, bgp_asn, 20).await
    }

    pub async fn get_router(&self, network_id: &str, name: &str) -> Result<Router> {
        self.routers.get_by_name(network_id, name).await
    }

    pub async fn list_routers(&self, network_id: &str, region: Option<&str>) -> Result<Vec<Router>> {
        self.routers.list(network_id, region).await
    }

    pub async fn delete_router(&self, id: &str) -> Result<()> {
        self.routers.delete(id).await
    }

    pub async fn create_vpn_tunnel(
        &self,
        network_id: &str,
        name: &str,
        region: &str,
        peer_ip: &str,
        shared_secret: &str,
    ) -> Result<VpnTunnel> {
        validate_rfc1035(name, "VPN tunnel")?;
        let gateway_ip = synthetic_gateway_ip().to_string();
        self.vpn_tunnels.create(network_id, name, region, peer_ip, &gateway_ip, shared_secret).await
    }

    pub async fn get_vpn_tunnel(&self, network_id: &str, name: &str) -> Result<VpnTunnel> {
        self.vpn_tunnels.get_by_name(network_id, name).await
    }

    pub async fn list_vpn_tunnels(&self, network_id: &str) -> Result<Vec<VpnTunnel>> {
        self.vpn_tunnels.list(network_id).await
    }

    pub async fn delete_vpn_tunnel(&self, id: &str) -> Result<()> {
        self.vpn_tunnels.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::driver::fake::FakeContainerDriver;
    use crate::locks::KeyedLocks;
    use crate::repo::vpc::RoutingMode;
    use crate::repo::{AddressRepo, FirewallRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo, VpnTunnelRepo};

    use super::*;

    async fn service() -> (VpcService, String) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
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
            Arc::new(FakeContainerDriver::new()),
            Arc::new(SystemClock),
        );
        let net = svc.create_network("p1", "default", false, RoutingMode::Regional, 1460).await.unwrap();
        (svc, net.id)
    }

    #[tokio::test]
    async fn vpn_tunnel_gets_synthetic_gateway_from_link_local_pool() {
        let (svc, net_id) = service().await;
        let tunnel = svc.create_vpn_tunnel(&net_id, "tun1", "us-central1", "203.0.113.1", "s3cr3t").await.unwrap();
        assert!(tunnel.gateway_ip.starts_with("169.254.254."));
    }

    #[tokio::test]
    async fn router_round_trip() {
        let (svc, net_id) = service().await;
        svc.create_router(&net_id, "r1", "us-central1", 65001).await.unwrap();
        let fetched = svc.get_router(&net_id, "r1").await.unwrap();
        assert_eq!(fetched.bgp_asn, 65001);
    }
}
