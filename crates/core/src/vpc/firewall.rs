//! Firewall rules and routes. Metadata-only: nothing here actually filters
//! traffic between fake VMs, but names, priorities, and CIDR syntax are
//! validated the same way the real control plane would reject them.

use crate::error::{Error, Result};
use crate::repo::vpc::{FirewallRule, ProtocolEntry, Route};

use super::networks::validate_rfc1035;
use super::{parse_cidr, VpcService};

fn validate_protocols(protocols: &[ProtocolEntry]) -> Result<()> {
    const KNOWN: &[&str] = &["tcp", "udp", "icmp", "all"];
    for entry in protocols {
        if !KNOWN.contains(&entry.proto.as_str()) {
            return Err(Error::InvalidArgument(format!("unknown protocol {:?}", entry.proto)));
        }
        for port in &entry.ports {
            let valid = match port.split_once('-') {
                Some((lo, hi)) => lo.parse::<u16>().is_ok() && hi.parse::<u16>().is_ok(),
                None => port.parse::<u16>().is_ok(),
            };
            if !valid {
                return Err(Error::InvalidArgument(format!("invalid port spec {port:?}")));
            }
        }
    }
    Ok(())
}

fn validate_ranges(ranges: &[String]) -> Result<()> {
    for r in ranges {
        parse_cidr(r)?;
    }
    Ok(())
}

impl VpcService {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_firewall_rule(
        &self,
        network_id: &str,
        name: &str,
        priority: i64,
        direction: &str,
        action: &str,
        protocols: Vec<ProtocolEntry>,
        source_ranges: Vec<String>,
        dest_ranges: Vec<String>,
        source_tags: Vec<String>,
        target_tags: Vec<String>,
    ) -> Result<FirewallRule> {
        validate_rfc1035(name, "firewall rule")?;
        if !matches!(direction, "INGRESS" | "EGRESS") {
            return Err(Error::InvalidArgument(format!("invalid direction {direction:?}")));
        }
        if !matches!(action, "ALLOW" | "DENY") {
            return Err(Error::InvalidArgument(format!("invalid action {action:?}")));
        }
        validate_protocols(&protocols)?;
        validate_ranges(&source_ranges)?;
        validate_ranges(&dest_ranges)?;

        self.firewall
            .create(network_id, name, priority, direction, action, &protocols, &source_ranges, &dest_ranges, &source_tags, &target_tags)
            .await
    }

    pub async fn get_firewall_rule(&self, network_id: &str, name: &str) -> Result<FirewallRule> {
        self.firewall.get_by_name(network_id, name).await
    }

    pub async fn list_firewall_rules(&self, network_id: &str) -> Result<Vec<FirewallRule>> {
        self.firewall.list(network_id).await
    }

    pub async fn delete_firewall_rule(&self, id: &str) -> Result<()> {
        self.firewall.delete(id).await
    }

    pub async fn create_route(
        &self,
        network_id: &str,
        name: &str,
        dest_range: &str,
        priority: i64,
        next_hop_type: &str,
        next_hop_value: Option<&str>,
        tags: Vec<String>,
    ) -> Result<Route> {
        validate_rfc1035(name, "route")?;
        parse_cidr(dest_range)?;
        if !matches!(next_hop_type, "INSTANCE" | "GATEWAY" | "VPN_TUNNEL" | "PEERING") {
            return Err(Error::InvalidArgument(format!("invalid next hop type {next_hop_type:?}")));
        }

        self.routes.create(network_id, name, dest_range, priority, next_hop_type, next_hop_value, &tags).await
    }

    pub async fn get_route(&self, network_id: &str, name: &str) -> Result<Route> {
        self.routes.get_by_name(network_id, name).await
    }

    pub async fn list_routes(&self, network_id: &str) -> Result<Vec<Route>> {
        self.routes.list(network_id).await
    }

    pub async fn delete_route(&self, id: &str) -> Result<()> {
        self.routes.delete(id).await
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
    async fn firewall_rule_rejects_bad_port_spec() {
        let (svc, net_id) = service().await;
        let err = svc
            .create_firewall_rule(
                &net_id,
                "allow-ssh",
                1000,
                "INGRESS",
                "ALLOW",
                vec![ProtocolEntry { proto: "tcp".to_string(), ports: vec!["notaport".to_string()] }],
                vec!["0.0.0.0/0".to_string()],
                vec![],
                vec![],
                vec![],
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn firewall_rule_round_trip() {
        let (svc, net_id) = service().await;
        svc.create_firewall_rule(
            &net_id,
            "allow-ssh",
            1000,
            "INGRESS",
            "ALLOW",
            vec![ProtocolEntry { proto: "tcp".to_string(), ports: vec!["22".to_string()] }],
            vec!["0.0.0.0/0".to_string()],
            vec![],
            vec![],
            vec!["ssh".to_string()],
        )
        .await
        .unwrap();

        let fetched = svc.get_firewall_rule(&net_id, "allow-ssh").await.unwrap();
        assert_eq!(fetched.target_tags, vec!["ssh".to_string()]);
    }

    #[tokio::test]
    async fn route_requires_valid_cidr() {
        let (svc, net_id) = service().await;
        let err = svc.create_route(&net_id, "default-route", "not-a-cidr", 1000, "GATEWAY", None, vec![]).await;
        assert!(err.is_err());
    }
}
