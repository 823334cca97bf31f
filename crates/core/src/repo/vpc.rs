//! VPC repositories — networks, subnets, NICs, addresses, firewall rules,
//! routes, peerings, routers, and VPN tunnels. One struct per table; the
//! service layer (`crate::vpc`) composes them and owns the CIDR/IP-pool
//! invariants.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::ids::new_id;

use super::project::parse_ts;

// ---------------------------------------------------------------- Network

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    Regional,
    Global,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Regional => "REGIONAL",
            RoutingMode::Global => "GLOBAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub auto_create_subnets: bool,
    pub routing_mode: RoutingMode,
    pub mtu: i64,
    pub created_at: DateTime<Utc>,
}

fn row_to_network(row: &sqlx::sqlite::SqliteRow) -> Network {
    let mode: String = row.get("routing_mode");
    Network {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        auto_create_subnets: row.get::<i64, _>("auto_create_subnets") != 0,
        routing_mode: if mode == "GLOBAL" { RoutingMode::Global } else { RoutingMode::Regional },
        mtu: row.get("mtu"),
        created_at: parse_ts(row.get("created_at")),
    }
}

#[derive(Debug, Clone)]
pub struct NetworkRepo {
    pool: SqlitePool,
}

impl NetworkRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        auto_create_subnets: bool,
        routing_mode: RoutingMode,
        mtu: i64,
    ) -> Result<Network> {
        if self.get_by_name(project_id, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("network {name}")));
        }
        let id = new_id("network");
        sqlx::query(
            "INSERT INTO networks (id, project_id, name, auto_create_subnets, routing_mode, mtu, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(auto_create_subnets as i64)
        .bind(routing_mode.as_str())
        .bind(mtu)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Network> {
        let row = sqlx::query("SELECT * FROM networks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("network {id}")))?;
        Ok(row_to_network(&row))
    }

    pub async fn get_by_name(&self, project_id: &str, name: &str) -> Result<Network> {
        let row = sqlx::query("SELECT * FROM networks WHERE project_id = ? AND name = ?")
            .bind(project_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("network {name}")))?;
        Ok(row_to_network(&row))
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Network>> {
        let rows = sqlx::query("SELECT * FROM networks WHERE project_id = ? ORDER BY name")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_network).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM networks WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// ----------------------------------------------------------------- Subnet

#[derive(Debug, Clone)]
pub struct Subnetwork {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub region: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub private_google_access: bool,
    pub next_ip_index: i64,
}

fn row_to_subnet(row: &sqlx::sqlite::SqliteRow) -> Subnetwork {
    Subnetwork {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        region: row.get("region"),
        cidr: row.get("cidr"),
        gateway_ip: row.get("gateway_ip"),
        private_google_access: row.get::<i64, _>("private_google_access") != 0,
        next_ip_index: row.get("next_ip_index"),
    }
}

#[derive(Debug, Clone)]
pub struct SubnetRepo {
    pool: SqlitePool,
}

impl SubnetRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        region: &str,
        cidr: &str,
        gateway_ip: &str,
    ) -> Result<Subnetwork> {
        let id = new_id("subnet");
        sqlx::query(
            "INSERT INTO subnetworks (id, network_id, name, region, cidr, gateway_ip, next_ip_index) \
             VALUES (?, ?, ?, ?, ?, ?, 2)",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(region)
        .bind(cidr)
        .bind(gateway_ip)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Subnetwork> {
        let row = sqlx::query("SELECT * FROM subnetworks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subnetwork {id}")))?;
        Ok(row_to_subnet(&row))
    }

    pub async fn get_by_name(&self, network_id: &str, name: &str) -> Result<Subnetwork> {
        let row = sqlx::query("SELECT * FROM subnetworks WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subnetwork {name}")))?;
        Ok(row_to_subnet(&row))
    }

    pub async fn list_for_network(&self, network_id: &str) -> Result<Vec<Subnetwork>> {
        let rows = sqlx::query("SELECT * FROM subnetworks WHERE network_id = ? ORDER BY name")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_subnet).collect())
    }

    pub async fn list_for_region(&self, network_id: &str, region: &str) -> Result<Vec<Subnetwork>> {
        let rows = sqlx::query("SELECT * FROM subnetworks WHERE network_id = ? AND region = ?")
            .bind(network_id)
            .bind(region)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_subnet).collect())
    }

    pub async fn advance_next_ip_index(&self, id: &str, next_ip_index: i64) -> Result<()> {
        sqlx::query("UPDATE subnetworks SET next_ip_index = ? WHERE id = ?")
            .bind(next_ip_index)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM subnetworks WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// ------------------------------------------------------ Network Interface

#[derive(Debug, Clone)]
pub struct NetworkInterface {
    pub id: String,
    pub instance_id: String,
    pub network_id: String,
    pub subnet_id: String,
    pub name: String,
    pub internal_ip: String,
    pub nic_index: i64,
    pub created_at: DateTime<Utc>,
}

fn row_to_nic(row: &sqlx::sqlite::SqliteRow) -> NetworkInterface {
    NetworkInterface {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        network_id: row.get("network_id"),
        subnet_id: row.get("subnet_id"),
        name: row.get("name"),
        internal_ip: row.get("internal_ip"),
        nic_index: row.get("nic_index"),
        created_at: parse_ts(row.get("created_at")),
    }
}

#[derive(Debug, Clone)]
pub struct NicRepo {
    pool: SqlitePool,
}

impl NicRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        instance_id: &str,
        network_id: &str,
        subnet_id: &str,
        name: &str,
        internal_ip: &str,
        nic_index: i64,
    ) -> Result<NetworkInterface> {
        let id = new_id("nic");
        sqlx::query(
            "INSERT INTO network_interfaces (id, instance_id, network_id, subnet_id, name, internal_ip, nic_index, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(instance_id)
        .bind(network_id)
        .bind(subnet_id)
        .bind(name)
        .bind(internal_ip)
        .bind(nic_index)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM network_interfaces WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row_to_nic(&row))
    }

    pub async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<NetworkInterface>> {
        let rows = sqlx::query("SELECT * FROM network_interfaces WHERE instance_id = ? ORDER BY nic_index")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_nic).collect())
    }

    pub async fn list_for_subnet(&self, subnet_id: &str) -> Result<Vec<NetworkInterface>> {
        let rows = sqlx::query("SELECT * FROM network_interfaces WHERE subnet_id = ?")
            .bind(subnet_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_nic).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM network_interfaces WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn delete_for_instance(&self, instance_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM network_interfaces WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------- Address

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStatus {
    Reserved,
    InUse,
}

impl AddressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressStatus::Reserved => "RESERVED",
            AddressStatus::InUse => "IN_USE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Address {
    pub id: String,
    pub project_id: String,
    pub region: String,
    pub name: Option<String>,
    pub ip: String,
    pub status: AddressStatus,
    pub network_tier: String,
    pub user_instance_id: Option<String>,
}

fn row_to_address(row: &sqlx::sqlite::SqliteRow) -> Address {
    let status: String = row.get("status");
    Address {
        id: row.get("id"),
        project_id: row.get("project_id"),
        region: row.get("region"),
        name: row.get("name"),
        ip: row.get("ip"),
        status: if status == "IN_USE" { AddressStatus::InUse } else { AddressStatus::Reserved },
        network_tier: row.get("network_tier"),
        user_instance_id: row.get("user_instance_id"),
    }
}

#[derive(Debug, Clone)]
pub struct AddressRepo {
    pool: SqlitePool,
}

impl AddressRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        region: &str,
        name: Option<&str>,
        ip: &str,
        status: AddressStatus,
    ) -> Result<Address> {
        let id = new_id("address");
        sqlx::query(
            "INSERT INTO addresses (id, project_id, region, name, ip, status) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(region)
        .bind(name)
        .bind(ip)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Address> {
        let row = sqlx::query("SELECT * FROM addresses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("address {id}")))?;
        Ok(row_to_address(&row))
    }

    pub async fn get_by_name(&self, project_id: &str, region: &str, name: &str) -> Result<Address> {
        let row = sqlx::query("SELECT * FROM addresses WHERE project_id = ? AND region = ? AND name = ?")
            .bind(project_id)
            .bind(region)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("address {name}")))?;
        Ok(row_to_address(&row))
    }

    pub async fn list(&self, project_id: &str, region: &str) -> Result<Vec<Address>> {
        let rows = sqlx::query("SELECT * FROM addresses WHERE project_id = ? AND region = ?")
            .bind(project_id)
            .bind(region)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_address).collect())
    }

    pub async fn all_ips_in_use(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT ip FROM addresses").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(ip,)| ip).collect())
    }

    pub async fn get_by_instance_id(&self, instance_id: &str) -> Result<Option<Address>> {
        let row = sqlx::query("SELECT * FROM addresses WHERE user_instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_address(&r)))
    }

    pub async fn bind_to_instance(&self, id: &str, instance_id: &str) -> Result<()> {
        sqlx::query("UPDATE addresses SET status = 'IN_USE', user_instance_id = ? WHERE id = ?")
            .bind(instance_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn release(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE addresses SET status = 'RESERVED', user_instance_id = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM addresses WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------- Firewall Rule

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProtocolEntry {
    pub proto: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FirewallRule {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub priority: i64,
    pub direction: String,
    pub action: String,
    pub protocols: Vec<ProtocolEntry>,
    pub source_ranges: Vec<String>,
    pub dest_ranges: Vec<String>,
    pub source_tags: Vec<String>,
    pub target_tags: Vec<String>,
}

fn row_to_firewall(row: &sqlx::sqlite::SqliteRow) -> FirewallRule {
    let protocols_json: String = row.get("protocols_json");
    let source_ranges_json: String = row.get("source_ranges_json");
    let dest_ranges_json: String = row.get("dest_ranges_json");
    let source_tags_json: String = row.get("source_tags_json");
    let target_tags_json: String = row.get("target_tags_json");

    FirewallRule {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        priority: row.get("priority"),
        direction: row.get("direction"),
        action: row.get("action"),
        protocols: serde_json::from_str(&protocols_json).unwrap_or_default(),
        source_ranges: serde_json::from_str(&source_ranges_json).unwrap_or_default(),
        dest_ranges: serde_json::from_str(&dest_ranges_json).unwrap_or_default(),
        source_tags: serde_json::from_str(&source_tags_json).unwrap_or_default(),
        target_tags: serde_json::from_str(&target_tags_json).unwrap_or_default(),
    }
}

#[derive(Debug, Clone)]
pub struct FirewallRepo {
    pool: SqlitePool,
}

impl FirewallRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        priority: i64,
        direction: &str,
        action: &str,
        protocols: &[ProtocolEntry],
        source_ranges: &[String],
        dest_ranges: &[String],
        source_tags: &[String],
        target_tags: &[String],
    ) -> Result<FirewallRule> {
        if self.get_by_name(network_id, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("firewall rule {name}")));
        }
        let id = new_id("fw");
        sqlx::query(
            "INSERT INTO firewall_rules \
             (id, network_id, name, priority, direction, action, protocols_json, source_ranges_json, dest_ranges_json, source_tags_json, target_tags_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(priority)
        .bind(direction)
        .bind(action)
        .bind(serde_json::to_string(protocols).unwrap())
        .bind(serde_json::to_string(source_ranges).unwrap())
        .bind(serde_json::to_string(dest_ranges).unwrap())
        .bind(serde_json::to_string(source_tags).unwrap())
        .bind(serde_json::to_string(target_tags).unwrap())
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<FirewallRule> {
        let row = sqlx::query("SELECT * FROM firewall_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("firewall rule {id}")))?;
        Ok(row_to_firewall(&row))
    }

    pub async fn get_by_name(&self, network_id: &str, name: &str) -> Result<FirewallRule> {
        let row = sqlx::query("SELECT * FROM firewall_rules WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("firewall rule {name}")))?;
        Ok(row_to_firewall(&row))
    }

    pub async fn list(&self, network_id: &str) -> Result<Vec<FirewallRule>> {
        let rows = sqlx::query("SELECT * FROM firewall_rules WHERE network_id = ? ORDER BY priority")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_firewall).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM firewall_rules WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// --------------------------------------------------------------- Route

#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub dest_range: String,
    pub priority: i64,
    pub next_hop_type: String,
    pub next_hop_value: Option<String>,
    pub tags: Vec<String>,
}

fn row_to_route(row: &sqlx::sqlite::SqliteRow) -> Route {
    let tags_json: String = row.get("tags_json");
    Route {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        dest_range: row.get("dest_range"),
        priority: row.get("priority"),
        next_hop_type: row.get("next_hop_type"),
        next_hop_value: row.get("next_hop_value"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    }
}

#[derive(Debug, Clone)]
pub struct RouteRepo {
    pool: SqlitePool,
}

impl RouteRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        dest_range: &str,
        priority: i64,
        next_hop_type: &str,
        next_hop_value: Option<&str>,
        tags: &[String],
    ) -> Result<Route> {
        if self.get_by_name(network_id, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("route {name}")));
        }
        let id = new_id("route");
        sqlx::query(
            "INSERT INTO routes (id, network_id, name, dest_range, priority, next_hop_type, next_hop_value, tags_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(dest_range)
        .bind(priority)
        .bind(next_hop_type)
        .bind(next_hop_value)
        .bind(serde_json::to_string(tags).unwrap())
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Route> {
        let row = sqlx::query("SELECT * FROM routes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("route {id}")))?;
        Ok(row_to_route(&row))
    }

    pub async fn get_by_name(&self, network_id: &str, name: &str) -> Result<Route> {
        let row = sqlx::query("SELECT * FROM routes WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("route {name}")))?;
        Ok(row_to_route(&row))
    }

    pub async fn list(&self, network_id: &str) -> Result<Vec<Route>> {
        let rows = sqlx::query("SELECT * FROM routes WHERE network_id = ? ORDER BY priority")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_route).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM routes WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// ------------------------------------------------------------- Peering

#[derive(Debug, Clone)]
pub struct VpcPeering {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub peer_network_id: String,
    pub state: String,
    pub auto_create_routes: bool,
    pub exchange_subnet_routes: bool,
}

fn row_to_peering(row: &sqlx::sqlite::SqliteRow) -> VpcPeering {
    VpcPeering {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        peer_network_id: row.get("peer_network_id"),
        state: row.get("state"),
        auto_create_routes: row.get::<i64, _>("auto_create_routes") != 0,
        exchange_subnet_routes: row.get::<i64, _>("exchange_subnet_routes") != 0,
    }
}

#[derive(Debug, Clone)]
pub struct PeeringRepo {
    pool: SqlitePool,
}

impl PeeringRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        peer_network_id: &str,
        auto_create_routes: bool,
        exchange_subnet_routes: bool,
    ) -> Result<VpcPeering> {
        let id = new_id("peering");
        sqlx::query(
            "INSERT INTO vpc_peerings (id, network_id, name, peer_network_id, auto_create_routes, exchange_subnet_routes) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(peer_network_id)
        .bind(auto_create_routes as i64)
        .bind(exchange_subnet_routes as i64)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<VpcPeering> {
        let row = sqlx::query("SELECT * FROM vpc_peerings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("peering {id}")))?;
        Ok(row_to_peering(&row))
    }

    pub async fn find_by_name(&self, network_id: &str, name: &str) -> Result<Option<VpcPeering>> {
        let row = sqlx::query("SELECT * FROM vpc_peerings WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_peering(&r)))
    }

    pub async fn find_by_peer(&self, network_id: &str, peer_network_id: &str) -> Result<Option<VpcPeering>> {
        let row = sqlx::query("SELECT * FROM vpc_peerings WHERE network_id = ? AND peer_network_id = ?")
            .bind(network_id)
            .bind(peer_network_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_peering(&r)))
    }

    pub async fn list(&self, network_id: &str) -> Result<Vec<VpcPeering>> {
        let rows = sqlx::query("SELECT * FROM vpc_peerings WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_peering).collect())
    }

    pub async fn delete_by_name(&self, network_id: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM vpc_peerings WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// -------------------------------------------------------------- Router

#[derive(Debug, Clone)]
pub struct Router {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub region: String,
    pub bgp_asn: i64,
    pub keepalive_sec: i64,
}

fn row_to_router(row: &sqlx::sqlite::SqliteRow) -> Router {
    Router {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        region: row.get("region"),
        bgp_asn: row.get("bgp_asn"),
        keepalive_sec: row.get("keepalive_sec"),
    }
}

#[derive(Debug, Clone)]
pub struct RouterRepo {
    pool: SqlitePool,
}

impl RouterRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        region: &str,
        bgp_asn: i64,
        keepalive_sec: i64,
    ) -> Result<Router> {
        if self.get_by_name(network_id, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("router {name}")));
        }
        let id = new_id("router");
        sqlx::query(
            "INSERT INTO routers (id, network_id, name, region, bgp_asn, keepalive_sec) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(region)
        .bind(bgp_asn)
        .bind(keepalive_sec)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Router> {
        let row = sqlx::query("SELECT * FROM routers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("router {id}")))?;
        Ok(row_to_router(&row))
    }

    pub async fn get_by_name(&self, network_id: &str, name: &str) -> Result<Router> {
        let row = sqlx::query("SELECT * FROM routers WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("router {name}")))?;
        Ok(row_to_router(&row))
    }

    pub async fn list(&self, network_id: &str, region: Option<&str>) -> Result<Vec<Router>> {
        let rows = if let Some(region) = region {
            sqlx::query("SELECT * FROM routers WHERE network_id = ? AND region = ?")
                .bind(network_id)
                .bind(region)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM routers WHERE network_id = ?").bind(network_id).fetch_all(&self.pool).await?
        };
        Ok(rows.iter().map(row_to_router).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM routers WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------- VPN Tunnel

#[derive(Debug, Clone)]
pub struct VpnTunnel {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub region: String,
    pub peer_ip: String,
    pub gateway_ip: String,
    pub shared_secret: String,
    pub status: String,
}

fn row_to_vpn(row: &sqlx::sqlite::SqliteRow) -> VpnTunnel {
    VpnTunnel {
        id: row.get("id"),
        network_id: row.get("network_id"),
        name: row.get("name"),
        region: row.get("region"),
        peer_ip: row.get("peer_ip"),
        gateway_ip: row.get("gateway_ip"),
        shared_secret: row.get("shared_secret"),
        status: row.get("status"),
    }
}

#[derive(Debug, Clone)]
pub struct VpnTunnelRepo {
    pool: SqlitePool,
}

impl VpnTunnelRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        network_id: &str,
        name: &str,
        region: &str,
        peer_ip: &str,
        gateway_ip: &str,
        shared_secret: &str,
    ) -> Result<VpnTunnel> {
        if self.get_by_name(network_id, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("VPN tunnel {name}")));
        }
        let id = new_id("vpn");
        sqlx::query(
            "INSERT INTO vpn_tunnels (id, network_id, name, region, peer_ip, gateway_ip, shared_secret, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'ESTABLISHED')",
        )
        .bind(&id)
        .bind(network_id)
        .bind(name)
        .bind(region)
        .bind(peer_ip)
        .bind(gateway_ip)
        .bind(shared_secret)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<VpnTunnel> {
        let row = sqlx::query("SELECT * FROM vpn_tunnels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("VPN tunnel {id}")))?;
        Ok(row_to_vpn(&row))
    }

    pub async fn get_by_name(&self, network_id: &str, name: &str) -> Result<VpnTunnel> {
        let row = sqlx::query("SELECT * FROM vpn_tunnels WHERE network_id = ? AND name = ?")
            .bind(network_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("VPN tunnel {name}")))?;
        Ok(row_to_vpn(&row))
    }

    pub async fn list(&self, network_id: &str) -> Result<Vec<VpnTunnel>> {
        let rows = sqlx::query("SELECT * FROM vpn_tunnels WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_vpn).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vpn_tunnels WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn network_and_subnet_round_trip() {
        let pool = pool().await;
        let networks = NetworkRepo::new(pool.clone());
        let subnets = SubnetRepo::new(pool.clone());

        let net = networks.create("p1", "default", true, RoutingMode::Regional, 1460).await.unwrap();
        let sub = subnets.create(&net.id, "default-us-central1", "us-central1", "10.128.0.0/20", "10.128.0.1").await.unwrap();
        assert_eq!(sub.next_ip_index, 2);

        subnets.advance_next_ip_index(&sub.id, 3).await.unwrap();
        let fetched = subnets.get_by_id(&sub.id).await.unwrap();
        assert_eq!(fetched.next_ip_index, 3);
    }

    #[tokio::test]
    async fn peering_uniqueness_constraints_are_enforced_by_service_not_repo() {
        let pool = pool().await;
        let networks = NetworkRepo::new(pool.clone());
        let peerings = PeeringRepo::new(pool.clone());

        let a = networks.create("p1", "a", false, RoutingMode::Regional, 1460).await.unwrap();
        let b = networks.create("p1", "b", false, RoutingMode::Regional, 1460).await.unwrap();

        peerings.create(&a.id, "a-to-b", &b.id, true, true).await.unwrap();
        assert!(peerings.find_by_name(&a.id, "a-to-b").await.unwrap().is_some());
    }
}
