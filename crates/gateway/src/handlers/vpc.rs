//! Networks, subnetworks, firewalls, routes, peering, addresses, routers and
//! VPN tunnels — the metadata-only VPC control plane layered over the
//! container fabric each network is backed by.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use emulator_core::repo::vpc::{ProtocolEntry, RoutingMode};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{is_ipv4_addr, is_ipv4_cidr, is_rfc1035_label, Validator};
use crate::wire::{
    AddressDto, FirewallDto, NetworkDto, NicDto, PeeringDto, RouteDto, RouterDto, SubnetworkDto, VpnTunnelDto,
};

async fn resolve_network(
    state: &AppState,
    project_id: &str,
    name: &str,
) -> Result<emulator_core::repo::vpc::Network, ApiError> {
    state.vpc.get_network(project_id, name).await.map_err(ApiError::Core)
}

// ---- networks ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkRequest {
    name: String,
    #[serde(default = "default_true")]
    auto_create_subnetworks: bool,
    #[serde(default)]
    routing_config: Option<RoutingConfigRequest>,
    #[serde(default = "default_mtu")]
    mtu: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfigRequest {
    routing_mode: String,
}

fn default_true() -> bool {
    true
}

fn default_mtu() -> i64 {
    1460
}

pub async fn create_network(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateNetworkRequest>,
) -> ApiResult<impl IntoResponse> {
    let routing_mode = match body.routing_config.as_ref().map(|r| r.routing_mode.as_str()) {
        Some("GLOBAL") => RoutingMode::Global,
        _ => RoutingMode::Regional,
    };
    let network = state
        .vpc
        .create_network(&project_id, &body.name, body.auto_create_subnetworks, routing_mode, body.mtu)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(NetworkDto::from(network))))
}

pub async fn get_network(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &name).await?;
    Ok(Json(NetworkDto::from(network)))
}

pub async fn list_networks(State(state): State<AppState>, Path(project_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let networks = state.vpc.list_networks(&project_id).await.map_err(ApiError::Core)?;
    let items: Vec<NetworkDto> = networks.into_iter().map(NetworkDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#networkList", "items": items })))
}

pub async fn delete_network(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &name).await?;
    state.vpc.delete_network(&network.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- subnetworks ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubnetworkRequest {
    name: String,
    network: String,
    ip_cidr_range: String,
}

pub async fn create_subnetwork(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
    Json(body): Json<CreateSubnetworkRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new().check("ipCidrRange", is_ipv4_cidr(&body.ip_cidr_range), "must be a valid IPv4 CIDR").finish()?;
    let network = resolve_network(&state, &project_id, &body.network).await?;
    let subnet = state
        .vpc
        .create_subnet(&network.id, &body.name, &region, &body.ip_cidr_range)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(SubnetworkDto::from(subnet))))
}

#[derive(Deserialize)]
pub struct NetworkQuery {
    network: String,
}

pub async fn get_subnetwork(
    State(state): State<AppState>,
    Path((project_id, _region, name)): Path<(String, String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let subnet = state.vpc.get_subnet(&network.id, &name).await.map_err(ApiError::Core)?;
    Ok(Json(SubnetworkDto::from(subnet)))
}

pub async fn list_subnetworks(
    State(state): State<AppState>,
    Path((project_id, _region)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let subnets = state.vpc.list_subnets(&network.id).await.map_err(ApiError::Core)?;
    let items: Vec<SubnetworkDto> = subnets.into_iter().map(SubnetworkDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#subnetworkList", "items": items })))
}

// ---- firewalls ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRequest {
    #[serde(rename = "IPProtocol")]
    ip_protocol: String,
    #[serde(default)]
    ports: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFirewallRequest {
    name: String,
    network: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(default = "default_action")]
    action: String,
    #[serde(default)]
    allowed: Vec<AllowedRequest>,
    #[serde(default)]
    source_ranges: Vec<String>,
    #[serde(default)]
    destination_ranges: Vec<String>,
    #[serde(default)]
    source_tags: Vec<String>,
    #[serde(default)]
    target_tags: Vec<String>,
}

fn default_priority() -> i64 {
    1000
}

fn default_direction() -> String {
    "INGRESS".to_string()
}

fn default_action() -> String {
    "ALLOW".to_string()
}

pub async fn create_firewall(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateFirewallRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &body.network).await?;
    let protocols =
        body.allowed.into_iter().map(|a| ProtocolEntry { proto: a.ip_protocol.to_lowercase(), ports: a.ports }).collect();
    let rule = state
        .vpc
        .create_firewall_rule(
            &network.id,
            &body.name,
            body.priority,
            &body.direction,
            &body.action,
            protocols,
            body.source_ranges,
            body.destination_ranges,
            body.source_tags,
            body.target_tags,
        )
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(FirewallDto::from(rule))))
}

pub async fn get_firewall(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let rule = state.vpc.get_firewall_rule(&network.id, &name).await.map_err(ApiError::Core)?;
    Ok(Json(FirewallDto::from(rule)))
}

pub async fn list_firewalls(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let rules = state.vpc.list_firewall_rules(&network.id).await.map_err(ApiError::Core)?;
    let items: Vec<FirewallDto> = rules.into_iter().map(FirewallDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#firewallList", "items": items })))
}

pub async fn delete_firewall(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let rule = state.vpc.get_firewall_rule(&network.id, &name).await.map_err(ApiError::Core)?;
    state.vpc.delete_firewall_rule(&rule.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- routes ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRouteRequest {
    name: String,
    network: String,
    dest_range: String,
    #[serde(default = "default_priority")]
    priority: i64,
    next_hop_type: String,
    #[serde(default)]
    next_hop_value: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub async fn create_route(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateRouteRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &body.network).await?;
    let route = state
        .vpc
        .create_route(
            &network.id,
            &body.name,
            &body.dest_range,
            body.priority,
            &body.next_hop_type,
            body.next_hop_value.as_deref(),
            body.tags,
        )
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(RouteDto::from(route))))
}

pub async fn get_route(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let route = state.vpc.get_route(&network.id, &name).await.map_err(ApiError::Core)?;
    Ok(Json(RouteDto::from(route)))
}

pub async fn list_routes(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let routes = state.vpc.list_routes(&network.id).await.map_err(ApiError::Core)?;
    let items: Vec<RouteDto> = routes.into_iter().map(RouteDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#routeList", "items": items })))
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let route = state.vpc.get_route(&network.id, &name).await.map_err(ApiError::Core)?;
    state.vpc.delete_route(&route.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- peering ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPeeringRequest {
    name: String,
    peer_network: String,
    #[serde(default = "default_true")]
    auto_create_routes: bool,
    #[serde(default = "default_true")]
    exchange_subnet_routes: bool,
}

pub async fn add_peering(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Json(body): Json<AddPeeringRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &name).await?;
    let peer = resolve_network(&state, &project_id, &body.peer_network).await?;
    let peering = state
        .vpc
        .create_peering(&network.id, &body.name, &peer.id, body.auto_create_routes, body.exchange_subnet_routes)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(PeeringDto::from(peering))))
}

#[derive(Deserialize)]
pub struct RemovePeeringRequest {
    name: String,
}

pub async fn remove_peering(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
    Json(body): Json<RemovePeeringRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &name).await?;
    state.vpc.delete_peering(&network.id, &body.name).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_peerings(
    State(state): State<AppState>,
    Path((project_id, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &name).await?;
    let peerings = state.vpc.list_peerings(&network.id).await.map_err(ApiError::Core)?;
    let items: Vec<PeeringDto> = peerings.into_iter().map(PeeringDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#networkPeeringList", "items": items })))
}

// ---- addresses ----

#[derive(Deserialize)]
pub struct ReserveAddressRequest {
    name: String,
}

pub async fn reserve_address(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
    Json(body): Json<ReserveAddressRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new().check("name", is_rfc1035_label(&body.name), "must be a valid address name").finish()?;
    let addr = state.vpc.reserve_address(&project_id, &region, &body.name).await.map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(AddressDto::from(addr))))
}

pub async fn get_address(
    State(state): State<AppState>,
    Path((project_id, region, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let addr = state.vpc.get_address(&project_id, &region, &name).await.map_err(ApiError::Core)?;
    Ok(Json(AddressDto::from(addr)))
}

pub async fn list_addresses(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let addresses = state.vpc.list_addresses(&project_id, &region).await.map_err(ApiError::Core)?;
    let items: Vec<AddressDto> = addresses.into_iter().map(AddressDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#addressList", "items": items })))
}

pub async fn delete_address(
    State(state): State<AppState>,
    Path((project_id, region, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let addr = state.vpc.get_address(&project_id, &region, &name).await.map_err(ApiError::Core)?;
    state.vpc.release_address(&addr.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- routers & VPN tunnels ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRouterRequest {
    name: String,
    network: String,
    #[serde(default)]
    bgp: Option<RouterBgpRequest>,
}

#[derive(Deserialize)]
pub struct RouterBgpRequest {
    asn: i64,
}

pub async fn create_router(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
    Json(body): Json<CreateRouterRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &body.network).await?;
    let asn = body.bgp.map(|b| b.asn).unwrap_or(64512);
    let router = state.vpc.create_router(&network.id, &body.name, &region, asn).await.map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(RouterDto::from(router))))
}

pub async fn get_router(
    State(state): State<AppState>,
    Path((project_id, _region, name)): Path<(String, String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let router = state.vpc.get_router(&network.id, &name).await.map_err(ApiError::Core)?;
    Ok(Json(RouterDto::from(router)))
}

pub async fn list_routers(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let routers = state.vpc.list_routers(&network.id, Some(&region)).await.map_err(ApiError::Core)?;
    let items: Vec<RouterDto> = routers.into_iter().map(RouterDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#routerList", "items": items })))
}

pub async fn delete_router(
    State(state): State<AppState>,
    Path((project_id, _region, name)): Path<(String, String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let router = state.vpc.get_router(&network.id, &name).await.map_err(ApiError::Core)?;
    state.vpc.delete_router(&router.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVpnTunnelRequest {
    name: String,
    network: String,
    peer_ip: String,
    shared_secret: String,
}

pub async fn create_vpn_tunnel(
    State(state): State<AppState>,
    Path((project_id, region)): Path<(String, String)>,
    Json(body): Json<CreateVpnTunnelRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new().check("peerIp", is_ipv4_addr(&body.peer_ip), "must be a valid IPv4 address").finish()?;
    let network = resolve_network(&state, &project_id, &body.network).await?;
    let tunnel = state
        .vpc
        .create_vpn_tunnel(&network.id, &body.name, &region, &body.peer_ip, &body.shared_secret)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(VpnTunnelDto::from(tunnel))))
}

pub async fn list_vpn_tunnels(
    State(state): State<AppState>,
    Path((project_id, _region)): Path<(String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let tunnels = state.vpc.list_vpn_tunnels(&network.id).await.map_err(ApiError::Core)?;
    let items: Vec<VpnTunnelDto> = tunnels.into_iter().map(VpnTunnelDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#vpnTunnelList", "items": items })))
}

pub async fn delete_vpn_tunnel(
    State(state): State<AppState>,
    Path((project_id, _region, name)): Path<(String, String, String)>,
    Query(q): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let network = resolve_network(&state, &project_id, &q.network).await?;
    let tunnel = state.vpc.get_vpn_tunnel(&network.id, &name).await.map_err(ApiError::Core)?;
    state.vpc.delete_vpn_tunnel(&tunnel.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- NICs (read-only, nested under instances) ----

pub async fn list_nics(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    let nics = state.vpc.list_nics(&instance.id).await.map_err(ApiError::Core)?;
    let items: Vec<NicDto> = nics.into_iter().map(NicDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#networkInterfaceList", "items": items })))
}
