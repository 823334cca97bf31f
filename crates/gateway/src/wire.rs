//! Wire — response DTOs shaped like the provider's own JSON conventions:
//! a `kind` discriminator, a `selfLink`, millisecond RFC-3339 timestamps,
//! and string-typed 64-bit counters so JS number truncation never bites a
//! client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use emulator_core::compute::Instance;
use emulator_core::objectstore::{Bucket, BucketAcl, LifecycleAction, LifecycleConfig};
use emulator_core::repo::bucket::LifecycleRule;
use emulator_core::repo::compute::InstanceStatus;
use emulator_core::repo::iam::{ApiKey, Binding, IamPolicy, ServiceAccount, ServiceAccountKey};
use emulator_core::repo::object::{ObjectHead, ObjectVersion};
use emulator_core::repo::project::Project;
use emulator_core::repo::vpc::{
    Address, FirewallRule, Network, NetworkInterface, ProtocolEntry, RoutingMode, Route, Router, Subnetwork, VpcPeering,
    VpnTunnel,
};

/// Formats a timestamp the way the provider does: millisecond precision,
/// `Z` suffix, never a numeric offset.
pub fn rfc3339_millis(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub kind: &'static str,
    pub project_id: String,
    pub display_name: String,
    pub project_number: String,
    pub self_link: String,
    pub create_time: String,
}

impl From<Project> for ProjectDto {
    fn from(p: Project) -> Self {
        Self {
            kind: "resourcemanager#project",
            self_link: format!("/v1/projects/{}", p.id),
            project_id: p.id,
            display_name: p.display_name,
            project_number: p.project_number.to_string(),
            create_time: rfc3339_millis(p.created_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersioningDto {
    pub enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRuleDto {
    pub action: LifecycleActionDto,
    pub condition: LifecycleConditionDto,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleActionDto {
    #[serde(rename = "type")]
    pub action_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConditionDto {
    pub age: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleDto {
    pub rule: Vec<LifecycleRuleDto>,
}

impl From<LifecycleConfig> for LifecycleDto {
    fn from(cfg: LifecycleConfig) -> Self {
        Self { rule: cfg.rules.into_iter().map(lifecycle_rule_dto).collect() }
    }
}

fn lifecycle_rule_dto(rule: LifecycleRule) -> LifecycleRuleDto {
    let action_type = match rule.action {
        LifecycleAction::Delete => "Delete",
        LifecycleAction::Archive => "SetStorageClass",
    };
    LifecycleRuleDto { action: LifecycleActionDto { action_type }, condition: LifecycleConditionDto { age: rule.age_days } }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub self_link: String,
    pub location: String,
    pub storage_class: String,
    pub versioning: Option<VersioningDto>,
    pub lifecycle: Option<LifecycleDto>,
    pub labels: HashMap<String, String>,
    pub acl_policy: &'static str,
    pub time_created: String,
    pub updated: String,
}

impl From<Bucket> for BucketDto {
    fn from(b: Bucket) -> Self {
        Self {
            kind: "storage#bucket",
            self_link: format!("/storage/v1/b/{}", b.name),
            id: b.id,
            name: b.name,
            location: b.location,
            storage_class: b.storage_class,
            versioning: b.versioning_enabled.then_some(VersioningDto { enabled: true }),
            lifecycle: b.lifecycle.map(Into::into),
            labels: b.labels,
            acl_policy: match b.acl {
                BucketAcl::Private => "private",
                BucketAcl::PublicRead => "publicRead",
            },
            time_created: rfc3339_millis(b.created_at),
            updated: rfc3339_millis(b.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDto {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub name: String,
    pub bucket: String,
    pub generation: String,
    pub metageneration: String,
    pub content_type: String,
    pub size: String,
    pub md5_hash: String,
    pub crc32c: String,
    pub storage_class: String,
    pub metadata: HashMap<String, String>,
    pub time_created: String,
    pub updated: String,
}

impl ObjectDto {
    pub fn from_head(bucket_name: &str, head: ObjectHead) -> Self {
        Self {
            kind: "storage#object",
            id: format!("{bucket_name}/{}/{}", head.name, head.generation),
            self_link: format!("/storage/v1/b/{bucket_name}/o/{}", head.name),
            name: head.name,
            bucket: bucket_name.to_string(),
            generation: head.generation.to_string(),
            metageneration: head.metageneration.to_string(),
            content_type: head.content_type,
            size: head.size.to_string(),
            md5_hash: head.md5,
            crc32c: head.crc32c,
            storage_class: head.storage_class,
            metadata: head.custom_metadata,
            time_created: rfc3339_millis(head.time_created),
            updated: rfc3339_millis(head.updated_at),
        }
    }

    pub fn from_version(bucket_name: &str, version: ObjectVersion) -> Self {
        Self {
            kind: "storage#object",
            id: format!("{bucket_name}/{}/{}", version.name, version.generation),
            self_link: format!("/storage/v1/b/{bucket_name}/o/{}", version.name),
            name: version.name,
            bucket: bucket_name.to_string(),
            generation: version.generation.to_string(),
            metageneration: version.metageneration.to_string(),
            content_type: version.content_type,
            size: version.size.to_string(),
            md5_hash: version.md5,
            crc32c: version.crc32c,
            storage_class: version.storage_class,
            metadata: version.custom_metadata,
            time_created: rfc3339_millis(version.created_at),
            updated: rfc3339_millis(version.created_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectListDto {
    pub kind: &'static str,
    pub items: Vec<ObjectDto>,
    pub prefixes: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigDto {
    pub kind: &'static str,
    #[serde(rename = "type")]
    pub config_type: &'static str,
    pub nat_ip: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceDto {
    pub network: String,
    pub subnetwork: String,
    pub network_ip: String,
    pub access_configs: Vec<AccessConfigDto>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDto {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub status: &'static str,
    pub network_interfaces: Vec<NetworkInterfaceDto>,
    pub metadata: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub tags: Vec<String>,
    pub creation_timestamp: String,
}

impl InstanceDto {
    pub fn from_instance(project_id: &str, instance: Instance) -> Self {
        let access_configs = instance
            .external_ip
            .as_ref()
            .map(|ip| vec![AccessConfigDto { kind: "compute#accessConfig", config_type: "ONE_TO_ONE_NAT", nat_ip: ip.clone() }])
            .unwrap_or_default();
        Self {
            kind: "compute#instance",
            self_link: format!(
                "/compute/v1/projects/{project_id}/zones/{}/instances/{}",
                instance.zone, instance.name
            ),
            id: instance.id,
            zone: instance.zone.clone(),
            machine_type: instance.machine_type,
            status: instance_status_str(instance.status),
            network_interfaces: vec![NetworkInterfaceDto {
                network: instance.network_id,
                subnetwork: instance.subnet_id,
                network_ip: instance.internal_ip.unwrap_or_default(),
                access_configs,
            }],
            metadata: instance.metadata,
            labels: instance.labels,
            tags: instance.tags,
            creation_timestamp: rfc3339_millis(instance.created_at),
            name: instance.name,
        }
    }
}

fn instance_status_str(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Provisioning => "PROVISIONING",
        InstanceStatus::Running => "RUNNING",
        InstanceStatus::Stopping => "STOPPING",
        InstanceStatus::Stopped => "STOPPED",
        InstanceStatus::Terminated => "TERMINATED",
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDto {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub name: String,
    pub auto_create_subnetworks: bool,
    pub routing_config: RoutingConfigDto,
    pub mtu: i64,
    pub creation_timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfigDto {
    pub routing_mode: &'static str,
}

impl From<Network> for NetworkDto {
    fn from(n: Network) -> Self {
        Self {
            kind: "compute#network",
            self_link: format!("/compute/v1/projects/{}/global/networks/{}", n.project_id, n.name),
            id: n.id,
            name: n.name,
            auto_create_subnetworks: n.auto_create_subnets,
            routing_config: RoutingConfigDto {
                routing_mode: match n.routing_mode {
                    RoutingMode::Regional => "REGIONAL",
                    RoutingMode::Global => "GLOBAL",
                },
            },
            mtu: n.mtu,
            creation_timestamp: rfc3339_millis(n.created_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetworkDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub region: String,
    pub ip_cidr_range: String,
    pub gateway_address: String,
    pub private_ip_google_access: bool,
}

impl From<Subnetwork> for SubnetworkDto {
    fn from(s: Subnetwork) -> Self {
        Self {
            kind: "compute#subnetwork",
            id: s.id,
            network: s.network_id,
            name: s.name,
            region: s.region,
            ip_cidr_range: s.cidr,
            gateway_address: s.gateway_ip,
            private_ip_google_access: s.private_google_access,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NicDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub subnetwork: String,
    pub network_ip: String,
}

impl From<NetworkInterface> for NicDto {
    fn from(n: NetworkInterface) -> Self {
        Self { kind: "compute#networkInterface", id: n.id, name: n.name, network: n.network_id, subnetwork: n.subnet_id, network_ip: n.internal_ip }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressDto {
    pub kind: &'static str,
    pub id: String,
    pub name: Option<String>,
    pub address: String,
    pub region: String,
    pub status: &'static str,
    pub network_tier: String,
    pub users: Vec<String>,
}

impl From<Address> for AddressDto {
    fn from(a: Address) -> Self {
        Self {
            kind: "compute#address",
            id: a.id,
            name: a.name,
            address: a.ip,
            region: a.region,
            status: match a.status {
                emulator_core::repo::vpc::AddressStatus::Reserved => "RESERVED",
                emulator_core::repo::vpc::AddressStatus::InUse => "IN_USE",
            },
            network_tier: a.network_tier,
            users: a.user_instance_id.into_iter().collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedDto {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub ports: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub priority: i64,
    pub direction: String,
    pub allowed: Vec<AllowedDto>,
    pub source_ranges: Vec<String>,
    pub destination_ranges: Vec<String>,
    pub source_tags: Vec<String>,
    pub target_tags: Vec<String>,
}

impl From<FirewallRule> for FirewallDto {
    fn from(f: FirewallRule) -> Self {
        Self {
            kind: "compute#firewall",
            id: f.id,
            name: f.name,
            network: f.network_id,
            priority: f.priority,
            direction: f.direction,
            allowed: f.protocols.into_iter().map(protocol_dto).collect(),
            source_ranges: f.source_ranges,
            destination_ranges: f.dest_ranges,
            source_tags: f.source_tags,
            target_tags: f.target_tags,
        }
    }
}

fn protocol_dto(p: ProtocolEntry) -> AllowedDto {
    AllowedDto { ip_protocol: p.proto, ports: p.ports }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub dest_range: String,
    pub priority: i64,
    pub next_hop_type: String,
    pub next_hop_value: Option<String>,
    pub tags: Vec<String>,
}

impl From<Route> for RouteDto {
    fn from(r: Route) -> Self {
        Self {
            kind: "compute#route",
            id: r.id,
            name: r.name,
            network: r.network_id,
            dest_range: r.dest_range,
            priority: r.priority,
            next_hop_type: r.next_hop_type,
            next_hop_value: r.next_hop_value,
            tags: r.tags,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub peer_network: String,
    pub state: String,
    pub auto_create_routes: bool,
    pub exchange_subnet_routes: bool,
}

impl From<VpcPeering> for PeeringDto {
    fn from(p: VpcPeering) -> Self {
        Self {
            kind: "compute#networkPeering",
            id: p.id,
            name: p.name,
            network: p.network_id,
            peer_network: p.peer_network_id,
            state: p.state,
            auto_create_routes: p.auto_create_routes,
            exchange_subnet_routes: p.exchange_subnet_routes,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub region: String,
    pub bgp: RouterBgpDto,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterBgpDto {
    pub asn: i64,
    pub keepalive_interval: i64,
}

impl From<Router> for RouterDto {
    fn from(r: Router) -> Self {
        Self {
            kind: "compute#router",
            id: r.id,
            name: r.name,
            network: r.network_id,
            region: r.region,
            bgp: RouterBgpDto { asn: r.bgp_asn, keepalive_interval: r.keepalive_sec },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnTunnelDto {
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub network: String,
    pub region: String,
    pub peer_ip: String,
    pub gateway_ip: String,
    pub status: String,
}

impl From<VpnTunnel> for VpnTunnelDto {
    fn from(t: VpnTunnel) -> Self {
        Self {
            kind: "compute#vpnTunnel",
            id: t.id,
            name: t.name,
            network: t.network_id,
            region: t.region,
            peer_ip: t.peer_ip,
            gateway_ip: t.gateway_ip,
            status: t.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountDto {
    pub kind: &'static str,
    pub name: String,
    pub project_id: String,
    pub unique_id: String,
    pub email: String,
    pub display_name: String,
    pub disabled: bool,
}

impl From<ServiceAccount> for ServiceAccountDto {
    fn from(sa: ServiceAccount) -> Self {
        Self {
            kind: "iam#serviceAccount",
            name: format!("projects/{}/serviceAccounts/{}", sa.project_id, sa.email),
            project_id: sa.project_id,
            unique_id: sa.unique_id,
            email: sa.email,
            display_name: sa.display_name,
            disabled: sa.disabled,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKeyDto {
    pub name: String,
    pub private_key_data: String,
    pub private_key_type: &'static str,
    pub key_algorithm: String,
    pub valid_after_time: String,
    pub valid_before_time: String,
    pub disabled: bool,
}

impl From<ServiceAccountKey> for ServiceAccountKeyDto {
    fn from(k: ServiceAccountKey) -> Self {
        Self {
            name: format!("projects/-/serviceAccounts/{}/keys/{}", k.service_account_email, k.id),
            private_key_data: k.private_key_data,
            private_key_type: "TYPE_GOOGLE_CREDENTIALS_FILE",
            key_algorithm: k.key_algorithm,
            valid_after_time: rfc3339_millis(k.valid_after),
            valid_before_time: rfc3339_millis(k.valid_before),
            disabled: k.disabled,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingDto {
    pub role: String,
    pub members: Vec<String>,
}

impl From<Binding> for BindingDto {
    fn from(b: Binding) -> Self {
        Self { role: b.role, members: b.members }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDto {
    pub version: i64,
    pub etag: String,
    pub bindings: Vec<BindingDto>,
}

impl From<IamPolicy> for PolicyDto {
    fn from(p: IamPolicy) -> Self {
        Self { version: p.version, etag: p.etag, bindings: p.bindings.into_iter().map(Into::into).collect() }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyDto {
    pub kind: &'static str,
    pub id: String,
    pub name: Option<String>,
    pub project_id: String,
    pub create_time: String,
    pub expire_time: Option<String>,
    pub disabled: bool,
}

impl From<ApiKey> for ApiKeyDto {
    fn from(k: ApiKey) -> Self {
        Self {
            kind: "apikeys#key",
            id: k.id,
            name: k.name,
            project_id: k.project_id,
            create_time: rfc3339_millis(k.created_at),
            expire_time: k.expires_at.map(rfc3339_millis),
            disabled: k.disabled,
        }
    }
}

#[derive(Serialize)]
pub struct TokenResponseDto {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoDto {
    pub sub: String,
    pub email: String,
}
