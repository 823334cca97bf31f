//! Catalog — static machine-type, zone/region, and default-network tables
//! the compute orchestrator and VPC control plane validate inputs against.

/// Machine type name → (vcpu, memory_mb).
pub const MACHINE_TYPES: &[(&str, u32, u32)] = &[
    ("e2-micro", 2, 1024),
    ("e2-small", 2, 2048),
    ("e2-medium", 2, 4096),
    ("e2-standard-2", 2, 8192),
    ("e2-standard-4", 4, 16384),
    ("n2-standard-2", 2, 8192),
];

pub const ZONES: &[&str] = &[
    "us-central1-a",
    "us-central1-b",
    "us-east1-b",
    "europe-west1-b",
    "asia-east1-a",
];

/// Default regions a network auto-creates subnets in, with pre-assigned
/// CIDRs (one /20 per region, non-overlapping).
pub const DEFAULT_SUBNET_REGIONS: &[(&str, &str)] = &[
    ("us-central1", "10.128.0.0/20"),
    ("us-east1", "10.142.0.0/20"),
    ("europe-west1", "10.132.0.0/20"),
    ("asia-east1", "10.140.0.0/20"),
];

pub fn region_for_zone(zone: &str) -> Option<String> {
    zone.rsplit_once('-').map(|(region, _)| region.to_string())
}

pub fn machine_type_exists(name: &str) -> bool {
    MACHINE_TYPES.iter().any(|(n, _, _)| *n == name)
}

pub fn zone_exists(name: &str) -> bool {
    ZONES.contains(&name)
}

pub fn available_machine_types() -> String {
    MACHINE_TYPES.iter().map(|(n, _, _)| *n).collect::<Vec<_>>().join(", ")
}

pub fn available_zones() -> String {
    ZONES.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_for_zone_strips_suffix() {
        assert_eq!(region_for_zone("us-central1-a").unwrap(), "us-central1");
    }

    #[test]
    fn catalog_lookups() {
        assert!(machine_type_exists("e2-micro"));
        assert!(!machine_type_exists("bogus"));
        assert!(zone_exists("us-central1-a"));
        assert!(!zone_exists("mars-1"));
    }
}
