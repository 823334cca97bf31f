//! Repo — typed repositories over the metadata store. Each module owns one
//! family of tables and exposes plain async methods using `sqlx::query`/
//! `query_as` with `.bind()` — no compile-time-checked `query!` macros,
//! since there is no live database available while writing this crate.

pub mod project;
pub mod bucket;
pub mod object;
pub mod compute;
pub mod vpc;
pub mod iam;

pub use project::ProjectRepo;
pub use bucket::BucketRepo;
pub use object::{ObjectRepo, ResumableSessionRepo, ObjectEventRepo};
pub use compute::InstanceRepo;
pub use vpc::{
    NetworkRepo, SubnetRepo, NicRepo, AddressRepo, FirewallRepo, RouteRepo, PeeringRepo, RouterRepo,
    VpnTunnelRepo,
};
pub use iam::{ServiceAccountRepo, ServiceAccountKeyRepo, IamPolicyRepo, ApiKeyRepo};
