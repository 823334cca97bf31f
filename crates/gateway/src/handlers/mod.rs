//! Handlers — one module per wire-format resource family, mirroring the
//! API families enumerated in the external-interfaces section: storage,
//! compute, VPC, IAM, OAuth, and resource-manager projects.

pub mod compute;
pub mod iam;
pub mod oauth;
pub mod projects;
pub mod storage;
pub mod vpc;
