//! Iam — service accounts/keys, resource IAM policies, and the bearer-token
//! and API-key mechanics the request pipeline's auth stage (§4.4) relies on
//! to establish caller identity before permission enforcement runs.

pub mod accounts;
pub mod policy;
pub mod tokens;

use std::sync::Arc;

use dashmap::DashSet;

use crate::clock::Clock;
use crate::repo::{ApiKeyRepo, IamPolicyRepo, ServiceAccountKeyRepo, ServiceAccountRepo};

#[derive(Clone)]
pub struct IamService {
    pub(crate) accounts: ServiceAccountRepo,
    pub(crate) keys: ServiceAccountKeyRepo,
    pub(crate) policies: IamPolicyRepo,
    pub(crate) api_keys: ApiKeyRepo,
    pub(crate) clock: Arc<dyn Clock>,
    /// Shared secret for bearer-token HMAC signing and verification.
    pub(crate) token_secret: String,
    /// Process-local revocation set for `/token/revoke`, keyed by the
    /// token's signature (unique per mint, cheaper to key on than the full
    /// token string). Not persisted: a restart clears every revocation
    /// along with every minted token, which is consistent with this
    /// emulator's opaque, non-durable bearer tokens.
    pub(crate) revoked: Arc<DashSet<String>>,
}

impl IamService {
    pub fn new(
        accounts: ServiceAccountRepo,
        keys: ServiceAccountKeyRepo,
        policies: IamPolicyRepo,
        api_keys: ApiKeyRepo,
        clock: Arc<dyn Clock>,
        token_secret: String,
    ) -> Self {
        Self { accounts, keys, policies, api_keys, clock, token_secret, revoked: Arc::new(DashSet::new()) }
    }
}

pub use policy::Principal;
