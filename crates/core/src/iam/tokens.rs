//! Bearer tokens and API keys — the two credential shapes the pipeline's
//! auth stage accepts (§4.4). Per the design notes, the mocked OAuth
//! surface needs nothing beyond HMAC: a bearer token is a base64url JSON
//! claims blob plus an HMAC-SHA256 tag, not a standards-compliant JWT.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::repo::iam::ApiKey;

use super::IamService;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
}

fn sign(secret: &str, payload_b64: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload_b64.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn random_token(prefix: &str) -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
}

impl IamService {
    /// Issues an opaque bearer token for `subject`, valid for `ttl_secs`.
    pub fn issue_bearer_token(&self, subject: &str, ttl_secs: i64) -> String {
        let claims = TokenClaims { sub: subject.to_string(), exp: self.clock.now().timestamp() + ttl_secs };
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let sig = sign(&self.token_secret, &payload_b64);
        format!("{payload_b64}.{sig}")
    }

    /// Validates a bearer token's signature and expiry, returning its
    /// claims. Limited to expiry + shared-secret HMAC per the design notes
    /// — there is no externally-issued JWT to interoperate with here.
    pub fn verify_bearer_token(&self, token: &str) -> Result<TokenClaims> {
        let (payload_b64, sig) =
            token.split_once('.').ok_or_else(|| Error::Unauthenticated("malformed bearer token".to_string()))?;

        let expected = sign(&self.token_secret, payload_b64);
        if !constant_time_eq(sig, &expected) {
            return Err(Error::Unauthenticated("bearer token signature mismatch".to_string()));
        }

        if self.revoked.contains(sig) {
            return Err(Error::Unauthenticated("bearer token revoked".to_string()));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| Error::Unauthenticated("malformed bearer token payload".to_string()))?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| Error::Unauthenticated("malformed bearer token claims".to_string()))?;

        if self.clock.now().timestamp() > claims.exp {
            return Err(Error::Unauthenticated("bearer token expired".to_string()));
        }
        Ok(claims)
    }

    /// Marks a bearer token invalid for the rest of this process's
    /// lifetime. A malformed token is rejected the same way `verify` would
    /// reject it, rather than silently accepted into the revocation set.
    pub fn revoke_bearer_token(&self, token: &str) -> Result<()> {
        let (_, sig) =
            token.split_once('.').ok_or_else(|| Error::Unauthenticated("malformed bearer token".to_string()))?;
        self.revoked.insert(sig.to_string());
        Ok(())
    }

    /// Mints a fresh API key, returning the one-time raw secret alongside
    /// the persisted record (only the hash is stored).
    pub async fn create_api_key(
        &self,
        project_id: &str,
        name: Option<&str>,
        ttl_secs: Option<i64>,
    ) -> Result<(ApiKey, String)> {
        let raw = random_token("emukey");
        let hash = hash_api_key(&raw);
        let expires_at = ttl_secs.map(|secs| self.clock.now() + chrono::Duration::seconds(secs));
        let record = self.api_keys.create(project_id, &hash, name, expires_at).await?;
        Ok((record, raw))
    }

    /// Resolves a raw API key header value to its record, rejecting
    /// disabled or expired keys.
    pub async fn verify_api_key(&self, raw: &str) -> Result<ApiKey> {
        let hash = hash_api_key(raw);
        let key = self.api_keys.get_by_hash(&hash).await?;
        if key.disabled {
            return Err(Error::Unauthenticated("API key disabled".to_string()));
        }
        if let Some(expires_at) = key.expires_at {
            if self.clock.now() > expires_at {
                return Err(Error::Unauthenticated("API key expired".to_string()));
            }
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::{FixedClock, SystemClock};
    use crate::repo::{ApiKeyRepo, IamPolicyRepo, ServiceAccountKeyRepo, ServiceAccountRepo};

    use super::*;

    async fn service() -> IamService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        IamService::new(
            ServiceAccountRepo::new(pool.clone()),
            ServiceAccountKeyRepo::new(pool.clone()),
            IamPolicyRepo::new(pool.clone()),
            ApiKeyRepo::new(pool.clone()),
            Arc::new(SystemClock),
            "test-secret".to_string(),
        )
    }

    #[tokio::test]
    async fn bearer_token_round_trips() {
        let svc = service().await;
        let token = svc.issue_bearer_token("user:a@example.com", 300);
        let claims = svc.verify_bearer_token(&token).unwrap();
        assert_eq!(claims.sub, "user:a@example.com");
    }

    #[tokio::test]
    async fn tampered_bearer_token_rejected() {
        let svc = service().await;
        let mut token = svc.issue_bearer_token("user:a@example.com", 300);
        token.push('x');
        assert!(svc.verify_bearer_token(&token).is_err());
    }

    #[tokio::test]
    async fn expired_bearer_token_rejected() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let now = chrono::Utc::now();
        let svc = IamService::new(
            ServiceAccountRepo::new(pool.clone()),
            ServiceAccountKeyRepo::new(pool.clone()),
            IamPolicyRepo::new(pool.clone()),
            ApiKeyRepo::new(pool.clone()),
            Arc::new(FixedClock(now)),
            "test-secret".to_string(),
        );
        let token = svc.issue_bearer_token("user:a@example.com", 10);

        let later = IamService::new(
            ServiceAccountRepo::new(pool.clone()),
            ServiceAccountKeyRepo::new(pool.clone()),
            IamPolicyRepo::new(pool.clone()),
            ApiKeyRepo::new(pool.clone()),
            Arc::new(FixedClock(now + chrono::Duration::seconds(20))),
            "test-secret".to_string(),
        );
        assert!(later.verify_bearer_token(&token).is_err());
    }

    #[tokio::test]
    async fn revoked_bearer_token_rejected() {
        let svc = service().await;
        let token = svc.issue_bearer_token("user:a@example.com", 300);
        svc.verify_bearer_token(&token).unwrap();
        svc.revoke_bearer_token(&token).unwrap();
        assert!(svc.verify_bearer_token(&token).is_err());
    }

    #[tokio::test]
    async fn api_key_round_trips_and_rejects_disabled() {
        let svc = service().await;
        let (record, raw) = svc.create_api_key("p1", Some("ci"), None).await.unwrap();
        let fetched = svc.verify_api_key(&raw).await.unwrap();
        assert_eq!(fetched.id, record.id);

        svc.api_keys.set_disabled(&record.id, true).await.unwrap();
        assert!(svc.verify_api_key(&raw).await.is_err());
    }
}
