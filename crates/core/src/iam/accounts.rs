//! Service account and service-account-key lifecycle.

use crate::error::Result;
use crate::repo::iam::{ServiceAccount, ServiceAccountKey};

use super::IamService;

fn random_key_material() -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 256];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

impl IamService {
    pub async fn create_service_account(
        &self,
        project_id: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        self.accounts.create(project_id, account_id, display_name).await
    }

    pub async fn get_service_account(&self, email: &str) -> Result<ServiceAccount> {
        self.accounts.get_by_email(email).await
    }

    pub async fn list_service_accounts(&self, project_id: &str) -> Result<Vec<ServiceAccount>> {
        self.accounts.list(project_id).await
    }

    pub async fn set_service_account_disabled(&self, email: &str, disabled: bool) -> Result<()> {
        self.accounts.set_disabled(email, disabled).await
    }

    pub async fn delete_service_account(&self, email: &str) -> Result<()> {
        self.accounts.delete(email).await
    }

    /// Mints a synthetic RSA-shaped key blob; this emulator never performs
    /// real cryptographic signing on a service account's behalf (§1
    /// non-goals), so the "private key" is opaque random material good
    /// only for round-tripping through the wire API.
    pub async fn create_service_account_key(&self, service_account_email: &str) -> Result<ServiceAccountKey> {
        self.accounts.get_by_email(service_account_email).await?;
        let material = random_key_material();
        self.keys.create(service_account_email, &material).await
    }

    pub async fn list_service_account_keys(&self, service_account_email: &str) -> Result<Vec<ServiceAccountKey>> {
        self.keys.list(service_account_email).await
    }

    pub async fn delete_service_account_key(&self, key_id: &str) -> Result<()> {
        self.keys.delete(key_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
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
    async fn create_and_list_service_account_keys() {
        let svc = service().await;
        let sa = svc.create_service_account("p1", "worker", "Worker").await.unwrap();
        svc.create_service_account_key(&sa.email).await.unwrap();
        let keys = svc.list_service_account_keys(&sa.email).await.unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn key_creation_requires_existing_account() {
        let svc = service().await;
        let err = svc.create_service_account_key("nobody@p1.iam.gserviceaccount.com").await;
        assert!(err.is_err());
    }
}
