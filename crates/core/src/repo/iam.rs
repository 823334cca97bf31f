//! IAM repositories — service accounts, service account keys, IAM policies,
//! and API keys.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::ids::new_id;

use super::project::parse_ts;

// -------------------------------------------------------- Service Account

#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub email: String,
    pub project_id: String,
    pub display_name: String,
    pub unique_id: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> ServiceAccount {
    ServiceAccount {
        email: row.get("email"),
        project_id: row.get("project_id"),
        display_name: row.get("display_name"),
        unique_id: row.get("unique_id"),
        disabled: row.get::<i64, _>("disabled") != 0,
        created_at: parse_ts(row.get("created_at")),
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAccountRepo {
    pool: SqlitePool,
}

impl ServiceAccountRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project_id: &str, account_id: &str, display_name: &str) -> Result<ServiceAccount> {
        let email = format!("{account_id}@{project_id}.iam.gserviceaccount.com");
        if self.get_by_email(&email).await.is_ok() {
            return Err(Error::AlreadyExists(format!("service account {email}")));
        }
        let unique_id = new_id("sa").replace("sa-", "");
        sqlx::query(
            "INSERT INTO service_accounts (email, project_id, display_name, unique_id, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&email)
        .bind(project_id)
        .bind(display_name)
        .bind(&unique_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.get_by_email(&email).await
    }

    pub async fn get_by_email(&self, email: &str) -> Result<ServiceAccount> {
        let row = sqlx::query("SELECT * FROM service_accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("service account {email}")))?;
        Ok(row_to_account(&row))
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<ServiceAccount>> {
        let rows = sqlx::query("SELECT * FROM service_accounts WHERE project_id = ? ORDER BY email")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_account).collect())
    }

    pub async fn set_disabled(&self, email: &str, disabled: bool) -> Result<()> {
        sqlx::query("UPDATE service_accounts SET disabled = ? WHERE email = ?")
            .bind(disabled as i64)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM service_accounts WHERE email = ?").bind(email).execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------- Service Account Key

#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub id: String,
    pub service_account_email: String,
    pub private_key_data: String,
    pub key_algorithm: String,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
    pub disabled: bool,
}

fn row_to_key(row: &sqlx::sqlite::SqliteRow) -> ServiceAccountKey {
    ServiceAccountKey {
        id: row.get("id"),
        service_account_email: row.get("service_account_email"),
        private_key_data: row.get("private_key_data"),
        key_algorithm: row.get("key_algorithm"),
        valid_after: parse_ts(row.get("valid_after")),
        valid_before: parse_ts(row.get("valid_before")),
        disabled: row.get::<i64, _>("disabled") != 0,
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAccountKeyRepo {
    pool: SqlitePool,
}

impl ServiceAccountKeyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, service_account_email: &str, private_key_data: &str) -> Result<ServiceAccountKey> {
        let id = new_id("key");
        let now = Utc::now();
        let valid_before = now + chrono::Duration::days(3650);
        sqlx::query(
            "INSERT INTO service_account_keys (id, service_account_email, private_key_data, valid_after, valid_before) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(service_account_email)
        .bind(private_key_data)
        .bind(now.to_rfc3339())
        .bind(valid_before.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ServiceAccountKey> {
        let row = sqlx::query("SELECT * FROM service_account_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("service account key {id}")))?;
        Ok(row_to_key(&row))
    }

    pub async fn list(&self, service_account_email: &str) -> Result<Vec<ServiceAccountKey>> {
        let rows = sqlx::query("SELECT * FROM service_account_keys WHERE service_account_email = ?")
            .bind(service_account_email)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_key).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM service_account_keys WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

// -------------------------------------------------------------- IAM Policy

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Binding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IamPolicy {
    pub resource_type: String,
    pub resource_id: String,
    pub version: i64,
    pub etag: String,
    pub bindings: Vec<Binding>,
}

fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> IamPolicy {
    let bindings_json: String = row.get("bindings_json");
    IamPolicy {
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        version: row.get("version"),
        etag: row.get("etag"),
        bindings: serde_json::from_str(&bindings_json).unwrap_or_default(),
    }
}

#[derive(Debug, Clone)]
pub struct IamPolicyRepo {
    pool: SqlitePool,
}

impl IamPolicyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, resource_type: &str, resource_id: &str) -> Result<IamPolicy> {
        let row = sqlx::query("SELECT * FROM iam_policies WHERE resource_type = ? AND resource_id = ?")
            .bind(resource_type)
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row_to_policy(&row)),
            None => Ok(IamPolicy {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                version: 1,
                etag: new_id("etag"),
                bindings: Vec::new(),
            }),
        }
    }

    /// Replaces the full policy, enforcing optimistic concurrency against
    /// `expected_etag` when the caller supplies one (set-IAM-policy semantics).
    pub async fn set(
        &self,
        resource_type: &str,
        resource_id: &str,
        bindings: &[Binding],
        expected_etag: Option<&str>,
    ) -> Result<IamPolicy> {
        let current = self.get(resource_type, resource_id).await?;
        if let Some(expected) = expected_etag {
            if expected != current.etag {
                return Err(Error::PreconditionFailed(
                    "IAM policy etag mismatch".to_string(),
                ));
            }
        }

        let new_etag = new_id("etag");
        let new_version = current.version + 1;
        sqlx::query(
            "INSERT INTO iam_policies (resource_type, resource_id, version, etag, bindings_json) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (resource_type, resource_id) DO UPDATE SET \
               version = excluded.version, etag = excluded.etag, bindings_json = excluded.bindings_json",
        )
        .bind(resource_type)
        .bind(resource_id)
        .bind(new_version)
        .bind(&new_etag)
        .bind(serde_json::to_string(bindings).unwrap())
        .execute(&self.pool)
        .await?;

        self.get(resource_type, resource_id).await
    }
}

// ---------------------------------------------------------------- Api Key

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub key_hash: String,
    pub project_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

fn row_to_api_key(row: &sqlx::sqlite::SqliteRow) -> ApiKey {
    let expires_at: Option<String> = row.get("expires_at");
    ApiKey {
        id: row.get("id"),
        key_hash: row.get("key_hash"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        created_at: parse_ts(row.get("created_at")),
        expires_at: expires_at.map(parse_ts),
        disabled: row.get::<i64, _>("disabled") != 0,
    }
}

#[derive(Debug, Clone)]
pub struct ApiKeyRepo {
    pool: SqlitePool,
}

impl ApiKeyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        key_hash: &str,
        name: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey> {
        let id = new_id("apikey");
        sqlx::query(
            "INSERT INTO api_keys (id, key_hash, project_id, name, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(key_hash)
        .bind(project_id)
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ApiKey> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("API key {id}")))?;
        Ok(row_to_api_key(&row))
    }

    pub async fn get_by_hash(&self, key_hash: &str) -> Result<ApiKey> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::Unauthenticated("unknown API key".to_string()))?;
        Ok(row_to_api_key(&row))
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE project_id = ? ORDER BY created_at")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_api_key).collect())
    }

    pub async fn set_disabled(&self, id: &str, disabled: bool) -> Result<()> {
        sqlx::query("UPDATE api_keys SET disabled = ? WHERE id = ?")
            .bind(disabled as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM api_keys WHERE id = ?").bind(id).execute(&self.pool).await?;
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
    async fn service_account_email_derives_from_project_and_account_id() {
        let repo = ServiceAccountRepo::new(pool().await);
        let sa = repo.create("my-project", "worker", "Worker SA").await.unwrap();
        assert_eq!(sa.email, "worker@my-project.iam.gserviceaccount.com");
    }

    #[tokio::test]
    async fn iam_policy_defaults_empty_with_stable_etag_until_set() {
        let repo = IamPolicyRepo::new(pool().await);
        let policy = repo.get("project", "p1").await.unwrap();
        assert!(policy.bindings.is_empty());

        let updated = repo
            .set(
                "project",
                "p1",
                &[Binding { role: "roles/viewer".to_string(), members: vec!["user:a@example.com".to_string()] }],
                Some(&policy.etag),
            )
            .await
            .unwrap();
        assert_eq!(updated.bindings.len(), 1);
        assert_ne!(updated.etag, policy.etag);
    }

    #[tokio::test]
    async fn iam_policy_set_rejects_stale_etag() {
        let repo = IamPolicyRepo::new(pool().await);
        let policy = repo.get("project", "p1").await.unwrap();
        repo.set("project", "p1", &[], Some(&policy.etag)).await.unwrap();

        let err = repo.set("project", "p1", &[], Some(&policy.etag)).await;
        assert!(matches!(err, Err(Error::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn api_key_lookup_by_hash() {
        let repo = ApiKeyRepo::new(pool().await);
        let key = repo.create("p1", "hash123", Some("ci key"), None).await.unwrap();
        let fetched = repo.get_by_hash("hash123").await.unwrap();
        assert_eq!(fetched.id, key.id);
    }
}
