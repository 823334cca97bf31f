//! Bucket repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::ids::new_id;

use super::project::parse_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Delete,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub action: LifecycleAction,
    pub age_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub rules: Vec<LifecycleRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketAcl {
    Private,
    PublicRead,
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub location: String,
    pub storage_class: String,
    pub versioning_enabled: bool,
    pub acl: BucketAcl,
    pub labels: std::collections::HashMap<String, String>,
    pub lifecycle: Option<LifecycleConfig>,
    pub notifications: Vec<crate::events::NotificationConfig>,
    pub cors: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_bucket(row: &sqlx::sqlite::SqliteRow) -> Bucket {
    let acl: String = row.get("acl");
    let labels_json: String = row.get("labels_json");
    let lifecycle_json: Option<String> = row.get("lifecycle_json");
    let notifications_json: String = row.get("notifications_json");
    let cors_json: Option<String> = row.get("cors_json");

    Bucket {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        location: row.get("location"),
        storage_class: row.get("storage_class"),
        versioning_enabled: row.get::<i64, _>("versioning_enabled") != 0,
        acl: if acl == "publicRead" { BucketAcl::PublicRead } else { BucketAcl::Private },
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        lifecycle: lifecycle_json.and_then(|s| serde_json::from_str(&s).ok()),
        notifications: serde_json::from_str(&notifications_json).unwrap_or_default(),
        cors: cors_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(row.get("created_at")),
        updated_at: parse_ts(row.get("updated_at")),
    }
}

#[derive(Debug, Clone)]
pub struct BucketRepo {
    pool: SqlitePool,
}

impl BucketRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        location: &str,
        storage_class: &str,
        versioning_enabled: bool,
        acl: BucketAcl,
    ) -> Result<Bucket> {
        if self.get_by_name(name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("bucket {name}")));
        }

        let id = new_id("bucket");
        let now = Utc::now();
        let acl_str = match acl {
            BucketAcl::Private => "private",
            BucketAcl::PublicRead => "publicRead",
        };

        sqlx::query(
            "INSERT INTO buckets (id, project_id, name, location, storage_class, versioning_enabled, acl, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(location)
        .bind(storage_class)
        .bind(versioning_enabled as i64)
        .bind(acl_str)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Bucket> {
        let row = sqlx::query("SELECT * FROM buckets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("bucket {id}")))?;
        Ok(row_to_bucket(&row))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Bucket> {
        let row = sqlx::query("SELECT * FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("bucket {name}")))?;
        Ok(row_to_bucket(&row))
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE project_id = ? ORDER BY name")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_bucket).collect())
    }

    pub async fn update_versioning(&self, id: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE buckets SET versioning_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_lifecycle(&self, id: &str, lifecycle: Option<&LifecycleConfig>) -> Result<()> {
        let json = lifecycle.map(|l| serde_json::to_string(l).unwrap());
        sqlx::query("UPDATE buckets SET lifecycle_json = ?, updated_at = ? WHERE id = ?")
            .bind(json)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_notifications(
        &self,
        id: &str,
        notifications: &[crate::events::NotificationConfig],
    ) -> Result<()> {
        sqlx::query("UPDATE buckets SET notifications_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(notifications).unwrap())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_labels(&self, id: &str, labels: &std::collections::HashMap<String, String>) -> Result<()> {
        sqlx::query("UPDATE buckets SET labels_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(labels).unwrap())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM buckets WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_with_lifecycle(&self) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE lifecycle_json IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_bucket).collect())
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
    async fn create_then_get_round_trips() {
        let repo = BucketRepo::new(pool().await);
        let b = repo.create("proj1", "my-bucket", "US", "STANDARD", true, BucketAcl::Private).await.unwrap();
        assert_eq!(b.name, "my-bucket");
        assert!(b.versioning_enabled);

        let fetched = repo.get_by_name("my-bucket").await.unwrap();
        assert_eq!(fetched.id, b.id);
    }

    #[tokio::test]
    async fn duplicate_name_rejected() {
        let repo = BucketRepo::new(pool().await);
        repo.create("proj1", "dup", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        let err = repo.create("proj1", "dup", "US", "STANDARD", false, BucketAcl::Private).await;
        assert!(matches!(err, Err(Error::AlreadyExists(_))));
    }
}
