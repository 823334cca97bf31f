//! Instance repository.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::ids::new_id;

use super::project::parse_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Terminated => "TERMINATED",
        }
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        Ok(match s {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "RUNNING" => InstanceStatus::Running,
            "STOPPING" => InstanceStatus::Stopping,
            "STOPPED" => InstanceStatus::Stopped,
            "TERMINATED" => InstanceStatus::Terminated,
            other => return Err(format!("unknown instance status: {other}")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub status: InstanceStatus,
    pub container_id: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub network_id: String,
    pub subnet_id: String,
    pub metadata: std::collections::HashMap<String, String>,
    pub labels: std::collections::HashMap<String, String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Instance {
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let labels_json: String = row.get("labels_json");
    let tags_json: String = row.get("tags_json");

    Instance {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        zone: row.get("zone"),
        machine_type: row.get("machine_type"),
        status: status.parse().unwrap_or(InstanceStatus::Terminated),
        container_id: row.get("container_id"),
        internal_ip: row.get("internal_ip"),
        external_ip: row.get("external_ip"),
        network_id: row.get("network_id"),
        subnet_id: row.get("subnet_id"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: parse_ts(row.get("created_at")),
        updated_at: parse_ts(row.get("updated_at")),
    }
}

#[derive(Debug, Clone)]
pub struct InstanceRepo {
    pool: SqlitePool,
}

impl InstanceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        zone: &str,
        machine_type: &str,
        network_id: &str,
        subnet_id: &str,
        metadata: &std::collections::HashMap<String, String>,
        labels: &std::collections::HashMap<String, String>,
        tags: &[String],
    ) -> Result<Instance> {
        if self.get_by_name(project_id, zone, name).await.is_ok() {
            return Err(Error::AlreadyExists(format!("instance {name}")));
        }

        let id = new_id("instance");
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO instances \
             (id, project_id, name, zone, machine_type, status, network_id, subnet_id, metadata_json, labels_json, tags_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'PROVISIONING', ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(zone)
        .bind(machine_type)
        .bind(network_id)
        .bind(subnet_id)
        .bind(serde_json::to_string(metadata).unwrap())
        .bind(serde_json::to_string(labels).unwrap())
        .bind(serde_json::to_string(tags).unwrap())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Instance> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("instance {id}")))?;
        Ok(row_to_instance(&row))
    }

    pub async fn get_by_name(&self, project_id: &str, zone: &str, name: &str) -> Result<Instance> {
        let row = sqlx::query(
            "SELECT * FROM instances WHERE project_id = ? AND zone = ? AND name = ?",
        )
        .bind(project_id)
        .bind(zone)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("instance {name}")))?;
        Ok(row_to_instance(&row))
    }

    pub async fn list(&self, project_id: &str, zone: Option<&str>) -> Result<Vec<Instance>> {
        let rows = if let Some(zone) = zone {
            sqlx::query("SELECT * FROM instances WHERE project_id = ? AND zone = ? ORDER BY name")
                .bind(project_id)
                .bind(zone)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM instances WHERE project_id = ? ORDER BY zone, name")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?
        };
        Ok(rows.iter().map(row_to_instance).collect())
    }

    pub async fn list_non_terminated(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE status != 'TERMINATED'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_instance).collect())
    }

    pub async fn set_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        sqlx::query("UPDATE instances SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_container_id(&self, id: &str, container_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE instances SET container_id = ?, updated_at = ? WHERE id = ?")
            .bind(container_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_ips(&self, id: &str, internal_ip: Option<&str>, external_ip: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE instances SET internal_ip = ?, external_ip = ?, updated_at = ? WHERE id = ?")
            .bind(internal_ip)
            .bind(external_ip)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM instances WHERE id = ?").bind(id).execute(&self.pool).await?;
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
    async fn create_defaults_to_provisioning() {
        let repo = InstanceRepo::new(pool().await);
        let inst = repo
            .create("p1", "vm1", "us-central1-a", "e2-micro", "net1", "sub1", &Default::default(), &Default::default(), &[])
            .await
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::Provisioning);
    }

    #[tokio::test]
    async fn duplicate_name_in_same_zone_rejected() {
        let repo = InstanceRepo::new(pool().await);
        repo.create("p1", "vm1", "us-central1-a", "e2-micro", "net1", "sub1", &Default::default(), &Default::default(), &[])
            .await
            .unwrap();
        let err = repo
            .create("p1", "vm1", "us-central1-a", "e2-micro", "net1", "sub1", &Default::default(), &Default::default(), &[])
            .await;
        assert!(matches!(err, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn status_transitions_persist() {
        let repo = InstanceRepo::new(pool().await);
        let inst = repo
            .create("p1", "vm1", "us-central1-a", "e2-micro", "net1", "sub1", &Default::default(), &Default::default(), &[])
            .await
            .unwrap();
        repo.set_status(&inst.id, InstanceStatus::Running).await.unwrap();
        let fetched = repo.get_by_id(&inst.id).await.unwrap();
        assert_eq!(fetched.status, InstanceStatus::Running);
    }
}
