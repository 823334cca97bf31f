//! Project repository.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub display_name: String,
    pub project_number: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProjectRepo {
    pool: SqlitePool,
}

impl ProjectRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, id: &str, display_name: &str) -> Result<Project> {
        let now = Utc::now();
        let project_number = (Uuid::new_v4().as_u128() % 900_000_000_000) as i64 + 100_000_000_000;

        let existing = self.get(id).await;
        if existing.is_ok() {
            return Err(Error::AlreadyExists(format!("project {id}")));
        }

        sqlx::query(
            "INSERT INTO projects (id, display_name, project_number, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(display_name)
        .bind(project_number)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Project { id: id.to_string(), display_name: display_name.to_string(), project_number, created_at: now })
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        let row = sqlx::query("SELECT id, display_name, project_number, created_at FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {id}")))?;

        Ok(Project {
            id: row.get("id"),
            display_name: row.get("display_name"),
            project_number: row.get("project_number"),
            created_at: parse_ts(row.get::<String, _>("created_at")),
        })
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
