//! Object repository — heads, versions, resumable sessions, and events.
//!
//! The per-`(bucket,name)` invariants (single `isLatest` head, strictly
//! increasing generations) are enforced by the service layer holding a
//! per-key lock around the read-modify-write; this repository only
//! guarantees the storage-level uniqueness constraints (`UNIQUE
//! (bucket_id, name, generation)`) and exposes the primitive operations the
//! service composes into a transaction.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::ids::new_id;

use super::project::parse_ts;

#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub bucket_id: String,
    pub name: String,
    pub generation: i64,
    pub metageneration: i64,
    pub size: i64,
    pub content_type: String,
    pub md5: String,
    pub crc32c: String,
    pub storage_class: String,
    pub acl: String,
    pub file_path: String,
    pub deleted: bool,
    pub custom_metadata: std::collections::HashMap<String, String>,
    pub time_created: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObjectVersion {
    pub id: String,
    pub bucket_id: String,
    pub name: String,
    pub generation: i64,
    pub metageneration: i64,
    pub size: i64,
    pub content_type: String,
    pub md5: String,
    pub crc32c: String,
    pub file_path: String,
    pub storage_class: String,
    pub deleted: bool,
    pub custom_metadata: std::collections::HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Everything the service needs to write for one new generation.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub bucket_id: String,
    pub name: String,
    pub generation: i64,
    pub metageneration: i64,
    pub size: i64,
    pub content_type: String,
    pub md5: String,
    pub crc32c: String,
    pub file_path: String,
    pub custom_metadata: std::collections::HashMap<String, String>,
}

fn row_to_head(row: &sqlx::sqlite::SqliteRow) -> ObjectHead {
    let meta_json: String = row.get("custom_metadata");
    ObjectHead {
        bucket_id: row.get("bucket_id"),
        name: row.get("name"),
        generation: row.get("generation"),
        metageneration: row.get("metageneration"),
        size: row.get("size"),
        content_type: row.get("content_type"),
        md5: row.get("md5"),
        crc32c: row.get("crc32c"),
        storage_class: row.get("storage_class"),
        acl: row.get("acl"),
        file_path: row.get("file_path"),
        deleted: row.get::<i64, _>("deleted") != 0,
        custom_metadata: serde_json::from_str(&meta_json).unwrap_or_default(),
        time_created: parse_ts(row.get("time_created")),
        updated_at: parse_ts(row.get("updated_at")),
    }
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> ObjectVersion {
    let meta_json: String = row.get("custom_metadata");
    ObjectVersion {
        id: row.get("id"),
        bucket_id: row.get("bucket_id"),
        name: row.get("name"),
        generation: row.get("generation"),
        metageneration: row.get("metageneration"),
        size: row.get("size"),
        content_type: row.get("content_type"),
        md5: row.get("md5"),
        crc32c: row.get("crc32c"),
        file_path: row.get("file_path"),
        storage_class: row.get("storage_class"),
        deleted: row.get::<i64, _>("deleted") != 0,
        custom_metadata: serde_json::from_str(&meta_json).unwrap_or_default(),
        created_at: parse_ts(row.get("created_at")),
    }
}

#[derive(Debug, Clone)]
pub struct ObjectRepo {
    pool: SqlitePool,
}

impl ObjectRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_head(&self, bucket_id: &str, name: &str) -> Result<Option<ObjectHead>> {
        let row = sqlx::query(
            "SELECT * FROM object_heads WHERE bucket_id = ? AND name = ? AND deleted = 0",
        )
        .bind(bucket_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_head(&r)))
    }

    /// Includes soft-deleted heads, for internal bookkeeping (e.g. computing
    /// the next generation after a delete).
    pub async fn get_head_any(&self, bucket_id: &str, name: &str) -> Result<Option<ObjectHead>> {
        let row = sqlx::query("SELECT * FROM object_heads WHERE bucket_id = ? AND name = ?")
            .bind(bucket_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_head(&r)))
    }

    pub async fn get_version(&self, bucket_id: &str, name: &str, generation: i64) -> Result<ObjectVersion> {
        let row = sqlx::query(
            "SELECT * FROM object_versions WHERE bucket_id = ? AND name = ? AND generation = ? AND deleted = 0",
        )
        .bind(bucket_id)
        .bind(name)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("object {name}#{generation}")))?;
        Ok(row_to_version(&row))
    }

    pub async fn list_versions(&self, bucket_id: &str, name: &str) -> Result<Vec<ObjectVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM object_versions WHERE bucket_id = ? AND name = ? AND deleted = 0 ORDER BY generation DESC",
        )
        .bind(bucket_id)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_version).collect())
    }

    /// All non-deleted heads whose name starts with `prefix`, ordered by name.
    pub async fn list_heads_with_prefix(&self, bucket_id: &str, prefix: &str) -> Result<Vec<ObjectHead>> {
        let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT * FROM object_heads WHERE bucket_id = ? AND deleted = 0 AND name LIKE ? ESCAPE '\\' ORDER BY name",
        )
        .bind(bucket_id)
        .bind(like)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_head).collect())
    }

    /// Every non-deleted version across the bucket whose name starts with
    /// `prefix`, ordered by name asc then generation desc.
    pub async fn list_versions_with_prefix(&self, bucket_id: &str, prefix: &str) -> Result<Vec<ObjectVersion>> {
        let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT * FROM object_versions WHERE bucket_id = ? AND deleted = 0 AND name LIKE ? ESCAPE '\\' \
             ORDER BY name ASC, generation DESC",
        )
        .bind(bucket_id)
        .bind(like)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_version).collect())
    }

    pub async fn all_heads(&self, bucket_id: &str) -> Result<Vec<ObjectHead>> {
        let rows = sqlx::query("SELECT * FROM object_heads WHERE bucket_id = ? AND deleted = 0")
            .bind(bucket_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_head).collect())
    }

    /// Insert a new version row and upsert the head in one transaction.
    /// `purge_prior` is set when versioning is disabled: prior version rows
    /// are deleted and their file paths returned so the caller can free the
    /// bytes after the transaction commits.
    pub async fn commit_new_generation(
        &self,
        new_version: &NewVersion,
        purge_prior: bool,
    ) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let meta_json = serde_json::to_string(&new_version.custom_metadata).unwrap();

        sqlx::query(
            "INSERT INTO object_versions \
             (id, bucket_id, name, generation, metageneration, size, content_type, md5, crc32c, file_path, custom_metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id("ver"))
        .bind(&new_version.bucket_id)
        .bind(&new_version.name)
        .bind(new_version.generation)
        .bind(new_version.metageneration)
        .bind(new_version.size)
        .bind(&new_version.content_type)
        .bind(&new_version.md5)
        .bind(&new_version.crc32c)
        .bind(&new_version.file_path)
        .bind(&meta_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let mut freed_paths = Vec::new();

        if purge_prior {
            let prior_paths: Vec<(String,)> = sqlx::query_as(
                "SELECT file_path FROM object_versions WHERE bucket_id = ? AND name = ? AND generation != ?",
            )
            .bind(&new_version.bucket_id)
            .bind(&new_version.name)
            .bind(new_version.generation)
            .fetch_all(&mut *tx)
            .await?;
            freed_paths = prior_paths.into_iter().map(|(p,)| p).collect();

            sqlx::query("DELETE FROM object_versions WHERE bucket_id = ? AND name = ? AND generation != ?")
                .bind(&new_version.bucket_id)
                .bind(&new_version.name)
                .bind(new_version.generation)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO object_heads \
             (bucket_id, name, generation, metageneration, size, content_type, md5, crc32c, storage_class, acl, file_path, deleted, custom_metadata, time_created, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'STANDARD', 'private', ?, 0, ?, ?, ?) \
             ON CONFLICT (bucket_id, name) DO UPDATE SET \
               generation = excluded.generation, metageneration = excluded.metageneration, size = excluded.size, \
               content_type = excluded.content_type, md5 = excluded.md5, crc32c = excluded.crc32c, \
               file_path = excluded.file_path, deleted = 0, custom_metadata = excluded.custom_metadata, \
               updated_at = excluded.updated_at",
        )
        .bind(&new_version.bucket_id)
        .bind(&new_version.name)
        .bind(new_version.generation)
        .bind(new_version.metageneration)
        .bind(new_version.size)
        .bind(&new_version.content_type)
        .bind(&new_version.md5)
        .bind(&new_version.crc32c)
        .bind(&new_version.file_path)
        .bind(&meta_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(freed_paths)
    }

    pub async fn update_metadata(
        &self,
        bucket_id: &str,
        name: &str,
        new_metageneration: i64,
        custom_metadata: &std::collections::HashMap<String, String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE object_heads SET metageneration = ?, custom_metadata = ?, updated_at = ? \
             WHERE bucket_id = ? AND name = ? AND deleted = 0",
        )
        .bind(new_metageneration)
        .bind(serde_json::to_string(custom_metadata).unwrap())
        .bind(Utc::now().to_rfc3339())
        .bind(bucket_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sets storage class on the head and every version — used by the
    /// lifecycle executor's `Archive` action, which applies to the whole
    /// object family, not just the current generation.
    pub async fn set_storage_class(&self, bucket_id: &str, name: &str, storage_class: &str) -> Result<()> {
        sqlx::query("UPDATE object_heads SET storage_class = ? WHERE bucket_id = ? AND name = ?")
            .bind(storage_class)
            .bind(bucket_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE object_versions SET storage_class = ? WHERE bucket_id = ? AND name = ?")
            .bind(storage_class)
            .bind(bucket_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft-delete the head (versioning enabled, no explicit generation).
    pub async fn soft_delete_head(&self, bucket_id: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE object_heads SET deleted = 1, updated_at = ? WHERE bucket_id = ? AND name = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(bucket_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove exactly one version row (and, if it was the live head's
    /// generation, the head too). Returns the freed file path.
    pub async fn delete_version(&self, bucket_id: &str, name: &str, generation: i64) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT file_path FROM object_versions WHERE bucket_id = ? AND name = ? AND generation = ?",
        )
        .bind(bucket_id)
        .bind(name)
        .bind(generation)
        .fetch_optional(&mut *tx)
        .await?;
        let (path,) = row.ok_or_else(|| Error::NotFound(format!("object {name}#{generation}")))?;

        sqlx::query("DELETE FROM object_versions WHERE bucket_id = ? AND name = ? AND generation = ?")
            .bind(bucket_id)
            .bind(name)
            .bind(generation)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM object_heads WHERE bucket_id = ? AND name = ? AND generation = ?",
        )
        .bind(bucket_id)
        .bind(name)
        .bind(generation)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(path)
    }

    /// Physically remove head and all versions (versioning disabled).
    /// Returns freed file paths.
    pub async fn purge_all(&self, bucket_id: &str, name: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let paths: Vec<(String,)> =
            sqlx::query_as("SELECT file_path FROM object_versions WHERE bucket_id = ? AND name = ?")
                .bind(bucket_id)
                .bind(name)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM object_versions WHERE bucket_id = ? AND name = ?")
            .bind(bucket_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM object_heads WHERE bucket_id = ? AND name = ?")
            .bind(bucket_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(paths.into_iter().map(|(p,)| p).collect())
    }

    pub async fn bucket_is_empty(&self, bucket_id: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM object_heads WHERE bucket_id = ? AND deleted = 0")
                .bind(bucket_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count == 0)
    }
}

#[derive(Debug, Clone)]
pub struct ResumableSession {
    pub session_id: String,
    pub bucket_id: String,
    pub object_name: String,
    pub metadata_json: String,
    pub current_offset: i64,
    pub total_size: Option<i64>,
    pub temp_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResumableSessionRepo {
    pool: SqlitePool,
}

impl ResumableSessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        session_id: &str,
        bucket_id: &str,
        object_name: &str,
        metadata_json: &str,
        total_size: Option<i64>,
        temp_path: &str,
    ) -> Result<ResumableSession> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO resumable_sessions \
             (session_id, bucket_id, object_name, metadata_json, current_offset, total_size, temp_path, created_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(bucket_id)
        .bind(object_name)
        .bind(metadata_json)
        .bind(total_size)
        .bind(temp_path)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get(session_id).await
    }

    pub async fn get(&self, session_id: &str) -> Result<ResumableSession> {
        let row = sqlx::query("SELECT * FROM resumable_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("resumable session {session_id}")))?;

        Ok(ResumableSession {
            session_id: row.get("session_id"),
            bucket_id: row.get("bucket_id"),
            object_name: row.get("object_name"),
            metadata_json: row.get("metadata_json"),
            current_offset: row.get("current_offset"),
            total_size: row.get("total_size"),
            temp_path: row.get("temp_path"),
            created_at: parse_ts(row.get("created_at")),
        })
    }

    pub async fn advance_offset(&self, session_id: &str, new_offset: i64) -> Result<()> {
        sqlx::query("UPDATE resumable_sessions SET current_offset = ? WHERE session_id = ?")
            .bind(new_offset)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_total_size(&self, session_id: &str, total_size: i64) -> Result<()> {
        sqlx::query("UPDATE resumable_sessions SET total_size = ? WHERE session_id = ?")
            .bind(total_size)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM resumable_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ObjectEventRepo {
    pool: SqlitePool,
}

impl ObjectEventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        bucket_name: &str,
        object_name: &str,
        generation: i64,
        event_type: crate::events::ObjectEventType,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let id = new_id("evt");
        sqlx::query(
            "INSERT INTO object_events (event_id, bucket_name, object_name, generation, event_type, payload_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(bucket_name)
        .bind(object_name)
        .bind(generation)
        .bind(event_type.as_str())
        .bind(payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_delivered(&self, event_id: &str) -> Result<()> {
        sqlx::query("UPDATE object_events SET delivered = 1 WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_for_bucket(&self, bucket_name: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM object_events WHERE bucket_name = ?")
            .bind(bucket_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
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

    fn nv(bucket_id: &str, name: &str, generation: i64) -> NewVersion {
        NewVersion {
            bucket_id: bucket_id.to_string(),
            name: name.to_string(),
            generation,
            metageneration: 1,
            size: 5,
            content_type: "text/plain".to_string(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            crc32c: "AAAAAA==".to_string(),
            file_path: format!("/tmp/{name}-{generation}"),
            custom_metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn generations_accumulate_and_versions_are_listed_desc() {
        let repo = ObjectRepo::new(pool().await);
        repo.commit_new_generation(&nv("b1", "k.txt", 1), false).await.unwrap();
        repo.commit_new_generation(&nv("b1", "k.txt", 2), false).await.unwrap();

        let head = repo.get_head("b1", "k.txt").await.unwrap().unwrap();
        assert_eq!(head.generation, 2);

        let versions = repo.list_versions("b1", "k.txt").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].generation, 2);
        assert_eq!(versions[1].generation, 1);
    }

    #[tokio::test]
    async fn purge_prior_removes_old_generation_when_versioning_disabled() {
        let repo = ObjectRepo::new(pool().await);
        repo.commit_new_generation(&nv("b1", "k.txt", 1), true).await.unwrap();
        let freed = repo.commit_new_generation(&nv("b1", "k.txt", 2), true).await.unwrap();
        assert_eq!(freed.len(), 1);

        let versions = repo.list_versions("b1", "k.txt").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].generation, 2);
    }

    #[tokio::test]
    async fn soft_delete_hides_head_but_keeps_versions() {
        let repo = ObjectRepo::new(pool().await);
        repo.commit_new_generation(&nv("b1", "k.txt", 1), false).await.unwrap();
        repo.soft_delete_head("b1", "k.txt").await.unwrap();

        assert!(repo.get_head("b1", "k.txt").await.unwrap().is_none());
        assert_eq!(repo.list_versions("b1", "k.txt").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prefix_listing_is_ordered() {
        let repo = ObjectRepo::new(pool().await);
        repo.commit_new_generation(&nv("b1", "a/1.txt", 1), false).await.unwrap();
        repo.commit_new_generation(&nv("b1", "a/2.txt", 1), false).await.unwrap();
        repo.commit_new_generation(&nv("b1", "b/1.txt", 1), false).await.unwrap();

        let heads = repo.list_heads_with_prefix("b1", "a/").await.unwrap();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].name, "a/1.txt");
    }
}
