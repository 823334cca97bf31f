//! Resumable uploads — strict linear-append chunk sessions finalized by
//! delegating into [`super::objects`]'s `upload_inner`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::new_id;
use crate::repo::object::ObjectHead;

use super::objects::Preconditions;
use super::ObjectStoreService;

#[derive(Debug, Clone, Default)]
pub struct InitiateResumableRequest {
    pub content_type: String,
    pub custom_metadata: HashMap<String, String>,
    pub total_size: Option<i64>,
    pub preconditions: Preconditions,
}

/// Persisted alongside the session row so `preconditions` and
/// `content_type` survive a process restart between chunks.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMetadata {
    content_type: String,
    custom_metadata: HashMap<String, String>,
    if_gen_match: Option<i64>,
    if_gen_not_match: Option<i64>,
    if_meta_match: Option<i64>,
    if_meta_not_match: Option<i64>,
}

impl From<&InitiateResumableRequest> for SessionMetadata {
    fn from(req: &InitiateResumableRequest) -> Self {
        Self {
            content_type: req.content_type.clone(),
            custom_metadata: req.custom_metadata.clone(),
            if_gen_match: req.preconditions.if_gen_match,
            if_gen_not_match: req.preconditions.if_gen_not_match,
            if_meta_match: req.preconditions.if_meta_match,
            if_meta_not_match: req.preconditions.if_meta_not_match,
        }
    }
}

impl SessionMetadata {
    fn preconditions(&self) -> Preconditions {
        Preconditions {
            if_gen_match: self.if_gen_match,
            if_gen_not_match: self.if_gen_not_match,
            if_meta_match: self.if_meta_match,
            if_meta_not_match: self.if_meta_not_match,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Incomplete { next_offset: i64 },
    Complete(ObjectHead),
}

impl ObjectStoreService {
    pub async fn initiate_resumable(
        &self,
        bucket_name: &str,
        object_name: &str,
        req: InitiateResumableRequest,
    ) -> Result<String> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        let session_id = new_id("upload");
        let temp_path = self.content.resumable_session_path(&session_id);
        let metadata_json = serde_json::to_string(&SessionMetadata::from(&req))
            .map_err(|e| Error::Internal(format!("failed to encode session metadata: {e}")))?;

        self.sessions
            .create(
                &session_id,
                &bucket.id,
                object_name,
                &metadata_json,
                req.total_size,
                &temp_path.to_string_lossy(),
            )
            .await?;
        Ok(session_id)
    }

    /// Appends one chunk. `range_start` must equal the session's current
    /// offset; anything else is an out-of-order write and is rejected
    /// rather than silently reordered.
    pub async fn put_chunk(
        &self,
        session_id: &str,
        range_start: i64,
        chunk: &[u8],
        is_final: bool,
    ) -> Result<ChunkOutcome> {
        let session = self.sessions.get(session_id).await?;
        if range_start != session.current_offset {
            return Err(Error::InvalidArgument(format!(
                "chunk starts at {range_start}, expected {}",
                session.current_offset
            )));
        }

        let temp_path = std::path::PathBuf::from(&session.temp_path);
        self.content.append_at(&temp_path, range_start as u64, chunk).await?;
        let new_offset = range_start + chunk.len() as i64;
        self.sessions.advance_offset(session_id, new_offset).await?;

        let total_known = session.total_size.or(if is_final { Some(new_offset) } else { None });
        if let Some(total) = total_known {
            if session.total_size.is_none() {
                self.sessions.set_total_size(session_id, total).await?;
            }
            if new_offset >= total {
                return self.finalize_resumable(&session.session_id).await.map(ChunkOutcome::Complete);
            }
        }

        Ok(ChunkOutcome::Incomplete { next_offset: new_offset })
    }

    async fn finalize_resumable(&self, session_id: &str) -> Result<ObjectHead> {
        let session = self.sessions.get(session_id).await?;
        let meta: SessionMetadata = serde_json::from_str(&session.metadata_json)
            .map_err(|e| Error::Internal(format!("corrupt session metadata: {e}")))?;

        let bucket = self.buckets.get_by_id(&session.bucket_id).await?;
        let temp_path = std::path::PathBuf::from(&session.temp_path);
        let bytes = self.content.read_whole(&temp_path).await?;

        let head = self
            .upload_inner(
                &bucket,
                &session.object_name,
                &bytes,
                &meta.content_type,
                meta.custom_metadata.clone(),
                meta.preconditions(),
            )
            .await?;

        self.content.remove(&temp_path).await?;
        self.sessions.delete(session_id).await?;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::content::ContentStore;
    use crate::events::FakeEventSink;
    use crate::locks::KeyedLocks;
    use crate::repo::bucket::BucketAcl;
    use crate::repo::{BucketRepo, ObjectEventRepo, ObjectRepo, ResumableSessionRepo};

    use super::*;

    async fn service() -> ObjectStoreService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let dir = std::env::temp_dir().join(format!("emu-resumable-test-{}", uuid::Uuid::new_v4()));
        let content = ContentStore::new(&dir);
        content.ensure_dirs().await.unwrap();

        ObjectStoreService::new(
            BucketRepo::new(pool.clone()),
            ObjectRepo::new(pool.clone()),
            ResumableSessionRepo::new(pool.clone()),
            ObjectEventRepo::new(pool.clone()),
            content,
            Arc::new(KeyedLocks::new()),
            Arc::new(SystemClock),
            Arc::new(FakeEventSink::new()),
            crate::config::EmulatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn chunked_upload_finalizes_on_last_chunk() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();

        let session = svc
            .initiate_resumable(
                "b1",
                "big.bin",
                InitiateResumableRequest {
                    content_type: "application/octet-stream".to_string(),
                    total_size: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = svc.put_chunk(&session, 0, b"01234", false).await.unwrap();
        assert!(matches!(first, ChunkOutcome::Incomplete { next_offset: 5 }));

        let second = svc.put_chunk(&session, 5, b"56789", false).await.unwrap();
        match second {
            ChunkOutcome::Complete(head) => assert_eq!(head.size, 10),
            ChunkOutcome::Incomplete { .. } => panic!("expected completion"),
        }

        let downloaded = svc.download("b1", "big.bin", None).await.unwrap();
        assert_eq!(downloaded.bytes, b"0123456789");
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_rejected() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        let session = svc
            .initiate_resumable(
                "b1",
                "f.bin",
                InitiateResumableRequest { content_type: "text/plain".to_string(), ..Default::default() },
            )
            .await
            .unwrap();

        svc.put_chunk(&session, 0, b"abc", false).await.unwrap();
        let err = svc.put_chunk(&session, 10, b"zzz", false).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }
}
