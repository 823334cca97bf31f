//! Upload, download, metadata update, delete, list, and copy — the
//! generation/metageneration-aware object operations.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::events::ObjectEventType;
use crate::repo::bucket::Bucket;
use crate::repo::object::{NewVersion, ObjectHead, ObjectVersion};

use super::ObjectStoreService;

/// If-Generation-Match / If-Metageneration-Match family, evaluated in a
/// fixed order before any byte is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preconditions {
    pub if_gen_match: Option<i64>,
    pub if_gen_not_match: Option<i64>,
    pub if_meta_match: Option<i64>,
    pub if_meta_not_match: Option<i64>,
}

impl Preconditions {
    fn check(&self, current_generation: i64, current_metageneration: i64) -> Result<()> {
        if let Some(want) = self.if_gen_match {
            if want != current_generation {
                return Err(Error::PreconditionFailed(format!(
                    "generation {current_generation} does not match ifGenerationMatch={want}"
                )));
            }
        }
        if let Some(not_want) = self.if_gen_not_match {
            if not_want == current_generation {
                return Err(Error::PreconditionFailed(format!(
                    "generation {current_generation} matches ifGenerationNotMatch={not_want}"
                )));
            }
        }
        if let Some(want) = self.if_meta_match {
            if want != current_metageneration {
                return Err(Error::PreconditionFailed(format!(
                    "metageneration {current_metageneration} does not match ifMetagenerationMatch={want}"
                )));
            }
        }
        if let Some(not_want) = self.if_meta_not_match {
            if not_want == current_metageneration {
                return Err(Error::PreconditionFailed(format!(
                    "metageneration {current_metageneration} matches ifMetagenerationNotMatch={not_want}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bucket: String,
    pub name: String,
    pub generation: i64,
    pub metageneration: i64,
    pub size: i64,
    pub content_type: String,
    pub md5: String,
    pub crc32c: String,
    pub storage_class: String,
    pub custom_metadata: HashMap<String, String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<ObjectHead>,
    pub prefixes: Vec<String>,
    pub versions: Vec<ObjectVersion>,
}

pub(super) fn content_hashes(bytes: &[u8]) -> (String, String) {
    let md5 = format!("{:x}", md5::compute(bytes));
    let crc = crc32c::crc32c(bytes);
    let crc_b64 = BASE64_STANDARD.encode(crc.to_be_bytes());
    (md5, crc_b64)
}

impl ObjectStoreService {
    pub async fn upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        bytes: &[u8],
        content_type: &str,
        custom_metadata: HashMap<String, String>,
        preconditions: Preconditions,
    ) -> Result<ObjectHead> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        self.upload_inner(&bucket, object_name, bytes, content_type, custom_metadata, preconditions).await
    }

    pub(super) async fn upload_inner(
        &self,
        bucket: &Bucket,
        object_name: &str,
        bytes: &[u8],
        content_type: &str,
        custom_metadata: HashMap<String, String>,
        preconditions: Preconditions,
    ) -> Result<ObjectHead> {
        let lock_key = Self::object_lock_key(&bucket.id, object_name);
        let _guard = self.locks.acquire(&lock_key).await;

        let existing = self.objects.get_head_any(&bucket.id, object_name).await?;
        let live = existing.as_ref().filter(|h| !h.deleted);
        let current_generation = live.map(|h| h.generation).unwrap_or(0);
        let current_metageneration = live.map(|h| h.metageneration).unwrap_or(0);
        preconditions.check(current_generation, current_metageneration)?;

        // Generations never reuse a number even across a soft delete, so the
        // base is the highest generation ever assigned to this name.
        let base_generation = existing.as_ref().map(|h| h.generation).unwrap_or(0);
        let new_generation = base_generation + 1;

        let (md5, crc32c) = content_hashes(bytes);
        let path = self.content.new_object_path(&bucket.id);
        self.content.write_whole(&path, bytes).await?;

        let new_version = NewVersion {
            bucket_id: bucket.id.clone(),
            name: object_name.to_string(),
            generation: new_generation,
            metageneration: 1,
            size: bytes.len() as i64,
            content_type: content_type.to_string(),
            md5,
            crc32c,
            file_path: path.to_string_lossy().to_string(),
            custom_metadata,
        };

        let purge_prior = !bucket.versioning_enabled;
        let freed = self.objects.commit_new_generation(&new_version, purge_prior).await?;
        for freed_path in freed {
            let _ = self.content.remove(Path::new(&freed_path)).await;
        }

        let head = self
            .objects
            .get_head(&bucket.id, object_name)
            .await?
            .ok_or_else(|| Error::Internal("object head missing immediately after commit".to_string()))?;

        self.emit_event(bucket, object_name, new_generation, ObjectEventType::ObjectFinalize).await;
        Ok(head)
    }

    pub async fn download(&self, bucket_name: &str, object_name: &str, generation: Option<i64>) -> Result<Downloaded> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        match generation {
            None => {
                let head = self
                    .objects
                    .get_head(&bucket.id, object_name)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("object {object_name}")))?;
                let bytes = self.content.read_whole(Path::new(&head.file_path)).await?;
                Ok(Downloaded {
                    bucket: bucket.name,
                    name: head.name,
                    generation: head.generation,
                    metageneration: head.metageneration,
                    size: head.size,
                    content_type: head.content_type,
                    md5: head.md5,
                    crc32c: head.crc32c,
                    storage_class: head.storage_class,
                    custom_metadata: head.custom_metadata,
                    bytes,
                })
            }
            Some(gen) => {
                let version = self.objects.get_version(&bucket.id, object_name, gen).await?;
                let bytes = self.content.read_whole(Path::new(&version.file_path)).await?;
                Ok(Downloaded {
                    bucket: bucket.name,
                    name: version.name,
                    generation: version.generation,
                    metageneration: version.metageneration,
                    size: version.size,
                    content_type: version.content_type,
                    md5: version.md5,
                    crc32c: version.crc32c,
                    storage_class: version.storage_class,
                    custom_metadata: version.custom_metadata,
                    bytes,
                })
            }
        }
    }

    /// Metadata only, without reading the object's bytes off disk — what
    /// the `alt=json` metadata endpoint wants instead of a full `download`.
    pub async fn stat(&self, bucket_name: &str, object_name: &str, generation: Option<i64>) -> Result<ObjectHead> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        match generation {
            None => self
                .objects
                .get_head(&bucket.id, object_name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("object {object_name}"))),
            Some(gen) => {
                let version = self.objects.get_version(&bucket.id, object_name, gen).await?;
                Ok(ObjectHead {
                    bucket_id: version.bucket_id,
                    name: version.name,
                    generation: version.generation,
                    metageneration: version.metageneration,
                    size: version.size,
                    content_type: version.content_type,
                    md5: version.md5,
                    crc32c: version.crc32c,
                    storage_class: version.storage_class,
                    acl: "private".to_string(),
                    file_path: version.file_path,
                    deleted: version.deleted,
                    custom_metadata: version.custom_metadata,
                    time_created: version.created_at,
                    updated_at: version.created_at,
                })
            }
        }
    }

    pub async fn update_metadata(
        &self,
        bucket_name: &str,
        object_name: &str,
        patch: HashMap<String, String>,
        if_meta_match: Option<i64>,
    ) -> Result<ObjectHead> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        let lock_key = Self::object_lock_key(&bucket.id, object_name);
        let _guard = self.locks.acquire(&lock_key).await;

        let head = self
            .objects
            .get_head(&bucket.id, object_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object {object_name}")))?;

        if let Some(want) = if_meta_match {
            if want != head.metageneration {
                return Err(Error::PreconditionFailed(format!(
                    "metageneration {} does not match ifMetagenerationMatch={want}",
                    head.metageneration
                )));
            }
        }

        let mut merged = head.custom_metadata.clone();
        merged.extend(patch);
        let new_metageneration = head.metageneration + 1;
        self.objects.update_metadata(&bucket.id, object_name, new_metageneration, &merged).await?;

        self.emit_event(&bucket, object_name, head.generation, ObjectEventType::ObjectMetadataUpdate).await;

        self.objects
            .get_head(&bucket.id, object_name)
            .await?
            .ok_or_else(|| Error::Internal("object head vanished after metadata update".to_string()))
    }

    pub async fn delete(&self, bucket_name: &str, object_name: &str, generation: Option<i64>) -> Result<()> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        let lock_key = Self::object_lock_key(&bucket.id, object_name);
        let _guard = self.locks.acquire(&lock_key).await;

        if bucket.versioning_enabled {
            match generation {
                None => {
                    let head = self
                        .objects
                        .get_head(&bucket.id, object_name)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("object {object_name}")))?;
                    self.objects.soft_delete_head(&bucket.id, object_name).await?;
                    self.emit_event(&bucket, object_name, head.generation, ObjectEventType::ObjectDelete).await;
                }
                Some(gen) => {
                    let path = self.objects.delete_version(&bucket.id, object_name, gen).await?;
                    self.content.remove(Path::new(&path)).await?;
                    self.emit_event(&bucket, object_name, gen, ObjectEventType::ObjectDelete).await;
                }
            }
        } else {
            let head = self
                .objects
                .get_head(&bucket.id, object_name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("object {object_name}")))?;
            let freed = self.objects.purge_all(&bucket.id, object_name).await?;
            for path in freed {
                let _ = self.content.remove(Path::new(&path)).await;
            }
            self.emit_event(&bucket, object_name, head.generation, ObjectEventType::ObjectDelete).await;
        }

        Ok(())
    }

    pub async fn list(
        &self,
        bucket_name: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        versions: bool,
    ) -> Result<ListResult> {
        let bucket = self.buckets.get_by_name(bucket_name).await?;
        let prefix = prefix.unwrap_or("");

        if versions {
            let versions = self.objects.list_versions_with_prefix(&bucket.id, prefix).await?;
            return Ok(ListResult { versions, ..Default::default() });
        }

        let heads = self.objects.list_heads_with_prefix(&bucket.id, prefix).await?;

        let Some(delim) = delimiter else {
            return Ok(ListResult { items: heads, ..Default::default() });
        };
        if delim.is_empty() {
            return Ok(ListResult { items: heads, ..Default::default() });
        }

        let mut items = Vec::new();
        let mut prefixes = std::collections::BTreeSet::new();
        for head in heads {
            let remainder = &head.name[prefix.len()..];
            match remainder.find(delim) {
                Some(idx) => {
                    prefixes.insert(format!("{prefix}{}", &remainder[..idx + delim.len()]));
                }
                None => items.push(head),
            }
        }
        Ok(ListResult { items, prefixes: prefixes.into_iter().collect(), versions: Vec::new() })
    }

    /// Copies the latest version of `src` into a new generation under `dst`,
    /// always preserving content type and custom metadata. Locks are
    /// acquired in lexicographic `(bucket,name)` order to avoid deadlocking
    /// against a concurrent reverse copy.
    pub async fn copy(&self, src_bucket: &str, src_name: &str, dst_bucket: &str, dst_name: &str) -> Result<ObjectHead> {
        let src_b = self.buckets.get_by_name(src_bucket).await?;
        let dst_b = self.buckets.get_by_name(dst_bucket).await?;

        let key_a = Self::object_lock_key(&src_b.id, src_name);
        let key_b = Self::object_lock_key(&dst_b.id, dst_name);
        let (first, second) = if key_a <= key_b { (key_a, key_b) } else { (key_b, key_a) };
        let _first_guard = self.locks.acquire(&first).await;
        let _second_guard = if first != second { Some(self.locks.acquire(&second).await) } else { None };

        let src_head = self
            .objects
            .get_head(&src_b.id, src_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object {src_name}")))?;
        let bytes = self.content.read_whole(Path::new(&src_head.file_path)).await?;

        let dst_existing = self.objects.get_head_any(&dst_b.id, dst_name).await?;
        let new_generation = dst_existing.as_ref().map(|h| h.generation).unwrap_or(0) + 1;

        let path = self.content.new_object_path(&dst_b.id);
        self.content.write_whole(&path, &bytes).await?;

        let new_version = NewVersion {
            bucket_id: dst_b.id.clone(),
            name: dst_name.to_string(),
            generation: new_generation,
            metageneration: 1,
            size: bytes.len() as i64,
            content_type: src_head.content_type.clone(),
            md5: src_head.md5.clone(),
            crc32c: src_head.crc32c.clone(),
            file_path: path.to_string_lossy().to_string(),
            custom_metadata: src_head.custom_metadata.clone(),
        };

        let purge_prior = !dst_b.versioning_enabled;
        let freed = self.objects.commit_new_generation(&new_version, purge_prior).await?;
        for freed_path in freed {
            let _ = self.content.remove(Path::new(&freed_path)).await;
        }

        let head = self
            .objects
            .get_head(&dst_b.id, dst_name)
            .await?
            .ok_or_else(|| Error::Internal("object head missing after copy commit".to_string()))?;

        self.emit_event(&dst_b, dst_name, new_generation, ObjectEventType::ObjectFinalize).await;
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
        let dir = std::env::temp_dir().join(format!("emu-objects-test-{}", uuid::Uuid::new_v4()));
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
    async fn versioned_upload_round_trip() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", true, BucketAcl::Private).await.unwrap();

        svc.upload("b1", "hello.txt", b"v1", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        let head = svc
            .upload("b1", "hello.txt", b"v2", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        assert_eq!(head.generation, 2);

        let v1 = svc.download("b1", "hello.txt", Some(1)).await.unwrap();
        assert_eq!(v1.bytes, b"v1");
        let latest = svc.download("b1", "hello.txt", None).await.unwrap();
        assert_eq!(latest.bytes, b"v2");
    }

    #[tokio::test]
    async fn precondition_rejects_wrong_generation() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "f.txt", b"one", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();

        let bad = svc
            .upload(
                "b1",
                "f.txt",
                b"two",
                "text/plain",
                Default::default(),
                Preconditions { if_gen_match: Some(99), ..Default::default() },
            )
            .await;
        assert!(matches!(bad, Err(Error::PreconditionFailed(_))));

        let ok = svc
            .upload(
                "b1",
                "f.txt",
                b"two",
                "text/plain",
                Default::default(),
                Preconditions { if_gen_match: Some(1), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(ok.generation, 2);
    }

    #[tokio::test]
    async fn delete_without_versioning_purges_bytes() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "f.txt", b"data", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();

        svc.delete("b1", "f.txt", None).await.unwrap();
        let err = svc.download("b1", "f.txt", None).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn list_with_delimiter_groups_common_prefixes() {
        let svc = service().await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "logs/a.txt", b"a", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        svc.upload("b1", "logs/b.txt", b"b", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        svc.upload("b1", "readme.txt", b"r", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();

        let listed = svc.list("b1", None, Some("/"), false).await.unwrap();
        assert_eq!(listed.prefixes, vec!["logs/".to_string()]);
        assert_eq!(listed.items.len(), 1);
        assert_eq!(listed.items[0].name, "readme.txt");
    }

    #[tokio::test]
    async fn copy_preserves_content_type_and_metadata() {
        let svc = service().await;
        svc.create_bucket("p1", "src", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.create_bucket("p1", "dst", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();

        let mut meta = HashMap::new();
        meta.insert("owner".to_string(), "alice".to_string());
        svc.upload("src", "f.bin", b"payload", "application/octet-stream", meta.clone(), Preconditions::default())
            .await
            .unwrap();

        let copied = svc.copy("src", "f.bin", "dst", "g.bin").await.unwrap();
        assert_eq!(copied.content_type, "application/octet-stream");
        assert_eq!(copied.custom_metadata, meta);

        let downloaded = svc.download("dst", "g.bin", None).await.unwrap();
        assert_eq!(downloaded.bytes, b"payload");
    }
}
