//! Lifecycle execution — evaluates every bucket's rules as a set/union and
//! applies Delete/Archive actions idempotently.

use crate::repo::bucket::LifecycleAction;

use super::ObjectStoreService;

#[derive(Debug, Clone, Default)]
pub struct LifecycleRunSummary {
    pub buckets_evaluated: u64,
    pub objects_deleted: u64,
    pub objects_archived: u64,
}

impl ObjectStoreService {
    /// Runs one lifecycle sweep across every bucket with a configured
    /// lifecycle policy. Rules within a bucket are evaluated as a union: an
    /// object matching any Delete rule is deleted once; an object matching
    /// any Archive rule (and not deleted this round) is archived, and
    /// archiving an already-ARCHIVE object is a no-op.
    pub async fn run_lifecycle_once(&self) -> crate::error::Result<LifecycleRunSummary> {
        let mut summary = LifecycleRunSummary::default();
        let buckets = self.buckets.list_with_lifecycle().await?;

        for bucket in &buckets {
            summary.buckets_evaluated += 1;
            let Some(lifecycle) = &bucket.lifecycle else { continue };
            if lifecycle.rules.is_empty() {
                continue;
            }

            let heads = self.objects.all_heads(&bucket.id).await?;
            let now = self.clock.now();

            for head in heads {
                let age_days = (now - head.time_created).num_days();
                let mut deleted = false;

                for rule in &lifecycle.rules {
                    if rule.action != LifecycleAction::Delete || age_days < rule.age_days {
                        continue;
                    }
                    self.delete(&bucket.name, &head.name, None).await?;
                    summary.objects_deleted += 1;
                    deleted = true;
                    break;
                }
                if deleted {
                    continue;
                }

                for rule in &lifecycle.rules {
                    if rule.action != LifecycleAction::Archive || age_days < rule.age_days {
                        continue;
                    }
                    if head.storage_class == "ARCHIVE" {
                        break;
                    }
                    self.objects.set_storage_class(&bucket.id, &head.name, "ARCHIVE").await?;
                    summary.objects_archived += 1;
                    break;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use crate::clock::FixedClock;
    use crate::content::ContentStore;
    use crate::events::FakeEventSink;
    use crate::locks::KeyedLocks;
    use crate::repo::bucket::{BucketAcl, LifecycleConfig, LifecycleRule};
    use crate::repo::{BucketRepo, ObjectEventRepo, ObjectRepo, ResumableSessionRepo};

    use super::*;
    use crate::objectstore::objects::Preconditions;

    async fn service_at(now: chrono::DateTime<chrono::Utc>) -> ObjectStoreService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let dir = std::env::temp_dir().join(format!("emu-lifecycle-test-{}", uuid::Uuid::new_v4()));
        let content = ContentStore::new(&dir);
        content.ensure_dirs().await.unwrap();

        ObjectStoreService::new(
            BucketRepo::new(pool.clone()),
            ObjectRepo::new(pool.clone()),
            ResumableSessionRepo::new(pool.clone()),
            ObjectEventRepo::new(pool.clone()),
            content,
            Arc::new(KeyedLocks::new()),
            Arc::new(FixedClock(now)),
            Arc::new(FakeEventSink::new()),
            crate::config::EmulatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn delete_rule_removes_objects_past_age() {
        // Objects record their own creation time via the real clock, so to
        // simulate a 40-day-old object the service's clock is fixed 40 days
        // into the future instead of backdating the object.
        let forty_days_later = chrono::Utc::now() + Duration::days(40);
        let svc = service_at(forty_days_later).await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "old.txt", b"x", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        svc.set_lifecycle(
            "b1",
            Some(LifecycleConfig {
                rules: vec![LifecycleRule { action: crate::repo::bucket::LifecycleAction::Delete, age_days: 30 }],
            }),
        )
        .await
        .unwrap();

        let summary = svc.run_lifecycle_once().await.unwrap();
        assert_eq!(summary.objects_deleted, 1);
    }

    #[tokio::test]
    async fn union_of_rules_deletes_once_and_skips_archive() {
        let now = chrono::Utc::now();
        let svc = service_at(now).await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "f.txt", b"x", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        svc.set_lifecycle(
            "b1",
            Some(LifecycleConfig {
                rules: vec![
                    LifecycleRule { action: crate::repo::bucket::LifecycleAction::Delete, age_days: 0 },
                    LifecycleRule { action: crate::repo::bucket::LifecycleAction::Archive, age_days: 0 },
                ],
            }),
        )
        .await
        .unwrap();

        let summary = svc.run_lifecycle_once().await.unwrap();
        assert_eq!(summary.objects_deleted, 1);
        assert_eq!(summary.objects_archived, 0);

        let err = svc.download("b1", "f.txt", None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn archive_is_idempotent() {
        let now = chrono::Utc::now();
        let svc = service_at(now).await;
        svc.create_bucket("p1", "b1", "US", "STANDARD", false, BucketAcl::Private).await.unwrap();
        svc.upload("b1", "f.txt", b"x", "text/plain", Default::default(), Preconditions::default())
            .await
            .unwrap();
        svc.set_lifecycle(
            "b1",
            Some(LifecycleConfig {
                rules: vec![LifecycleRule { action: crate::repo::bucket::LifecycleAction::Archive, age_days: 0 }],
            }),
        )
        .await
        .unwrap();

        svc.run_lifecycle_once().await.unwrap();
        let second = svc.run_lifecycle_once().await.unwrap();
        assert_eq!(second.objects_archived, 0);
    }
}
