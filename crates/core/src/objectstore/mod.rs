//! Objectstore — the storage service: buckets, versioned objects,
//! resumable/multipart uploads, signed URLs, and lifecycle execution.
//!
//! Composes the repositories, content store, per-key locks, clock, and
//! event sink behind one narrow service type, per the constructor-injection
//! guidance: no per-request global lookup, every collaborator is a field.

pub mod buckets;
pub mod lifecycle;
pub mod multipart;
pub mod objects;
pub mod resumable;
pub mod signed_url;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EmulatorConfig;
use crate::content::ContentStore;
use crate::events::EventSink;
use crate::locks::KeyedLocks;
use crate::repo::{BucketRepo, ObjectEventRepo, ObjectRepo, ResumableSessionRepo};

#[derive(Clone)]
pub struct ObjectStoreService {
    pub(crate) buckets: BucketRepo,
    pub(crate) objects: ObjectRepo,
    pub(crate) sessions: ResumableSessionRepo,
    pub(crate) events: ObjectEventRepo,
    pub(crate) content: ContentStore,
    pub(crate) locks: Arc<KeyedLocks>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_sink: Arc<dyn EventSink>,
    pub(crate) config: EmulatorConfig,
}

impl ObjectStoreService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buckets: BucketRepo,
        objects: ObjectRepo,
        sessions: ResumableSessionRepo,
        events: ObjectEventRepo,
        content: ContentStore,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
        config: EmulatorConfig,
    ) -> Self {
        Self { buckets, objects, sessions, events, content, locks, clock, event_sink, config }
    }

    /// Lock key for a single `(bucket, object)` write. Shared by every
    /// operation that mutates one object's head.
    pub(crate) fn object_lock_key(bucket_id: &str, name: &str) -> String {
        format!("{bucket_id}/{name}")
    }

    async fn emit_event(
        &self,
        bucket: &crate::repo::bucket::Bucket,
        object_name: &str,
        generation: i64,
        event_type: crate::events::ObjectEventType,
    ) {
        let payload = crate::events::ObjectEventPayload {
            bucket: bucket.name.clone(),
            name: object_name.to_string(),
            generation,
            event_type,
        };
        let value = serde_json::to_value(&payload).unwrap_or_default();

        if let Err(e) = self.events.append(&bucket.name, object_name, generation, event_type, &value).await {
            tracing::warn!(bucket = %bucket.name, object = %object_name, error = %e, "failed to persist object event");
        }

        for notification in &bucket.notifications {
            if notification.matches(&payload) {
                self.event_sink.deliver(&notification.webhook_url, &value).await;
            }
        }
    }
}

pub use crate::repo::bucket::{Bucket, BucketAcl, LifecycleAction, LifecycleConfig, LifecycleRule};
