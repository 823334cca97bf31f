//! Events — best-effort webhook delivery for bucket notification configs.
//!
//! The object store always appends an `ObjectEvent` row on every mutation
//! (durable, queried by tests and the admin surface); this module is only
//! the delivery side-channel for bucket `notificationConfigs`, and a
//! delivery failure never fails the request that triggered it.

use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectEventType {
    ObjectFinalize,
    ObjectDelete,
    ObjectMetadataUpdate,
}

impl ObjectEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectEventType::ObjectFinalize => "OBJECT_FINALIZE",
            ObjectEventType::ObjectDelete => "OBJECT_DELETE",
            ObjectEventType::ObjectMetadataUpdate => "OBJECT_METADATA_UPDATE",
        }
    }
}

impl std::str::FromStr for ObjectEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OBJECT_FINALIZE" => Ok(ObjectEventType::ObjectFinalize),
            "OBJECT_DELETE" => Ok(ObjectEventType::ObjectDelete),
            "OBJECT_METADATA_UPDATE" => Ok(ObjectEventType::ObjectMetadataUpdate),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectEventPayload {
    pub bucket: String,
    pub name: String,
    pub generation: i64,
    pub event_type: ObjectEventType,
}

/// A bucket notification config, matched against outgoing events before
/// delivery is attempted.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    #[serde(default)]
    pub object_name_prefix: Option<String>,
    #[serde(default = "default_payload_format")]
    pub payload_format: String,
}

fn default_payload_format() -> String {
    "JSON_API_V1".to_string()
}

impl NotificationConfig {
    pub fn matches(&self, event: &ObjectEventPayload) -> bool {
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == event.event_type.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.object_name_prefix {
            if !event.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Narrow interface over "deliver this JSON payload to this URL", so
/// services never depend on `reqwest` directly and tests can swap in a
/// recording double.
pub trait EventSink: Send + Sync {
    fn deliver<'a>(&'a self, webhook_url: &'a str, payload: &'a Value) -> BoxFuture<'a, ()>;
}

/// Real webhook delivery: one POST, a 5-second-default timeout, one retry.
/// Outcomes are logged; the caller never learns of failure.
pub struct WebhookEventSink {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookEventSink {
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }

    async fn post_once(&self, url: &str, payload: &Value) -> Result<(), String> {
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

impl EventSink for WebhookEventSink {
    fn deliver<'a>(&'a self, webhook_url: &'a str, payload: &'a Value) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self.post_once(webhook_url, payload).await {
                Ok(()) => info!(webhook_url, "webhook delivered"),
                Err(first_err) => {
                    warn!(webhook_url, error = %first_err, "webhook delivery failed, retrying once");
                    if let Err(second_err) = self.post_once(webhook_url, payload).await {
                        warn!(webhook_url, error = %second_err, "webhook retry failed, giving up");
                    } else {
                        info!(webhook_url, "webhook delivered on retry");
                    }
                }
            }
        })
    }
}

/// In-memory recording sink for tests.
pub struct FakeEventSink {
    pub deliveries: tokio::sync::Mutex<Vec<(String, Value)>>,
}

impl FakeEventSink {
    pub fn new() -> Self {
        Self { deliveries: tokio::sync::Mutex::new(Vec::new()) }
    }
}

impl Default for FakeEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for FakeEventSink {
    fn deliver<'a>(&'a self, webhook_url: &'a str, payload: &'a Value) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.deliveries.lock().await.push((webhook_url.to_string(), payload.clone()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_matches_event_type_and_prefix() {
        let cfg = NotificationConfig {
            webhook_url: "http://example.test/hook".into(),
            event_types: Some(vec!["OBJECT_FINALIZE".into()]),
            object_name_prefix: Some("logs/".into()),
            payload_format: "JSON_API_V1".into(),
        };
        let matching = ObjectEventPayload {
            bucket: "b".into(),
            name: "logs/a.txt".into(),
            generation: 1,
            event_type: ObjectEventType::ObjectFinalize,
        };
        assert!(cfg.matches(&matching));

        let wrong_prefix = ObjectEventPayload { name: "other/a.txt".into(), ..matching.clone() };
        assert!(!cfg.matches(&wrong_prefix));

        let wrong_type = ObjectEventPayload {
            event_type: ObjectEventType::ObjectDelete,
            ..matching
        };
        assert!(!cfg.matches(&wrong_type));
    }
}
