//! Capture-side facade
//!
//! Capture sites hand a payload to the [`Tracker`], which stamps the
//! envelope (event id, session id, device fingerprint, timestamp) and
//! enqueues the record. Tracking never fails from the caller's point of
//! view: malformed records and store failures are logged and dropped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::db::QueueHandle;
use crate::identity::IdentityProvider;
use crate::types::{EventPayload, EventRecord, Metadata, VitalMetric, VitalRating};

#[derive(Clone)]
pub struct Tracker {
    queue: QueueHandle,
    identity: IdentityProvider,
    /// Highest timestamp handed out, shared by clones
    last_timestamp: Arc<AtomicI64>,
}

impl Tracker {
    pub fn new(queue: QueueHandle, identity: IdentityProvider) -> Self {
        Self {
            queue,
            identity,
            last_timestamp: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    /// Wall-clock milliseconds, never lower than a previous stamp from this
    /// tracker even if the clock steps back
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    /// Build a record for `payload` with a fresh envelope
    pub fn record(&self, payload: EventPayload) -> EventRecord {
        EventRecord::new(
            payload,
            self.identity.session_id(),
            self.identity.device_fingerprint(),
            self.next_timestamp(),
        )
    }

    pub async fn track(&self, payload: EventPayload) -> Option<i64> {
        self.queue.enqueue(self.record(payload)).await
    }

    pub async fn track_with(
        &self,
        payload: EventPayload,
        url: Option<&str>,
        metadata: Metadata,
    ) -> Option<i64> {
        let mut record = self.record(payload).with_metadata(metadata);
        if let Some(url) = url {
            record = record.with_url(url);
        }
        self.queue.enqueue(record).await
    }

    /// Track an untyped `{ type, data }` request, e.g. one relayed through
    /// the background worker. Envelope fields missing from `data` are filled
    /// in; the result must still validate against its kind.
    pub async fn track_raw(&self, event_type: &str, data: Option<Map<String, Value>>) -> Option<i64> {
        let mut fields = data.unwrap_or_default();
        fields.insert("type".to_string(), Value::String(event_type.to_string()));
        fields
            .entry("eventId")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        fields
            .entry("sessionId")
            .or_insert_with(|| Value::String(self.identity.session_id()));
        fields
            .entry("deviceFingerprint")
            .or_insert_with(|| Value::String(self.identity.device_fingerprint()));
        if !fields.contains_key("timestamp") {
            fields.insert("timestamp".to_string(), Value::from(self.next_timestamp()));
        }

        match EventRecord::from_value(Value::Object(fields)) {
            Ok(record) => self.queue.enqueue(record).await,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "Rejected malformed tracked event");
                None
            }
        }
    }

    pub async fn track_page_view(&self, url: &str, title: Option<&str>) -> Option<i64> {
        let payload = EventPayload::PageView {
            title: title.map(str::to_string),
            referrer: None,
            load_time_ms: None,
        };
        self.track_with(payload, Some(url), Metadata::new()).await
    }

    pub async fn track_web_vital(
        &self,
        metric_type: VitalMetric,
        value: f64,
        rating: VitalRating,
    ) -> Option<i64> {
        self.track(EventPayload::WebVital {
            metric_type,
            value,
            rating,
        })
        .await
    }

    pub async fn track_error(&self, message: &str, stack: Option<&str>) -> Option<i64> {
        self.track(EventPayload::Error {
            message: message.to_string(),
            stack: stack.map(str::to_string),
            source: None,
            line: None,
            column: None,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::types::EventKind;
    use serde_json::json;

    fn tracker() -> Tracker {
        Tracker::new(
            QueueHandle::in_memory().unwrap(),
            IdentityProvider::new(IdentityConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_track_stamps_envelope() {
        let tracker = tracker();
        let id = tracker
            .track_web_vital(VitalMetric::Lcp, 2200.0, VitalRating::Good)
            .await
            .unwrap();

        let entry = tracker.queue().get(id).await.unwrap().unwrap();
        assert_eq!(entry.record.kind(), EventKind::WebVital);
        assert_eq!(entry.record.session_id(), tracker.identity().session_id());
        assert_eq!(
            entry.record.device_fingerprint(),
            tracker.identity().device_fingerprint()
        );
        assert!(entry.record.timestamp() > 0);
    }

    #[tokio::test]
    async fn test_timestamps_never_decrease() {
        let tracker = tracker();
        tracker.last_timestamp.store(i64::MAX - 1, Ordering::SeqCst);

        let a = tracker.record(EventPayload::FeatureUsage {
            feature: "x".into(),
            action: None,
        });
        let b = tracker.record(EventPayload::FeatureUsage {
            feature: "y".into(),
            action: None,
        });
        assert!(b.timestamp() >= a.timestamp());
        assert_eq!(a.timestamp(), i64::MAX - 1);
    }

    #[tokio::test]
    async fn test_track_with_url_and_metadata() {
        let tracker = tracker();
        let mut metadata = Metadata::new();
        metadata.insert("plan".into(), json!("pro"));

        let id = tracker
            .track_with(
                EventPayload::FeatureUsage {
                    feature: "export".into(),
                    action: Some("csv".into()),
                },
                Some("https://app.example/reports"),
                metadata,
            )
            .await
            .unwrap();

        let record = tracker.queue().get(id).await.unwrap().unwrap().record;
        assert_eq!(record.url(), Some("https://app.example/reports"));
        assert_eq!(record.metadata()["plan"], "pro");
    }

    #[tokio::test]
    async fn test_track_raw_fills_envelope() {
        let tracker = tracker();
        let data = json!({ "action": "click", "target": "#cta" });

        let id = tracker
            .track_raw("behavior", data.as_object().cloned())
            .await
            .unwrap();

        let record = tracker.queue().get(id).await.unwrap().unwrap().record;
        assert_eq!(record.kind(), EventKind::Behavior);
        assert_eq!(record.session_id(), tracker.identity().session_id());
    }

    #[tokio::test]
    async fn test_track_raw_keeps_caller_envelope() {
        let tracker = tracker();
        let data = json!({
            "sessionId": "page-session",
            "timestamp": 42,
            "feature": "share",
        });

        let id = tracker
            .track_raw("feature_usage", data.as_object().cloned())
            .await
            .unwrap();

        let record = tracker.queue().get(id).await.unwrap().unwrap().record;
        assert_eq!(record.session_id(), "page-session");
        assert_eq!(record.timestamp(), 42);
    }

    #[tokio::test]
    async fn test_track_raw_rejects_mismatched_fields() {
        let tracker = tracker();

        let wrong_fields = json!({ "metricType": "LCP", "value": 1, "rating": "good" });
        assert_eq!(
            tracker
                .track_raw("error", wrong_fields.as_object().cloned())
                .await,
            None
        );
        assert_eq!(tracker.track_raw("not_a_kind", None).await, None);
        assert_eq!(tracker.queue().count_unsynced().await.unwrap(), 0);
    }
}
