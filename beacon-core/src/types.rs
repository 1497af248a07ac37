//! Core domain types for beacon
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event Record** | An immutable telemetry fact with a closed [`EventKind`] |
//! | **Envelope** | Fields every record carries: event id, session id, device fingerprint, url, timestamp, metadata |
//! | **Payload** | The kind-specific typed fields ([`EventPayload`]) |
//! | **Queue Entry** | A stored record plus its sequence id and `synced` flag |
//!
//! ## Wire shape
//!
//! Records serialize flat, with the kind under `type` and camelCase field
//! names, e.g.
//!
//! ```json
//! {
//!   "type": "web_vital",
//!   "eventId": "1c9e…",
//!   "sessionId": "session_…",
//!   "deviceFingerprint": "9f2a…",
//!   "timestamp": 1735689600000,
//!   "metadata": {},
//!   "metricType": "LCP",
//!   "value": 2200.0,
//!   "rating": "good"
//! }
//! ```
//!
//! Adding a kind is additive: a new [`EventKind`] variant, a new
//! [`EventPayload`] variant and its field list. Existing shapes never change.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open key-value bag for producer-specific detail
pub type Metadata = Map<String, Value>;

/// Envelope fields shared by every kind, as they appear on the wire
pub const ENVELOPE_FIELDS: &[&str] = &[
    "type",
    "eventId",
    "sessionId",
    "deviceFingerprint",
    "url",
    "timestamp",
    "metadata",
];

// ============================================
// Event kinds
// ============================================

/// Closed set of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    PageView,
    WebVital,
    Behavior,
    Error,
    VisibilityChange,
    Clipboard,
    FormInteraction,
    Network,
    Storage,
    DeviceOrientation,
    FeatureUsage,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::SessionStart,
        EventKind::PageView,
        EventKind::WebVital,
        EventKind::Behavior,
        EventKind::Error,
        EventKind::VisibilityChange,
        EventKind::Clipboard,
        EventKind::FormInteraction,
        EventKind::Network,
        EventKind::Storage,
        EventKind::DeviceOrientation,
        EventKind::FeatureUsage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::PageView => "page_view",
            EventKind::WebVital => "web_vital",
            EventKind::Behavior => "behavior",
            EventKind::Error => "error",
            EventKind::VisibilityChange => "visibility_change",
            EventKind::Clipboard => "clipboard",
            EventKind::FormInteraction => "form_interaction",
            EventKind::Network => "network",
            EventKind::Storage => "storage",
            EventKind::DeviceOrientation => "device_orientation",
            EventKind::FeatureUsage => "feature_usage",
        }
    }

    /// Kind-specific wire fields. Anything outside these and
    /// [`ENVELOPE_FIELDS`] makes a record malformed.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            EventKind::SessionStart => &["referrer", "userAgent"],
            EventKind::PageView => &["title", "referrer", "loadTimeMs"],
            EventKind::WebVital => &["metricType", "value", "rating"],
            EventKind::Behavior => &["action", "target", "value"],
            EventKind::Error => &["message", "stack", "source", "line", "column"],
            EventKind::VisibilityChange => &["state", "hiddenForMs"],
            EventKind::Clipboard => &["action", "contentLength"],
            EventKind::FormInteraction => &["action", "formId", "field"],
            EventKind::Network => &["online", "effectiveType", "downlink", "rtt"],
            EventKind::Storage => &["storageType", "action", "key"],
            EventKind::DeviceOrientation => &["orientation", "angle"],
            EventKind::FeatureUsage => &["feature", "action"],
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

// ============================================
// Payload value types
// ============================================

/// Core Web Vitals metric names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VitalMetric {
    Lcp,
    Fid,
    Cls,
    Fcp,
    Ttfb,
    Inp,
}

/// Rating bucket reported alongside a vital
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VitalRating {
    Good,
    NeedsImprovement,
    Poor,
}

/// Page visibility state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
}

// ============================================
// Payloads
// ============================================

/// Kind-specific fields of a record. The serde tag doubles as the record's
/// `type`, so a payload can only ever carry the fields of its own kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    SessionStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referrer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_agent: Option<String>,
    },
    PageView {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referrer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        load_time_ms: Option<f64>,
    },
    WebVital {
        metric_type: VitalMetric,
        value: f64,
        rating: VitalRating,
    },
    Behavior {
        /// click, scroll, hover, ...
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<u32>,
    },
    VisibilityChange {
        state: Visibility,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hidden_for_ms: Option<u64>,
    },
    Clipboard {
        action: ClipboardAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_length: Option<u64>,
    },
    FormInteraction {
        /// focus, blur, change, submit, abandon
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Network {
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effective_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        downlink: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rtt: Option<f64>,
    },
    Storage {
        /// local, session, indexeddb, cookie
        storage_type: String,
        /// read, write, remove, clear, quota_exceeded
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    DeviceOrientation {
        /// portrait-primary, landscape-secondary, ...
        orientation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        angle: Option<f64>,
    },
    FeatureUsage {
        feature: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SessionStart { .. } => EventKind::SessionStart,
            EventPayload::PageView { .. } => EventKind::PageView,
            EventPayload::WebVital { .. } => EventKind::WebVital,
            EventPayload::Behavior { .. } => EventKind::Behavior,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::VisibilityChange { .. } => EventKind::VisibilityChange,
            EventPayload::Clipboard { .. } => EventKind::Clipboard,
            EventPayload::FormInteraction { .. } => EventKind::FormInteraction,
            EventPayload::Network { .. } => EventKind::Network,
            EventPayload::Storage { .. } => EventKind::Storage,
            EventPayload::DeviceOrientation { .. } => EventKind::DeviceOrientation,
            EventPayload::FeatureUsage { .. } => EventKind::FeatureUsage,
        }
    }

    /// Value-level checks serde cannot express
    pub fn validate(&self) -> Result<()> {
        fn non_empty(kind: EventKind, field: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(Error::InvalidRecord(format!(
                    "{} records require a non-empty `{}`",
                    kind, field
                )));
            }
            Ok(())
        }

        fn finite(kind: EventKind, field: &str, value: Option<f64>) -> Result<()> {
            match value {
                Some(v) if !v.is_finite() => Err(Error::InvalidRecord(format!(
                    "{} `{}` must be a finite number",
                    kind, field
                ))),
                _ => Ok(()),
            }
        }

        let kind = self.kind();
        match self {
            EventPayload::WebVital { value, .. } => {
                finite(kind, "value", Some(*value))?;
                if *value < 0.0 {
                    return Err(Error::InvalidRecord(
                        "web_vital `value` must not be negative".to_string(),
                    ));
                }
                Ok(())
            }
            EventPayload::PageView { load_time_ms, .. } => finite(kind, "loadTimeMs", *load_time_ms),
            EventPayload::Behavior { action, value, .. } => {
                non_empty(kind, "action", action)?;
                finite(kind, "value", *value)
            }
            EventPayload::Error { message, .. } => non_empty(kind, "message", message),
            EventPayload::FormInteraction { action, .. } => non_empty(kind, "action", action),
            EventPayload::Network { downlink, rtt, .. } => {
                finite(kind, "downlink", *downlink)?;
                finite(kind, "rtt", *rtt)
            }
            EventPayload::Storage {
                storage_type,
                action,
                ..
            } => {
                non_empty(kind, "storageType", storage_type)?;
                non_empty(kind, "action", action)
            }
            EventPayload::DeviceOrientation {
                orientation, angle, ..
            } => {
                non_empty(kind, "orientation", orientation)?;
                finite(kind, "angle", *angle)
            }
            EventPayload::FeatureUsage { feature, .. } => non_empty(kind, "feature", feature),
            EventPayload::SessionStart { .. }
            | EventPayload::VisibilityChange { .. }
            | EventPayload::Clipboard { .. } => Ok(()),
        }
    }
}

// ============================================
// Event record
// ============================================

/// An immutable telemetry fact.
///
/// Built once at a capture site (usually through
/// [`Tracker`](crate::tracker::Tracker)) and owned by the queue from then on.
/// There are no setters; the `with_*` builders consume the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    event_id: String,
    session_id: String,
    device_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    /// Milliseconds since the Unix epoch
    timestamp: i64,
    #[serde(default)]
    metadata: Metadata,
    #[serde(flatten)]
    payload: EventPayload,
}

impl EventRecord {
    /// Build a record with a fresh event id
    pub fn new(
        payload: EventPayload,
        session_id: impl Into<String>,
        device_fingerprint: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            device_fingerprint: device_fingerprint.into(),
            url: None,
            timestamp,
            metadata: Metadata::new(),
            payload,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parse and validate a record from its wire form.
    ///
    /// Rejects unknown kinds, fields that belong to a different kind,
    /// missing required fields and out-of-range values.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidRecord("record must be a JSON object".to_string()))?;

        let kind: EventKind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRecord("record is missing `type`".to_string()))?
            .parse()
            .map_err(Error::InvalidRecord)?;

        if let Some(stray) = obj
            .keys()
            .find(|k| !ENVELOPE_FIELDS.contains(&k.as_str()) && !kind.fields().contains(&k.as_str()))
        {
            return Err(Error::InvalidRecord(format!(
                "field `{}` does not belong to {} records",
                stray, kind
            )));
        }

        let record: EventRecord =
            serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Envelope and payload checks
    pub fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(Error::InvalidRecord("`sessionId` must not be empty".to_string()));
        }
        if self.event_id.is_empty() {
            return Err(Error::InvalidRecord("`eventId` must not be empty".to_string()));
        }
        if self.timestamp < 0 {
            return Err(Error::InvalidRecord("`timestamp` must not be negative".to_string()));
        }
        self.payload.validate()
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

// ============================================
// Queue
// ============================================

/// A stored record plus store-local bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Store-assigned sequence id, never reused
    pub id: i64,
    pub record: EventRecord,
    pub synced: bool,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub unsynced: usize,
    pub synced: usize,
    /// Unsynced entries per kind, sorted by kind
    pub unsynced_by_kind: Vec<(EventKind, usize)>,
    /// Timestamp of the oldest unsynced record
    pub oldest_unsynced_at: Option<i64>,
    /// Unsynced rows whose payload no longer parses. Counted in `unsynced`
    /// but never listed, so never delivered or purged.
    pub unreadable: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// One payload per kind with every optional field populated
    fn full_payload(kind: EventKind) -> EventPayload {
        match kind {
            EventKind::SessionStart => EventPayload::SessionStart {
                referrer: Some("https://search.example".into()),
                user_agent: Some("beacon-test".into()),
            },
            EventKind::PageView => EventPayload::PageView {
                title: Some("Home".into()),
                referrer: Some("/".into()),
                load_time_ms: Some(840.0),
            },
            EventKind::WebVital => EventPayload::WebVital {
                metric_type: VitalMetric::Lcp,
                value: 2200.0,
                rating: VitalRating::Good,
            },
            EventKind::Behavior => EventPayload::Behavior {
                action: "click".into(),
                target: Some("#buy".into()),
                value: Some(1.0),
            },
            EventKind::Error => EventPayload::Error {
                message: "boom".into(),
                stack: Some("at main".into()),
                source: Some("app.js".into()),
                line: Some(10),
                column: Some(4),
            },
            EventKind::VisibilityChange => EventPayload::VisibilityChange {
                state: Visibility::Hidden,
                hidden_for_ms: Some(1200),
            },
            EventKind::Clipboard => EventPayload::Clipboard {
                action: ClipboardAction::Copy,
                content_length: Some(42),
            },
            EventKind::FormInteraction => EventPayload::FormInteraction {
                action: "submit".into(),
                form_id: Some("signup".into()),
                field: Some("email".into()),
            },
            EventKind::Network => EventPayload::Network {
                online: true,
                effective_type: Some("4g".into()),
                downlink: Some(10.0),
                rtt: Some(50.0),
            },
            EventKind::Storage => EventPayload::Storage {
                storage_type: "local".into(),
                action: "write".into(),
                key: Some("cart".into()),
            },
            EventKind::DeviceOrientation => EventPayload::DeviceOrientation {
                orientation: "portrait-primary".into(),
                angle: Some(0.0),
            },
            EventKind::FeatureUsage => EventPayload::FeatureUsage {
                feature: "dark_mode".into(),
                action: Some("enabled".into()),
            },
        }
    }

    fn record(payload: EventPayload) -> EventRecord {
        EventRecord::new(payload, "session_1", "fp_1", 1_700_000_000_000)
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("made_up".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_declared_fields_match_wire_shape() {
        for kind in EventKind::ALL {
            let payload = full_payload(kind);
            assert_eq!(payload.kind(), kind);

            let value = serde_json::to_value(record(payload)).unwrap();
            let mut wire: Vec<&str> = value
                .as_object()
                .unwrap()
                .keys()
                .map(String::as_str)
                .filter(|k| !ENVELOPE_FIELDS.contains(k))
                .collect();
            wire.sort_unstable();

            let mut declared = kind.fields().to_vec();
            declared.sort_unstable();

            assert_eq!(wire, declared, "field list drifted for {}", kind);
            assert_eq!(value["type"], kind.as_str());
        }
    }

    #[test]
    fn test_web_vital_wire_shape() {
        let rec = record(full_payload(EventKind::WebVital)).with_url("https://app.example/");
        let value = serde_json::to_value(&rec).unwrap();

        assert_eq!(value["type"], "web_vital");
        assert_eq!(value["metricType"], "LCP");
        assert_eq!(value["value"], 2200.0);
        assert_eq!(value["rating"], "good");
        assert_eq!(value["sessionId"], "session_1");
        assert_eq!(value["deviceFingerprint"], "fp_1");
        assert_eq!(value["url"], "https://app.example/");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_from_value_accepts_integer_vital_value() {
        let rec = EventRecord::from_value(json!({
            "type": "web_vital",
            "eventId": "e1",
            "sessionId": "s1",
            "deviceFingerprint": "fp",
            "timestamp": 5,
            "metricType": "CLS",
            "value": 0,
            "rating": "needs-improvement",
        }))
        .unwrap();

        assert_eq!(rec.kind(), EventKind::WebVital);
        assert_eq!(
            rec.payload(),
            &EventPayload::WebVital {
                metric_type: VitalMetric::Cls,
                value: 0.0,
                rating: VitalRating::NeedsImprovement,
            }
        );
        assert!(rec.metadata().is_empty());
        assert!(rec.url().is_none());
    }

    #[test]
    fn test_from_value_rejects_foreign_fields() {
        let err = EventRecord::from_value(json!({
            "type": "web_vital",
            "eventId": "e1",
            "sessionId": "s1",
            "deviceFingerprint": "fp",
            "timestamp": 5,
            "metricType": "LCP",
            "value": 10,
            "rating": "good",
            "message": "not a vital field",
        }))
        .unwrap_err();

        assert!(err.to_string().contains("`message`"), "{}", err);
    }

    #[test]
    fn test_from_value_rejects_missing_required_field() {
        let result = EventRecord::from_value(json!({
            "type": "error",
            "eventId": "e1",
            "sessionId": "s1",
            "deviceFingerprint": "fp",
            "timestamp": 5,
            "stack": "at x",
        }));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_from_value_rejects_unknown_kind_and_non_objects() {
        assert!(EventRecord::from_value(json!({"type": "telepathy"})).is_err());
        assert!(EventRecord::from_value(json!(["web_vital"])).is_err());
        assert!(EventRecord::from_value(json!({"sessionId": "s"})).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let negative = record(EventPayload::WebVital {
            metric_type: VitalMetric::Lcp,
            value: -1.0,
            rating: VitalRating::Poor,
        });
        assert!(negative.validate().is_err());

        let blank = record(EventPayload::Error {
            message: "   ".into(),
            stack: None,
            source: None,
            line: None,
            column: None,
        });
        assert!(blank.validate().is_err());

        let infinite = record(EventPayload::Network {
            online: false,
            effective_type: None,
            downlink: Some(f64::INFINITY),
            rtt: None,
        });
        assert!(infinite.validate().is_err());

        for kind in EventKind::ALL {
            assert!(record(full_payload(kind)).validate().is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_metadata_is_schema_less() {
        let mut metadata = Metadata::new();
        metadata.insert("experiment".into(), json!({"arm": "b", "weights": [1, 2]}));
        metadata.insert("retries".into(), json!(3));

        let rec = record(full_payload(EventKind::FeatureUsage)).with_metadata(metadata);
        let value = serde_json::to_value(&rec).unwrap();
        let parsed = EventRecord::from_value(value).unwrap();

        assert_eq!(parsed.metadata()["experiment"]["arm"], "b");
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_new_records_get_distinct_event_ids() {
        let a = record(full_payload(EventKind::PageView));
        let b = record(full_payload(EventKind::PageView));
        assert_ne!(a.event_id(), b.event_id());
    }
}
