use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document body as the backend stores it.
pub type Document = Map<String, Value>;

/// Collection the dashboard mirrors.
pub const FIRE_REPORTS: &str = "fireReports";

/// Field the live query is ordered by.
pub const ORDER_FIELD: &str = "dateTime";

/// Placeholder the backend replaces with its own clock on write.
pub fn server_timestamp() -> Value {
    serde_json::json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value.get(".sv").and_then(|v| v.as_str()) == Some("timestamp")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    Pending,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Pending => "Pending",
            IncidentStatus::Resolved => "Resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(IncidentStatus::Pending),
            "Resolved" => Some(IncidentStatus::Resolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentRecord {
    pub id: String,
    pub location: String,
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    /// `None` when the document has no status or one this crate does not know.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(rename = "assignedTo", skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Any other field supplied at creation (`createdAt`, reporter details, ...),
    /// plus raw `dateTime`/`status` values that did not decode.
    #[serde(flatten)]
    pub extra: Document,
}

impl IncidentRecord {
    /// Build a record from a pushed document. Never fails: the id always
    /// comes from the change, text fields take any scalar, and a `dateTime`
    /// or `status` that does not decode stays in `extra` under its own key.
    pub fn from_document(id: &str, data: &Document) -> Self {
        let mut extra = data.clone();
        extra.remove("id");

        let location = extra.remove("location").and_then(text_value).unwrap_or_default();
        let assigned_to = extra.remove("assignedTo").and_then(text_value);

        let date_time = match extra.remove(ORDER_FIELD) {
            Some(raw) => {
                let parsed = parse_date_time(&raw);
                if parsed.is_none() && !raw.is_null() {
                    extra.insert(ORDER_FIELD.to_string(), raw);
                }
                parsed
            }
            None => None,
        };

        let status = match extra.remove("status") {
            Some(Value::String(s)) => match IncidentStatus::parse(&s) {
                Some(status) => Some(status),
                None => {
                    extra.insert("status".to_string(), Value::String(s));
                    None
                }
            },
            Some(Value::Null) | None => None,
            Some(raw) => {
                extra.insert("status".to_string(), raw);
                None
            }
        };

        Self {
            id: id.to_string(),
            location,
            date_time,
            status,
            assigned_to,
            extra,
        }
    }

    /// An empty handler id counts as unassigned.
    pub fn is_unassigned(&self) -> bool {
        self.assigned_to.as_deref().map_or(true, str::is_empty)
    }
}

fn text_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// RFC 3339, zone-less local formats (read as UTC), epoch milliseconds, or a
/// `{seconds, nanoseconds}` timestamp object.
fn parse_date_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::Object(obj) => {
            let secs = obj.get("seconds").or_else(|| obj.get("_seconds"))?.as_i64()?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(secs, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

pub const NOTIFICATION_TITLE: &str = "New Fire Report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Id of the incident that raised it. Not unique.
    pub id: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn for_incident(record: &IncidentRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: NOTIFICATION_TITLE.to_string(),
            body: format!("A new fire incident has been reported at {}", record.location),
            read: false,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

/// One entry of a pushed change batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub id: String,
    #[serde(default)]
    pub data: Document,
}

impl DocumentChange {
    pub fn added(id: impl Into<String>, data: Document) -> Self {
        Self { kind: ChangeKind::Added, id: id.into(), data }
    }

    pub fn modified(id: impl Into<String>, data: Document) -> Self {
        Self { kind: ChangeKind::Modified, id: id.into(), data }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self { kind: ChangeKind::Removed, id: id.into(), data: Document::new() }
    }
}

pub type ChangeBatch = Vec<DocumentChange>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: String,
    pub order_by: String,
    pub direction: Direction,
}

impl CollectionQuery {
    /// Newest reports first.
    pub fn fire_reports(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: ORDER_FIELD.to_string(),
            direction: Direction::Desc,
        }
    }
}

/// One line of a recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedBatch {
    pub ts: DateTime<Utc>,
    pub collection: String,
    pub batch: ChangeBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReplayMode {
    Realtime,
    Speed(f64),
    AsFast,
}

impl ReplayMode {
    /// `1.0` replays in real time, other positive values scale it, anything
    /// else replays as fast as possible.
    pub fn from_speed(speed: f64) -> Self {
        if speed == 1.0 {
            ReplayMode::Realtime
        } else if speed > 0.0 {
            ReplayMode::Speed(speed)
        } else {
            ReplayMode::AsFast
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_from_document() {
        let data = doc(json!({
            "location": "Oak St",
            "dateTime": "2024-03-01T10:00:00Z",
            "status": "Pending",
            "reporter": "alice",
        }));
        let record = IncidentRecord::from_document("r1", &data);

        assert_eq!(record.id, "r1");
        assert_eq!(record.location, "Oak St");
        assert_eq!(record.status, Some(IncidentStatus::Pending));
        assert!(record.date_time.is_some());
        assert_eq!(record.extra.get("reporter"), Some(&json!("alice")));
        assert!(!record.extra.contains_key("dateTime"));
    }

    #[test]
    fn test_record_defaults() {
        let record = IncidentRecord::from_document("r2", &Document::new());
        assert_eq!(record.status, None);
        assert!(record.is_unassigned());
        assert!(record.location.is_empty());
    }

    #[test]
    fn test_body_id_is_ignored() {
        let data = doc(json!({ "id": "spoofed", "location": "Elm" }));
        let record = IncidentRecord::from_document("real", &data);
        assert_eq!(record.id, "real");
        assert!(!record.extra.contains_key("id"));
    }

    #[test]
    fn test_unknown_status_kept_raw() {
        let record = IncidentRecord::from_document("r3", &doc(json!({ "status": "Burning" })));
        assert_eq!(record.status, None);
        assert_eq!(record.extra.get("status"), Some(&json!("Burning")));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "Burning");
    }

    #[test]
    fn test_epoch_millis_date_time() {
        let record = IncidentRecord::from_document("r5", &doc(json!({ "dateTime": 1700000000000i64 })));
        assert_eq!(record.date_time.unwrap().timestamp(), 1_700_000_000);
        assert!(!record.extra.contains_key("dateTime"));
    }

    #[test]
    fn test_local_and_timestamp_object_date_time() {
        let local = IncidentRecord::from_document("r6", &doc(json!({ "dateTime": "2024-03-01 10:00" })));
        assert_eq!(local.date_time.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let form = IncidentRecord::from_document("r7", &doc(json!({ "dateTime": "2024-03-01T10:00" })));
        assert_eq!(form.date_time, local.date_time);

        let object = IncidentRecord::from_document(
            "r8",
            &doc(json!({ "dateTime": { "seconds": 1700000000, "nanoseconds": 0 } })),
        );
        assert_eq!(object.date_time.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_unparseable_date_time_kept_raw() {
        let record = IncidentRecord::from_document("r9", &doc(json!({ "dateTime": "yesterday" })));
        assert!(record.date_time.is_none());
        assert_eq!(record.extra.get("dateTime"), Some(&json!("yesterday")));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["dateTime"], "yesterday");
    }

    #[test]
    fn test_null_and_numeric_text_fields() {
        let record = IncidentRecord::from_document(
            "r10",
            &doc(json!({ "location": null, "assignedTo": 7, "dateTime": null })),
        );
        assert_eq!(record.location, "");
        assert_eq!(record.assigned_to.as_deref(), Some("7"));
        assert!(!record.is_unassigned());
        assert!(record.date_time.is_none());
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_empty_handler_is_unassigned() {
        let data = doc(json!({ "assignedTo": "" }));
        let record = IncidentRecord::from_document("r4", &data);
        assert!(record.is_unassigned());
    }

    #[test]
    fn test_notification_body() {
        let record = IncidentRecord::from_document("r1", &doc(json!({ "location": "Oak St" })));
        let n = Notification::for_incident(&record);
        assert_eq!(n.id, "r1");
        assert_eq!(n.title, NOTIFICATION_TITLE);
        assert!(n.body.contains("Oak St"));
        assert!(!n.read);
    }

    #[test]
    fn test_change_wire_format() {
        let change: DocumentChange =
            serde_json::from_value(json!({ "type": "removed", "id": "r9" })).unwrap();
        assert_eq!(change, DocumentChange::removed("r9"));
    }
}
