//! Raw record parsing and severity classification.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const ERROR_LEVELS: [&str; 4] = ["error", "critical", "fatal", "panic"];
const WARNING_LEVELS: [&str; 2] = ["warn", "warning"];

/// Fallback service name for records that do not carry one.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// A timestamp as it arrives from a log source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Native(DateTime<Utc>),
    Text(String),
    Unsupported(Value),
}

impl RawTimestamp {
    /// The UTC instant this value denotes, if it can be parsed.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Native(ts) => Some(*ts),
            RawTimestamp::Text(s) => parse_timestamp(s),
            RawTimestamp::Unsupported(_) => None,
        }
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        RawTimestamp::Native(ts)
    }
}

/// A log record before validation. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub service: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

/// Scalars become their JSON text; arrays and objects are treated as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Some(v.to_string()),
        _ => None,
    })
}

/// Metadata is opaque: anything but an object is discarded.
fn lenient_object<'de, D>(
    deserializer: D,
) -> Result<Option<serde_json::Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    })
}

impl RawLogRecord {
    /// Convert a loosely shaped JSON batch. Entries that do not look like a
    /// record at all are skipped; the second value is how many were skipped.
    pub fn from_values(values: Vec<Value>) -> (Vec<RawLogRecord>, usize) {
        let total = values.len();
        let records: Vec<RawLogRecord> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        let skipped = total - records.len();
        (records, skipped)
    }
}

/// Coarse classification of a log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityClass {
    Error,
    Warning,
    Other,
}

impl SeverityClass {
    pub fn from_level(level: &str) -> Self {
        let level = level.to_lowercase();
        if ERROR_LEVELS.contains(&level.as_str()) {
            SeverityClass::Error
        } else if WARNING_LEVELS.contains(&level.as_str()) {
            SeverityClass::Warning
        } else {
            SeverityClass::Other
        }
    }
}

/// A validated log record with a UTC timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub class: SeverityClass,
    pub service: String,
    pub message: String,
    pub metadata: serde_json::Map<String, Value>,
}

/// Validate a raw record. Returns `None` when the timestamp cannot be
/// resolved; callers drop such records without surfacing an error.
pub fn normalize(raw: &RawLogRecord) -> Option<LogRecord> {
    let timestamp = raw.timestamp.as_ref()?.resolve()?;
    let level = raw.level.as_deref().unwrap_or("").to_lowercase();
    let class = SeverityClass::from_level(&level);

    Some(LogRecord {
        timestamp,
        level,
        class,
        service: raw
            .service
            .clone()
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
        message: raw.message.clone().unwrap_or_default(),
        metadata: raw.metadata.clone().unwrap_or_default(),
    })
}

/// Parse an ISO-8601 timestamp. Offsets (including `Z`) are converted to
/// UTC; values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    #[test]
    fn test_classify_levels() {
        assert_eq!(SeverityClass::from_level("ERROR"), SeverityClass::Error);
        assert_eq!(SeverityClass::from_level("Panic"), SeverityClass::Error);
        assert_eq!(SeverityClass::from_level("fatal"), SeverityClass::Error);
        assert_eq!(SeverityClass::from_level("WARN"), SeverityClass::Warning);
        assert_eq!(SeverityClass::from_level("warning"), SeverityClass::Warning);
        assert_eq!(SeverityClass::from_level("info"), SeverityClass::Other);
        assert_eq!(SeverityClass::from_level(""), SeverityClass::Other);
        assert_eq!(SeverityClass::from_level("err"), SeverityClass::Other);
    }

    #[test]
    fn test_parse_zulu_and_offset() {
        let z = parse_timestamp("2024-05-01T10:15:30Z").unwrap();
        assert_eq!(z, Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap());

        let off = parse_timestamp("2024-05-01T12:15:30+02:00").unwrap();
        assert_eq!(off, z);

        let frac = parse_timestamp("2024-05-01T10:15:30.123456Z").unwrap();
        assert_eq!(frac.second(), 30);
    }

    #[test]
    fn test_parse_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T10:15:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 10:15:30"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-05-01"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("2024-13-01T00:00:00Z").is_none());
    }

    #[test]
    fn test_normalize_defaults() {
        let raw: RawLogRecord =
            serde_json::from_value(json!({ "timestamp": "2024-05-01T10:00:00Z" })).unwrap();
        let rec = normalize(&raw).unwrap();
        assert_eq!(rec.service, UNKNOWN_SERVICE);
        assert_eq!(rec.level, "");
        assert_eq!(rec.class, SeverityClass::Other);
        assert!(rec.metadata.is_empty());
    }

    #[test]
    fn test_normalize_native_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let raw = RawLogRecord {
            timestamp: Some(ts.into()),
            level: Some("CRITICAL".into()),
            ..Default::default()
        };
        let rec = normalize(&raw).unwrap();
        assert_eq!(rec.timestamp, ts);
        assert_eq!(rec.class, SeverityClass::Error);
    }

    #[test]
    fn test_normalize_drops_bad_timestamps() {
        let missing = RawLogRecord::default();
        assert!(normalize(&missing).is_none());

        let numeric: RawLogRecord =
            serde_json::from_value(json!({ "timestamp": 1714557600, "level": "error" })).unwrap();
        assert!(normalize(&numeric).is_none());

        let text: RawLogRecord =
            serde_json::from_value(json!({ "timestamp": "soon", "level": "error" })).unwrap();
        assert!(normalize(&text).is_none());
    }

    #[test]
    fn test_from_values_skips_wrong_shape() {
        let (records, skipped) = RawLogRecord::from_values(vec![
            json!({ "timestamp": "2024-05-01T10:00:00Z" }),
            json!("just a string"),
            json!([1, 2, 3]),
        ]);
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_odd_field_types_keep_the_record() {
        let (records, skipped) = RawLogRecord::from_values(vec![
            json!({ "timestamp": "2024-05-01T10:00:00Z", "metadata": "trace=abc" }),
            json!({ "timestamp": "2024-05-01T10:01:00Z", "message": 500, "level": "error" }),
            json!({ "timestamp": "2024-05-01T10:02:00Z", "service": ["a"], "metadata": null }),
        ]);
        assert_eq!(skipped, 0);
        assert_eq!(records.len(), 3);
        assert!(records[0].metadata.is_none());
        assert_eq!(records[1].message.as_deref(), Some("500"));
        assert!(records[2].service.is_none());

        let normalized: Vec<LogRecord> = records.iter().filter_map(normalize).collect();
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[1].class, SeverityClass::Error);
        assert_eq!(normalized[2].service, UNKNOWN_SERVICE);
    }
}
