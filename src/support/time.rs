//! Timestamp formatting for OCPP payloads.
//!
//! OCPP-J timestamps are ISO-8601 strings. Outgoing payloads are rewritten
//! with a process-wide `strftime` pattern, `%Y-%m-%dT%H:%M:%SZ` unless
//! replaced through [`set_timestamp_format`]. Parsing accepts any RFC 3339
//! value.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Default wire format for timestamps.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static TIMESTAMP_FORMAT: RwLock<Option<String>> = RwLock::new(None);

/// Replace the timestamp format used by every outgoing payload.
pub fn set_timestamp_format(format: impl Into<String>) {
    let mut guard = TIMESTAMP_FORMAT
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(format.into());
}

/// Restore the default timestamp format.
pub fn reset_timestamp_format() {
    let mut guard = TIMESTAMP_FORMAT
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = None;
}

/// Format a timestamp with the current process-wide format.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    let guard = TIMESTAMP_FORMAT
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let format = guard.as_deref().unwrap_or(DEFAULT_TIMESTAMP_FORMAT);
    timestamp.format(format).to_string()
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Field names that carry a timestamp in OCPP 1.6 payloads.
const TIMESTAMP_FIELDS: &[&str] = &[
    "currentTime",
    "expiryDate",
    "retrieveDate",
    "scheduleStart",
    "startSchedule",
    "startTime",
    "stopTime",
    "timestamp",
    "validFrom",
    "validTo",
];

/// Rewrite every timestamp field of an encoded payload with the current
/// format. Values that do not parse are left alone.
pub fn normalize_timestamps(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                match field {
                    Value::String(raw) if TIMESTAMP_FIELDS.contains(&key.as_str()) => {
                        if let Ok(parsed) = parse_timestamp(raw) {
                            *raw = format_timestamp(&parsed);
                        }
                    }
                    _ => normalize_timestamps(field),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_timestamps),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn default_format_is_second_precision_zulu() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(250);
        assert_eq!(format_timestamp(&at), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn parsing_accepts_offsets_and_fractions() {
        assert_eq!(
            parse_timestamp("2024-01-01T02:00:00.250+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn nested_timestamp_fields_are_rewritten() {
        let mut payload = json!({
            "connectorId": 1,
            "meterValue": [{
                "timestamp": "2024-01-01T02:00:00.250+02:00",
                "sampledValue": [{"value": "2024-01-01T02:00:00+02:00"}]
            }],
            "idTagInfo": {"status": "Accepted", "expiryDate": "not a date"}
        });
        normalize_timestamps(&mut payload);
        assert_eq!(payload["meterValue"][0]["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(payload["meterValue"][0]["sampledValue"][0]["value"], "2024-01-01T02:00:00+02:00");
        assert_eq!(payload["idTagInfo"]["expiryDate"], "not a date");
        assert_eq!(payload["connectorId"], 1);
    }
}
