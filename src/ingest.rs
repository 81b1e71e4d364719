//! Ingestion-side view of an envelope
//!
//! Mirrors what the remote consumer does with a received message: walk the
//! payload, coerce numeric fields with a decimal-safe conversion, and emit one
//! record per element keyed by device, channel and receipt time. Used by the
//! dry-run transport to check outgoing envelopes against that contract.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::TelemetryError;
use crate::mqtt::envelope::INDEX_FIELD;

/// Stable identity carried by collar samples; preferred over the batch index
pub const DEVICE_FIELD: &str = "elk_id";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestRecord {
    pub device_id: String,
    pub topic: String,
    /// Time the record was received, distinct from the producer timestamp
    pub received_at: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Strict conversion of a JSON value to a finite number
pub fn try_coerce_decimal(field: &str, raw: Option<&Value>) -> Result<f64, TelemetryError> {
    let malformed = |value: String| TelemetryError::MalformedSample {
        field: field.to_string(),
        value,
    };

    match raw {
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| malformed(n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| malformed(s.clone())),
        Some(other) => Err(malformed(other.to_string())),
        None => Err(malformed("<missing>".to_string())),
    }
}

/// Decimal-safe conversion: anything unusable becomes zero
pub fn coerce_decimal(field: &str, raw: Option<&Value>) -> f64 {
    match try_coerce_decimal(field, raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}; storing 0", e);
            0.0
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turns a received envelope into records. `numeric_fields` are coerced and
/// always present; every other field is kept as text. Elements that are not
/// objects are skipped.
pub fn normalize(
    envelope: &Value,
    numeric_fields: &[&str],
    received_at: DateTime<Utc>,
) -> Vec<IngestRecord> {
    let topic = envelope
        .get("topic")
        .and_then(Value::as_str)
        .unwrap_or("unknown_topic")
        .to_string();

    let Some(payload) = envelope.get("payload").and_then(Value::as_array) else {
        warn!("Envelope for {} has no payload", topic);
        return Vec::new();
    };

    payload
        .iter()
        .filter_map(|element| {
            let Some(object) = element.as_object() else {
                warn!("Skipping non-object payload element in {}", topic);
                return None;
            };

            let id_field = if object.contains_key(DEVICE_FIELD) {
                DEVICE_FIELD
            } else {
                INDEX_FIELD
            };
            let device_id = object
                .get(id_field)
                .map(text_of)
                .unwrap_or_else(|| "unknown".to_string());

            let mut fields = BTreeMap::new();
            for name in numeric_fields {
                let value = coerce_decimal(name, object.get(*name));
                fields.insert(name.to_string(), FieldValue::Number(value));
            }
            for (name, value) in object {
                if name == INDEX_FIELD || name == id_field || fields.contains_key(name) {
                    continue;
                }
                fields.insert(name.clone(), FieldValue::Text(text_of(value)));
            }

            Some(IngestRecord {
                device_id,
                topic: topic.clone(),
                received_at,
                fields,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercion_never_raises() {
        assert_eq!(coerce_decimal("x", Some(&json!("12.5"))), 12.5);
        assert_eq!(coerce_decimal("x", None), 0.0);
        assert_eq!(coerce_decimal("x", Some(&json!("abc"))), 0.0);
        assert_eq!(coerce_decimal("x", Some(&json!(7))), 7.0);
        assert_eq!(coerce_decimal("x", Some(&json!(null))), 0.0);
        assert_eq!(coerce_decimal("x", Some(&json!("NaN"))), 0.0);
    }

    #[test]
    fn strict_coercion_names_the_field() {
        match try_coerce_decimal("humidity", Some(&json!("wet"))) {
            Err(TelemetryError::MalformedSample { field, value }) => {
                assert_eq!(field, "humidity");
                assert_eq!(value, "wet");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_field_does_not_drop_the_batch() {
        let envelope = json!({
            "messageId": "m",
            "topic": "IoT/ENV",
            "timestamp": 1.0,
            "payload": [
                {"sensor_id": 0, "lat": 53.0, "lon": -127.0, "temperature": "abc", "humidity": 40, "wind_direction": "East"},
                {"sensor_id": 1, "lat": "53.1", "lon": -127.1, "humidity": 50, "wind_direction": "North"},
                "garbage"
            ]
        });
        let now = Utc::now();
        let records = normalize(&envelope, &["lat", "lon", "temperature", "humidity"], now);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_id, "0");
        assert_eq!(records[0].topic, "IoT/ENV");
        assert_eq!(records[0].received_at, now);
        assert_eq!(records[0].fields["temperature"], FieldValue::Number(0.0));
        assert_eq!(
            records[0].fields["wind_direction"],
            FieldValue::Text("East".into())
        );
        assert_eq!(records[1].fields["lat"], FieldValue::Number(53.1));
        assert_eq!(records[1].fields["temperature"], FieldValue::Number(0.0));
    }

    #[test]
    fn collar_records_are_keyed_by_elk_id() {
        let envelope = json!({
            "topic": "IoT/GPS",
            "payload": [
                {"sensor_id": 0, "elk_id": 7, "lat": 53.0, "lon": -127.0},
                {"sensor_id": 1, "elk_id": 3, "lat": 53.1, "lon": -127.1}
            ]
        });
        let records = normalize(&envelope, &["lat", "lon"], Utc::now());

        let ids: Vec<&str> = records.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, ["7", "3"]);
        assert!(!records[0].fields.contains_key("elk_id"));
        assert_eq!(records[1].fields["lat"], FieldValue::Number(53.1));
    }

    #[test]
    fn missing_payload_yields_nothing() {
        assert!(normalize(&json!({"topic": "t"}), &[], Utc::now()).is_empty());
    }
}
