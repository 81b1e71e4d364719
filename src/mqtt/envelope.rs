use chrono::Utc;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::error::TelemetryError;

/// Name of the positional index added to every payload element
pub const INDEX_FIELD: &str = "sensor_id";

/// One payload element: a sample tagged with its position in the batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadEntry<S> {
    pub sensor_id: usize,
    #[serde(flatten)]
    pub sample: S,
}

/// Transport-ready message bundling one tick's batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<S> {
    pub message_id: Uuid,
    pub topic: String,
    /// Unix seconds with microsecond fraction
    pub timestamp: f64,
    pub payload: Vec<PayloadEntry<S>>,
}

impl<S: Serialize> Envelope<S> {
    pub fn build(channel: &str, batch: Vec<S>) -> Result<Self, TelemetryError> {
        if channel.trim().is_empty() {
            return Err(TelemetryError::ConfigurationMissing(
                "channel name is empty".to_string(),
            ));
        }

        let now = Utc::now();
        let payload = batch
            .into_iter()
            .enumerate()
            .map(|(sensor_id, sample)| PayloadEntry { sensor_id, sample })
            .collect();

        Ok(Envelope {
            message_id: Uuid::new_v4(),
            topic: channel.to_string(),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            payload,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, TelemetryError> {
        serde_json::to_vec(self).map_err(|e| {
            TelemetryError::PublishFailure(format!("Failed to encode envelope: {}", e))
        })
    }
}

impl<S> fmt::Display for Envelope<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({} samples)",
            self.message_id,
            self.topic,
            self.payload.len()
        )
    }
}
