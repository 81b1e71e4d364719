//! Offline transport
//!
//! Never opens a socket. Each published envelope is decoded and run through
//! the ingestion normalizer, and the resulting records are logged. Useful for
//! exercising models and settings without broker credentials.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use super::session::{BrokerLink, Connector};
use crate::error::TelemetryError;
use crate::ingest;
use crate::telemetry::DeviceClass;

pub struct DryRunConnector {
    class: DeviceClass,
}

impl DryRunConnector {
    pub fn new(class: DeviceClass) -> Self {
        Self { class }
    }
}

impl Connector for DryRunConnector {
    type Link = DryRunLink;

    async fn connect(&self) -> Result<DryRunLink, TelemetryError> {
        Ok(DryRunLink {
            class: self.class,
            sent: 0,
        })
    }

    fn endpoint(&self) -> String {
        format!("dry-run ({})", self.class)
    }
}

pub struct DryRunLink {
    class: DeviceClass,
    sent: u64,
}

impl DryRunLink {
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl BrokerLink for DryRunLink {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TelemetryError> {
        let envelope: Value = serde_json::from_slice(&payload)
            .map_err(|e| TelemetryError::PublishFailure(format!("Envelope is not JSON: {}", e)))?;

        let records = ingest::normalize(&envelope, self.class.numeric_fields(), Utc::now());
        self.sent += 1;
        info!(
            "[dry-run] {} message #{} with {} records",
            topic,
            self.sent,
            records.len()
        );
        for record in &records {
            debug!("[dry-run] {:?}", record);
        }
        Ok(())
    }

    async fn close(self) {
        debug!("[dry-run] closed after {} messages", self.sent);
    }
}
