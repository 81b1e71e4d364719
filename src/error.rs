//! Error definitions shared by the telemetry pipeline

use thiserror::Error;

use crate::mqtt::secret::SecretError;

/// Error types for the telemetry pipeline
///
/// Every variant is recoverable at the boundary where it occurs. The
/// scheduler turns them into a retry or a fallback value; only a cancelled
/// shutdown ends a running loop.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A required setting could not be resolved before first use
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The settings source could not be read or returned an unusable value
    #[error("Settings error: {0}")]
    Settings(String),

    /// Transport handshake failed (endpoint, credentials or TLS)
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// A send failed on a previously healthy session
    #[error("Publish failure: {0}")]
    PublishFailure(String),

    /// A numeric field could not be coerced
    #[error("Malformed sample field `{field}`: {value}")]
    MalformedSample { field: String, value: String },

    /// Credential blob is unusable
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// A bounded retry loop ran out of attempts
    #[error("Gave up on {operation} after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<TelemetryError>,
    },

    /// Shutdown was requested while waiting
    #[error("Cancelled")]
    Cancelled,
}

impl TelemetryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TelemetryError::Cancelled)
    }
}
