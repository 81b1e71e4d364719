//! Field telemetry simulator
//!
//! Generates collar positions, environment readings and vital signs for a
//! simulated herd and publishes them to an MQTT broker, one independent
//! scheduler per device class.

pub mod app;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mqtt;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod telemetry;

pub use error::TelemetryError;
