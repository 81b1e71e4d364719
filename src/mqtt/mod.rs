//! # MQTT Transport Module
//!
//! Everything between a generated batch and the broker: envelope encoding,
//! credential parsing, the session state machine and the concrete transports.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs    - broker endpoint and TLS file locations
//! ├── envelope.rs  - message identity, channel, timestamp, indexed payload
//! ├── secret.rs    - PEM key/certificate blob parsing
//! ├── session.rs   - SessionState machine, Connector / BrokerLink seams
//! ├── broker.rs    - rumqttc over mutual TLS
//! └── dry_run.rs   - offline transport that validates envelopes locally
//! ```
//!
//! ## Design Philosophy
//!
//! - **One owner per link**: a `SessionManager` holds the only handle to its
//!   broker session and is never shared between schedulers.
//! - **Fire and forget**: messages that cannot be sent are dropped. The
//!   scheduler regenerates fresh data instead of replaying stale samples.
//! - **Transport behind traits**: the session logic is tested against an
//!   in-memory connector; production plugs in rumqttc or the dry-run sink.

pub mod broker;
pub mod config;
pub mod dry_run;
pub mod envelope;
pub mod secret;
pub mod session;

pub use broker::{MqttConnector, MqttLink};
pub use config::BrokerConfig;
pub use dry_run::DryRunConnector;
pub use envelope::Envelope;
pub use session::{BrokerLink, Connector, SessionManager, SessionState};
