use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for CONNACK
    pub connect_timeout_secs: u64,
    /// Root CA bundle (PEM) used to verify the broker
    pub ca_path: PathBuf,
    /// Client request queue depth inside rumqttc
    pub request_capacity: usize,
    /// Log envelopes locally instead of connecting to the broker
    pub dry_run: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            ca_path: PathBuf::from("certs/AmazonRootCA1.pem"),
            request_capacity: 100,
            dry_run: false,
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
