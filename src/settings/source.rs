//! Key/value settings sources
//!
//! Keys look like `/iot-topics/gps-topic-name`. Values are strings or
//! integers; callers interpret them.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

use crate::error::TelemetryError;

/// Remote key/value store the configuration provider reads from
pub trait SettingsSource: Send + Sync {
    /// Returns the raw value for `key`. A key that is absent maps to
    /// `ConfigurationMissing`; an unreachable store maps to `Settings`.
    fn fetch(&self, key: &str) -> impl Future<Output = Result<String, TelemetryError>> + Send;
}

fn value_to_string(key: &str, value: &toml::Value) -> Result<String, TelemetryError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        other => Err(TelemetryError::Settings(format!(
            "Unsupported value type for {}: {}",
            key,
            other.type_str()
        ))),
    }
}

/// TOML file of top-level `"key" = value` pairs, re-read on every fetch so
/// operators can change settings while the process runs
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettings {
    async fn fetch(&self, key: &str) -> Result<String, TelemetryError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TelemetryError::Settings(format!(
                "Failed to read settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            TelemetryError::Settings(format!(
                "Failed to parse settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let value = table
            .get(key)
            .ok_or_else(|| TelemetryError::ConfigurationMissing(key.to_string()))?;
        debug!("Fetched {} from {}", key, self.path.display());
        value_to_string(key, value)
    }
}

/// In-process settings, seeded from the application config
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn from_table(table: &toml::Table) -> Result<Self, TelemetryError> {
        let values = table
            .iter()
            .map(|(k, v)| value_to_string(k, v).map(|v| (k.clone(), v)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self::new(values))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        match self.values.write() {
            Ok(mut guard) => {
                guard.insert(key.into(), value.into());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.into(), value.into());
            }
        }
    }

    pub fn remove(&self, key: &str) {
        match self.values.write() {
            Ok(mut guard) => {
                guard.remove(key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(key);
            }
        }
    }
}

impl SettingsSource for MemorySettings {
    async fn fetch(&self, key: &str) -> Result<String, TelemetryError> {
        let guard = self
            .values
            .read()
            .map_err(|e| TelemetryError::Settings(format!("Settings lock poisoned: {}", e)))?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| TelemetryError::ConfigurationMissing(key.to_string()))
    }
}

impl<S: SettingsSource> SettingsSource for std::sync::Arc<S> {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<String, TelemetryError>> + Send {
        (**self).fetch(key)
    }
}
