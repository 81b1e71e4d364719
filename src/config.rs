//! Application configuration
//!
//! Loaded once at startup from a TOML file. Values that must change while the
//! process runs (channel name, publish interval) are not in here; they come
//! from the settings source named in `[settings]`.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::mqtt::config::BrokerConfig;
use crate::retry::RetryConfig;
use crate::settings::SettingKeys;
use crate::telemetry::environment::EnvironmentSettings;
use crate::telemetry::position::PositionSettings;
use crate::telemetry::vitals::VitalsSettings;
use crate::telemetry::DeviceClass;

const CONFIG_DIR: &str = "fieldtelemetry";
const CONFIG_FILE: &str = "config.toml";

/// Where the runtime settings live
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SettingsConfig {
    /// Key/value TOML file, re-read on every lookup. When unset, `values`
    /// is used instead.
    pub path: Option<PathBuf>,
    pub values: toml::Table,
    /// How often the channel name is re-resolved
    pub channel_refresh_secs: u64,
    /// Interval used until the interval key resolves at least once
    pub default_interval_secs: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let mut values = toml::Table::new();
        for (class, topic) in [
            (DeviceClass::Gps, "IoT/GPS"),
            (DeviceClass::Env, "IoT/ENV"),
            (DeviceClass::Hea, "IoT/HEA"),
        ] {
            values.insert(class.default_channel_key(), toml::Value::from(topic));
            values.insert(class.default_interval_key(), toml::Value::from(120));
        }

        Self {
            path: None,
            values,
            channel_refresh_secs: 300,
            default_interval_secs: 15,
        }
    }
}

/// Identity of one simulated device class towards the broker and the
/// settings store
#[derive(Clone, Debug, PartialEq)]
pub struct ClassIdentity {
    pub client_id: String,
    /// Secret blob holding the client key and certificate
    pub secret_path: PathBuf,
    pub channel_key: String,
    pub interval_key: String,
}

impl ClassIdentity {
    pub fn for_class(class: DeviceClass) -> Self {
        let client_id = match class {
            DeviceClass::Gps => "GPSCollar",
            DeviceClass::Env => "ENVCollar",
            DeviceClass::Hea => "HEACollar",
        };
        Self {
            client_id: client_id.to_string(),
            secret_path: PathBuf::from(format!("certs/{}-thing.secret", class.name())),
            channel_key: class.default_channel_key(),
            interval_key: class.default_interval_key(),
        }
    }

    pub fn keys(&self) -> SettingKeys {
        SettingKeys {
            channel: self.channel_key.clone(),
            interval: self.interval_key.clone(),
        }
    }
}

macro_rules! class_section {
    ($name:ident, $model:ty, $class:expr) => {
        #[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
        #[serde(default)]
        pub struct $name {
            pub client_id: String,
            pub secret_path: PathBuf,
            pub channel_key: String,
            pub interval_key: String,
            #[serde(flatten)]
            pub model: $model,
        }

        impl Default for $name {
            fn default() -> Self {
                let identity = ClassIdentity::for_class($class);
                Self {
                    client_id: identity.client_id,
                    secret_path: identity.secret_path,
                    channel_key: identity.channel_key,
                    interval_key: identity.interval_key,
                    model: <$model>::default(),
                }
            }
        }

        impl $name {
            pub fn identity(&self) -> ClassIdentity {
                ClassIdentity {
                    client_id: self.client_id.clone(),
                    secret_path: self.secret_path.clone(),
                    channel_key: self.channel_key.clone(),
                    interval_key: self.interval_key.clone(),
                }
            }
        }
    };
}

class_section!(GpsSection, PositionSettings, DeviceClass::Gps);
class_section!(EnvSection, EnvironmentSettings, DeviceClass::Env);
class_section!(HeaSection, VitalsSettings, DeviceClass::Hea);

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub settings: SettingsConfig,
    pub retry: RetryConfig,
    pub gps: GpsSection,
    pub env: EnvSection,
    pub hea: HeaSection,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn identity(&self, class: DeviceClass) -> ClassIdentity {
        match class {
            DeviceClass::Gps => self.gps.identity(),
            DeviceClass::Env => self.env.identity(),
            DeviceClass::Hea => self.hea.identity(),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    /// Loads the config at `path`. A missing file is created with defaults so
    /// operators have something to edit.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            warn!(
                "Config file {} does not exist, writing defaults",
                path.display()
            );
            let config = AppConfig::default();
            if let Err(e) = config.save(path).await {
                warn!("Could not write default config: {}", e);
            }
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))
    }
}
