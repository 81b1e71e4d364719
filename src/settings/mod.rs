//! # Runtime Settings
//!
//! Resolves the two values that can change while a scheduler runs: the
//! channel (MQTT topic) name and the publish interval. Both live in an
//! external key/value store behind [`SettingsSource`].
//!
//! ## Fallback policy
//!
//! - The channel name is required. At startup it is retried until it resolves;
//!   afterwards a background task refreshes it and keeps the previous value
//!   when a refresh fails.
//! - The interval is opportunistic. A failed lookup returns the last
//!   known-good value, or the default when none has ever resolved.

pub mod source;

pub use source::{FileSettings, MemorySettings, SettingsSource};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TelemetryError;
use crate::retry::RetryPolicy;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Settings keys for one device class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingKeys {
    pub channel: String,
    pub interval: String,
}

pub struct ConfigProvider<S> {
    source: Arc<S>,
    keys: SettingKeys,
    retry: RetryPolicy,
    default_interval: Duration,
    last_interval: Option<Duration>,
}

impl<S: SettingsSource + 'static> ConfigProvider<S> {
    pub fn new(source: Arc<S>, keys: SettingKeys, retry: RetryPolicy) -> Self {
        Self {
            source,
            keys,
            retry,
            default_interval: DEFAULT_INTERVAL,
            last_interval: None,
        }
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    async fn fetch_channel(source: &S, key: &str) -> Result<String, TelemetryError> {
        let channel = source.fetch(key).await?;
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(TelemetryError::ConfigurationMissing(format!(
                "{} is empty",
                key
            )));
        }
        Ok(channel.to_string())
    }

    /// Resolves the channel name, retrying per the retry policy. Scheduling
    /// must not start before this returns `Ok`.
    pub async fn resolve_channel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, TelemetryError> {
        let source = self.source.as_ref();
        let key = self.keys.channel.as_str();
        let channel = self
            .retry
            .run("channel lookup", cancel, |_| Self::fetch_channel(source, key))
            .await?;
        info!("Resolved channel {} from {}", channel, key);
        Ok(channel)
    }

    async fn fetch_interval(&self) -> Result<Duration, TelemetryError> {
        let raw = self.source.fetch(&self.keys.interval).await?;
        let secs: u64 = raw.trim().parse().map_err(|e| {
            TelemetryError::Settings(format!(
                "{} is not a positive integer ({:?}): {}",
                self.keys.interval, raw, e
            ))
        })?;
        if secs == 0 {
            return Err(TelemetryError::Settings(format!(
                "{} must be positive",
                self.keys.interval
            )));
        }
        Ok(Duration::from_secs(secs))
    }

    /// Current publish interval. Never fails.
    pub async fn resolve_interval(&mut self) -> Duration {
        match self.fetch_interval().await {
            Ok(interval) => {
                if self.last_interval != Some(interval) {
                    info!("Publish interval is now {:?}", interval);
                }
                self.last_interval = Some(interval);
                interval
            }
            Err(e) => {
                let fallback = self.last_interval.unwrap_or(self.default_interval);
                warn!(
                    "Failed to fetch publish interval, using {:?}: {}",
                    fallback, e
                );
                fallback
            }
        }
    }

    /// Spawns a task that re-resolves the channel every `refresh_every` and
    /// publishes changes. A failed refresh keeps the current value.
    pub fn watch_channel(
        &self,
        initial: String,
        refresh_every: Duration,
        cancel: CancellationToken,
    ) -> (watch::Receiver<String>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(initial);
        let source = self.source.clone();
        let key = self.keys.channel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(refresh_every) => {}
                }

                match Self::fetch_channel(&source, &key).await {
                    Ok(channel) => {
                        if *tx.borrow() != channel {
                            info!("Channel changed to {}", channel);
                        }
                        tx.send_if_modified(|current| {
                            if *current != channel {
                                *current = channel;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Err(e) => warn!("Channel refresh failed, keeping current value: {}", e),
                }

                if tx.is_closed() {
                    debug!("No channel subscribers left, stopping refresh");
                    break;
                }
            }
        });

        (rx, handle)
    }
}
