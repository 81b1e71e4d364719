//! Wiring from configuration to a running publisher
//!
//! Picks the settings source, the transport and the model for a device class
//! and runs the scheduler until the token is cancelled.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::error::TelemetryError;
use crate::mqtt::{Connector, DryRunConnector, MqttConnector, SessionManager};
use crate::retry::RetryPolicy;
use crate::scheduler::{PublishStats, Publisher};
use crate::settings::{ConfigProvider, FileSettings, MemorySettings, SettingsSource};
use crate::telemetry::{
    DeviceClass, EnvironmentModel, PositionModel, TelemetryModel, VitalsModel,
};

/// Runs the publisher for `class` until `cancel` fires
pub async fn run_class(
    config: &AppConfig,
    class: DeviceClass,
    cancel: CancellationToken,
) -> Result<PublishStats, TelemetryError> {
    match &config.settings.path {
        Some(path) => {
            info!("Reading runtime settings from {}", path.display());
            with_source(config, class, Arc::new(FileSettings::new(path)), cancel).await
        }
        None => {
            info!("Using runtime settings from the config file");
            let source = MemorySettings::from_table(&config.settings.values)?;
            with_source(config, class, Arc::new(source), cancel).await
        }
    }
}

async fn with_source<S>(
    config: &AppConfig,
    class: DeviceClass,
    source: Arc<S>,
    cancel: CancellationToken,
) -> Result<PublishStats, TelemetryError>
where
    S: SettingsSource + 'static,
{
    if config.broker.dry_run {
        info!("Dry run: envelopes for {} stay local", class);
        with_connector(config, class, source, DryRunConnector::new(class), cancel).await
    } else {
        let identity = config.identity(class);
        let connector = MqttConnector::new(
            config.broker.clone(),
            identity.client_id,
            identity.secret_path,
        );
        with_connector(config, class, source, connector, cancel).await
    }
}

async fn with_connector<S, C>(
    config: &AppConfig,
    class: DeviceClass,
    source: Arc<S>,
    connector: C,
    cancel: CancellationToken,
) -> Result<PublishStats, TelemetryError>
where
    S: SettingsSource + 'static,
    C: Connector,
{
    let rng = StdRng::from_entropy();
    match class {
        DeviceClass::Gps => {
            let model = PositionModel::new(&config.gps.model, rng);
            run_publisher(config, class, model, connector, source, cancel).await
        }
        DeviceClass::Env => {
            let model = EnvironmentModel::new(&config.env.model, rng);
            run_publisher(config, class, model, connector, source, cancel).await
        }
        DeviceClass::Hea => {
            let model = VitalsModel::new(&config.hea.model, rng);
            run_publisher(config, class, model, connector, source, cancel).await
        }
    }
}

async fn run_publisher<M, C, S>(
    config: &AppConfig,
    class: DeviceClass,
    model: M,
    connector: C,
    source: Arc<S>,
    cancel: CancellationToken,
) -> Result<PublishStats, TelemetryError>
where
    M: TelemetryModel,
    C: Connector,
    S: SettingsSource + 'static,
{
    let identity = config.identity(class);
    let retry = RetryPolicy::from(&config.retry);
    let provider = ConfigProvider::new(source, identity.keys(), retry.clone())
        .with_default_interval(Duration::from_secs(
            config.settings.default_interval_secs.max(1),
        ));
    let session = SessionManager::new(connector, retry);
    let channel_refresh = Duration::from_secs(config.settings.channel_refresh_secs.max(1));

    Publisher::start(class, model, session, provider, channel_refresh, cancel)
        .await?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn dry_run_publishes_with_inline_settings() {
        let mut config = AppConfig::default();
        config.broker.dry_run = true;
        config.settings.values.insert(
            DeviceClass::Env.default_interval_key(),
            toml::Value::from(5),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let stats = run_class(&config, DeviceClass::Env, cancel).await.unwrap();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_gives_up_on_unreachable_broker() {
        let mut config = AppConfig::default();
        config.broker.ca_path = "/nonexistent/ca.pem".into();
        config.retry.max_attempts = Some(2);
        config.retry.delay_secs = 1;

        let result = run_class(&config, DeviceClass::Gps, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(TelemetryError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_channel_with_cancel_stops_cleanly() {
        let mut config = AppConfig::default();
        config.broker.dry_run = true;
        config.settings.values.clear();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        let result = run_class(&config, DeviceClass::Hea, cancel).await;
        assert!(matches!(result, Err(TelemetryError::Cancelled)));
    }
}
