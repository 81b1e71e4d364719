//! Publish scheduler
//!
//! The long-running loop for one device class:
//!
//! ```text
//! ┌─► ensure connected ── open() retries until handshake succeeds
//! │        │
//! │   tick model ─► build envelope ─► publish
//! │        │                             │
//! │        │ ok                          │ failed: session degraded,
//! │        ▼                             │ reconnect without sleeping
//! └── sleep(resolve_interval()) ◄────────┘
//! ```
//!
//! The loop ends only when the cancellation token fires. The channel name is
//! resolved before the first tick and refreshed in the background; the
//! interval is re-read after every successful publish.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TelemetryError;
use crate::mqtt::envelope::Envelope;
use crate::mqtt::session::{Connector, SessionManager, SessionState};
use crate::settings::{ConfigProvider, SettingsSource};
use crate::telemetry::{DeviceClass, TelemetryModel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub failed: u64,
    pub reconnects: u64,
}

/// Sleeps for `interval`; false when cancelled first
async fn pause(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

pub struct Publisher<M, C: Connector, S> {
    class: DeviceClass,
    model: M,
    session: SessionManager<C>,
    provider: ConfigProvider<S>,
    channel: watch::Receiver<String>,
    refresh: JoinHandle<()>,
    refresh_cancel: CancellationToken,
    cancel: CancellationToken,
    stats: PublishStats,
}

impl<M, C, S> Publisher<M, C, S>
where
    M: TelemetryModel,
    C: Connector,
    S: SettingsSource + 'static,
{
    /// Resolves the channel name and starts its background refresh. Blocks
    /// until the channel is known; no tick happens before that.
    pub async fn start(
        class: DeviceClass,
        model: M,
        session: SessionManager<C>,
        provider: ConfigProvider<S>,
        channel_refresh: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, TelemetryError> {
        info!(
            "Resolving channel for {} ({} devices)",
            class,
            model.device_count()
        );
        let initial = provider.resolve_channel(&cancel).await?;

        let refresh_cancel = cancel.child_token();
        let (channel, refresh) =
            provider.watch_channel(initial, channel_refresh, refresh_cancel.clone());

        Ok(Self {
            class,
            model,
            session,
            provider,
            channel,
            refresh,
            refresh_cancel,
            cancel,
            stats: PublishStats::default(),
        })
    }

    async fn publish_tick(&mut self) -> Result<(), TelemetryError> {
        let batch = self.model.tick();
        let channel = self.channel.borrow().clone();
        let envelope = Envelope::build(&channel, batch)?;
        let payload = envelope.to_json()?;

        self.session.publish(&channel, payload).await?;
        debug!("Published {}", envelope);
        Ok(())
    }

    /// Runs until cancelled. Returns an error only when a bounded retry
    /// policy gives up on connecting.
    pub async fn run(mut self) -> Result<PublishStats, TelemetryError> {
        info!("Publisher for {} started", self.class);
        let outcome = self.run_loop().await;

        self.session.close().await;
        self.refresh_cancel.cancel();
        if let Err(e) = (&mut self.refresh).await {
            warn!("Channel refresh task ended abnormally: {}", e);
        }

        info!(
            "Publisher for {} stopped: {} published, {} failed, {} reconnects",
            self.class, self.stats.published, self.stats.failed, self.stats.reconnects
        );
        outcome.map(|()| self.stats)
    }

    async fn run_loop(&mut self) -> Result<(), TelemetryError> {
        let mut first_connect = true;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if !self.session.is_connected() {
                match self.session.open(&self.cancel).await {
                    Ok(()) => {
                        if !first_connect {
                            self.stats.reconnects += 1;
                        }
                        first_connect = false;
                    }
                    Err(e) if e.is_cancelled() => return Ok(()),
                    Err(e) => {
                        error!("Publisher for {} cannot connect: {}", self.class, e);
                        return Err(e);
                    }
                }
            }

            match self.publish_tick().await {
                Ok(()) => {
                    self.stats.published += 1;
                }
                Err(e) if self.session.state() == SessionState::Degraded => {
                    self.stats.failed += 1;
                    warn!("Publish failed, reconnecting immediately: {}", e);
                    continue;
                }
                Err(e) => {
                    // Not a transport fault; reconnecting would not help.
                    self.stats.failed += 1;
                    error!("Could not prepare message for {}: {}", self.class, e);
                }
            }

            let interval = self.provider.resolve_interval().await;
            if !pause(&self.cancel, interval).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::session::testing::{Event, FakeConnector};
    use crate::retry::RetryPolicy;
    use crate::settings::{MemorySettings, SettingKeys};
    use crate::telemetry::PositionModel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::time::Instant;

    const CHANNEL_KEY: &str = "/iot-topics/gps-topic-name";
    const INTERVAL_KEY: &str = "/iot-settings/gps-publish-interval";

    fn settings(values: &[(&str, &str)]) -> Arc<MemorySettings> {
        let map: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(MemorySettings::new(map))
    }

    async fn publisher(
        source: Arc<MemorySettings>,
        connector: FakeConnector,
        cancel: CancellationToken,
    ) -> Publisher<PositionModel<StdRng>, FakeConnector, MemorySettings> {
        let retry = RetryPolicy::fixed(Duration::from_secs(10));
        let provider = ConfigProvider::new(
            source,
            SettingKeys {
                channel: CHANNEL_KEY.into(),
                interval: INTERVAL_KEY.into(),
            },
            retry.clone(),
        );
        let model = PositionModel::new(&Default::default(), StdRng::seed_from_u64(21));
        Publisher::start(
            DeviceClass::Gps,
            model,
            SessionManager::new(connector, retry),
            provider,
            Duration::from_secs(3600),
            cancel,
        )
        .await
        .unwrap()
    }

    fn publish_times(events: &[Event]) -> Vec<Instant> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Published { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn missing_interval_falls_back_to_default() {
        let source = settings(&[(CHANNEL_KEY, "IoT/GPS")]);
        let connector = FakeConnector::default();
        let cancel = CancellationToken::new();
        connector.stop_after(3, cancel.clone());

        let start = Instant::now();
        let stats = publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();

        assert_eq!(stats.published, 3);
        let times = publish_times(&connector.events());
        let offsets: Vec<u64> = times.iter().map(|t| (*t - start).as_secs()).collect();
        assert_eq!(offsets, vec![0, 15, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_right_after_flaky_handshake() {
        let source = settings(&[(CHANNEL_KEY, "IoT/GPS"), (INTERVAL_KEY, "20")]);
        let connector = FakeConnector::new(&[false, false, false, true], &[]);
        let cancel = CancellationToken::new();
        connector.stop_after(2, cancel.clone());

        let start = Instant::now();
        publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();

        let events = connector.events();
        let failures = events
            .iter()
            .filter(|e| matches!(e, Event::ConnectFailed(_)))
            .count();
        assert_eq!(failures, 3);

        let offsets: Vec<u64> = publish_times(&events)
            .iter()
            .map(|t| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![30, 50]);

        let first = events
            .iter()
            .find_map(|e| match e {
                Event::Published { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(first.0, "IoT/GPS");
        let json: Value = serde_json::from_slice(&first.1).unwrap();
        assert_eq!(json["payload"].as_array().unwrap().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_reconnects_without_sleeping() {
        let source = settings(&[(CHANNEL_KEY, "IoT/GPS"), (INTERVAL_KEY, "60")]);
        let connector = FakeConnector::new(&[], &[true, false, true, true]);
        let cancel = CancellationToken::new();
        connector.stop_after(3, cancel.clone());

        let start = Instant::now();
        let stats = publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reconnects, 1);

        let secs = |t: &Instant| (*t - start).as_secs();
        let events = connector.events();
        let failed_at = events
            .iter()
            .find_map(|e| match e {
                Event::PublishFailed(at) => Some(secs(at)),
                _ => None,
            })
            .unwrap();
        let connects: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                Event::Connected(at) => Some(secs(at)),
                _ => None,
            })
            .collect();
        let published: Vec<u64> = publish_times(&events).iter().map(secs).collect();

        assert_eq!(failed_at, 60);
        assert_eq!(connects, vec![0, 60]);
        assert_eq!(published, vec![0, 60, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_changes_apply_on_next_tick() {
        let source = settings(&[(CHANNEL_KEY, "IoT/GPS"), (INTERVAL_KEY, "10")]);
        let connector = FakeConnector::default();
        let cancel = CancellationToken::new();
        connector.stop_after(3, cancel.clone());

        let writer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            writer.set(INTERVAL_KEY, "40");
        });

        let start = Instant::now();
        publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();

        let offsets: Vec<u64> = publish_times(&connector.events())
            .iter()
            .map(|t| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10, 50]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_channel() {
        let source = settings(&[]);
        let writer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            writer.set(CHANNEL_KEY, "IoT/GPS");
        });

        let connector = FakeConnector::default();
        let cancel = CancellationToken::new();
        connector.stop_after(1, cancel.clone());

        let start = Instant::now();
        publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();

        let offsets: Vec<u64> = publish_times(&connector.events())
            .iter()
            .map(|t| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![20]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_session() {
        let source = settings(&[(CHANNEL_KEY, "IoT/GPS")]);
        let connector = FakeConnector::default();
        let cancel = CancellationToken::new();
        connector.stop_after(1, cancel.clone());

        publisher(source, connector.clone(), cancel)
            .await
            .run()
            .await
            .unwrap();

        assert!(matches!(connector.events().last(), Some(Event::Closed(_))));
    }
}
