//! MQTT over mutual TLS, backed by rumqttc
//!
//! `connect` loads the CA bundle and the client credential blob, opens a
//! session and waits for CONNACK. The rumqttc event loop then runs in its own
//! task; when it errors the link is flagged unhealthy so the next publish
//! fails and the scheduler reconnects.

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::config::BrokerConfig;
use super::secret::parse_secret;
use super::session::{BrokerLink, Connector};
use crate::error::TelemetryError;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct MqttConnector {
    config: BrokerConfig,
    client_id: String,
    secret_path: PathBuf,
}

impl MqttConnector {
    pub fn new(
        config: BrokerConfig,
        client_id: impl Into<String>,
        secret_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            secret_path: secret_path.into(),
        }
    }

    async fn options(&self) -> Result<MqttOptions, TelemetryError> {
        let ca = tokio::fs::read(&self.config.ca_path).await.map_err(|e| {
            TelemetryError::ConnectionFailure(format!(
                "Failed to read CA bundle {}: {}",
                self.config.ca_path.display(),
                e
            ))
        })?;

        let secret = tokio::fs::read_to_string(&self.secret_path).await.map_err(|e| {
            TelemetryError::ConnectionFailure(format!(
                "Failed to read client secret {}: {}",
                self.secret_path.display(),
                e
            ))
        })?;
        let credentials = parse_secret(&secret)?;

        let mut options = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options
            .set_keep_alive(Duration::from_secs(self.config.keep_alive_secs))
            .set_clean_session(true)
            .set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: Some((
                    credentials.certificate.into_bytes(),
                    credentials.private_key.into_bytes(),
                )),
            }));
        Ok(options)
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            debug!("CONNACK received: {:?}", ack.code);
            return Ok(());
        }
    }
}

async fn drive(mut eventloop: EventLoop, healthy: watch::Sender<bool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("PUBACK for packet {}", ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                healthy.send_replace(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT event loop stopped: {}", e);
                healthy.send_replace(false);
                break;
            }
        }
    }
}

impl Connector for MqttConnector {
    type Link = MqttLink;

    async fn connect(&self) -> Result<MqttLink, TelemetryError> {
        let options = self.options().await?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TelemetryError::ConnectionFailure(e.to_string())),
            Err(_) => {
                return Err(TelemetryError::ConnectionFailure(format!(
                    "No CONNACK from {} within {:?}",
                    self.config.endpoint(),
                    timeout
                )))
            }
        }

        let (healthy_tx, healthy) = watch::channel(true);
        let driver = tokio::spawn(drive(eventloop, healthy_tx));

        Ok(MqttLink {
            client,
            healthy,
            driver,
        })
    }

    fn endpoint(&self) -> String {
        format!("mqtts://{} as {}", self.config.endpoint(), self.client_id)
    }
}

pub struct MqttLink {
    client: AsyncClient,
    healthy: watch::Receiver<bool>,
    driver: JoinHandle<()>,
}

impl BrokerLink for MqttLink {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TelemetryError> {
        let healthy = *self.healthy.borrow();
        if !healthy {
            return Err(TelemetryError::PublishFailure(
                "connection to broker lost".to_string(),
            ));
        }

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TelemetryError::PublishFailure(e.to_string()))
    }

    async fn close(mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request not delivered: {}", e);
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut self.driver).await.is_err() {
            debug!("Event loop still running after disconnect, aborting");
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
