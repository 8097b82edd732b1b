//! Bus bridge
//!
//! Owns the MQTT client: connects with a retained offline last-will on the
//! status topic, subscribes to the command topics on every connection
//! acknowledgment (the event loop reconnects transparently with the same
//! options), publishes retained device/scene/status topics and non-retained
//! error records, and turns inbound messages into [`BusCommand`]s.

pub mod topics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{
    AsyncClient, Event, LastWill, MqttOptions, Packet, Publish, QoS, TlsConfiguration, Transport,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{BrokerSettings, MqttConfig};
use crate::error::Result;
use crate::registry::{Device, Scene};

pub use topics::{DeviceCommand, GlobalCommand, TopicMap};

/// Inbound commands decoded from the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    Device {
        node_id: u8,
        command: DeviceCommand,
    },
    Scene {
        scene_id: u8,
    },
    Global(GlobalCommand),
}

/// Capacity of the inbound command channel
const COMMAND_CHANNEL_CAPACITY: usize = 64;

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// The bus bridge
pub struct MqttBridge {
    client: AsyncClient,
    topics: TopicMap,
    qos: QoS,
    retain: bool,
    shutdown: Arc<AtomicBool>,
}

impl MqttBridge {
    /// Dial the broker and start the event loop. Returns the bridge and the
    /// receiver for inbound commands. The birth message carries the last
    /// will: a retained `offline` on the status topic.
    pub async fn connect(
        settings: &BrokerSettings,
        config: &MqttConfig,
    ) -> Result<(Self, mpsc::Receiver<BusCommand>)> {
        let topics = TopicMap::new(&config.topic_prefix);
        let qos = qos_from(config.qos);

        // unique per run so the broker never confuses two bridge instances
        let client_id = format!(
            "{}-plugin-{}",
            config.topic_prefix,
            Utc::now().timestamp_millis()
        );
        let mut options = MqttOptions::new(client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(topics.status(), "offline", qos, true));
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.as_deref().unwrap_or(""));
        }
        if settings.tls {
            let mut root_cert_store = RootCertStore::empty();
            root_cert_store.add_parsable_certificates(
                rustls_native_certs::load_native_certs()
                    .map_err(|e| crate::error::BridgeError::mqtt(format!("native certs: {e}")))?,
            );
            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();
            options.set_transport(Transport::Tls(TlsConfiguration::from(tls_config)));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));

        let bridge = Self {
            client: client.clone(),
            topics: topics.clone(),
            qos,
            retain: config.retain,
            shutdown: shutdown.clone(),
        };

        info!(
            host = %settings.host,
            port = settings.port,
            "connecting to message broker"
        );
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("broker connection acknowledged, subscribing to command topics");
                        for filter in topics.command_filters() {
                            if let Err(e) = client.subscribe(filter.clone(), qos).await {
                                warn!(%filter, "subscribe failed: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&topics, publish, &commands_tx).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if shutdown.load(Ordering::SeqCst) {
                            return;
                        }
                        warn!("broker connection error, event loop will retry: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok((bridge, commands_rx))
    }

    /// Publish the bridge status, retained
    pub async fn publish_status(&self, online: bool) -> Result<()> {
        let payload = if online { "online" } else { "offline" };
        self.client
            .publish(self.topics.status(), self.qos, true, payload)
            .await?;
        debug!(status = payload, "bridge status published");
        Ok(())
    }

    /// Publish a device's state, position and moving topics
    pub async fn publish_device(&self, device: &Device) -> Result<()> {
        let state = serde_json::to_vec(device)?;
        self.client
            .publish(
                self.topics.device_state(device.node_id),
                self.qos,
                self.retain,
                state,
            )
            .await?;
        self.client
            .publish(
                self.topics.device_position(device.node_id),
                self.qos,
                self.retain,
                device.position.to_string(),
            )
            .await?;
        self.client
            .publish(
                self.topics.device_moving(device.node_id),
                self.qos,
                self.retain,
                if device.moving { "true" } else { "false" },
            )
            .await?;
        Ok(())
    }

    /// Publish a scene's state topic
    pub async fn publish_scene(&self, scene: &Scene) -> Result<()> {
        let state = serde_json::to_vec(scene)?;
        self.client
            .publish(
                self.topics.scene_state(scene.scene_id),
                self.qos,
                self.retain,
                state,
            )
            .await?;
        Ok(())
    }

    /// Publish an error record; never retained
    pub async fn publish_error(
        &self,
        severity: &str,
        component: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut record = json!({
            "timestamp": Utc::now(),
            "severity": severity,
            "component": component,
            "message": message,
        });
        if let Some(details) = details {
            record["details"] = details;
        }
        self.client
            .publish(
                self.topics.errors(),
                self.qos,
                false,
                serde_json::to_vec(&record)?,
            )
            .await?;
        Ok(())
    }

    /// Publish a retained `offline` status and disconnect. The offline
    /// publication and the disconnect travel through the same request
    /// queue, so the broker sees them in order.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.publish_status(false).await {
            warn!("publishing offline status failed: {e}");
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("broker disconnect failed: {e}");
        }
        info!("bus bridge closed");
    }
}

/// Route one inbound message; unparseable payloads and foreign topics are
/// logged and dropped without an event
async fn handle_publish(
    topics: &TopicMap,
    publish: Publish,
    commands: &mpsc::Sender<BusCommand>,
) {
    let payload = String::from_utf8_lossy(&publish.payload);
    let command = match topics.route(&publish.topic) {
        Some(topics::Route::Device { node_id }) => {
            match topics::parse_device_command(&payload) {
                Some(command) => Some(BusCommand::Device { node_id, command }),
                None => {
                    warn!(
                        topic = %publish.topic,
                        payload = %payload,
                        "unparseable device command dropped"
                    );
                    None
                }
            }
        }
        Some(topics::Route::DevicePosition { node_id }) => {
            match topics::parse_position_only(&payload) {
                Some(command) => Some(BusCommand::Device { node_id, command }),
                None => {
                    warn!(
                        topic = %publish.topic,
                        payload = %payload,
                        "position outside 0..=100 dropped"
                    );
                    None
                }
            }
        }
        Some(topics::Route::Scene { scene_id }) => {
            if topics::parse_scene_command(&payload) {
                Some(BusCommand::Scene { scene_id })
            } else {
                warn!(
                    topic = %publish.topic,
                    payload = %payload,
                    "unknown scene command dropped"
                );
                None
            }
        }
        Some(topics::Route::Global) => match topics::parse_global_command(&payload) {
            Some(command) => Some(BusCommand::Global(command)),
            None => {
                warn!(payload = %payload, "unknown global command dropped");
                None
            }
        },
        None => {
            debug!(topic = %publish.topic, "message on unrouted topic ignored");
            None
        }
    };
    if let Some(command) = command {
        if commands.send(command).await.is_err() {
            warn!("command receiver gone, dropping inbound command");
        }
    }
}
