//! Daemon orchestration
//!
//! Wires the registry, the bus bridge and the gateway session together:
//! ordered startup, event forwarding, command translation, the periodic
//! state poll and the ordered shutdown. All forwarding runs in dedicated
//! tasks; per-node publication order follows registry update order because
//! one task owns each direction.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, BrokerSettings};
use crate::error::Result;
use crate::klf200::{GatewayControl, GatewayEvent, GatewaySession};
use crate::mqtt::{BusCommand, DeviceCommand, GlobalCommand, MqttBridge};
use crate::registry::{DeviceRegistry, RegistryEvent};

/// Component name used in error records about the gateway
const COMPONENT_GATEWAY: &str = "klf200";

/// The running daemon
pub struct Daemon {
    registry: Arc<DeviceRegistry>,
    bus: Arc<MqttBridge>,
    gateway: Arc<GatewaySession>,
    tasks: Vec<JoinHandle<()>>,
    stop: Arc<Notify>,
}

impl Daemon {
    /// Run the ordered startup sequence and leave the daemon running in the
    /// background. Configuration must already be validated.
    pub async fn start(config: BridgeConfig, broker: BrokerSettings) -> Result<Daemon> {
        // registry first: everything else reports into it
        let registry = Arc::new(DeviceRegistry::new(config.snapshot_path()));

        let (bus, commands) = MqttBridge::connect(&broker, &config.mqtt).await?;
        let bus = Arc::new(bus);
        bus.publish_status(true).await?;

        let gateway = Arc::new(GatewaySession::new(config.klf200.clone()));

        // wire events before connecting so nothing is missed
        let mut tasks = Vec::new();
        let stop = Arc::new(Notify::new());
        tasks.push(forward_gateway_events(
            gateway.clone(),
            registry.clone(),
            bus.clone(),
            config.features.publish_on_startup,
        ));
        tasks.push(forward_registry_events(registry.clone(), bus.clone()));
        tasks.push(route_bus_commands(
            gateway.clone(),
            bus.clone(),
            commands,
            config.features.auto_discovery,
        ));

        match gateway.connect().await {
            Ok(()) => {
                if config.features.auto_discovery {
                    if let Err(e) = gateway.refresh().await {
                        warn!("initial discovery failed: {e}");
                        report_gateway_error(&bus, &e, None).await;
                    }
                }
            }
            Err(e) => {
                // not fatal: the reconnect schedule is already running and
                // rediscovery on success produces the initial publications
                error!("gateway connection failed: {e}");
                report_gateway_error(&bus, &e, None).await;
            }
        }

        if config.polling.enabled {
            tasks.push(poll_loop(
                gateway.clone(),
                registry.clone(),
                stop.clone(),
                config.polling.interval(),
            ));
        }

        info!("bridge started");
        Ok(Daemon {
            registry,
            bus,
            gateway,
            tasks,
            stop,
        })
    }

    /// Ordered shutdown: stop polling, close the gateway, flip the status
    /// to offline and close the bus, then flush and close the registry.
    /// Every step tolerates an already-closed collaborator.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.stop.notify_waiters();
        self.gateway.close().await;
        self.bus.close().await;
        self.registry.close().await;
        for task in self.tasks {
            task.abort();
        }
        info!("shutdown complete");
    }
}

/// Translate one bus command into gateway calls
pub async fn dispatch_bus_command(
    gateway: &dyn GatewayControl,
    command: BusCommand,
    auto_discovery: bool,
) -> Result<()> {
    match command {
        BusCommand::Device { node_id, command } => match command {
            DeviceCommand::Open => gateway.set_position(node_id, 100).await,
            DeviceCommand::Close => gateway.set_position(node_id, 0).await,
            DeviceCommand::Stop => gateway.stop(node_id).await,
            DeviceCommand::Position(pct) => gateway.set_position(node_id, pct).await,
        },
        BusCommand::Scene { scene_id } => gateway.run_scene(scene_id).await,
        BusCommand::Global(GlobalCommand::Refresh) => gateway.refresh().await,
        BusCommand::Global(GlobalCommand::Reconnect) => {
            // the status topic keeps its retained value across a requested
            // reconnect; only the will flips it
            gateway.reconnect().await?;
            if auto_discovery {
                gateway.refresh().await?;
            }
            Ok(())
        }
    }
}

fn forward_gateway_events(
    gateway: Arc<GatewaySession>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<MqttBridge>,
    publish_discovered: bool,
) -> JoinHandle<()> {
    let mut events = gateway.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "gateway event stream lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            match event {
                GatewayEvent::Connected => {
                    if let Err(e) = bus.publish_status(true).await {
                        warn!("publishing online status failed: {e}");
                    }
                }
                GatewayEvent::Disconnected { reason } => {
                    // the status topic reflects the bridge process, not the
                    // gateway session; the will covers process death
                    let _ = bus
                        .publish_error(
                            "error",
                            COMPONENT_GATEWAY,
                            "Connection lost",
                            Some(json!({ "reason": reason })),
                        )
                        .await;
                }
                GatewayEvent::DeviceStateChanged(device) => {
                    registry.update(device).await;
                }
                GatewayEvent::DevicesDiscovered(devices) => {
                    registry.replace_all(devices.clone()).await;
                    if publish_discovered {
                        for device in &devices {
                            if let Err(e) = bus.publish_device(device).await {
                                warn!(node_id = device.node_id, "device publish failed: {e}");
                            }
                        }
                    }
                }
                GatewayEvent::ScenesDiscovered(scenes) => {
                    registry.scene_replace_all(scenes.clone()).await;
                    if publish_discovered {
                        for scene in &scenes {
                            if let Err(e) = bus.publish_scene(scene).await {
                                warn!(scene_id = scene.scene_id, "scene publish failed: {e}");
                            }
                        }
                    }
                }
            }
        }
    })
}

fn forward_registry_events(registry: Arc<DeviceRegistry>, bus: Arc<MqttBridge>) -> JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::StateChanged { curr, .. }) => {
                    if let Err(e) = bus.publish_device(&curr).await {
                        // dropped publish; the retained value stays at the
                        // last one the broker accepted
                        warn!(node_id = curr.node_id, "device publish failed: {e}");
                    }
                }
                Ok(RegistryEvent::DevicesUpdated { changed }) => {
                    debug!(changed, "bulk registry update");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "registry event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

fn route_bus_commands(
    gateway: Arc<GatewaySession>,
    bus: Arc<MqttBridge>,
    mut commands: mpsc::Receiver<BusCommand>,
    auto_discovery: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            debug!(?command, "bus command received");
            if let Err(e) = dispatch_bus_command(gateway.as_ref(), command, auto_discovery).await {
                warn!(?command, "command failed: {e}");
                report_gateway_error(&bus, &e, Some(command)).await;
            }
        }
    })
}

async fn report_gateway_error(
    bus: &MqttBridge,
    error: &crate::error::BridgeError,
    command: Option<BusCommand>,
) {
    let details = command.map(|c| json!({ "command": format!("{c:?}") }));
    if let Err(e) = bus
        .publish_error(
            error.severity(),
            COMPONENT_GATEWAY,
            &error.to_string(),
            details,
        )
        .await
    {
        warn!("error record publish failed: {e}");
    }
}

fn poll_loop(
    gateway: Arc<GatewaySession>,
    registry: Arc<DeviceRegistry>,
    stop: Arc<Notify>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "state polling enabled");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.notified() => return,
            }
            if !gateway.is_connected().await {
                continue;
            }
            match gateway.query_devices().await {
                Ok(devices) => {
                    let changed = registry.replace_all(devices).await;
                    if changed > 0 {
                        debug!(changed, "state poll picked up changes");
                    }
                }
                Err(e) => warn!("state poll failed: {e}"),
            }
        }
    })
}
