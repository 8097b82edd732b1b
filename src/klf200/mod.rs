//! Gateway session manager
//!
//! Owns the single authenticated session to the gateway: connect (TLS +
//! login + event subscription), discovery, command dispatch, keepalive
//! probing and exponential-backoff reconnection. All state observable from
//! outside flows through [`GatewayEvent`]s on a broadcast channel.
//!
//! The gateway permits two concurrent sessions; the bridge holds exactly
//! one. Request/confirm exchanges serialize behind a session-wide lock, and
//! commands for the same node additionally queue behind a per-node lock so
//! two movements never contend for the same actuator on the radio.

pub mod protocol;
mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Klf200Config;
use crate::error::{BridgeError, Result};
use crate::registry::{Device, Scene};

use self::protocol::{command, Frame};
use self::transport::{Connection, TransportEvent};

/// How long discovery waits for the next record frame
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Events emitted by the session
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Session established: logged in, events subscribed, keepalive armed
    Connected,
    /// Session lost outside of an orderly close
    Disconnected { reason: String },
    /// One device changed state (spontaneous or command progress)
    DeviceStateChanged(Device),
    /// Full device set after a discovery run
    DevicesDiscovered(Vec<Device>),
    /// Full scene set after a discovery run
    ScenesDiscovered(Vec<Scene>),
}

/// Command surface the daemon routes bus traffic through; implemented by
/// the real session and by test doubles
#[async_trait]
pub trait GatewayControl: Send + Sync {
    async fn set_position(&self, node_id: u8, pct: u8) -> Result<()>;
    async fn stop(&self, node_id: u8) -> Result<()>;
    async fn run_scene(&self, scene_id: u8) -> Result<()>;
    async fn refresh(&self) -> Result<()>;
    async fn reconnect(&self) -> Result<()>;
}

/// Compute the n-th reconnect delay (1-based): `base · 2^(n−1)`, capped
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}

struct SessionInner {
    config: Klf200Config,
    state: RwLock<SessionState>,
    events: broadcast::Sender<GatewayEvent>,
    connection: RwLock<Option<Arc<Connection>>>,
    /// Devices as last reported by the gateway; notifications merge into
    /// these entries
    products: RwLock<HashMap<u8, Device>>,
    scenes: RwLock<HashMap<u8, Scene>>,
    /// Command session id → node id, for routing run-status notifications
    command_sessions: Mutex<HashMap<u16, u8>>,
    /// Per-node command serialization
    node_locks: Mutex<HashMap<u8, Arc<Mutex<()>>>>,
    /// One request/confirm exchange in flight at a time
    request_lock: Mutex<()>,
    session_counter: AtomicU16,
    attempts: AtomicU32,
    /// Guards against stacking multiple reconnect loops
    reconnect_pending: AtomicBool,
    /// Invalidates tasks belonging to a torn-down connection
    epoch: AtomicU64,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl SessionInner {
    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    fn closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// The gateway session
pub struct GatewaySession {
    inner: Arc<SessionInner>,
}

impl GatewaySession {
    pub fn new(config: Klf200Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                config,
                state: RwLock::new(SessionState::Disconnected),
                events,
                connection: RwLock::new(None),
                products: RwLock::new(HashMap::new()),
                scenes: RwLock::new(HashMap::new()),
                command_sessions: Mutex::new(HashMap::new()),
                node_locks: Mutex::new(HashMap::new()),
                request_lock: Mutex::new(()),
                session_counter: AtomicU16::new(1),
                attempts: AtomicU32::new(0),
                reconnect_pending: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Establish the session. On failure the error is returned and the
    /// reconnect schedule takes over in the background.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closed() {
            return Err(BridgeError::connection("session is closed"));
        }
        self.inner.set_state(SessionState::Connecting).await;
        match establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.set_state(SessionState::Reconnecting).await;
                schedule_reconnect(self.inner.clone());
                Err(e)
            }
        }
    }

    /// Close the current session and retry immediately, bypassing the
    /// backoff schedule
    pub async fn reconnect(&self) -> Result<()> {
        if self.inner.closed() {
            return Err(BridgeError::connection("session is closed"));
        }
        info!("reconnect requested, dropping current gateway session");
        drop_connection(&self.inner).await;
        self.inner.set_state(SessionState::Connecting).await;
        match establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.set_state(SessionState::Reconnecting).await;
                schedule_reconnect(self.inner.clone());
                Err(e)
            }
        }
    }

    /// Query the gateway for all actuators and announce the result
    pub async fn discover_devices(&self) -> Result<Vec<Device>> {
        let devices = query_devices(&self.inner).await?;
        info!(count = devices.len(), "device discovery finished");
        let _ = self
            .inner
            .events
            .send(GatewayEvent::DevicesDiscovered(devices.clone()));
        Ok(devices)
    }

    /// Query the gateway for all scenes and announce the result
    pub async fn discover_scenes(&self) -> Result<Vec<Scene>> {
        let scenes = query_scenes(&self.inner).await?;
        info!(count = scenes.len(), "scene discovery finished");
        let _ = self
            .inner
            .events
            .send(GatewayEvent::ScenesDiscovered(scenes.clone()));
        Ok(scenes)
    }

    /// Query all actuator states without announcing a discovery; used by
    /// the poll loop so unchanged state stays quiet
    pub async fn query_devices(&self) -> Result<Vec<Device>> {
        query_devices(&self.inner).await
    }

    /// Drive a node to a public position
    pub async fn set_position(&self, node_id: u8, pct: u8) -> Result<()> {
        let pct = pct.min(100);
        send_node_command(&self.inner, node_id, codec::position_to_wire(pct)).await
    }

    /// Stop a node's movement by targeting its current position
    pub async fn stop(&self, node_id: u8) -> Result<()> {
        send_node_command(&self.inner, node_id, codec::WIRE_STOP).await
    }

    /// Trigger execution of a scene
    pub async fn run_scene(&self, scene_id: u8) -> Result<()> {
        ensure_connected(&self.inner).await?;
        let session_id = next_session_id(&self.inner);
        let cfm = request(
            &self.inner,
            protocol::activate_scene_req(session_id, scene_id),
            command::GW_ACTIVATE_SCENE_CFM,
        )
        .await?;
        let (_, accepted) = protocol::parse_activate_scene_cfm(&cfm.data)?;
        if !accepted {
            return Err(BridgeError::CommandRejected(format!(
                "gateway refused to run scene {scene_id}"
            )));
        }
        debug!(scene_id, "scene activation accepted");
        Ok(())
    }

    /// Re-run discovery for devices and scenes
    pub async fn refresh(&self) -> Result<()> {
        self.discover_devices().await?;
        self.discover_scenes().await?;
        Ok(())
    }

    /// Close the session for good. Best effort; never fails. The gateway
    /// has no logout frame, dropping the TLS session ends it.
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.set_state(SessionState::Closed).await;
        self.inner.shutdown_notify.notify_waiters();
        drop_connection(&self.inner).await;
        info!("gateway session closed");
    }
}

#[async_trait]
impl GatewayControl for GatewaySession {
    async fn set_position(&self, node_id: u8, pct: u8) -> Result<()> {
        GatewaySession::set_position(self, node_id, pct).await
    }

    async fn stop(&self, node_id: u8) -> Result<()> {
        GatewaySession::stop(self, node_id).await
    }

    async fn run_scene(&self, scene_id: u8) -> Result<()> {
        GatewaySession::run_scene(self, scene_id).await
    }

    async fn refresh(&self) -> Result<()> {
        GatewaySession::refresh(self).await
    }

    async fn reconnect(&self) -> Result<()> {
        GatewaySession::reconnect(self).await
    }
}

// ---------------------------------------------------------------------------
// Session internals
// ---------------------------------------------------------------------------

async fn ensure_connected(inner: &SessionInner) -> Result<()> {
    if *inner.state.read().await == SessionState::Connected {
        Ok(())
    } else {
        Err(BridgeError::NotConnected)
    }
}

fn next_session_id(inner: &SessionInner) -> u16 {
    inner.session_counter.fetch_add(1, Ordering::SeqCst)
}

async fn current_connection(inner: &SessionInner) -> Result<Arc<Connection>> {
    inner
        .connection
        .read()
        .await
        .clone()
        .ok_or(BridgeError::NotConnected)
}

/// One request/confirm exchange; serialized session-wide
async fn request(inner: &SessionInner, frame: Frame, confirm: u16) -> Result<Frame> {
    let connection = current_connection(inner).await?;
    let _guard = inner.request_lock.lock().await;
    connection.request(frame, confirm).await
}

async fn drop_connection(inner: &SessionInner) {
    inner.epoch.fetch_add(1, Ordering::SeqCst);
    if let Some(connection) = inner.connection.write().await.take() {
        connection.close();
    }
    inner.command_sessions.lock().await.clear();
}

/// Dial, log in, subscribe to house status events and arm the keepalive
async fn establish(inner: &Arc<SessionInner>) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connection = Arc::new(Connection::open(&inner.config, events_tx).await?);

    let login = connection
        .request(
            protocol::password_enter_req(&inner.config.password)?,
            command::GW_PASSWORD_ENTER_CFM,
        )
        .await?;
    if !protocol::parse_password_enter_cfm(&login.data)? {
        return Err(BridgeError::authentication(
            "gateway rejected the configured password",
        ));
    }

    let subscription = connection
        .request(
            protocol::house_status_monitor_enable_req(),
            command::GW_HOUSE_STATUS_MONITOR_ENABLE_CFM,
        )
        .await;
    subscription.map_err(|e| {
        BridgeError::connection(format!("enabling house status events failed: {e}"))
    })?;

    let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
    *inner.connection.write().await = Some(connection);
    inner.attempts.store(0, Ordering::SeqCst);
    inner.set_state(SessionState::Connected).await;

    tokio::spawn(dispatch_loop(inner.clone(), events_rx, epoch));
    tokio::spawn(keepalive_loop(inner.clone(), epoch));

    info!(
        host = %inner.config.host,
        port = inner.config.port,
        "gateway session established"
    );
    let _ = inner.events.send(GatewayEvent::Connected);
    Ok(())
}

/// Forward transport events from one connection until it dies
async fn dispatch_loop(
    inner: Arc<SessionInner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(frame) => handle_notification(&inner, frame).await,
            TransportEvent::Closed(reason) => {
                handle_connection_loss(&inner, &reason, epoch).await;
                return;
            }
        }
    }
}

/// Periodic lightweight state query; failure counts as connection loss.
/// The gateway severs idle sessions after ten to fifteen minutes.
async fn keepalive_loop(inner: Arc<SessionInner>, epoch: u64) {
    let interval = inner.config.keepalive_interval();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = inner.shutdown_notify.notified() => return,
        }
        if inner.closed() || inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        if *inner.state.read().await != SessionState::Connected {
            return;
        }
        let probe = request(&inner, protocol::get_state_req(), command::GW_GET_STATE_CFM).await;
        match probe {
            Ok(frame) => match protocol::parse_get_state_cfm(&frame.data) {
                Ok(state) => debug!(state = state.state, "keepalive probe ok"),
                Err(e) => warn!("keepalive probe returned malformed state: {e}"),
            },
            Err(e) => {
                warn!("keepalive probe failed: {e}");
                handle_connection_loss(&inner, "keepalive probe failed", epoch).await;
                return;
            }
        }
    }
}

/// React to the transport dying: announce, tear down, schedule reconnect.
/// Only acts for the connection generation that observed the loss, and only
/// out of the connected state; failures during establishment are handled by
/// the caller that attempted it.
async fn handle_connection_loss(inner: &Arc<SessionInner>, reason: &str, epoch: u64) {
    if inner.closed() || inner.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }
    {
        let mut state = inner.state.write().await;
        if *state != SessionState::Connected {
            return;
        }
        *state = SessionState::Reconnecting;
    }
    warn!(reason, "gateway connection lost");
    drop_connection(inner).await;
    let _ = inner.events.send(GatewayEvent::Disconnected {
        reason: reason.to_string(),
    });
    schedule_reconnect(inner.clone());
}

/// Run the backoff schedule until a connection sticks or the session closes
fn schedule_reconnect(inner: Arc<SessionInner>) {
    if inner.closed() {
        return;
    }
    if inner.reconnect_pending.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        loop {
            let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = reconnect_delay(
                attempt,
                inner.config.reconnect_base_delay(),
                inner.config.reconnect_max_delay(),
            );
            info!(attempt, delay_secs = delay.as_secs(), "gateway reconnect scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.shutdown_notify.notified() => break,
            }
            if inner.closed() {
                break;
            }
            inner.set_state(SessionState::Connecting).await;
            match establish(&inner).await {
                Ok(()) => {
                    inner.reconnect_pending.store(false, Ordering::SeqCst);
                    if let Err(e) = rediscover(&inner).await {
                        warn!("rediscovery after reconnect failed: {e}");
                    }
                    return;
                }
                Err(e) => {
                    warn!(attempt, "reconnect attempt failed: {e}");
                    inner.set_state(SessionState::Reconnecting).await;
                }
            }
        }
        inner.reconnect_pending.store(false, Ordering::SeqCst);
    });
}

/// Rediscover devices and scenes after a reconnect, announcing both sets
async fn rediscover(inner: &Arc<SessionInner>) -> Result<()> {
    let devices = query_devices(inner).await?;
    let _ = inner
        .events
        .send(GatewayEvent::DevicesDiscovered(devices));
    let scenes = query_scenes(inner).await?;
    let _ = inner.events.send(GatewayEvent::ScenesDiscovered(scenes));
    Ok(())
}

/// Handle an unsolicited notification frame
async fn handle_notification(inner: &Arc<SessionInner>, frame: Frame) {
    match frame.command {
        command::GW_NODE_STATE_POSITION_CHANGED_NTF => {
            match protocol::parse_node_state_position_changed_ntf(&frame.data) {
                Ok(change) => {
                    let updated = apply_node_state(
                        inner,
                        change.node_id,
                        change.state,
                        Some(change.current_position),
                        Some(change.target_position),
                    )
                    .await;
                    if let Some(device) = updated {
                        let _ = inner.events.send(GatewayEvent::DeviceStateChanged(device));
                    }
                }
                Err(e) => warn!("bad node state notification: {e}"),
            }
        }
        command::GW_COMMAND_RUN_STATUS_NTF => {
            match protocol::parse_command_run_status_ntf(&frame.data) {
                Ok(status) => handle_run_status(inner, status).await,
                Err(e) => warn!("bad run status notification: {e}"),
            }
        }
        command::GW_SESSION_FINISHED_NTF => {
            if let Ok(session_id) = protocol::parse_session_finished_ntf(&frame.data) {
                inner.command_sessions.lock().await.remove(&session_id);
                debug!(session_id, "command session finished");
            }
        }
        command::GW_COMMAND_REMAINING_TIME_NTF => {
            // remaining time is not surfaced on the bus
        }
        command::GW_ERROR_NTF => match protocol::parse_error_ntf(&frame.data) {
            Ok(code) => warn!(code, "gateway reported a protocol error"),
            Err(e) => warn!("bad gateway error notification: {e}"),
        },
        other => debug!(command = %format!("0x{other:04X}"), "ignoring gateway frame"),
    }
}

/// Merge a run-status notification into the product it belongs to
async fn handle_run_status(inner: &Arc<SessionInner>, status: protocol::CommandRunStatus) {
    let node_id = {
        let sessions = inner.command_sessions.lock().await;
        sessions.get(&status.session_id).copied()
    };
    let Some(node_id) = node_id else {
        debug!(
            session_id = status.session_id,
            "run status for unknown command session"
        );
        return;
    };

    let error = codec::status_text(status.status_reply).and_then(|info| {
        if info.is_error {
            Some(info.message)
        } else {
            debug!(node_id, "device status: {}", info.message);
            None
        }
    });

    let updated = {
        let mut products = inner.products.write().await;
        let Some(device) = products.get_mut(&node_id) else {
            return;
        };
        if status.node_parameter == 0 {
            device.position = codec::position_from_wire(status.parameter_value);
        }
        device.moving = status.run_status == protocol::RUN_STATUS_ACTIVE;
        device.error = error;
        device.last_update = Utc::now();
        device.clone()
    };
    let _ = inner.events.send(GatewayEvent::DeviceStateChanged(updated));
}

/// Merge a node-state frame into the product cache; unknown nodes are
/// ignored until the next discovery picks them up
async fn apply_node_state(
    inner: &Arc<SessionInner>,
    node_id: u8,
    state: u8,
    current: Option<u16>,
    target: Option<u16>,
) -> Option<Device> {
    let mut products = inner.products.write().await;
    let device = products.get_mut(&node_id)?;
    if let Some(current) = current {
        device.position = codec::position_from_wire(current);
    }
    if let Some(target) = target {
        device.target_position = codec::position_from_wire(target);
    }
    device.online = state == protocol::NODE_STATE_ONLINE;
    device.moving = state == protocol::NODE_STATE_EXECUTING;
    device.last_update = Utc::now();
    Some(device.clone())
}

/// Issue a command-send for one node, queueing behind any in-flight command
/// for the same node
async fn send_node_command(inner: &SessionInner, node_id: u8, main_parameter: u16) -> Result<()> {
    ensure_connected(inner).await?;
    if !inner.products.read().await.contains_key(&node_id) {
        return Err(BridgeError::UnknownNode(node_id));
    }

    let node_lock = {
        let mut locks = inner.node_locks.lock().await;
        locks
            .entry(node_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    };
    let _guard = node_lock.lock().await;
    ensure_connected(inner).await?;

    let session_id = next_session_id(inner);
    let cfm = request(
        inner,
        protocol::command_send_req(session_id, node_id, main_parameter),
        command::GW_COMMAND_SEND_CFM,
    )
    .await?;
    let (confirmed_session, accepted) = protocol::parse_command_send_cfm(&cfm.data)?;
    if !accepted {
        return Err(BridgeError::CommandRejected(format!(
            "gateway refused command for node {node_id}"
        )));
    }
    inner
        .command_sessions
        .lock()
        .await
        .insert(confirmed_session, node_id);
    debug!(node_id, session_id = confirmed_session, "command accepted");
    Ok(())
}

/// Build a device from a discovery record
fn device_from_info(info: protocol::NodeInformation) -> Device {
    Device {
        node_id: info.node_id,
        name: info.name,
        device_type: codec::classify(info.actuator_type),
        position: codec::position_from_wire(info.current_position),
        target_position: codec::position_from_wire(info.target_position),
        moving: info.state == protocol::NODE_STATE_EXECUTING,
        online: info.state == protocol::NODE_STATE_ONLINE,
        error: None,
        limitation_min: 0,
        limitation_max: 100,
        serial_number: info.serial_number,
        product_type: info.actuator_type,
        last_update: Utc::now(),
    }
}

/// Fetch the full actuator list and refresh the product cache
async fn query_devices(inner: &SessionInner) -> Result<Vec<Device>> {
    ensure_connected(inner).await?;
    let connection = current_connection(inner).await?;
    let collected = &[
        command::GW_GET_ALL_NODES_INFORMATION_NTF,
        command::GW_GET_ALL_NODES_INFORMATION_FINISHED_NTF,
    ];
    let mut records = connection.register_collector(collected).await;

    let result: Result<Vec<Device>> = async {
        let cfm = request(
            inner,
            protocol::get_all_nodes_information_req(),
            command::GW_GET_ALL_NODES_INFORMATION_CFM,
        )
        .await?;
        let announced = protocol::parse_all_nodes_information_cfm(&cfm.data)?;
        let mut devices = Vec::with_capacity(announced as usize);
        if announced == 0 {
            return Ok(devices);
        }
        loop {
            let frame = tokio::time::timeout(DISCOVERY_TIMEOUT, records.recv())
                .await
                .map_err(|_| BridgeError::timeout("device discovery"))?
                .ok_or(BridgeError::NotConnected)?;
            match frame.command {
                command::GW_GET_ALL_NODES_INFORMATION_NTF => {
                    let info = protocol::parse_node_information_ntf(&frame.data)?;
                    devices.push(device_from_info(info));
                }
                command::GW_GET_ALL_NODES_INFORMATION_FINISHED_NTF => break,
                _ => {}
            }
        }
        Ok(devices)
    }
    .await;
    connection.remove_collector(collected).await;

    let devices: Vec<Device> = result?;
    let mut products = inner.products.write().await;
    // carry over errors reported since the last discovery; the node frames
    // do not repeat them
    let mut merged = Vec::with_capacity(devices.len());
    for mut device in devices {
        if let Some(previous) = products.get(&device.node_id) {
            device.error = previous.error.clone();
        }
        merged.push(device);
    }
    *products = merged.iter().map(|d| (d.node_id, d.clone())).collect();
    Ok(merged)
}

/// Fetch the scene list plus each scene's actuator count
async fn query_scenes(inner: &SessionInner) -> Result<Vec<Scene>> {
    ensure_connected(inner).await?;
    let connection = current_connection(inner).await?;

    let listed = &[command::GW_GET_SCENE_LIST_NTF];
    let mut records = connection.register_collector(listed).await;
    let result: Result<Vec<(u8, String)>> = async {
        let cfm = request(
            inner,
            protocol::get_scene_list_req(),
            command::GW_GET_SCENE_LIST_CFM,
        )
        .await?;
        let announced = protocol::parse_scene_list_cfm(&cfm.data)?;
        let mut scenes = Vec::with_capacity(announced as usize);
        if announced == 0 {
            return Ok(scenes);
        }
        loop {
            let frame = tokio::time::timeout(DISCOVERY_TIMEOUT, records.recv())
                .await
                .map_err(|_| BridgeError::timeout("scene discovery"))?
                .ok_or(BridgeError::NotConnected)?;
            let batch = protocol::parse_scene_list_ntf(&frame.data)?;
            scenes.extend(batch.scenes);
            if batch.remaining == 0 {
                break;
            }
        }
        Ok(scenes)
    }
    .await;
    connection.remove_collector(listed).await;
    let listed_scenes: Vec<(u8, String)> = result?;

    let mut scenes = Vec::with_capacity(listed_scenes.len());
    for (scene_id, name) in listed_scenes {
        let product_count = match query_scene_product_count(inner, &connection, scene_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(scene_id, "scene detail query failed: {e}");
                0
            }
        };
        scenes.push(Scene {
            scene_id,
            name,
            product_count,
        });
    }

    *inner.scenes.write().await = scenes.iter().map(|s| (s.scene_id, s.clone())).collect();
    Ok(scenes)
}

/// Count a scene's actuator records via the scene detail frames
async fn query_scene_product_count(
    inner: &SessionInner,
    connection: &Connection,
    scene_id: u8,
) -> Result<u8> {
    let detail = &[command::GW_GET_SCENE_INFORMATION_NTF];
    let mut records = connection.register_collector(detail).await;
    let result = async {
        let cfm = request(
            inner,
            protocol::get_scene_information_req(scene_id),
            command::GW_GET_SCENE_INFORMATION_CFM,
        )
        .await?;
        if !protocol::parse_scene_information_cfm(&cfm.data)? {
            return Err(BridgeError::protocol(format!(
                "gateway has no scene {scene_id}"
            )));
        }
        let mut count: u8 = 0;
        loop {
            let frame = tokio::time::timeout(DISCOVERY_TIMEOUT, records.recv())
                .await
                .map_err(|_| BridgeError::timeout("scene detail"))?
                .ok_or(BridgeError::NotConnected)?;
            let batch = protocol::parse_scene_information_ntf(&frame.data)?;
            count = count.saturating_add(batch.node_count);
            if batch.remaining == 0 {
                break;
            }
        }
        Ok(count)
    }
    .await;
    connection.remove_collector(detail).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_sequence() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        let delays: Vec<u64> = (1..=7)
            .map(|n| reconnect_delay(n, base, max).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[test]
    fn test_reconnect_delay_monotone_and_capped() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = reconnect_delay(attempt, base, max);
            assert!(delay >= previous);
            assert!(delay <= max);
            previous = delay;
        }
    }

    #[test]
    fn test_reconnect_delay_first_attempt_is_base() {
        assert_eq!(
            reconnect_delay(1, Duration::from_secs(3), Duration::from_secs(60)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_device_from_info_maps_codec_fields() {
        let info = protocol::NodeInformation {
            node_id: 0,
            name: "Kitchen".to_string(),
            actuator_type: 4,
            serial_number: "12:34:56:78:9A:BC:DE:F0".to_string(),
            state: 1,
            current_position: 0x6400, // half closed
            target_position: 0x6400,
            remaining_time: 0,
        };
        let device = device_from_info(info);
        assert_eq!(device.position, 50);
        assert_eq!(device.target_position, 50);
        assert_eq!(device.device_type, crate::codec::DeviceType::Window);
        assert!(device.online);
        assert!(!device.moving);
        assert_eq!(device.error, None);
    }

    #[test]
    fn test_device_from_info_executing_state() {
        let info = protocol::NodeInformation {
            node_id: 3,
            name: "Roof".to_string(),
            actuator_type: 2,
            serial_number: "00:00:00:00:00:00:00:00".to_string(),
            state: protocol::NODE_STATE_EXECUTING,
            current_position: 0,
            target_position: 0xC800,
            remaining_time: 30,
        };
        let device = device_from_info(info);
        assert!(device.moving);
        // busy is deliberately not online; the bridge keeps the gateway's
        // strict reading of the state byte
        assert!(!device.online);
    }
}
