//! Device and scene registry
//!
//! The registry holds the authoritative in-memory snapshot of all known
//! devices and scenes. Mutations go through semantic change detection:
//! an update only counts (and only produces an event) when one of the
//! fields a bus consumer can observe actually changed. Accepted mutations
//! set a dirty flag and arm a debounced background save of the snapshot
//! file; persistence failures never propagate to callers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{debug, warn};

use crate::codec::DeviceType;
use crate::error::{BridgeError, Result};

/// Debounce window between an accepted mutation and the snapshot write
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// Capacity of the registry event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One actuator as exposed on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub node_id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Public position, 0 closed .. 100 open
    pub position: u8,
    pub target_position: u8,
    pub moving: bool,
    pub online: bool,
    pub error: Option<String>,
    pub limitation_min: u8,
    pub limitation_max: u8,
    pub serial_number: String,
    pub product_type: u16,
    pub last_update: DateTime<Utc>,
}

impl Device {
    /// Compare the fields a bus consumer can observe. Timestamps, limits
    /// and identity metadata do not count as changes on their own.
    pub fn semantically_equal(&self, other: &Device) -> bool {
        self.position == other.position
            && self.target_position == other.target_position
            && self.moving == other.moving
            && self.online == other.online
            && self.error == other.error
            && self.name == other.name
    }
}

/// One scene as exposed on the bus; scenes are externally managed and the
/// bridge only ever reads them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_id: u8,
    pub name: String,
    pub product_count: u8,
}

/// Change events emitted by the registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was stored with observable changes; `prev` is `None` for a
    /// first sighting
    StateChanged {
        prev: Option<Device>,
        curr: Device,
    },
    /// Summary after a bulk replacement
    DevicesUpdated { changed: usize },
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: BTreeMap<u8, Device>,
    scenes: BTreeMap<u8, Scene>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Serialized form of the snapshot file
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument<'a> {
    devices: &'a BTreeMap<u8, Device>,
    scenes: &'a BTreeMap<u8, Scene>,
    last_refresh: Option<DateTime<Utc>>,
}

struct RegistryInner {
    state: RwLock<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
    snapshot_path: PathBuf,
    dirty: AtomicBool,
    persist: Notify,
    shutdown: AtomicBool,
}

/// In-memory device/scene registry with debounced snapshot persistence
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
    persist_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DeviceRegistry {
    /// Create a registry persisting to the given snapshot path
    pub fn new(snapshot_path: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(RegistryInner {
            state: RwLock::new(RegistryState::default()),
            events,
            snapshot_path,
            dirty: AtomicBool::new(false),
            persist: Notify::new(),
            shutdown: AtomicBool::new(false),
        });
        let persist_task = tokio::spawn(persistence_loop(inner.clone()));
        Self {
            inner,
            persist_task: Mutex::new(Some(persist_task)),
        }
    }

    /// Subscribe to registry change events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Look up one device by node id
    pub async fn get(&self, node_id: u8) -> Option<Device> {
        self.inner.state.read().await.devices.get(&node_id).cloned()
    }

    /// All devices, ordered by node id
    pub async fn list(&self) -> Vec<Device> {
        self.inner.state.read().await.devices.values().cloned().collect()
    }

    /// All scenes, ordered by scene id
    pub async fn scenes(&self) -> Vec<Scene> {
        self.inner.state.read().await.scenes.values().cloned().collect()
    }

    /// Store one device, emitting a change event when an observable field
    /// differs from the stored entry. Returns whether a change was emitted.
    pub async fn update(&self, device: Device) -> bool {
        let (changed, prev) = {
            let mut state = self.inner.state.write().await;
            let prev = state.devices.get(&device.node_id).cloned();
            let changed = match &prev {
                Some(existing) => !existing.semantically_equal(&device),
                None => true,
            };
            state.devices.insert(device.node_id, device.clone());
            (changed, prev)
        };
        if changed {
            let _ = self.inner.events.send(RegistryEvent::StateChanged {
                prev,
                curr: device,
            });
        }
        // unchanged semantic fields still refresh timestamps on disk
        self.mark_dirty();
        changed
    }

    /// Replace the whole device set, emitting one event per changed device
    /// and a final summary
    pub async fn replace_all(&self, devices: Vec<Device>) -> usize {
        let mut changes = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            let mut next = BTreeMap::new();
            for device in devices {
                let prev = state.devices.get(&device.node_id).cloned();
                let changed = match &prev {
                    Some(existing) => !existing.semantically_equal(&device),
                    None => true,
                };
                if changed {
                    changes.push((prev, device.clone()));
                }
                next.insert(device.node_id, device);
            }
            state.devices = next;
            state.last_refresh = Some(Utc::now());
        }
        let changed = changes.len();
        for (prev, curr) in changes {
            let _ = self
                .inner
                .events
                .send(RegistryEvent::StateChanged { prev, curr });
        }
        let _ = self
            .inner
            .events
            .send(RegistryEvent::DevicesUpdated { changed });
        self.mark_dirty();
        changed
    }

    /// Store one scene; scenes carry no change-detection semantics
    pub async fn scene_update(&self, scene: Scene) {
        self.inner
            .state
            .write()
            .await
            .scenes
            .insert(scene.scene_id, scene);
        self.mark_dirty();
    }

    /// Replace the whole scene set
    pub async fn scene_replace_all(&self, scenes: Vec<Scene>) {
        {
            let mut state = self.inner.state.write().await;
            state.scenes = scenes.into_iter().map(|s| (s.scene_id, s)).collect();
            state.last_refresh = Some(Utc::now());
        }
        self.mark_dirty();
    }

    /// Force an immediate snapshot write
    pub async fn flush(&self) -> Result<()> {
        self.inner.dirty.store(false, Ordering::SeqCst);
        let result = persist_snapshot(&self.inner).await;
        if result.is_err() {
            self.inner.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Flush and stop the persistence task
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.persist.notify_one();
        if let Err(e) = self.flush().await {
            warn!("final snapshot flush failed: {e}");
        }
        if let Some(task) = self.persist_task.lock().await.take() {
            let _ = task.await;
        }
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        self.inner.persist.notify_one();
    }
}

/// Background task: wait for a mutation, debounce, write the snapshot.
/// Write errors keep the dirty flag set so the next mutation retries.
async fn persistence_loop(inner: Arc<RegistryInner>) {
    loop {
        inner.persist.notified().await;
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        // trailing debounce, re-armed by every further mutation
        loop {
            tokio::select! {
                _ = tokio::time::sleep(PERSIST_DEBOUNCE) => break,
                _ = inner.persist.notified() => {}
            }
            if inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
        }
        if inner.dirty.swap(false, Ordering::SeqCst) {
            if let Err(e) = persist_snapshot(&inner).await {
                warn!("snapshot persistence failed, will retry: {e}");
                inner.dirty.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Serialize the registry and write it atomically (temp file + rename)
async fn persist_snapshot(inner: &RegistryInner) -> Result<()> {
    let json = {
        let state = inner.state.read().await;
        let document = SnapshotDocument {
            devices: &state.devices,
            scenes: &state.scenes,
            last_refresh: state.last_refresh,
        };
        serde_json::to_string_pretty(&document)?
    };
    let path = &inner.snapshot_path;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BridgeError::persistence(format!("create {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| BridgeError::persistence(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BridgeError::persistence(format!("rename to {}: {e}", path.display())))?;
    debug!(path = %path.display(), "registry snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device(node_id: u8, position: u8) -> Device {
        Device {
            node_id,
            name: format!("Device {node_id}"),
            device_type: DeviceType::Window,
            position,
            target_position: position,
            moving: false,
            online: true,
            error: None,
            limitation_min: 0,
            limitation_max: 100,
            serial_number: "12:34:56:78:9A:BC:DE:F0".to_string(),
            product_type: 4,
            last_update: Utc::now(),
        }
    }

    fn temp_snapshot_path() -> PathBuf {
        use std::sync::atomic::AtomicUsize;
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "klf200-registry-{}-{}.json",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[tokio::test]
    async fn test_first_update_emits_with_no_previous() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        let mut events = registry.subscribe();

        assert!(registry.update(sample_device(0, 50)).await);
        match events.recv().await.unwrap() {
            RegistryEvent::StateChanged { prev, curr } => {
                assert!(prev.is_none());
                assert_eq!(curr.node_id, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_semantically_equal_update_is_silent() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        registry.update(sample_device(0, 50)).await;

        let mut events = registry.subscribe();
        let mut repeat = sample_device(0, 50);
        // timestamp and limit differences alone must not count as changes
        repeat.last_update = Utc::now();
        repeat.limitation_max = 90;
        assert!(!registry.update(repeat).await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_semantic_field_change_emits_prev_and_curr() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        registry.update(sample_device(0, 50)).await;

        let mut events = registry.subscribe();
        assert!(registry.update(sample_device(0, 100)).await);
        match events.recv().await.unwrap() {
            RegistryEvent::StateChanged { prev, curr } => {
                assert_eq!(prev.unwrap().position, 50);
                assert_eq!(curr.position, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_and_name_are_semantic_fields() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        registry.update(sample_device(3, 10)).await;

        let mut errored = sample_device(3, 10);
        errored.error = Some("Blocked".to_string());
        assert!(registry.update(errored).await);

        let mut renamed = sample_device(3, 10);
        renamed.error = Some("Blocked".to_string());
        renamed.name = "Renamed".to_string();
        assert!(registry.update(renamed).await);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_node_id() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        for id in [9u8, 2, 7, 0] {
            registry.update(sample_device(id, 0)).await;
        }
        let ids: Vec<u8> = registry.list().await.iter().map(|d| d.node_id).collect();
        assert_eq!(ids, vec![0, 2, 7, 9]);
    }

    #[tokio::test]
    async fn test_replace_all_emits_per_change_and_summary() {
        let registry = DeviceRegistry::new(temp_snapshot_path());
        registry.update(sample_device(0, 50)).await;
        registry.update(sample_device(1, 20)).await;

        let mut events = registry.subscribe();
        let changed = registry
            .replace_all(vec![sample_device(0, 50), sample_device(1, 80)])
            .await;
        assert_eq!(changed, 1);

        match events.recv().await.unwrap() {
            RegistryEvent::StateChanged { curr, .. } => assert_eq!(curr.node_id, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        match events.recv().await.unwrap() {
            RegistryEvent::DevicesUpdated { changed } => assert_eq!(changed, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_device_json_shape() {
        let device = sample_device(0, 50);
        let value: serde_json::Value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["nodeId"], 0);
        assert_eq!(value["type"], "window");
        assert_eq!(value["position"], 50);
        assert_eq!(value["targetPosition"], 50);
        assert_eq!(value["moving"], false);
        assert_eq!(value["online"], true);
        assert_eq!(value["error"], serde_json::Value::Null);
        assert_eq!(value["limitationMin"], 0);
        assert_eq!(value["limitationMax"], 100);
        assert_eq!(value["serialNumber"], "12:34:56:78:9A:BC:DE:F0");
        assert_eq!(value["productType"], 4);
        assert!(value["lastUpdate"].as_str().unwrap().ends_with('Z'));
    }
}
