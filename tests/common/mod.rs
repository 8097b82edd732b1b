//! Common test utilities and mock infrastructure
//!
//! Provides a recording mock gateway implementing the command trait plus
//! device fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use klf200_bridge::codec::DeviceType;
use klf200_bridge::error::{BridgeError, Result};
use klf200_bridge::klf200::GatewayControl;
use klf200_bridge::registry::{Device, Scene};

/// One recorded call on the mock gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCall {
    SetPosition { node_id: u8, pct: u8 },
    Stop { node_id: u8 },
    RunScene { scene_id: u8 },
    Refresh,
    Reconnect,
}

/// Mock gateway recording every command it receives
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    /// Commands for this node fail with `UnknownNode`
    reject_node: Option<u8>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make commands for one node fail
    pub fn rejecting_node(node_id: u8) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject_node: Some(node_id),
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("mock lock").clone()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().expect("mock lock").push(call);
    }

    fn check_node(&self, node_id: u8) -> Result<()> {
        if self.reject_node == Some(node_id) {
            return Err(BridgeError::UnknownNode(node_id));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayControl for MockGateway {
    async fn set_position(&self, node_id: u8, pct: u8) -> Result<()> {
        self.check_node(node_id)?;
        self.record(GatewayCall::SetPosition { node_id, pct });
        Ok(())
    }

    async fn stop(&self, node_id: u8) -> Result<()> {
        self.check_node(node_id)?;
        self.record(GatewayCall::Stop { node_id });
        Ok(())
    }

    async fn run_scene(&self, scene_id: u8) -> Result<()> {
        self.record(GatewayCall::RunScene { scene_id });
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.record(GatewayCall::Refresh);
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.record(GatewayCall::Reconnect);
        Ok(())
    }
}

/// Build a plain online window device
pub fn test_device(node_id: u8, position: u8) -> Device {
    Device {
        node_id,
        name: format!("Window {node_id}"),
        device_type: DeviceType::Window,
        position,
        target_position: position,
        moving: false,
        online: true,
        error: None,
        limitation_min: 0,
        limitation_max: 100,
        serial_number: "53:03:12:0A:00:00:00:01".to_string(),
        product_type: 4,
        last_update: Utc::now(),
    }
}

/// Build a scene fixture
pub fn test_scene(scene_id: u8, name: &str, product_count: u8) -> Scene {
    Scene {
        scene_id,
        name: name.to_string(),
        product_count,
    }
}
