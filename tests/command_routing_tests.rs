//! Command routing tests
//!
//! Exercises the bus-command translation against a mock gateway: payload
//! parsing on the inbound topics and the exact gateway calls each command
//! produces.

mod common;

use common::{GatewayCall, MockGateway};

use klf200_bridge::daemon::dispatch_bus_command;
use klf200_bridge::error::BridgeError;
use klf200_bridge::mqtt::{
    topics::{self, Route},
    BusCommand, DeviceCommand, GlobalCommand, TopicMap,
};

/// Parse a payload the way the bridge does for `devices/<n>/cmd` and
/// dispatch it when it parses
async fn route_device_payload(gateway: &MockGateway, node_id: u8, payload: &str) -> bool {
    match topics::parse_device_command(payload) {
        Some(command) => {
            dispatch_bus_command(gateway, BusCommand::Device { node_id, command }, true)
                .await
                .expect("dispatch");
            true
        }
        None => false,
    }
}

#[tokio::test]
async fn test_open_drives_to_full_open() {
    let gateway = MockGateway::new();
    assert!(route_device_payload(&gateway, 0, "open").await);
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::SetPosition {
            node_id: 0,
            pct: 100
        }]
    );
}

#[tokio::test]
async fn test_close_drives_to_full_closed() {
    let gateway = MockGateway::new();
    assert!(route_device_payload(&gateway, 4, "CLOSE").await);
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::SetPosition { node_id: 4, pct: 0 }]
    );
}

#[tokio::test]
async fn test_stop_issues_stop() {
    let gateway = MockGateway::new();
    assert!(route_device_payload(&gateway, 7, " stop ").await);
    assert_eq!(gateway.calls(), vec![GatewayCall::Stop { node_id: 7 }]);
}

#[tokio::test]
async fn test_integer_payload_passes_through() {
    let gateway = MockGateway::new();
    assert!(route_device_payload(&gateway, 2, "42").await);
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::SetPosition {
            node_id: 2,
            pct: 42
        }]
    );
}

#[tokio::test]
async fn test_out_of_range_payload_produces_no_call() {
    let gateway = MockGateway::new();
    assert!(!route_device_payload(&gateway, 0, "150").await);
    assert!(!route_device_payload(&gateway, 0, "down").await);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_position_set_topic_accepts_integers_only() {
    let gateway = MockGateway::new();
    match topics::parse_position_only("50") {
        Some(command) => {
            dispatch_bus_command(
                &gateway,
                BusCommand::Device {
                    node_id: 0,
                    command,
                },
                true,
            )
            .await
            .expect("dispatch");
        }
        None => panic!("'50' must parse"),
    }
    assert!(topics::parse_position_only("open").is_none());
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::SetPosition {
            node_id: 0,
            pct: 50
        }]
    );
}

#[tokio::test]
async fn test_scene_run_command() {
    let gateway = MockGateway::new();
    dispatch_bus_command(&gateway, BusCommand::Scene { scene_id: 4 }, true)
        .await
        .expect("dispatch");
    assert_eq!(gateway.calls(), vec![GatewayCall::RunScene { scene_id: 4 }]);
}

#[tokio::test]
async fn test_global_refresh() {
    let gateway = MockGateway::new();
    dispatch_bus_command(&gateway, BusCommand::Global(GlobalCommand::Refresh), true)
        .await
        .expect("dispatch");
    assert_eq!(gateway.calls(), vec![GatewayCall::Refresh]);
}

#[tokio::test]
async fn test_global_reconnect_rediscover_with_auto_discovery() {
    let gateway = MockGateway::new();
    dispatch_bus_command(&gateway, BusCommand::Global(GlobalCommand::Reconnect), true)
        .await
        .expect("dispatch");
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::Reconnect, GatewayCall::Refresh]
    );
}

#[tokio::test]
async fn test_global_reconnect_without_auto_discovery() {
    let gateway = MockGateway::new();
    dispatch_bus_command(
        &gateway,
        BusCommand::Global(GlobalCommand::Reconnect),
        false,
    )
    .await
    .expect("dispatch");
    assert_eq!(gateway.calls(), vec![GatewayCall::Reconnect]);
}

#[tokio::test]
async fn test_unknown_node_error_propagates() {
    let gateway = MockGateway::rejecting_node(9);
    let result = dispatch_bus_command(
        &gateway,
        BusCommand::Device {
            node_id: 9,
            command: DeviceCommand::Open,
        },
        true,
    )
    .await;
    assert!(matches!(result, Err(BridgeError::UnknownNode(9))));
    assert!(gateway.calls().is_empty());
}

#[test]
fn test_inbound_routing_matches_command_topics_only() {
    let topics = TopicMap::new("klf200");
    assert_eq!(
        topics.route("klf200/devices/0/cmd"),
        Some(Route::Device { node_id: 0 })
    );
    assert_eq!(
        topics.route("klf200/devices/0/position/set"),
        Some(Route::DevicePosition { node_id: 0 })
    );
    assert_eq!(
        topics.route("klf200/scenes/2/cmd"),
        Some(Route::Scene { scene_id: 2 })
    );
    assert_eq!(topics.route("klf200/cmd"), Some(Route::Global));
    // outbound topics never route back in
    assert_eq!(topics.route("klf200/devices/0/state"), None);
    assert_eq!(topics.route("klf200/devices/0/position"), None);
    assert_eq!(topics.route("klf200/status"), None);
    assert_eq!(topics.route("klf200/errors"), None);
}
