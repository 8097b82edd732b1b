//! Topic names and inbound routing
//!
//! Outbound topic builders plus the anchored matcher for the four command
//! topics. Payload parsing is deliberately forgiving about case and
//! whitespace and strict about everything else: anything unparseable is
//! reported to the caller as `None` and dropped with a log entry upstream.

/// A parsed device command payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Open,
    Close,
    Stop,
    Position(u8),
}

/// Commands addressed to the bridge itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommand {
    Refresh,
    Reconnect,
}

/// A routed inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Device { node_id: u8 },
    DevicePosition { node_id: u8 },
    Scene { scene_id: u8 },
    Global,
}

/// Outbound topic names for one prefix
#[derive(Debug, Clone)]
pub struct TopicMap {
    prefix: String,
}

impl TopicMap {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn errors(&self) -> String {
        format!("{}/errors", self.prefix)
    }

    pub fn device_state(&self, node_id: u8) -> String {
        format!("{}/devices/{node_id}/state", self.prefix)
    }

    pub fn device_position(&self, node_id: u8) -> String {
        format!("{}/devices/{node_id}/position", self.prefix)
    }

    pub fn device_moving(&self, node_id: u8) -> String {
        format!("{}/devices/{node_id}/moving", self.prefix)
    }

    pub fn scene_state(&self, scene_id: u8) -> String {
        format!("{}/scenes/{scene_id}/state", self.prefix)
    }

    /// Subscription filters covering every inbound command topic
    pub fn command_filters(&self) -> Vec<String> {
        vec![
            format!("{}/devices/+/cmd", self.prefix),
            format!("{}/devices/+/position/set", self.prefix),
            format!("{}/scenes/+/cmd", self.prefix),
            format!("{}/cmd", self.prefix),
        ]
    }

    /// Match an inbound topic against the command patterns. Exact and
    /// anchored: any extra or missing segment fails the match.
    pub fn route(&self, topic: &str) -> Option<Route> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        match segments.as_slice() {
            ["cmd"] => Some(Route::Global),
            ["devices", id, "cmd"] => Some(Route::Device {
                node_id: parse_id(id)?,
            }),
            ["devices", id, "position", "set"] => Some(Route::DevicePosition {
                node_id: parse_id(id)?,
            }),
            ["scenes", id, "cmd"] => Some(Route::Scene {
                scene_id: parse_id(id)?,
            }),
            _ => None,
        }
    }
}

/// Node and scene ids are small decimal integers; anything else (sign,
/// whitespace, hex) fails the route
fn parse_id(segment: &str) -> Option<u8> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Parse a device command payload: `open`/`close`/`stop` or an integer
/// position in 0..=100, case-insensitive and trimmed
pub fn parse_device_command(payload: &str) -> Option<DeviceCommand> {
    let normalized = payload.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "open" => Some(DeviceCommand::Open),
        "close" => Some(DeviceCommand::Close),
        "stop" => Some(DeviceCommand::Stop),
        other => match other.parse::<i64>() {
            Ok(pct) if (0..=100).contains(&pct) => Some(DeviceCommand::Position(pct as u8)),
            _ => None,
        },
    }
}

/// Parse the dedicated position topic payload: integer 0..=100 only
pub fn parse_position_only(payload: &str) -> Option<DeviceCommand> {
    match payload.trim().parse::<i64>() {
        Ok(pct) if (0..=100).contains(&pct) => Some(DeviceCommand::Position(pct as u8)),
        _ => None,
    }
}

/// Parse a scene command payload; only `run` is defined
pub fn parse_scene_command(payload: &str) -> bool {
    payload.trim().eq_ignore_ascii_case("run")
}

/// Parse a global command payload
pub fn parse_global_command(payload: &str) -> Option<GlobalCommand> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "refresh" => Some(GlobalCommand::Refresh),
        "reconnect" => Some(GlobalCommand::Reconnect),
        _ => None,
    }
}
