//! Gateway wire protocol
//!
//! The gateway speaks a binary request/confirm protocol with asynchronous
//! notification frames over TLS. Transfer frames are SLIP-encoded:
//!
//! ```text
//! C0 | ProtocolID=00 | Length | Command(2, BE) | Data... | Checksum | C0
//! ```
//!
//! `Length` counts command, data and itself; the checksum is the XOR of all
//! preceding bytes. This module owns frame encoding/decoding plus the
//! builders and parsers for the command surface the session needs.

use crate::error::{BridgeError, Result};

/// Gateway command identifiers
pub mod command {
    pub const GW_ERROR_NTF: u16 = 0x0000;
    pub const GW_GET_STATE_REQ: u16 = 0x000C;
    pub const GW_GET_STATE_CFM: u16 = 0x000D;
    pub const GW_GET_ALL_NODES_INFORMATION_REQ: u16 = 0x0202;
    pub const GW_GET_ALL_NODES_INFORMATION_CFM: u16 = 0x0203;
    pub const GW_GET_ALL_NODES_INFORMATION_NTF: u16 = 0x0204;
    pub const GW_GET_ALL_NODES_INFORMATION_FINISHED_NTF: u16 = 0x0205;
    pub const GW_NODE_STATE_POSITION_CHANGED_NTF: u16 = 0x0211;
    pub const GW_HOUSE_STATUS_MONITOR_ENABLE_REQ: u16 = 0x0240;
    pub const GW_HOUSE_STATUS_MONITOR_ENABLE_CFM: u16 = 0x0241;
    pub const GW_COMMAND_SEND_REQ: u16 = 0x0300;
    pub const GW_COMMAND_SEND_CFM: u16 = 0x0301;
    pub const GW_COMMAND_RUN_STATUS_NTF: u16 = 0x0302;
    pub const GW_COMMAND_REMAINING_TIME_NTF: u16 = 0x0303;
    pub const GW_SESSION_FINISHED_NTF: u16 = 0x0304;
    pub const GW_GET_SCENE_INFORMATION_REQ: u16 = 0x0400;
    pub const GW_GET_SCENE_INFORMATION_CFM: u16 = 0x0401;
    pub const GW_GET_SCENE_INFORMATION_NTF: u16 = 0x0402;
    pub const GW_GET_SCENE_LIST_REQ: u16 = 0x040C;
    pub const GW_GET_SCENE_LIST_CFM: u16 = 0x040D;
    pub const GW_GET_SCENE_LIST_NTF: u16 = 0x040E;
    pub const GW_ACTIVATE_SCENE_REQ: u16 = 0x0412;
    pub const GW_ACTIVATE_SCENE_CFM: u16 = 0x0413;
    pub const GW_PASSWORD_ENTER_REQ: u16 = 0x3000;
    pub const GW_PASSWORD_ENTER_CFM: u16 = 0x3001;
}

const SLIP_END: u8 = 0xC0;
const SLIP_ESC: u8 = 0xDB;
const SLIP_ESC_END: u8 = 0xDC;
const SLIP_ESC_ESC: u8 = 0xDD;

const PROTOCOL_ID: u8 = 0x00;

/// Node executing state values carried in node frames
pub const NODE_STATE_ONLINE: u8 = 1;
pub const NODE_STATE_EXECUTING: u8 = 4;

/// Run status values carried in run-status notifications
pub const RUN_STATUS_COMPLETED: u8 = 0;
pub const RUN_STATUS_FAILED: u8 = 1;
pub const RUN_STATUS_ACTIVE: u8 = 2;

/// A decoded transfer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(command: u16, data: Vec<u8>) -> Self {
        Self { command, data }
    }

    /// Serialize to the SLIP-encoded byte stream form
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.data.len() + 5);
        raw.push(PROTOCOL_ID);
        raw.push((self.data.len() + 3) as u8);
        raw.extend_from_slice(&self.command.to_be_bytes());
        raw.extend_from_slice(&self.data);
        let checksum = raw.iter().fold(0u8, |acc, b| acc ^ b);
        raw.push(checksum);
        slip_encode(&raw)
    }
}

fn slip_encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    out.push(SLIP_END);
    for &byte in raw {
        match byte {
            SLIP_END => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_END]),
            SLIP_ESC => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
            other => out.push(other),
        }
    }
    out.push(SLIP_END);
    out
}

/// Parse one unescaped transfer frame
pub fn decode_transfer_frame(raw: &[u8]) -> Result<Frame> {
    if raw.len() < 5 {
        return Err(BridgeError::protocol(format!(
            "frame too short: {} bytes",
            raw.len()
        )));
    }
    if raw[0] != PROTOCOL_ID {
        return Err(BridgeError::protocol(format!(
            "unexpected protocol id 0x{:02X}",
            raw[0]
        )));
    }
    let length = raw[1] as usize;
    if length != raw.len() - 2 {
        return Err(BridgeError::protocol(format!(
            "length mismatch: header says {length}, frame has {}",
            raw.len() - 2
        )));
    }
    let expected = raw[..raw.len() - 1].iter().fold(0u8, |acc, b| acc ^ b);
    let actual = raw[raw.len() - 1];
    if expected != actual {
        return Err(BridgeError::protocol(format!(
            "checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}"
        )));
    }
    let command = u16::from_be_bytes([raw[2], raw[3]]);
    Ok(Frame {
        command,
        data: raw[4..raw.len() - 1].to_vec(),
    })
}

/// Incremental SLIP decoder over the raw byte stream.
///
/// Bytes arrive in arbitrary chunks from the socket; the decoder buffers
/// until a delimiter closes a frame. Malformed frames are dropped with a
/// warning, the stream stays usable.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw socket bytes, returning every complete frame they close
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if byte == SLIP_END {
                if self.in_frame && !self.buffer.is_empty() {
                    match decode_transfer_frame(&self.buffer) {
                        Ok(frame) => frames.push(frame),
                        Err(e) => tracing::warn!("dropping malformed gateway frame: {e}"),
                    }
                }
                self.buffer.clear();
                self.escaped = false;
                self.in_frame = true;
                continue;
            }
            if !self.in_frame {
                continue;
            }
            if self.escaped {
                self.escaped = false;
                match byte {
                    SLIP_ESC_END => self.buffer.push(SLIP_END),
                    SLIP_ESC_ESC => self.buffer.push(SLIP_ESC),
                    other => {
                        tracing::warn!("invalid SLIP escape 0x{other:02X}, dropping frame");
                        self.buffer.clear();
                        self.in_frame = false;
                    }
                }
            } else if byte == SLIP_ESC {
                self.escaped = true;
            } else {
                self.buffer.push(byte);
            }
        }
        frames
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Decode a 64-byte zero-padded UTF-8 name field
fn decode_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn ensure_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() < expected {
        return Err(BridgeError::protocol(format!(
            "{what}: need {expected} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Build the login request; the password field is 32 bytes, zero padded
pub fn password_enter_req(password: &str) -> Result<Frame> {
    let bytes = password.as_bytes();
    if bytes.len() > 32 {
        return Err(BridgeError::authentication(
            "gateway password exceeds 32 bytes",
        ));
    }
    let mut data = vec![0u8; 32];
    data[..bytes.len()].copy_from_slice(bytes);
    Ok(Frame::new(command::GW_PASSWORD_ENTER_REQ, data))
}

/// Build the lightweight state query used as a keepalive probe
pub fn get_state_req() -> Frame {
    Frame::new(command::GW_GET_STATE_REQ, Vec::new())
}

/// Build the house-status event subscription request
pub fn house_status_monitor_enable_req() -> Frame {
    Frame::new(command::GW_HOUSE_STATUS_MONITOR_ENABLE_REQ, Vec::new())
}

/// Build the full actuator-list request
pub fn get_all_nodes_information_req() -> Frame {
    Frame::new(command::GW_GET_ALL_NODES_INFORMATION_REQ, Vec::new())
}

/// Build the scene-list request
pub fn get_scene_list_req() -> Frame {
    Frame::new(command::GW_GET_SCENE_LIST_REQ, Vec::new())
}

const COMMAND_ORIGINATOR_USER: u8 = 1;
const PRIORITY_LEVEL_USER: u8 = 3;
const PARAMETER_MAIN: u8 = 0;

/// Build a command-send request driving one node's main parameter.
///
/// `main_parameter` is the target wire position, or [`crate::codec::WIRE_STOP`]
/// to hold the current position.
pub fn command_send_req(session_id: u16, node_id: u8, main_parameter: u16) -> Frame {
    let mut data = Vec::with_capacity(66);
    data.extend_from_slice(&session_id.to_be_bytes());
    data.push(COMMAND_ORIGINATOR_USER);
    data.push(PRIORITY_LEVEL_USER);
    data.push(PARAMETER_MAIN); // active parameter
    data.push(0); // FPI1
    data.push(0); // FPI2
    data.extend_from_slice(&main_parameter.to_be_bytes());
    data.extend_from_slice(&[0u8; 32]); // functional parameters FP1..FP16
    data.push(1); // index array count
    let mut index_array = [0u8; 20];
    index_array[0] = node_id;
    data.extend_from_slice(&index_array);
    data.push(0); // priority level lock
    data.push(0); // PL 0..3
    data.push(0); // PL 4..7
    data.push(0); // lock time
    Frame::new(command::GW_COMMAND_SEND_REQ, data)
}

const SCENE_VELOCITY_DEFAULT: u8 = 0;

/// Build a scene activation request
pub fn activate_scene_req(session_id: u16, scene_id: u8) -> Frame {
    let mut data = Vec::with_capacity(6);
    data.extend_from_slice(&session_id.to_be_bytes());
    data.push(COMMAND_ORIGINATOR_USER);
    data.push(PRIORITY_LEVEL_USER);
    data.push(scene_id);
    data.push(SCENE_VELOCITY_DEFAULT);
    Frame::new(command::GW_ACTIVATE_SCENE_REQ, data)
}

// ---------------------------------------------------------------------------
// Confirm / notification parsers
// ---------------------------------------------------------------------------

/// Parse the login confirm; `true` means the password was accepted
pub fn parse_password_enter_cfm(data: &[u8]) -> Result<bool> {
    ensure_len(data, 1, "password enter confirm")?;
    Ok(data[0] == 0)
}

/// Gateway state snapshot from the keepalive confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayState {
    pub state: u8,
    pub sub_state: u8,
}

pub fn parse_get_state_cfm(data: &[u8]) -> Result<GatewayState> {
    ensure_len(data, 2, "get state confirm")?;
    Ok(GatewayState {
        state: data[0],
        sub_state: data[1],
    })
}

/// Parse the actuator-list confirm, returning the announced node count.
/// A gateway with an empty system table reports status 1; that is an empty
/// list, not an error.
pub fn parse_all_nodes_information_cfm(data: &[u8]) -> Result<u8> {
    ensure_len(data, 2, "nodes information confirm")?;
    match data[0] {
        0 => Ok(data[1]),
        1 => Ok(0),
        other => Err(BridgeError::protocol(format!(
            "nodes information confirm: unexpected status {other}"
        ))),
    }
}

/// One actuator record from the discovery notification stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInformation {
    pub node_id: u8,
    pub name: String,
    pub actuator_type: u16,
    pub serial_number: String,
    pub state: u8,
    pub current_position: u16,
    pub target_position: u16,
    pub remaining_time: u16,
}

/// Fixed layout of the node information notification payload
const NODE_INFO_LEN: usize = 124;

pub fn parse_node_information_ntf(data: &[u8]) -> Result<NodeInformation> {
    ensure_len(data, NODE_INFO_LEN, "node information")?;
    let node_id = data[0];
    // order (2) and placement (1) are not carried into the device model
    let name = decode_name(&data[4..68]);
    // velocity at 68; node type/subtype packs the actuator type in the
    // upper ten bits
    let node_type = read_u16(data, 69);
    let actuator_type = node_type >> 6;
    // product group (71), product type (72), variation (73), power mode (74),
    // build number (75)
    let serial_number = format_serial(&data[76..84]);
    let state = data[84];
    let current_position = read_u16(data, 85);
    let target_position = read_u16(data, 87);
    // functional parameter positions 89..97
    let remaining_time = read_u16(data, 97);
    Ok(NodeInformation {
        node_id,
        name,
        actuator_type,
        serial_number,
        state,
        current_position,
        target_position,
        remaining_time,
    })
}

/// Format an 8-byte serial as uppercase hex pairs separated by colons
fn format_serial(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Spontaneous node state change pushed by the house status monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStateChange {
    pub node_id: u8,
    pub state: u8,
    pub current_position: u16,
    pub target_position: u16,
    pub remaining_time: u16,
}

pub fn parse_node_state_position_changed_ntf(data: &[u8]) -> Result<NodeStateChange> {
    ensure_len(data, 20, "node state change")?;
    Ok(NodeStateChange {
        node_id: data[0],
        state: data[1],
        current_position: read_u16(data, 2),
        target_position: read_u16(data, 4),
        remaining_time: read_u16(data, 14),
    })
}

/// Per-session command progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRunStatus {
    pub session_id: u16,
    pub node_parameter: u8,
    pub parameter_value: u16,
    pub run_status: u8,
    pub status_reply: u8,
}

pub fn parse_command_run_status_ntf(data: &[u8]) -> Result<CommandRunStatus> {
    ensure_len(data, 13, "command run status")?;
    Ok(CommandRunStatus {
        session_id: read_u16(data, 0),
        // status id (2) and node index (3) are not needed
        node_parameter: data[4],
        parameter_value: read_u16(data, 5),
        run_status: data[7],
        status_reply: data[8],
    })
}

/// Parse the command-send confirm into `(session_id, accepted)`
pub fn parse_command_send_cfm(data: &[u8]) -> Result<(u16, bool)> {
    ensure_len(data, 3, "command send confirm")?;
    Ok((read_u16(data, 0), data[2] == 1))
}

/// Parse the scene activation confirm into `(session_id, accepted)`
pub fn parse_activate_scene_cfm(data: &[u8]) -> Result<(u16, bool)> {
    ensure_len(data, 3, "activate scene confirm")?;
    Ok((read_u16(data, 1), data[0] == 0))
}

pub fn parse_session_finished_ntf(data: &[u8]) -> Result<u16> {
    ensure_len(data, 2, "session finished")?;
    Ok(read_u16(data, 0))
}

/// Parse the scene-list confirm, returning the announced scene count
pub fn parse_scene_list_cfm(data: &[u8]) -> Result<u8> {
    ensure_len(data, 1, "scene list confirm")?;
    Ok(data[0])
}

/// One batch of scene records plus the count of records still to come
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneListBatch {
    pub scenes: Vec<(u8, String)>,
    pub remaining: u8,
}

pub fn parse_scene_list_ntf(data: &[u8]) -> Result<SceneListBatch> {
    ensure_len(data, 1, "scene list")?;
    let count = data[0] as usize;
    ensure_len(data, 1 + count * 65 + 1, "scene list records")?;
    let mut scenes = Vec::with_capacity(count);
    for i in 0..count {
        let offset = 1 + i * 65;
        let scene_id = data[offset];
        let name = decode_name(&data[offset + 1..offset + 65]);
        scenes.push((scene_id, name));
    }
    let remaining = data[1 + count * 65];
    Ok(SceneListBatch { scenes, remaining })
}

/// Build a request for one scene's detail record
pub fn get_scene_information_req(scene_id: u8) -> Frame {
    Frame::new(command::GW_GET_SCENE_INFORMATION_REQ, vec![scene_id])
}

/// Parse the scene-information confirm; `true` means the scene exists
pub fn parse_scene_information_cfm(data: &[u8]) -> Result<bool> {
    ensure_len(data, 2, "scene information confirm")?;
    Ok(data[0] == 0)
}

/// One batch of a scene's actuator records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneInformationBatch {
    pub scene_id: u8,
    pub name: String,
    pub node_count: u8,
    pub remaining: u8,
}

pub fn parse_scene_information_ntf(data: &[u8]) -> Result<SceneInformationBatch> {
    ensure_len(data, 66, "scene information")?;
    let scene_id = data[0];
    let name = decode_name(&data[1..65]);
    let node_count = data[65];
    // three bytes per actuator record (node id, parameter id, position)
    let remaining_offset = 66 + node_count as usize * 3;
    ensure_len(data, remaining_offset + 1, "scene information records")?;
    Ok(SceneInformationBatch {
        scene_id,
        name,
        node_count,
        remaining: data[remaining_offset],
    })
}

pub fn parse_error_ntf(data: &[u8]) -> Result<u8> {
    ensure_len(data, 1, "error notification")?;
    Ok(data[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_and_strip(frame: &Frame) -> Vec<u8> {
        let encoded = frame.encode();
        assert_eq!(encoded.first(), Some(&SLIP_END));
        assert_eq!(encoded.last(), Some(&SLIP_END));
        encoded
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = Frame::new(command::GW_GET_STATE_REQ, vec![]);
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encode_and_strip(&frame));
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_frame_round_trip_with_escape_bytes() {
        // 0xC0 and 0xDB in the payload must survive SLIP escaping
        let frame = Frame::new(0x0300, vec![0xC0, 0xDB, 0x00, 0xC0]);
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&frame.encode());
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let frame = Frame::new(command::GW_GET_STATE_CFM, vec![2, 0, 0, 0, 0, 0]);
        let encoded = frame.encode();
        let mut decoder = FrameDecoder::new();
        let (head, tail) = encoded.split_at(3);
        assert!(decoder.feed(head).is_empty());
        assert_eq!(decoder.feed(tail), vec![frame]);
    }

    #[test]
    fn test_decoder_handles_back_to_back_frames() {
        let a = Frame::new(command::GW_GET_STATE_REQ, vec![]);
        let b = Frame::new(command::GW_SESSION_FINISHED_NTF, vec![0x01, 0x02]);
        let mut bytes = a.encode();
        bytes.extend_from_slice(&b.encode());
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&bytes), vec![a, b]);
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let frame = Frame::new(command::GW_GET_STATE_REQ, vec![]);
        let mut encoded = frame.encode();
        let len = encoded.len();
        encoded[len - 2] ^= 0xFF; // flip the checksum byte
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&encoded).is_empty());
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(decode_transfer_frame(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_protocol_id() {
        assert!(decode_transfer_frame(&[0x01, 0x03, 0x00, 0x0C, 0x0E]).is_err());
    }

    #[test]
    fn test_password_frame_layout() {
        let frame = password_enter_req("velux123").unwrap();
        assert_eq!(frame.command, command::GW_PASSWORD_ENTER_REQ);
        assert_eq!(frame.data.len(), 32);
        assert_eq!(&frame.data[..8], b"velux123");
        assert!(frame.data[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_password_too_long_rejected() {
        let long = "x".repeat(33);
        assert!(password_enter_req(&long).is_err());
    }

    #[test]
    fn test_command_send_layout() {
        let frame = command_send_req(0x1234, 7, 0x6400);
        assert_eq!(frame.command, command::GW_COMMAND_SEND_REQ);
        assert_eq!(frame.data.len(), 66);
        assert_eq!(&frame.data[0..2], &[0x12, 0x34]); // session id
        assert_eq!(frame.data[2], 1); // originator: user
        assert_eq!(frame.data[3], 3); // user priority
        assert_eq!(&frame.data[7..9], &[0x64, 0x00]); // main parameter
        assert_eq!(frame.data[41], 1); // index array count
        assert_eq!(frame.data[42], 7); // node id
    }

    #[test]
    fn test_activate_scene_layout() {
        let frame = activate_scene_req(0x0001, 3);
        assert_eq!(frame.command, command::GW_ACTIVATE_SCENE_REQ);
        assert_eq!(frame.data, vec![0x00, 0x01, 1, 3, 3, 0]);
    }

    fn sample_node_info(node_id: u8, name: &str, actuator_type: u16, state: u8) -> Vec<u8> {
        let mut data = vec![0u8; NODE_INFO_LEN];
        data[0] = node_id;
        data[4..4 + name.len()].copy_from_slice(name.as_bytes());
        let node_type = actuator_type << 6;
        data[69..71].copy_from_slice(&node_type.to_be_bytes());
        data[76..84].copy_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
        data[84] = state;
        data[85..87].copy_from_slice(&0x6400u16.to_be_bytes()); // current: half closed
        data[87..89].copy_from_slice(&0x6400u16.to_be_bytes());
        data
    }

    #[test]
    fn test_parse_node_information() {
        let data = sample_node_info(0, "Kitchen", 4, 1);
        let info = parse_node_information_ntf(&data).unwrap();
        assert_eq!(info.node_id, 0);
        assert_eq!(info.name, "Kitchen");
        assert_eq!(info.actuator_type, 4);
        assert_eq!(info.serial_number, "12:34:56:78:9A:BC:DE:F0");
        assert_eq!(info.state, 1);
        assert_eq!(info.current_position, 0x6400);
    }

    #[test]
    fn test_parse_node_state_change() {
        let mut data = vec![0u8; 20];
        data[0] = 5; // node
        data[1] = NODE_STATE_EXECUTING;
        data[2..4].copy_from_slice(&0x3200u16.to_be_bytes());
        data[4..6].copy_from_slice(&0x0000u16.to_be_bytes());
        let change = parse_node_state_position_changed_ntf(&data).unwrap();
        assert_eq!(change.node_id, 5);
        assert_eq!(change.state, NODE_STATE_EXECUTING);
        assert_eq!(change.current_position, 0x3200);
        assert_eq!(change.target_position, 0x0000);
    }

    #[test]
    fn test_parse_command_run_status() {
        let data = vec![0x00, 0x07, 1, 0, 0, 0xC8, 0x00, RUN_STATUS_ACTIVE, 0x04, 0, 0, 0, 0];
        let status = parse_command_run_status_ntf(&data).unwrap();
        assert_eq!(status.session_id, 7);
        assert_eq!(status.parameter_value, 0xC800);
        assert_eq!(status.run_status, RUN_STATUS_ACTIVE);
        assert_eq!(status.status_reply, 0x04);
    }

    #[test]
    fn test_parse_scene_list() {
        let mut data = vec![2u8];
        for (id, name) in [(0u8, "Morning"), (4u8, "Night")] {
            data.push(id);
            let mut field = vec![0u8; 64];
            field[..name.len()].copy_from_slice(name.as_bytes());
            data.extend_from_slice(&field);
        }
        data.push(0); // none remaining
        let batch = parse_scene_list_ntf(&data).unwrap();
        assert_eq!(batch.remaining, 0);
        assert_eq!(
            batch.scenes,
            vec![(0, "Morning".to_string()), (4, "Night".to_string())]
        );
    }

    #[test]
    fn test_parse_command_send_cfm() {
        assert_eq!(
            parse_command_send_cfm(&[0x00, 0x09, 1]).unwrap(),
            (9, true)
        );
        assert_eq!(
            parse_command_send_cfm(&[0x00, 0x09, 0]).unwrap(),
            (9, false)
        );
    }

    #[test]
    fn test_parse_scene_information() {
        let mut data = vec![3u8]; // scene id
        let mut name = vec![0u8; 64];
        name[..7].copy_from_slice(b"Morning");
        data.extend_from_slice(&name);
        data.push(2); // two actuator records, three bytes each
        data.extend_from_slice(&[0, 0, 0x64, 4, 0, 0xC8]);
        data.push(0); // none remaining
        let batch = parse_scene_information_ntf(&data).unwrap();
        assert_eq!(batch.scene_id, 3);
        assert_eq!(batch.name, "Morning");
        assert_eq!(batch.node_count, 2);
        assert_eq!(batch.remaining, 0);
    }

    #[test]
    fn test_empty_system_table_is_empty_list() {
        assert_eq!(parse_all_nodes_information_cfm(&[1, 0]).unwrap(), 0);
        assert_eq!(parse_all_nodes_information_cfm(&[0, 12]).unwrap(), 12);
    }
}
