//! Position codec, actuator type map and status texts
//!
//! Pure conversion functions between the gateway's position scales and the
//! public 0..100 scale, plus the fixed actuator-type and status-reply tables.
//!
//! The gateway reports positions on two scales: a raw fraction in [0, 1]
//! where 0.0 is fully open and 1.0 is fully closed, carried on the wire as a
//! u16 where 0x0000 is open and 0xC800 is closed. The public scale inverts
//! this: 0 is closed, 100 is open.

use serde::{Deserialize, Serialize};

/// Wire value for a fully closed actuator
pub const WIRE_CLOSED: u16 = 0xC800;

/// Main-parameter value instructing the gateway to hold the current position
pub const WIRE_STOP: u16 = 0xD200;

/// Convert a raw gateway position (0.0 open .. 1.0 closed) to the public
/// 0..100 scale (0 closed .. 100 open). Out-of-range input clamps.
pub fn to_public(raw: f64) -> u8 {
    let pct = ((1.0 - raw) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Convert a public position to the raw gateway fraction
pub fn to_raw(pct: u8) -> f64 {
    1.0 - f64::from(pct.min(100)) / 100.0
}

/// Decode a wire-encoded position into the raw fraction
pub fn raw_from_wire(value: u16) -> f64 {
    f64::from(value) / f64::from(WIRE_CLOSED)
}

/// Encode a raw fraction as a wire position
pub fn raw_to_wire(raw: f64) -> u16 {
    (raw.clamp(0.0, 1.0) * f64::from(WIRE_CLOSED)).round() as u16
}

/// Decode a wire-encoded position straight to the public scale
pub fn position_from_wire(value: u16) -> u8 {
    to_public(raw_from_wire(value))
}

/// Encode a public position as a wire position
pub fn position_to_wire(pct: u8) -> u16 {
    raw_to_wire(to_raw(pct))
}

/// Public device type exposed on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Window,
    Blind,
    Shutter,
    Awning,
    Garage,
    Gate,
    Lock,
    Unknown,
}

/// Map a gateway actuator-type code to the public device type.
///
/// The table covers the documented actuator enumeration of the gateway; any
/// code outside it maps to [`DeviceType::Unknown`].
pub fn classify(code: u16) -> DeviceType {
    match code {
        1 => DeviceType::Blind,    // interior venetian blind
        2 => DeviceType::Shutter,  // roller shutter
        3 => DeviceType::Awning,   // vertical exterior awning
        4 => DeviceType::Window,   // window opener
        5 => DeviceType::Garage,   // garage door opener
        7 => DeviceType::Gate,     // gate opener
        8 => DeviceType::Garage,   // rolling door opener
        9 => DeviceType::Lock,     // door lock
        10 => DeviceType::Blind,   // vertical interior blind
        13 => DeviceType::Shutter, // dual roller shutter
        16 => DeviceType::Awning,  // horizontal awning
        17 => DeviceType::Blind,   // exterior venetian blind
        18 => DeviceType::Blind,   // louvre blind
        19 => DeviceType::Blind,   // curtain track
        24 => DeviceType::Shutter, // swinging shutter
        _ => DeviceType::Unknown,
    }
}

/// Human-readable status derived from a gateway status-reply code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub is_error: bool,
    pub message: String,
}

impl StatusInfo {
    fn error(message: &str) -> Self {
        Self {
            is_error: true,
            message: message.to_string(),
        }
    }

    fn info(message: &str) -> Self {
        Self {
            is_error: false,
            message: message.to_string(),
        }
    }
}

/// Translate a status-reply code to text.
///
/// Codes `0x00` (unknown) and `0x01` (OK) carry no information and return
/// `None`. Unknown codes are reported as informational.
pub fn status_text(code: u8) -> Option<StatusInfo> {
    match code {
        0x00 | 0x01 => None,
        0x02 => Some(StatusInfo::error("No contact with the actuator")),
        0x03 => Some(StatusInfo::info("Manually operated")),
        0x04 => Some(StatusInfo::error("Blocked")),
        0x05 => Some(StatusInfo::error("Wrong system key")),
        0x06 => Some(StatusInfo::error("Priority level locked")),
        0x07 => Some(StatusInfo::error("Stopped in wrong position")),
        0x08 => Some(StatusInfo::error("Error during execution")),
        0x09 => Some(StatusInfo::info("No movement executed")),
        0x0A => Some(StatusInfo::info("Calibrating")),
        0x0B => Some(StatusInfo::error("Power consumption too high")),
        0x0C => Some(StatusInfo::error("Power consumption too low")),
        0x0D => Some(StatusInfo::error("Lock position open")),
        0x0E => Some(StatusInfo::error("Motion time too long")),
        0x0F => Some(StatusInfo::error("Thermal protection active")),
        0x10 => Some(StatusInfo::error("Product not operational")),
        0x11 => Some(StatusInfo::error("Filter maintenance needed")),
        0x12 => Some(StatusInfo::error("Battery level low")),
        0x13 => Some(StatusInfo::info("Target position modified")),
        0x14 => Some(StatusInfo::error("Mode not implemented")),
        0x15 => Some(StatusInfo::error("Command incompatible with movement")),
        0x16 => Some(StatusInfo::info("Interrupted by user action")),
        0x17 => Some(StatusInfo::error("Dead bolt error")),
        0x18 => Some(StatusInfo::info("Automatic cycle engaged")),
        0x19 => Some(StatusInfo::error("Wrong load connected")),
        0x1B => Some(StatusInfo::error("Target position not reached")),
        0x1D => Some(StatusInfo::info("Command overruled")),
        0x1E => Some(StatusInfo::info("Node waiting for power")),
        other => Some(StatusInfo::info(&format!("Unknown status ({other})"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_round_trip_all_positions() {
        for pct in 0..=100u8 {
            assert_eq!(to_public(to_raw(pct)), pct, "round trip failed for {pct}");
        }
    }

    #[test]
    fn test_wire_round_trip_all_positions() {
        for pct in 0..=100u8 {
            assert_eq!(position_from_wire(position_to_wire(pct)), pct);
        }
    }

    #[rstest]
    #[case(0.0, 100)]
    #[case(0.5, 50)]
    #[case(1.0, 0)]
    #[case(-0.3, 100)]
    #[case(1.4, 0)]
    fn test_to_public_clamps(#[case] raw: f64, #[case] expected: u8) {
        assert_eq!(to_public(raw), expected);
    }

    #[test]
    fn test_unknown_wire_position_clamps() {
        // 0xF7FF is the gateway's "position unknown" marker
        assert_eq!(position_from_wire(0xF7FF), 0);
    }

    #[rstest]
    #[case(1, DeviceType::Blind)]
    #[case(2, DeviceType::Shutter)]
    #[case(3, DeviceType::Awning)]
    #[case(4, DeviceType::Window)]
    #[case(5, DeviceType::Garage)]
    #[case(7, DeviceType::Gate)]
    #[case(9, DeviceType::Lock)]
    #[case(17, DeviceType::Blind)]
    #[case(24, DeviceType::Shutter)]
    #[case(0, DeviceType::Unknown)]
    #[case(63, DeviceType::Unknown)]
    fn test_classify(#[case] code: u16, #[case] expected: DeviceType) {
        assert_eq!(classify(code), expected);
    }

    #[test]
    fn test_status_text_silent_codes() {
        assert_eq!(status_text(0x00), None);
        assert_eq!(status_text(0x01), None);
    }

    #[test]
    fn test_status_text_error_flags() {
        let blocked = status_text(0x04).unwrap();
        assert!(blocked.is_error);
        assert_eq!(blocked.message, "Blocked");

        let manual = status_text(0x03).unwrap();
        assert!(!manual.is_error);
    }

    #[test]
    fn test_status_text_unknown_code() {
        let status = status_text(0xEE).unwrap();
        assert!(!status.is_error);
        assert_eq!(status.message, "Unknown status (238)");
    }

    #[test]
    fn test_device_type_serialization() {
        assert_eq!(
            serde_json::to_string(&DeviceType::Window).unwrap(),
            "\"window\""
        );
        assert_eq!(
            serde_json::to_string(&DeviceType::Unknown).unwrap(),
            "\"unknown\""
        );
    }
}
