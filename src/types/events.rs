//! Control-channel events
//!
//! The glasses push unsolicited frames on the control socket. Key-state
//! changes are the documented ones; anything else (or a key frame that fails
//! to decode) is surfaced raw so callers can inspect it.

use crate::error::{Error, Result};

/// Physical control that produced a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Single press spanning the front top+bottom buttons
    FrontTopBottomSingle,
    /// Front rocker pressed as a button
    FrontRockerButton,
    /// Front rocker held
    FrontRockerHold,
    /// Single press of the top button
    TopSingle,
}

impl KeyType {
    fn from_wire(v: u32) -> Result<Self> {
        match v {
            1 => Ok(KeyType::FrontTopBottomSingle),
            2 => Ok(KeyType::FrontRockerButton),
            3 => Ok(KeyType::FrontRockerHold),
            4 => Ok(KeyType::TopSingle),
            other => Err(Error::Protocol(format!("unknown key type {}", other))),
        }
    }
}

/// Key transition direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
}

impl KeyState {
    fn from_wire(v: u32) -> Result<Self> {
        match v {
            1 => Ok(KeyState::Down),
            2 => Ok(KeyState::Up),
            other => Err(Error::Protocol(format!("unknown key state {}", other))),
        }
    }
}

/// Decoded key-state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyType,
    pub state: KeyState,
    /// Device timestamp of the press, nanoseconds
    pub device_time_ns: u64,
}

/// Expected key-state payload length
const KEY_EVENT_PAYLOAD_LEN: usize = 64;

impl KeyEvent {
    /// Decode a key-state payload.
    ///
    /// The payload is exactly 64 bytes; three little-endian u32 values at
    /// offsets 0, 4 and 8 carry key type, key state and device time. Any
    /// other length, or an unknown enum value, is a protocol error.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != KEY_EVENT_PAYLOAD_LEN {
            return Err(Error::Protocol(format!(
                "key event payload must be {} bytes (got {})",
                KEY_EVENT_PAYLOAD_LEN,
                payload.len()
            )));
        }
        let read_u32 =
            |o: usize| u32::from_le_bytes([payload[o], payload[o + 1], payload[o + 2], payload[o + 3]]);
        let key = KeyType::from_wire(read_u32(0))?;
        let state = KeyState::from_wire(read_u32(4))?;
        let device_time_ns = read_u32(8) as u64;
        Ok(KeyEvent {
            key,
            state,
            device_time_ns,
        })
    }
}

/// Unsolicited inbound traffic on the control socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Decoded key-state change
    Key(KeyEvent),
    /// An inbound frame that matched no pending transaction (or a key frame
    /// that failed to decode); payload is the raw body
    Unknown { magic: u16, payload: Vec<u8> },
}
