//! Control channel framing
//!
//! Every control message, in either direction, is framed as:
//!
//! ```text
//! | magic (u16 BE) | length (u32 BE) | wire_tx_id (i32 BE) | property body… |
//! ```
//!
//! `length` counts the transaction id plus the property body. Outbound
//! transaction ids carry their high bit set on the wire (so they read as
//! negative i32 values); the pending table stores the id with the bit
//! stripped. Unsolicited frames (key-state changes) reuse the same outer
//! framing but carry no transaction id.

use crate::error::{Error, Result};

/// Command magics
pub mod magic {
    pub const SET_SCENE: u16 = 0x2829;
    pub const SET_DISPLAY_INPUT: u16 = 0x2822;
    pub const SET_BRIGHTNESS: u16 = 0x271C;
    pub const SET_DIMMER: u16 = 0x2727;
    pub const GET_CONFIG: u16 = 0x271F;
    pub const GET_SOFTWARE_VERSION: u16 = 0x271D;
    pub const GET_DSP_VERSION: u16 = 0x272D;
    pub const GET_ID: u16 = 0x2729;
    pub const KEY_STATE_CHANGE: u16 = 0x272E;
}

/// Frame header size on the wire
pub const FRAME_HEADER_LEN: usize = 6;
/// Transaction id size inside the frame body
pub const TX_ID_LEN: usize = 4;

/// Outbound high-bit marker
const OUTBOUND_BIT: u32 = 0x8000_0000;

/// Mark a transaction id for the wire (sets the high bit)
#[inline]
pub fn mark_outbound(tx_id: u32) -> i32 {
    (tx_id | OUTBOUND_BIT) as i32
}

/// Strip the direction bit from a wire transaction id
#[inline]
pub fn normalize_tx_id(wire: i32) -> u32 {
    (wire as u32) & !OUTBOUND_BIT
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u16,
    /// Body length (transaction id + property body)
    pub length: u32,
}

impl FrameHeader {
    /// Decode the 6-byte header.
    ///
    /// The length field is signed on the wire; a negative value is a framing
    /// violation.
    pub fn decode(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self> {
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        let length = i32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        if length < 0 {
            return Err(Error::Protocol(format!(
                "negative control frame length {}",
                length
            )));
        }
        Ok(FrameHeader {
            magic,
            length: length as u32,
        })
    }
}

/// Encode a complete outbound frame: header, marked tx id, property body
pub fn encode_frame(magic: u16, tx_id: u32, body: &[u8]) -> Vec<u8> {
    let length = (TX_ID_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + TX_ID_LEN + body.len());
    out.extend_from_slice(&magic.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&mark_outbound(tx_id).to_be_bytes());
    out.extend_from_slice(body);
    out
}
