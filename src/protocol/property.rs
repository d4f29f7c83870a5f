//! Property request/response bodies
//!
//! Control transactions carry a small nested body after the transaction id.
//! Requests come in two shapes:
//!
//! ```text
//! get:         | 0x18 | 0x00 |
//! set numeric: | 0x1A | varint(inner_len) | 0x08 | varint(value) |
//! ```
//!
//! Responses are wrapped in an outer field:
//!
//! ```text
//! | 0x22 | varint(len) | inner… |
//! ```
//!
//! with three inner shapes: empty (acknowledgement, possibly carrying a
//! `0x08 varint(status)` reject code), numeric (`0x10 varint(value)`) and
//! string (`0x12 varint(len) utf8…`). Anything after the expected shape is a
//! protocol error — the device never pads these bodies.

use crate::error::{Error, Result};
use crate::protocol::varint::{self, Cursor};

const TAG_GET: u8 = 0x18;
const TAG_SET: u8 = 0x1A;
const TAG_STATUS: u8 = 0x08;
const TAG_NUMERIC: u8 = 0x10;
const TAG_STRING: u8 = 0x12;
const TAG_RESPONSE: u8 = 0x22;

/// Build a get-property request body
pub fn encode_get_request() -> Vec<u8> {
    vec![TAG_GET, 0x00]
}

/// Build a set-property request body with a numeric value.
///
/// Negative values are not representable on the wire and are rejected before
/// anything is encoded.
pub fn encode_set_numeric_request(value: i64) -> Result<Vec<u8>> {
    if value < 0 {
        return Err(Error::InvalidArgument(format!(
            "property value must be non-negative (got {})",
            value
        )));
    }
    let encoded = varint::encode(value as u64);
    let inner_len = 1 + encoded.len();
    let mut body = Vec::with_capacity(2 + inner_len);
    body.push(TAG_SET);
    body.extend_from_slice(&varint::encode(inner_len as u64));
    body.push(TAG_STATUS);
    body.extend_from_slice(&encoded);
    Ok(body)
}

/// Unwrap the `0x22` response envelope, returning the inner bytes
fn unwrap_response(body: &[u8]) -> Result<&[u8]> {
    let mut cursor = Cursor::new(body);
    let tag = cursor.read_u8()?;
    if tag != TAG_RESPONSE {
        return Err(Error::Protocol(format!(
            "expected response tag 0x{:02X}, got 0x{:02X}",
            TAG_RESPONSE, tag
        )));
    }
    let len = cursor.decode32()? as usize;
    let inner = cursor.read_bytes(len)?;
    if !cursor.at_end() {
        return Err(Error::Protocol(format!(
            "{} trailing bytes after response",
            cursor.remaining()
        )));
    }
    Ok(inner)
}

/// Parse an acknowledgement response.
///
/// An empty inner body is success. A `0x08 varint(status)` inner body with a
/// non-zero status is a device-side reject and surfaces as
/// [`Error::CommandRejected`]; status zero is also success. Any other
/// non-empty shape is a protocol error.
pub fn parse_empty_response(body: &[u8]) -> Result<()> {
    let inner = unwrap_response(body)?;
    if inner.is_empty() {
        return Ok(());
    }
    let mut cursor = Cursor::new(inner);
    let tag = cursor.read_u8()?;
    if tag != TAG_STATUS {
        return Err(Error::Protocol(format!(
            "unexpected tag 0x{:02X} in acknowledgement",
            tag
        )));
    }
    let status = cursor.decode32()?;
    if !cursor.at_end() {
        return Err(Error::Protocol(
            "trailing bytes after status".to_string(),
        ));
    }
    if status != 0 {
        return Err(Error::CommandRejected { status });
    }
    Ok(())
}

/// Parse a numeric response
pub fn parse_numeric_response(body: &[u8]) -> Result<i32> {
    let inner = unwrap_response(body)?;
    let mut cursor = Cursor::new(inner);
    let tag = cursor.read_u8()?;
    if tag != TAG_NUMERIC {
        return Err(Error::Protocol(format!(
            "expected numeric tag 0x{:02X}, got 0x{:02X}",
            TAG_NUMERIC, tag
        )));
    }
    let value = cursor.decode32()?;
    if !cursor.at_end() {
        return Err(Error::Protocol(
            "trailing bytes after numeric value".to_string(),
        ));
    }
    Ok(value)
}

/// Parse a string response
pub fn parse_string_response(body: &[u8]) -> Result<String> {
    let inner = unwrap_response(body)?;
    let mut cursor = Cursor::new(inner);
    let tag = cursor.read_u8()?;
    if tag != TAG_STRING {
        return Err(Error::Protocol(format!(
            "expected string tag 0x{:02X}, got 0x{:02X}",
            TAG_STRING, tag
        )));
    }
    let len = cursor.decode32()? as usize;
    let bytes = cursor.read_bytes(len)?;
    if !cursor.at_end() {
        return Err(Error::Protocol(
            "trailing bytes after string value".to_string(),
        ));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Protocol(format!("string value is not UTF-8: {}", e)))
}
