//! Error types for xreal-io
//!
//! # Error Recovery Strategies
//!
//! Different error kinds call for different handling:
//!
//! ## Caller Errors (Fix the Call)
//!
//! - **`InvalidArgument`**: A setter was given an out-of-range value (negative
//!   numeric property, brightness outside 0..9, non-positive timeout). Nothing
//!   was sent to the device.
//!
//! ## Connection Errors (Reconnect)
//!
//! - **`NetworkUnavailable`**: No usable interface candidate for the target
//!   host. Check the link-local network before retrying.
//! - **`ConnectionFailed`**: The TCP connect itself failed. The glasses may be
//!   asleep or the cable unplugged.
//! - **`ConnectionClosed`**: The remote closed the socket, or the session was
//!   closed locally. All pending control requests fail with this kind. A fresh
//!   `start()` opens new sessions.
//!
//! ## Request Errors (Per-Call)
//!
//! - **`Timeout`**: A control request (or startup) exceeded its budget. The
//!   session stays usable; the transaction is deregistered.
//! - **`CommandRejected`**: The device acknowledged the request with a
//!   non-zero status code. The code is carried verbatim.
//!
//! ## Wire Errors (Log and Inspect)
//!
//! - **`Protocol`**: Framing violation, varint overflow, unexpected tag or
//!   length, unknown key enum. On the report stream these are counted in
//!   diagnostics and never terminate the session; on the control channel they
//!   fail the affected request.
//! - **`Io`**: Unclassified transport failure.
//!
//! ## Configuration Errors (Fix Upstream)
//!
//! - **`Parse`**: The device configuration payload is not valid JSON.
//! - **`SchemaValidation`**: The payload is JSON but violates the schema; the
//!   error carries the `$.`-anchored path of the offending field.

use thiserror::Error;

/// Errors that can occur in xreal-io
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No usable network interface: {0}")]
    NetworkUnavailable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Command rejected by device: status 0x{status:04X}")]
    CommandRejected { status: i32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction collision: id {id} magic 0x{magic:04X}")]
    TransactionCollision { id: u32, magic: u16 },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Schema validation failed at {path}: {detail}")]
    SchemaValidation { path: String, detail: String },
}

impl Error {
    /// Stable short code for surfacing error kinds through state snapshots.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NetworkUnavailable(_) => "network_unavailable",
            Error::ConnectionFailed(_) => "connection_failed",
            Error::ConnectionClosed(_) => "connection_closed",
            Error::Timeout(_) => "timeout",
            Error::CommandRejected { .. } => "command_rejected",
            Error::Protocol(_) => "protocol",
            Error::Io(_) => "io",
            Error::TransactionCollision { .. } => "transaction_collision",
            Error::Parse(_) => "parse",
            Error::SchemaValidation { .. } => "schema_validation",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
