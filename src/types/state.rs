//! Session lifecycle states
//!
//! Both states are broadcast as immutable snapshots; the orchestrator is the
//! only writer, so observers see transitions in a strict order.

/// Lifecycle of the streaming session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No session; initial state
    Idle,
    /// `start()` is connecting and loading the device configuration
    Connecting,
    /// Stream is up; stillness calibration in progress
    Calibrating { progress: u32, target: u32 },
    /// Calibrated and publishing tracking samples
    Streaming,
    /// A fatal session error; `recoverable` hints whether a fresh `start()`
    /// is expected to succeed
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    /// Session torn down by `stop()` or after an error
    Stopped,
}

impl SessionState {
    /// True while a stream task is supposed to be running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Calibrating { .. } | SessionState::Streaming
        )
    }
}

/// Lifecycle of the factory bias table
///
/// Survives stream errors: once loaded, the bias stays `Active` until
/// `stop()` resets it.
#[derive(Debug, Clone, PartialEq)]
pub enum BiasState {
    /// No bias loaded
    Inactive,
    /// Fetching and validating the device configuration
    LoadingConfig,
    /// Bias table in use
    Active { fsn: String, glasses_version: i64 },
    /// Configuration fetch or validation failed
    Error { code: String, message: String },
}
