//! Client configuration
//!
//! # Configuration Structure
//!
//! All fields have defaults matching the XREAL One / One Pro factory setup,
//! so `ClientConfig::default()` connects to a directly-attached device:
//!
//! ```ignore
//! let config = ClientConfig {
//!     host: "169.254.2.1".to_string(),
//!     ..ClientConfig::default()
//! };
//! let (client, events) = XrealClient::new(config);
//! ```
//!
//! The structs derive `Deserialize`, so an application that keeps its own
//! settings file can embed a `[glasses]` section and hand the result over.
//!
//! # Network Defaults
//!
//! The glasses expose two TCP services on a link-local address:
//! - control channel on port 52999 (request/response + key events)
//! - sensor stream on port 52998 (IMU/magnetometer reports)

use crate::error::{Error, Result};
use serde::Deserialize;

/// Default device address (link-local, assigned by the glasses firmware)
pub const DEFAULT_HOST: &str = "169.254.2.1";
/// Default control channel port
pub const DEFAULT_CONTROL_PORT: u16 = 52999;
/// Default sensor stream port
pub const DEFAULT_STREAM_PORT: u16 = 52998;

/// Head tracker tuning
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrackerConfig {
    /// Number of still samples accumulated before the residual gyro bias is
    /// locked in and streaming starts.
    ///
    /// **Default**: 200 (≈0.2 s at the device's native report rate)
    #[serde(default = "default_calibration_target")]
    pub calibration_target: u32,

    /// Complementary filter blend factor (0.0 to 1.0).
    ///
    /// Weight of the gyro-integrated angle; the accelerometer tilt estimate
    /// gets `1 - alpha`. Higher values are smoother but drift-corrected more
    /// slowly.
    ///
    /// **Default**: 0.98
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Per-axis output scale applied to the relative orientation
    /// (pitch, yaw, roll). Use -1.0 entries to mirror an axis for the
    /// consuming camera rig.
    ///
    /// **Default**: [1.0, 1.0, 1.0]
    #[serde(default = "default_axis_scale")]
    pub axis_scale: [f32; 3],
}

fn default_calibration_target() -> u32 {
    200
}
fn default_alpha() -> f32 {
    0.98
}
fn default_axis_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            calibration_target: default_calibration_target(),
            alpha: default_alpha(),
            axis_scale: default_axis_scale(),
        }
    }
}

/// 1-euro pose smoother tuning
///
/// Only the relative orientation is smoothed, and only while the pose data
/// mode is `Smooth`. See `tracker::smoother` for the filter itself.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SmootherConfig {
    /// Minimum cutoff frequency in Hz. Lower = more smoothing at rest.
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f32,

    /// Speed coefficient. Higher = less lag during fast head motion.
    #[serde(default = "default_beta")]
    pub beta: f32,

    /// Cutoff used when low-passing the derivative estimate.
    #[serde(default = "default_derivative_cutoff")]
    pub derivative_cutoff: f32,

    /// Largest Δt (seconds) accepted as continuous motion; larger gaps
    /// re-prime the filter instead of smoothing across them.
    #[serde(default = "default_max_delta")]
    pub max_delta: f32,
}

fn default_min_cutoff() -> f32 {
    1.0
}
fn default_beta() -> f32 {
    0.02
}
fn default_derivative_cutoff() -> f32 {
    1.0
}
fn default_max_delta() -> f32 {
    0.25
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            derivative_cutoff: default_derivative_cutoff(),
            max_delta: default_max_delta(),
        }
    }
}

/// Root client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Device host address
    ///
    /// **Format**: IPv4 literal or resolvable name
    /// **Default**: "169.254.2.1"
    ///
    /// When the host is link-local (169.254.0.0/16), only link-local
    /// interface candidates are considered for the outgoing connection.
    #[serde(default = "default_host")]
    pub host: String,

    /// Control channel TCP port
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Sensor stream TCP port
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request control transaction timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Budget for `start()` to observe the first parsed report, in
    /// milliseconds. Exceeding it tears the session down.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Publish a diagnostics snapshot every N tracking samples
    #[serde(default = "default_diagnostics_interval")]
    pub diagnostics_interval: u32,

    /// Head tracker tuning
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Pose smoother tuning
    #[serde(default)]
    pub smoother: SmootherConfig,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn default_stream_port() -> u16 {
    DEFAULT_STREAM_PORT
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_request_timeout_ms() -> u64 {
    2_000
}
fn default_startup_timeout_ms() -> u64 {
    3_500
}
fn default_diagnostics_interval() -> u32 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            control_port: default_control_port(),
            stream_port: default_stream_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            diagnostics_interval: default_diagnostics_interval(),
            tracker: TrackerConfig::default(),
            smoother: SmootherConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate field ranges before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidArgument("host must not be empty".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 || self.startup_timeout_ms == 0
        {
            return Err(Error::InvalidArgument(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.tracker.calibration_target == 0 {
            return Err(Error::InvalidArgument(
                "calibration_target must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracker.alpha) {
            return Err(Error::InvalidArgument(format!(
                "tracker alpha must be within 0.0..=1.0 (got {})",
                self.tracker.alpha
            )));
        }
        if self.diagnostics_interval == 0 {
            return Err(Error::InvalidArgument(
                "diagnostics_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
