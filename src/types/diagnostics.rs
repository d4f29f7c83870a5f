//! Stream health snapshot
//!
//! Published every N tracking samples so applications can watch link quality
//! without subscribing to the raw report flood.

/// Counters and timing statistics for the sensor stream
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamDiagnostics {
    /// IMU reports decoded
    pub imu_reports: u64,
    /// Magnetometer reports decoded
    pub mag_reports: u64,
    /// Bytes discarded while searching for a frame boundary
    pub dropped_bytes: u64,
    /// Headers with a length field other than the report body size
    pub invalid_report_length: u64,
    /// Bodies that failed to decode
    pub decode_errors: u64,
    /// Reports with an unrecognized kind value
    pub unknown_report_types: u64,
    /// Observed report rate over the last window, Hz
    pub observed_hz: f64,
    /// Smallest gap between socket reads that yielded reports, seconds
    pub recv_delta_min: f64,
    /// Mean gap, seconds
    pub recv_delta_avg: f64,
    /// Largest gap, seconds
    pub recv_delta_max: f64,
}
