//! Device configuration (factory calibration payload)
//!
//! The glasses answer a get-config control request with a JSON document
//! describing displays, distortion grids, cameras and the IMU factory
//! calibration. [`parse`] converts that document into the typed
//! [`DeviceConfig`] model, enforcing the schema strictly: every violation is
//! reported with a `$.`-anchored path so firmware mismatches are diagnosable
//! from the error alone.

mod model;
mod parse;

pub use model::{
    CameraCalibration, DeviceConfig, DisplayConfig, DistortionGrid, EyeDisplay, GridPoint,
    GyroBiasSample, ImuCalibration, SensorIntrinsics, SlamCameraCalibration,
};
pub use parse::parse_device_config;
