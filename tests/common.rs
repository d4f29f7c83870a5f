//! Shared test fixtures: a scripted device simulator over mock transports
//!
//! `DeviceSim` plays the glasses: it answers control transactions from a
//! canned table and lets tests push report frames onto the stream socket.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use xreal_io::protocol::report::encode_frame;
use xreal_io::transport::{Connector, MockTransport, Transport};
use xreal_io::types::{ReportKind, SensorReport};
use xreal_io::{Error, Result};

pub const CONTROL_PORT: u16 = 52999;
pub const STREAM_PORT: u16 = 52998;

/// Connector handing out the simulator's transports by port
pub struct MockConnector {
    pub control: MockTransport,
    pub stream: MockTransport,
}

impl Connector for MockConnector {
    fn connect(&self, _host: &str, port: u16) -> Result<Box<dyn Transport>> {
        match port {
            CONTROL_PORT => Ok(Box::new(self.control.clone())),
            STREAM_PORT => Ok(Box::new(self.stream.clone())),
            other => Err(Error::ConnectionFailed(format!("unexpected port {}", other))),
        }
    }
}

/// A factory configuration payload that passes validation
pub fn sample_config_json() -> String {
    let grid_point = "0.1, 0.2, 1.0, 2.0";
    let grid = format!(
        r#"{{ "num_row": 1, "num_col": 2, "data": [{}, {}] }}"#,
        grid_point, grid_point
    );
    format!(
        r#"{{
  "glasses_version": 8,
  "FSN": "SIM2024X00077",
  "last_modified_time": "2024-06-15 08:00:00",
  "display": {{
    "num_of_displays": 2,
    "target_type": "IMU",
    "left_display": {{
      "intrinsic": [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
      "rotation": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
      "position": [0.032, 0.0, 0.0]
    }},
    "right_display": {{
      "intrinsic": [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
      "rotation": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
      "position": [-0.032, 0.0, 0.0]
    }}
  }},
  "display_distortion": {{
    "left_display": {grid},
    "right_display": {grid}
  }},
  "IMU": {{
    "device_1": {{
      "accel_bias": [0.01, -0.02, 0.005],
      "gyro_bias": [0.2, -0.1, 0.05],
      "accel_q_gyro": [0.0, 0.0, 0.0, 1.0],
      "accel_scale": [1.0, 1.0, 1.0],
      "gyro_scale": [1.0, 1.0, 1.0],
      "accel_skew": [0.0, 0.0, 0.0],
      "gyro_skew": [0.0, 0.0, 0.0],
      "gyro_bias_temp_data": [
        {{ "temperature": 20.0, "gyro_bias": [0.0, 0.0, 0.0] }},
        {{ "temperature": 40.0, "gyro_bias": [0.0, 0.0, 0.0] }}
      ],
      "mag_transform": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
      "accel_intrinsic": {{
        "peak_to_peak": 0.02, "std": 0.004,
        "bias": [0.0, 0.0, 0.0],
        "calibration_matrix": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
      }},
      "gyro_intrinsic": {{
        "peak_to_peak": 0.5, "std": 0.02,
        "bias": [0.0, 0.0, 0.0],
        "calibration_matrix": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
      }},
      "static_detect_window_size": 100,
      "mean_temperature": 30.0,
      "imu_noise": [0.002, 0.0001, 0.02, 0.0005]
    }}
  }}
}}"#
    )
}

/// Same payload with an unvalidated firmware generation
pub fn unsupported_version_config_json() -> String {
    sample_config_json().replace("\"glasses_version\": 8", "\"glasses_version\": 6")
}

/// LE base-128 varint (test-side copy for building response bodies)
fn varint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Property string response body: `0x22 len ( 0x12 len utf8 )`
pub fn string_response(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut inner = vec![0x12];
    inner.extend_from_slice(&varint(bytes.len() as u64));
    inner.extend_from_slice(bytes);
    let mut body = vec![0x22];
    body.extend_from_slice(&varint(inner.len() as u64));
    body.extend_from_slice(&inner);
    body
}

/// Property success acknowledgement body
pub fn empty_response() -> Vec<u8> {
    vec![0x22, 0x00]
}

/// Property reject acknowledgement with the given status
pub fn reject_response(status: u64) -> Vec<u8> {
    let mut inner = vec![0x08];
    inner.extend_from_slice(&varint(status));
    let mut body = vec![0x22];
    body.extend_from_slice(&varint(inner.len() as u64));
    body.extend_from_slice(&inner);
    body
}

/// Build a well-formed IMU report frame
pub fn imu_frame(hmd_time_ns: u64, gyro: [f32; 3], accel: [f32; 3]) -> Vec<u8> {
    encode_frame(&SensorReport {
        device_id: 0x0077,
        hmd_time_ns,
        kind: ReportKind::Imu,
        gyro,
        accel,
        mag: [0.0; 3],
        temperature_c: 30.0,
        imu_id: 0,
        frame_id: [0, 0, 0],
    })
}

/// Build a key-state frame for the control socket
pub fn key_frame(key: u32, state: u32, time: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 64];
    payload[0..4].copy_from_slice(&key.to_le_bytes());
    payload[4..8].copy_from_slice(&state.to_le_bytes());
    payload[8..12].copy_from_slice(&time.to_le_bytes());
    let mut frame = Vec::new();
    frame.extend_from_slice(&0x272Eu16.to_be_bytes());
    frame.extend_from_slice(&64u32.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Scripted device: answers control transactions until stopped
pub struct DeviceSim {
    pub control: MockTransport,
    pub stream: MockTransport,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSim {
    /// Start the simulator; `config_json` is served for get-config requests
    pub fn start(config_json: String) -> Self {
        Self::start_with_overrides(config_json, Vec::new())
    }

    /// Start with per-magic response body overrides
    pub fn start_with_overrides(config_json: String, overrides: Vec<(u16, Vec<u8>)>) -> Self {
        let control = MockTransport::new();
        let stream = MockTransport::new();
        let stop = Arc::new(AtomicBool::new(false));

        let thread = thread::spawn({
            let control = control.clone();
            let stop = Arc::clone(&stop);
            move || {
                let mut inbound: Vec<u8> = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    inbound.extend_from_slice(&control.take_written());
                    while inbound.len() >= 6 {
                        let magic = u16::from_be_bytes([inbound[0], inbound[1]]);
                        let len = u32::from_be_bytes([
                            inbound[2], inbound[3], inbound[4], inbound[5],
                        ]) as usize;
                        if inbound.len() < 6 + len || len < 4 {
                            break;
                        }
                        let wire_tx =
                            i32::from_be_bytes([inbound[6], inbound[7], inbound[8], inbound[9]]);
                        inbound.drain(0..6 + len);

                        let body = overrides
                            .iter()
                            .find(|(m, _)| *m == magic)
                            .map(|(_, b)| b.clone())
                            .unwrap_or_else(|| default_response(magic, &config_json));

                        let mut frame = Vec::new();
                        frame.extend_from_slice(&magic.to_be_bytes());
                        frame.extend_from_slice(&((4 + body.len()) as u32).to_be_bytes());
                        frame.extend_from_slice(&wire_tx.to_be_bytes());
                        frame.extend_from_slice(&body);
                        control.inject_read(&frame);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });

        DeviceSim {
            control,
            stream,
            stop,
            thread: Some(thread),
        }
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            control: self.control.clone(),
            stream: self.stream.clone(),
        }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceSim {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_response(magic: u16, config_json: &str) -> Vec<u8> {
    match magic {
        0x271F => string_response(config_json),
        0x2729 => string_response("SIM-DEVICE-ID"),
        0x271D => string_response("01.00.77"),
        0x272D => string_response("dsp-3.2.1"),
        // Setters acknowledge
        _ => empty_response(),
    }
}
