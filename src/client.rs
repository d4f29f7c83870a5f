//! Public client: lifecycle orchestration and device commands
//!
//! [`XrealClient`] owns both sessions and every piece of mutable state.
//! Consumers get immutable snapshots through the [`EventStreams`] bundle and
//! the state getters; commands come back in through the methods here.
//!
//! # Startup sequence
//!
//! `start()` runs the fail-fast pipeline: connect control → fetch + validate
//! the device configuration → activate the bias table → open the stream
//! socket → wait for the first parsed report. Any failure tears down what
//! was opened and surfaces through both the returned error and the state
//! cells. The control session itself is opened lazily and reused across
//! restarts while healthy.
//!
//! ```no_run
//! use xreal_io::{ClientConfig, XrealClient};
//!
//! # fn main() -> xreal_io::Result<()> {
//! let (client, events) = XrealClient::new(ClientConfig::default())?;
//! let info = client.start()?;
//! println!("streaming from {} (v{})", info.fsn, info.glasses_version);
//!
//! for sample in events.samples.iter().take(100) {
//!     println!("yaw {:.1}", sample.relative.yaw);
//! }
//! client.zero_view()?;
//! client.stop();
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::glasses::{self, DeviceConfig};
use crate::protocol::control::magic;
use crate::protocol::property;
use crate::session::control::ControlSession;
use crate::session::stream::{self, StreamEvents, StreamHandle};
use crate::tracker::{BiasConfig, GyroBiasPoint, HeadTracker};
use crate::transport::{Connector, TcpConnector};
use crate::types::{
    BiasState, CalibrationProgress, ControlEvent, PoseDataMode, SensorReport, SessionState,
    StreamDiagnostics, TrackingSample,
};
use crate::watch::StateCell;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::time::Duration;

/// Channel capacities for the event bundle
const REPORT_CHANNEL_CAPACITY: usize = 512;
const SAMPLE_CHANNEL_CAPACITY: usize = 512;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the application can observe, as bounded receivers.
///
/// Publication never blocks the session threads; when a receiver falls
/// behind, intermediate values are dropped (states remain queryable through
/// the client's getters).
pub struct EventStreams {
    pub session_states: Receiver<SessionState>,
    pub bias_states: Receiver<BiasState>,
    pub reports: Receiver<SensorReport>,
    pub samples: Receiver<TrackingSample>,
    pub calibration: Receiver<CalibrationProgress>,
    pub diagnostics: Receiver<StreamDiagnostics>,
    pub control_events: Receiver<ControlEvent>,
}

/// Resolved by `start()` once the first report arrived
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub fsn: String,
    pub glasses_version: i64,
    pub host: String,
    pub control_port: u16,
    pub stream_port: u16,
}

/// Client for one pair of XREAL One / One Pro glasses
pub struct XrealClient {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    control: Mutex<Option<Arc<ControlSession>>>,
    stream: Mutex<Option<StreamHandle>>,
    session_state: Arc<StateCell<SessionState>>,
    bias_state: Arc<StateCell<BiasState>>,
    smooth_mode: Arc<AtomicBool>,
    reports_tx: Sender<SensorReport>,
    samples_tx: Sender<TrackingSample>,
    calibration_tx: Sender<CalibrationProgress>,
    diagnostics_tx: Sender<StreamDiagnostics>,
    control_events_tx: Sender<ControlEvent>,
}

impl XrealClient {
    /// Create a client with the default TCP connector
    pub fn new(config: ClientConfig) -> Result<(Self, EventStreams)> {
        let connector = TcpConnector {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(10),
        };
        Self::with_connector(config, Box::new(connector))
    }

    /// Create a client over a custom connector (tests, simulators)
    pub fn with_connector(
        config: ClientConfig,
        connector: Box<dyn Connector>,
    ) -> Result<(Self, EventStreams)> {
        config.validate()?;

        let (session_state, session_states) = StateCell::new(SessionState::Idle, EVENT_CHANNEL_CAPACITY);
        let (bias_state, bias_states) = StateCell::new(BiasState::Inactive, EVENT_CHANNEL_CAPACITY);
        let (reports_tx, reports) = bounded(REPORT_CHANNEL_CAPACITY);
        let (samples_tx, samples) = bounded(SAMPLE_CHANNEL_CAPACITY);
        let (calibration_tx, calibration) = bounded(EVENT_CHANNEL_CAPACITY);
        let (diagnostics_tx, diagnostics) = bounded(EVENT_CHANNEL_CAPACITY);
        let (control_events_tx, control_events) = bounded(EVENT_CHANNEL_CAPACITY);

        let client = XrealClient {
            config,
            connector,
            control: Mutex::new(None),
            stream: Mutex::new(None),
            session_state,
            bias_state,
            smooth_mode: Arc::new(AtomicBool::new(false)),
            reports_tx,
            samples_tx,
            calibration_tx,
            diagnostics_tx,
            control_events_tx,
        };
        let events = EventStreams {
            session_states,
            bias_states,
            reports,
            samples,
            calibration,
            diagnostics,
            control_events,
        };
        Ok((client, events))
    }

    // === State getters ===

    pub fn session_state(&self) -> SessionState {
        self.session_state.get()
    }

    pub fn bias_state(&self) -> BiasState {
        self.bias_state.get()
    }

    // === Lifecycle ===

    /// Connect, load the device configuration, calibrate and stream.
    ///
    /// Returns once the first report has been parsed off the stream socket,
    /// or fails (tearing down the stream task) when the startup budget is
    /// exceeded.
    pub fn start(&self) -> Result<ConnectionInfo> {
        if self.session_state().is_active() {
            return Err(Error::InvalidArgument(
                "session already active; call stop() first".to_string(),
            ));
        }

        self.session_state.set(SessionState::Connecting);
        self.bias_state.set(BiasState::LoadingConfig);

        let device_config = match self.load_device_config() {
            Ok(config) => config,
            Err(e) => {
                log::error!("Bias activation failed: {}", e);
                self.bias_state.set(BiasState::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                // A rejected payload will not fix itself on retry
                let recoverable =
                    !matches!(e, Error::Parse(_) | Error::SchemaValidation { .. });
                self.session_state.set(SessionState::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    recoverable,
                });
                return Err(e);
            }
        };

        let bias = bias_from_config(&device_config);
        self.bias_state.set(BiasState::Active {
            fsn: device_config.fsn.clone(),
            glasses_version: device_config.glasses_version,
        });
        log::info!(
            "Bias table active: FSN {} (glasses_version {}, {} sweep points)",
            device_config.fsn,
            device_config.glasses_version,
            bias.gyro_temp_curve.len()
        );

        if let Err(e) = self.open_stream(bias) {
            self.session_state.set(SessionState::Error {
                code: e.code().to_string(),
                message: e.to_string(),
                recoverable: true,
            });
            return Err(e);
        }

        Ok(ConnectionInfo {
            fsn: device_config.fsn,
            glasses_version: device_config.glasses_version,
            host: self.config.host.clone(),
            control_port: self.config.control_port,
            stream_port: self.config.stream_port,
        })
    }

    /// Fetch and validate the configuration payload over the control channel
    fn load_device_config(&self) -> Result<DeviceConfig> {
        let raw = self.request_string(magic::GET_CONFIG)?;
        glasses::parse_device_config(&raw)
    }

    /// Open the stream socket, spawn the stream task and await the first
    /// parsed report
    fn open_stream(&self, bias: BiasConfig) -> Result<()> {
        let transport = self
            .connector
            .connect(&self.config.host, self.config.stream_port)?;
        let tracker = HeadTracker::new(self.config.tracker, bias);
        let (first_tx, first_rx) = sync_channel(1);

        // Set before the task runs so a fast calibration cannot be
        // overwritten by the initial state
        self.session_state.set(SessionState::Calibrating {
            progress: 0,
            target: self.config.tracker.calibration_target,
        });

        let handle = stream::spawn(
            transport,
            tracker,
            self.config.smoother,
            self.config.diagnostics_interval,
            Arc::clone(&self.smooth_mode),
            Arc::clone(&self.session_state),
            StreamEvents {
                reports: self.reports_tx.clone(),
                samples: self.samples_tx.clone(),
                calibration: self.calibration_tx.clone(),
                diagnostics: self.diagnostics_tx.clone(),
            },
            first_tx,
        )
        .map_err(Error::Io)?;

        let startup = Duration::from_millis(self.config.startup_timeout_ms);
        match first_rx.recv_timeout(startup) {
            Ok(()) => {
                *self.stream.lock() = Some(handle);
                Ok(())
            }
            Err(_) => {
                let mut handle = handle;
                handle.stop();
                Err(Error::Timeout(format!(
                    "no report from the stream socket within {:?}",
                    startup
                )))
            }
        }
    }

    /// Tear everything down: stream task, control session, pending
    /// transactions, bias table.
    pub fn stop(&self) {
        log::info!("Stopping client");
        if let Some(mut handle) = self.stream.lock().take() {
            handle.stop();
        }
        if let Some(control) = self.control.lock().take() {
            control.close();
        }
        self.bias_state.set(BiasState::Inactive);
        self.session_state.set(SessionState::Stopped);
    }

    // === Stream commands ===

    /// Make the current orientation the identity for relative output
    pub fn zero_view(&self) -> Result<()> {
        self.with_running_stream(|stream| stream.request_zero_view())
    }

    /// Restart stillness calibration
    pub fn recalibrate(&self) -> Result<()> {
        self.with_running_stream(|stream| stream.request_recalibrate())
    }

    fn with_running_stream(&self, f: impl FnOnce(&StreamHandle)) -> Result<()> {
        let guard = self.stream.lock();
        match guard.as_ref() {
            Some(stream) if stream.is_running() => {
                f(stream);
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "no active stream session".to_string(),
            )),
        }
    }

    /// Choose whether relative orientations are smoothed
    pub fn set_pose_data_mode(&self, mode: PoseDataMode) {
        self.smooth_mode
            .store(mode == PoseDataMode::Smooth, Ordering::Release);
    }

    // === Device commands (one-shot RPCs) ===

    /// Set the rendering scene mode
    pub fn set_scene_mode(&self, mode: i64) -> Result<()> {
        self.set_numeric(magic::SET_SCENE, mode)
    }

    /// Select the display input mode
    pub fn set_display_input_mode(&self, mode: i64) -> Result<()> {
        self.set_numeric(magic::SET_DISPLAY_INPUT, mode)
    }

    /// Set display brightness; the device accepts levels 0 through 9
    pub fn set_brightness(&self, level: i64) -> Result<()> {
        if !(0..=9).contains(&level) {
            return Err(Error::InvalidArgument(format!(
                "brightness must be within 0..=9 (got {})",
                level
            )));
        }
        self.set_numeric(magic::SET_BRIGHTNESS, level)
    }

    /// Set the dimmer level
    pub fn set_dimmer(&self, level: i64) -> Result<()> {
        self.set_numeric(magic::SET_DIMMER, level)
    }

    /// Device identity string
    pub fn get_id(&self) -> Result<String> {
        self.request_string(magic::GET_ID)
    }

    /// Firmware version string
    pub fn get_software_version(&self) -> Result<String> {
        self.request_string(magic::GET_SOFTWARE_VERSION)
    }

    /// DSP firmware version string
    pub fn get_dsp_version(&self) -> Result<String> {
        self.request_string(magic::GET_DSP_VERSION)
    }

    /// Configuration payload exactly as the device sent it, unvalidated
    pub fn get_config_raw(&self) -> Result<String> {
        self.request_string(magic::GET_CONFIG)
    }

    /// Configuration payload parsed and validated
    pub fn get_config(&self) -> Result<DeviceConfig> {
        let raw = self.get_config_raw()?;
        glasses::parse_device_config(&raw)
    }

    // === Control plumbing ===

    /// Get the healthy control session, opening one if needed
    fn control_session(&self) -> Result<Arc<ControlSession>> {
        let mut guard = self.control.lock();
        let reusable = guard.as_ref().is_some_and(|c| c.is_healthy());
        if !reusable {
            if let Some(stale) = guard.take() {
                stale.close();
            }
            log::info!(
                "Opening control session to {}:{}",
                self.config.host,
                self.config.control_port
            );
            let transport = self
                .connector
                .connect(&self.config.host, self.config.control_port)?;
            let session = ControlSession::start(transport, self.control_events_tx.clone())?;
            *guard = Some(Arc::new(session));
        }
        Ok(Arc::clone(guard.as_ref().expect("control session present")))
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn set_numeric(&self, command: u16, value: i64) -> Result<()> {
        let body = property::encode_set_numeric_request(value)?;
        let session = self.control_session()?;
        let response = session.send_transaction(command, &body, self.request_timeout())?;
        property::parse_empty_response(&response)
    }

    fn request_string(&self, command: u16) -> Result<String> {
        let body = property::encode_get_request();
        let session = self.control_session()?;
        let response = session.send_transaction(command, &body, self.request_timeout())?;
        property::parse_string_response(&response)
    }
}

impl Drop for XrealClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the tracker bias table from a validated configuration.
///
/// The accel bias gets the same axis permutation the stream loop applies to
/// accel samples, so bias subtraction in the tracker frame equals raw-frame
/// subtraction remapped.
fn bias_from_config(config: &DeviceConfig) -> BiasConfig {
    let b = &config.imu.accel_bias;
    BiasConfig {
        accel_bias: [b[2] as f32, b[1] as f32, b[0] as f32],
        gyro_temp_curve: config
            .imu
            .gyro_bias_temp_data
            .iter()
            .map(|s| GyroBiasPoint {
                temperature: s.temperature as f32,
                bias: [s.bias[0] as f32, s.bias[1] as f32, s.bias[2] as f32],
            })
            .collect(),
    }
}
