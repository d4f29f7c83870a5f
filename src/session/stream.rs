//! Sensor stream session
//!
//! One thread owns the stream socket end to end: bytes go through the
//! report framer, IMU reports are remapped into the tracker frame and drive
//! the head tracker, and the results fan out on bounded channels (raw
//! reports, calibration progress, tracking samples, periodic diagnostics).
//!
//! Read timeouts are retried silently — the glasses pausing the stream is
//! not an error. EOF and transport failures end the session and surface
//! through the session-state cell; per-report decode anomalies only bump
//! the framer counters.

use crate::config::SmootherConfig;
use crate::error::Error;
use crate::protocol::report::ReportFramer;
use crate::tracker::smoother::PoseSmoother;
use crate::tracker::{HeadTracker, TrackerSample, TrackerStep};
use crate::transport::Transport;
use crate::types::{
    CalibrationProgress, ReportKind, SensorReport, SessionState, StreamDiagnostics, TrackingSample,
};
use crate::watch::StateCell;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Publication channels owned by the stream thread
pub struct StreamEvents {
    pub reports: Sender<SensorReport>,
    pub samples: Sender<TrackingSample>,
    pub calibration: Sender<CalibrationProgress>,
    pub diagnostics: Sender<StreamDiagnostics>,
}

/// Handle to a running stream task
pub struct StreamHandle {
    shutdown: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    zero_view: Arc<AtomicBool>,
    recalibrate: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// True while the stream thread is alive
    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }

    /// Recenter on the next processed sample
    pub fn request_zero_view(&self) {
        self.zero_view.store(true, Ordering::Release);
    }

    /// Restart stillness calibration on the next processed sample
    pub fn request_recalibrate(&self) {
        self.recalibrate.store(true, Ordering::Release);
    }

    /// Stop the stream thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Stream thread panicked");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the stream task on its own thread
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    transport: Box<dyn Transport>,
    tracker: HeadTracker,
    smoother_config: SmootherConfig,
    diagnostics_interval: u32,
    smooth_mode: Arc<AtomicBool>,
    session_state: Arc<StateCell<SessionState>>,
    events: StreamEvents,
    first_report: SyncSender<()>,
) -> std::io::Result<StreamHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let zero_view = Arc::new(AtomicBool::new(false));
    let recalibrate = Arc::new(AtomicBool::new(false));

    let thread = thread::Builder::new().name("xreal-stream".to_string()).spawn({
        let shutdown = Arc::clone(&shutdown);
        let finished = Arc::clone(&finished);
        let zero_view = Arc::clone(&zero_view);
        let recalibrate = Arc::clone(&recalibrate);
        move || {
            let mut task = StreamTask {
                transport,
                framer: ReportFramer::new(),
                tracker,
                smoother: PoseSmoother::new(smoother_config),
                smooth_mode,
                session_state,
                events,
                first_report: Some(first_report),
                shutdown,
                zero_view,
                recalibrate,
                diagnostics_interval: diagnostics_interval.max(1) as u64,
                processed_reports: 0,
                window: DiagnosticsWindow::new(),
            };
            task.run();
            finished.store(true, Ordering::Release);
            log::info!("Stream thread exiting");
        }
    })?;

    Ok(StreamHandle {
        shutdown,
        finished,
        zero_view,
        recalibrate,
        thread: Some(thread),
    })
}

/// Receive-gap statistics over one diagnostics window
struct DiagnosticsWindow {
    started: Instant,
    last_read: Option<Instant>,
    reports: u64,
    delta_min: f64,
    delta_max: f64,
    delta_sum: f64,
    delta_count: u64,
}

impl DiagnosticsWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_read: None,
            reports: 0,
            delta_min: f64::INFINITY,
            delta_max: 0.0,
            delta_sum: 0.0,
            delta_count: 0,
        }
    }

    /// Record one socket read that yielded `count` reports
    fn record_read(&mut self, now: Instant, count: usize) {
        if let Some(last) = self.last_read {
            let delta = now.duration_since(last).as_secs_f64();
            self.delta_min = self.delta_min.min(delta);
            self.delta_max = self.delta_max.max(delta);
            self.delta_sum += delta;
            self.delta_count += 1;
        }
        self.last_read = Some(now);
        self.reports += count as u64;
    }

    /// Snapshot and restart the window
    fn take(&mut self, counters: crate::protocol::report::FramerCounters) -> StreamDiagnostics {
        let elapsed = self.started.elapsed().as_secs_f64();
        let snapshot = StreamDiagnostics {
            imu_reports: counters.imu_reports,
            mag_reports: counters.mag_reports,
            dropped_bytes: counters.dropped_bytes,
            invalid_report_length: counters.invalid_report_length,
            decode_errors: counters.decode_errors,
            unknown_report_types: counters.unknown_report_types,
            observed_hz: if elapsed > 0.0 {
                self.reports as f64 / elapsed
            } else {
                0.0
            },
            recv_delta_min: if self.delta_count > 0 { self.delta_min } else { 0.0 },
            recv_delta_avg: if self.delta_count > 0 {
                self.delta_sum / self.delta_count as f64
            } else {
                0.0
            },
            recv_delta_max: self.delta_max,
        };
        *self = DiagnosticsWindow::new();
        snapshot
    }
}

struct StreamTask {
    transport: Box<dyn Transport>,
    framer: ReportFramer,
    tracker: HeadTracker,
    smoother: PoseSmoother,
    smooth_mode: Arc<AtomicBool>,
    session_state: Arc<StateCell<SessionState>>,
    events: StreamEvents,
    first_report: Option<SyncSender<()>>,
    shutdown: Arc<AtomicBool>,
    zero_view: Arc<AtomicBool>,
    recalibrate: Arc<AtomicBool>,
    diagnostics_interval: u64,
    processed_reports: u64,
    window: DiagnosticsWindow,
}

impl StreamTask {
    fn run(&mut self) {
        let mut chunk = [0u8; 8192];
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            let n = match self.transport.read(&mut chunk) {
                // Timeout: no data is not termination
                Ok(0) => {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                Ok(n) => n,
                Err(Error::ConnectionClosed(_)) => {
                    if !self.shutdown.load(Ordering::Acquire) {
                        log::warn!("Sensor stream ended: eof");
                        self.session_state.set(SessionState::Error {
                            code: "connection_closed".to_string(),
                            message: "eof".to_string(),
                            recoverable: true,
                        });
                    }
                    return;
                }
                Err(e) => {
                    log::error!("Sensor stream read failed: {}", e);
                    self.session_state.set(SessionState::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                        recoverable: true,
                    });
                    return;
                }
            };

            let reports = self.framer.push(&chunk[..n]);
            if !reports.is_empty() {
                self.window.record_read(Instant::now(), reports.len());
            }
            for report in reports {
                if !self.handle_report(report) {
                    return;
                }
            }
        }
    }

    /// Process one report; false means the task must terminate
    fn handle_report(&mut self, report: SensorReport) -> bool {
        if let Some(first) = self.first_report.take() {
            let _ = first.try_send(());
        }

        if self.events.reports.try_send(report).is_err() {
            log::trace!("Report channel full, dropping report");
        }

        if report.kind == ReportKind::Imu {
            self.consume_flags();
            if !self.drive_tracker(&report) {
                return false;
            }
        }

        self.processed_reports += 1;
        if self.processed_reports % self.diagnostics_interval == 0 {
            let snapshot = self.window.take(self.framer.counters());
            if self.events.diagnostics.try_send(snapshot).is_err() {
                log::trace!("Diagnostics channel full, dropping snapshot");
            }
        }
        true
    }

    /// Apply one-shot command flags queued by the client
    fn consume_flags(&mut self) {
        if self.recalibrate.swap(false, Ordering::AcqRel) {
            log::info!("Recalibration requested, restarting stillness calibration");
            self.tracker.reset();
            self.smoother.reset();
        }
        if self.zero_view.swap(false, Ordering::AcqRel) {
            self.tracker.zero_view();
            // Relative orientation jumps to identity; smoothing across the
            // jump would lag it back in
            self.smoother.reset();
        }
    }

    fn drive_tracker(&mut self, report: &SensorReport) -> bool {
        // Tracker frame: gravity along +z with the accel axes swapped
        let sample = TrackerSample {
            gyro: report.gyro,
            accel: [report.accel[2], report.accel[1], report.accel[0]],
            temperature_c: report.temperature_c,
        };

        match self.tracker.process(report.hmd_time_ns, sample) {
            Ok(TrackerStep::Calibrating(progress)) => {
                self.publish_calibration(progress);
                true
            }
            Ok(TrackerStep::Primed) => true,
            Ok(TrackerStep::Updated(update)) => {
                let relative = if self.smooth_mode.load(Ordering::Acquire) {
                    self.smoother.apply(update.relative, update.dt as f32)
                } else {
                    // Keep the smoother cold so switching modes re-primes
                    self.smoother.reset();
                    update.relative
                };
                let sample = TrackingSample {
                    absolute: update.absolute,
                    relative,
                    dt: update.dt,
                    hmd_time_ns: report.hmd_time_ns,
                    gyro_bias: update.gyro_bias,
                    accel_bias: self.tracker.accel_bias(),
                };
                if self.events.samples.try_send(sample).is_err() {
                    log::trace!("Tracking sample channel full, dropping sample");
                }
                true
            }
            Err(e) => {
                log::error!("Tracker rejected sample: {}", e);
                self.session_state.set(SessionState::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    recoverable: true,
                });
                false
            }
        }
    }

    fn publish_calibration(&mut self, progress: CalibrationProgress) {
        let should_publish =
            progress.samples == 1 || progress.samples % 10 == 0 || progress.complete;
        if !should_publish {
            return;
        }
        if self.events.calibration.try_send(progress).is_err() {
            log::trace!("Calibration channel full, dropping progress");
        }
        if progress.complete {
            log::info!("Calibration complete, streaming");
            self.session_state.set(SessionState::Streaming);
        } else {
            self.session_state.set(SessionState::Calibrating {
                progress: progress.samples,
                target: progress.target,
            });
        }
    }
}
