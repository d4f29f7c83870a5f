//! Full-pipeline integration: startup, calibration, tracking, recenter,
//! diagnostics and teardown over the scripted device simulator

mod common;

use common::*;
use std::time::{Duration, Instant};
use xreal_io::{
    BiasState, ClientConfig, Error, EventStreams, SessionState, TrackerConfig, TrackingSample,
    XrealClient,
};

const MS: u64 = 1_000_000;
const CALIBRATION_TARGET: u32 = 20;

fn client_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 2_000,
        startup_timeout_ms: 2_000,
        diagnostics_interval: 25,
        tracker: TrackerConfig {
            calibration_target: CALIBRATION_TARGET,
            alpha: 1.0,
            axis_scale: [1.0, 1.0, 1.0],
        },
        ..ClientConfig::default()
    }
}

fn client_for(sim: &DeviceSim) -> (XrealClient, EventStreams) {
    XrealClient::with_connector(client_config(), Box::new(sim.connector())).unwrap()
}

/// Gravity along the device x axis lands on the tracker's z axis after the
/// stream-side remap
const STILL_ACCEL: [f32; 3] = [1.0, 0.0, 0.0];

fn inject_still_frames(sim: &DeviceSim, timestamps: impl Iterator<Item = u64>) {
    for ts in timestamps {
        sim.stream.inject_read(&imu_frame(ts, [0.0; 3], STILL_ACCEL));
    }
}

fn collect_samples(events: &EventStreams, count: usize) -> Vec<TrackingSample> {
    let mut samples = Vec::with_capacity(count);
    while samples.len() < count {
        samples.push(
            events
                .samples
                .recv_timeout(Duration::from_secs(2))
                .expect("tracking sample"),
        );
    }
    samples
}

fn await_session_state(client: &XrealClient, predicate: impl Fn(&SessionState) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = client.session_state();
        if predicate(&state) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "session state stuck at {:?}",
            state
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_full_session_lifecycle() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, events) = client_for(&sim);

    // Garbage before the first frame exercises resync during startup
    sim.stream.inject_read(&[0x44, 0x45, 0x46]);
    // Calibration (20), prime (1), then 59 updates
    inject_still_frames(&sim, (1..=80).map(|i| i * MS));

    let info = client.start().unwrap();
    assert_eq!(info.fsn, "SIM2024X00077");
    assert_eq!(info.glasses_version, 8);
    assert_eq!(client.bias_state(), BiasState::Active {
        fsn: "SIM2024X00077".to_string(),
        glasses_version: 8,
    });

    // Calibration progress was published at sample 1, multiples of 10, and
    // completion
    let mut calibration = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !calibration.iter().any(|p: &xreal_io::CalibrationProgress| p.complete) {
        assert!(Instant::now() < deadline, "calibration never completed");
        if let Ok(progress) = events.calibration.recv_timeout(Duration::from_millis(100)) {
            calibration.push(progress);
        }
    }
    assert!(calibration.iter().any(|p| p.samples == 1));
    assert!(calibration.iter().any(|p| p.samples == 10 && !p.complete));
    assert_eq!(calibration.last().unwrap().target, CALIBRATION_TARGET);

    await_session_state(&client, |s| *s == SessionState::Streaming);

    let samples = collect_samples(&events, 59);
    for sample in &samples {
        assert!(sample.dt > 0.0);
        assert_eq!(sample.accel_bias, [0.005, -0.02, 0.01]);
    }
    assert_eq!(samples.last().unwrap().hmd_time_ns, 80 * MS);

    // Raw reports were republished and diagnostics kept pace (80 reports at
    // an interval of 25)
    assert!(events.reports.len() >= 60);
    let diagnostics = events
        .diagnostics
        .recv_timeout(Duration::from_secs(2))
        .unwrap();
    assert!(diagnostics.imu_reports >= 25);
    assert!(diagnostics.dropped_bytes >= 3);

    client.stop();
    assert_eq!(client.session_state(), SessionState::Stopped);
    assert_eq!(client.bias_state(), BiasState::Inactive);
}

#[test]
fn test_zero_view_recenters_relative_output() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, events) = client_for(&sim);

    inject_still_frames(&sim, (1..=21).map(|i| i * MS));
    client.start().unwrap();

    // Rotate in yaw for 30 updates: 40 deg/s in the tracker frame
    for i in 22..=51u64 {
        sim.stream
            .inject_read(&imu_frame(i * MS, [0.0, 40.0, 0.0], STILL_ACCEL));
    }
    let rotated = collect_samples(&events, 30);
    let last = rotated.last().unwrap();
    assert!(last.absolute.yaw > 0.5, "yaw {}", last.absolute.yaw);
    assert!(last.relative.yaw > 0.5);

    client.zero_view().unwrap();

    // Stop rotating; once the flag is consumed the relative orientation
    // reads identity while the absolute keeps its heading
    inject_still_frames(&sim, (52..=71).map(|i| i * MS));
    let still = collect_samples(&events, 20);
    let settled = still.last().unwrap();
    assert!(settled.relative.yaw.abs() < 1e-3, "relative yaw {}", settled.relative.yaw);
    assert!(settled.absolute.yaw > 0.5);

    client.stop();
}

#[test]
fn test_recalibrate_returns_to_calibrating() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, _events) = client_for(&sim);

    inject_still_frames(&sim, (1..=25).map(|i| i * MS));
    client.start().unwrap();
    await_session_state(&client, |s| *s == SessionState::Streaming);

    client.recalibrate().unwrap();
    inject_still_frames(&sim, (26..=30).map(|i| i * MS));
    await_session_state(&client, |s| matches!(s, SessionState::Calibrating { .. }));

    // Feeding the full target completes calibration again
    inject_still_frames(&sim, (31..=55).map(|i| i * MS));
    await_session_state(&client, |s| *s == SessionState::Streaming);

    client.stop();
}

#[test]
fn test_startup_times_out_without_stream_data() {
    let sim = DeviceSim::start(sample_config_json());
    let config = ClientConfig {
        startup_timeout_ms: 200,
        ..client_config()
    };
    let (client, _events) =
        XrealClient::with_connector(config, Box::new(sim.connector())).unwrap();

    match client.start() {
        Err(Error::Timeout(_)) => {}
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(matches!(
        client.session_state(),
        SessionState::Error { .. }
    ));
    // The bias table loaded fine and survives the failed stream startup
    assert!(matches!(client.bias_state(), BiasState::Active { .. }));
}

#[test]
fn test_schema_rejection_fails_bias_activation() {
    let sim = DeviceSim::start(unsupported_version_config_json());
    let (client, _events) = client_for(&sim);

    match client.start() {
        Err(Error::SchemaValidation { path, .. }) => {
            assert!(path.contains("glasses_version"));
        }
        other => panic!("expected SchemaValidation, got {:?}", other),
    }
    match client.bias_state() {
        BiasState::Error { code, .. } => assert_eq!(code, "schema_validation"),
        other => panic!("expected bias error, got {:?}", other),
    }
    match client.session_state() {
        SessionState::Error { recoverable, .. } => assert!(!recoverable),
        other => panic!("expected session error, got {:?}", other),
    }
}

#[test]
fn test_stream_eof_preserves_bias_state() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, _events) = client_for(&sim);

    inject_still_frames(&sim, (1..=25).map(|i| i * MS));
    client.start().unwrap();
    await_session_state(&client, |s| *s == SessionState::Streaming);

    sim.stream.close();
    await_session_state(&client, |s| {
        matches!(s, SessionState::Error { message, .. } if message == "eof")
    });
    assert!(matches!(client.bias_state(), BiasState::Active { .. }));

    client.stop();
    assert_eq!(client.session_state(), SessionState::Stopped);
}

#[test]
fn test_non_monotonic_device_time_is_fatal_and_recoverable() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, events) = client_for(&sim);

    inject_still_frames(&sim, (1..=30).map(|i| i * MS));
    client.start().unwrap();
    collect_samples(&events, 9);

    // Device time jumps backwards: the stream must fail fast
    inject_still_frames(&sim, [5 * MS].into_iter());
    await_session_state(&client, |s| {
        matches!(s, SessionState::Error { code, recoverable, .. }
            if code == "protocol" && *recoverable)
    });

    client.stop();
}
