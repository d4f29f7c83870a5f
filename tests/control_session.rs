//! Control-channel integration: transactions, events and teardown against
//! the scripted device simulator

mod common;

use common::*;
use std::time::Duration;
use xreal_io::{ClientConfig, ControlEvent, Error, KeyState, KeyType, XrealClient};

fn client_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

fn client_for(sim: &DeviceSim) -> (XrealClient, xreal_io::EventStreams) {
    XrealClient::with_connector(client_config(), Box::new(sim.connector())).unwrap()
}

#[test]
fn test_one_shot_rpcs_round_trip() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, _events) = client_for(&sim);

    assert_eq!(client.get_id().unwrap(), "SIM-DEVICE-ID");
    assert_eq!(client.get_software_version().unwrap(), "01.00.77");
    assert_eq!(client.get_dsp_version().unwrap(), "dsp-3.2.1");

    client.set_scene_mode(2).unwrap();
    client.set_display_input_mode(1).unwrap();
    client.set_dimmer(3).unwrap();
    for level in [0, 5, 9] {
        client.set_brightness(level).unwrap();
    }
}

#[test]
fn test_get_config_parses_and_raw_passes_through() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, _events) = client_for(&sim);

    let raw = client.get_config_raw().unwrap();
    assert!(raw.contains("SIM2024X00077"));

    let config = client.get_config().unwrap();
    assert_eq!(config.fsn, "SIM2024X00077");
    assert_eq!(config.glasses_version, 8);
    assert_eq!(config.imu.gyro_bias_temp_data.len(), 2);
}

#[test]
fn test_raw_fetch_works_for_unvalidated_firmware() {
    let sim = DeviceSim::start(unsupported_version_config_json());
    let (client, _events) = client_for(&sim);

    // Raw fetch is available even though validation rejects the payload
    let raw = client.get_config_raw().unwrap();
    assert!(raw.contains("\"glasses_version\": 6"));
    assert!(matches!(
        client.get_config(),
        Err(Error::SchemaValidation { .. })
    ));
}

#[test]
fn test_command_rejected_surfaces_status() {
    let sim = DeviceSim::start_with_overrides(
        sample_config_json(),
        vec![(0x2727, reject_response(0x2711))],
    );
    let (client, _events) = client_for(&sim);

    match client.set_dimmer(1) {
        Err(Error::CommandRejected { status }) => assert_eq!(status, 0x2711),
        other => panic!("expected CommandRejected, got {:?}", other),
    }
}

#[test]
fn test_key_events_flow_to_subscriber() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, events) = client_for(&sim);

    // The control session opens lazily; issue one request to bring it up
    client.get_id().unwrap();

    sim.control.inject_read(&key_frame(2, 1, 777));
    sim.control.inject_read(&key_frame(4, 2, 778));

    match events
        .control_events
        .recv_timeout(Duration::from_secs(2))
        .unwrap()
    {
        ControlEvent::Key(event) => {
            assert_eq!(event.key, KeyType::FrontRockerButton);
            assert_eq!(event.state, KeyState::Down);
            assert_eq!(event.device_time_ns, 777);
        }
        other => panic!("expected key event, got {:?}", other),
    }
    match events
        .control_events
        .recv_timeout(Duration::from_secs(2))
        .unwrap()
    {
        ControlEvent::Key(event) => {
            assert_eq!(event.key, KeyType::TopSingle);
            assert_eq!(event.state, KeyState::Up);
        }
        other => panic!("expected key event, got {:?}", other),
    }
}

#[test]
fn test_requests_fail_after_remote_close() {
    let sim = DeviceSim::start(sample_config_json());
    let (client, _events) = client_for(&sim);

    client.get_id().unwrap();
    sim.control.close();

    // Whether the reader noticed first or the write hits the closed socket,
    // the caller sees ConnectionClosed
    match client.get_id() {
        Err(Error::ConnectionClosed(_)) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
}
