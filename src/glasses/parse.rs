//! Strict JSON-to-model conversion
//!
//! The walker descends the document along required keys, carrying the
//! `$.`-anchored path of every node it visits. Any mismatch — missing key,
//! wrong type, wrong arity, violated cross-field invariant — becomes a
//! [`Error::SchemaValidation`] naming the exact path, so a rejected payload
//! can be diagnosed without re-reading the document by hand.
//!
//! Parsing is two-phase: `serde_json` turns the text into a value tree
//! (failure is [`Error::Parse`]), then the walker converts and validates.
//! A derived `Deserialize` cannot do this job because the diagnostics must
//! be anchored and the invariants span fields.

use crate::error::{Error, Result};
use crate::glasses::model::{
    CameraCalibration, DeviceConfig, DisplayConfig, DistortionGrid, EyeDisplay, GridPoint,
    GyroBiasSample, ImuCalibration, SensorIntrinsics, SlamCameraCalibration,
};
use serde_json::Value;

/// A value plus the path it was found at
struct Node<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> Node<'a> {
    fn root(value: &'a Value) -> Self {
        Node {
            value,
            path: "$".to_string(),
        }
    }

    fn err(&self, detail: impl Into<String>) -> Error {
        Error::SchemaValidation {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }

    fn object(&self) -> Result<&'a serde_json::Map<String, Value>> {
        self.value
            .as_object()
            .ok_or_else(|| self.err("expected an object"))
    }

    /// Required child key
    fn require(&self, key: &str) -> Result<Node<'a>> {
        let path = format!("{}.{}", self.path, key);
        match self.object()?.get(key) {
            Some(value) => Ok(Node { value, path }),
            None => Err(Error::SchemaValidation {
                path,
                detail: "required key is missing".to_string(),
            }),
        }
    }

    /// Optional child key
    fn optional(&self, key: &str) -> Result<Option<Node<'a>>> {
        Ok(self.object()?.get(key).map(|value| Node {
            value,
            path: format!("{}.{}", self.path, key),
        }))
    }

    fn index(&self, i: usize, value: &'a Value) -> Node<'a> {
        Node {
            value,
            path: format!("{}[{}]", self.path, i),
        }
    }

    fn string(&self) -> Result<&'a str> {
        self.value
            .as_str()
            .ok_or_else(|| self.err("expected a string"))
    }

    /// Finite numeric leaf
    fn number(&self) -> Result<f64> {
        let n = self
            .value
            .as_f64()
            .ok_or_else(|| self.err("expected a number"))?;
        if !n.is_finite() {
            return Err(self.err("number must be finite"));
        }
        Ok(n)
    }

    /// Integer leaf; a double form must be exactly integral
    fn integer(&self) -> Result<i64> {
        if let Some(i) = self.value.as_i64() {
            return Ok(i);
        }
        let n = self.number()?;
        if n.fract() != 0.0 || n < i64::MIN as f64 || n > i64::MAX as f64 {
            return Err(self.err(format!("expected an integer, got {}", n)));
        }
        Ok(n as i64)
    }

    fn array(&self) -> Result<&'a Vec<Value>> {
        self.value
            .as_array()
            .ok_or_else(|| self.err("expected an array"))
    }

    /// Fixed-arity numeric vector; length is checked before elements
    fn vector<const N: usize>(&self) -> Result<[f64; N]> {
        let items = self.array()?;
        if items.len() != N {
            return Err(self.err(format!(
                "expected {} elements, got {}",
                N,
                items.len()
            )));
        }
        let mut out = [0.0; N];
        for (i, item) in items.iter().enumerate() {
            out[i] = self.index(i, item).number()?;
        }
        Ok(out)
    }
}

/// Accepted firmware generations
const SUPPORTED_VERSIONS: [i64; 2] = [7, 8];

/// Parse and validate a device-configuration payload.
///
/// The raw text is retained verbatim in the returned model.
pub fn parse_device_config(text: &str) -> Result<DeviceConfig> {
    let document: Value =
        serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
    let root = Node::root(&document);

    let version_node = root.require("glasses_version")?;
    let glasses_version = version_node.integer()?;
    if !SUPPORTED_VERSIONS.contains(&glasses_version) {
        log::warn!(
            "Unsupported glasses_version {} (validated generations: {:?})",
            glasses_version,
            SUPPORTED_VERSIONS
        );
        return Err(version_node.err(format!(
            "unsupported glasses_version {} (expected one of {:?})",
            glasses_version, SUPPORTED_VERSIONS
        )));
    }

    let fsn = root.require("FSN")?.string()?.to_string();

    let time_node = root.require("last_modified_time")?;
    let last_modified_time = time_node.string()?.to_string();
    validate_timestamp(&time_node, &last_modified_time)?;

    let display = parse_display(&root.require("display")?)?;

    let distortion = root.require("display_distortion")?;
    let distortion_left = parse_grid(&distortion.require("left_display")?)?;
    let distortion_right = parse_grid(&distortion.require("right_display")?)?;

    let rgb_camera = match root.optional("RGB_camera")? {
        Some(node) => Some(parse_camera_block(&node)?),
        None => None,
    };
    let slam_camera = match root.optional("SLAM_camera")? {
        Some(node) => Some(parse_slam_block(&node)?),
        None => None,
    };

    let imu = parse_imu(&root.require("IMU")?.require("device_1")?)?;

    Ok(DeviceConfig {
        glasses_version,
        fsn,
        last_modified_time,
        display,
        distortion_left,
        distortion_right,
        rgb_camera,
        slam_camera,
        imu,
        raw: text.to_string(),
    })
}

/// Check the `yyyy-MM-dd HH:mm:ss` shape
fn validate_timestamp(node: &Node, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 19
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b' '
        && bytes[13] == b':'
        && bytes[16] == b':'
        && [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18]
            .iter()
            .all(|&i| bytes[i].is_ascii_digit());
    if !shape_ok {
        return Err(node.err(format!(
            "expected timestamp as yyyy-MM-dd HH:mm:ss, got {:?}",
            s
        )));
    }
    let field = |a: usize, b: usize| s[a..b].parse::<u32>().unwrap_or(u32::MAX);
    let (month, day) = (field(5, 7), field(8, 10));
    let (hour, minute, second) = (field(11, 13), field(14, 16), field(17, 19));
    if !(1..=12).contains(&month)
        || !(1..=31).contains(&day)
        || hour > 23
        || minute > 59
        || second > 59
    {
        return Err(node.err(format!("timestamp field out of range in {:?}", s)));
    }
    Ok(())
}

fn parse_eye(node: &Node) -> Result<EyeDisplay> {
    Ok(EyeDisplay {
        intrinsic: node.require("intrinsic")?.vector::<9>()?,
        rotation: node.require("rotation")?.vector::<9>()?,
        position: node.require("position")?.vector::<3>()?,
    })
}

fn parse_display(node: &Node) -> Result<DisplayConfig> {
    let count_node = node.require("num_of_displays")?;
    let num_of_displays = count_node.integer()?;
    if num_of_displays != 2 {
        return Err(count_node.err(format!("expected 2 displays, got {}", num_of_displays)));
    }
    let type_node = node.require("target_type")?;
    let target_type = type_node.string()?.to_string();
    if target_type != "IMU" {
        return Err(type_node.err(format!("expected target_type \"IMU\", got {:?}", target_type)));
    }
    Ok(DisplayConfig {
        num_of_displays,
        target_type,
        left: parse_eye(&node.require("left_display")?)?,
        right: parse_eye(&node.require("right_display")?)?,
    })
}

fn parse_grid(node: &Node) -> Result<DistortionGrid> {
    let row_node = node.require("num_row")?;
    let num_row = row_node.integer()?;
    if num_row <= 0 {
        return Err(row_node.err(format!("expected a positive row count, got {}", num_row)));
    }
    let col_node = node.require("num_col")?;
    let num_col = col_node.integer()?;
    if num_col <= 0 {
        return Err(col_node.err(format!("expected a positive column count, got {}", num_col)));
    }

    let data_node = node.require("data")?;
    let items = data_node.array()?;
    if items.len() % 4 != 0 {
        return Err(data_node.err(format!(
            "grid data length {} is not a multiple of 4",
            items.len()
        )));
    }
    let expected = (num_row as usize) * (num_col as usize);
    if items.len() / 4 != expected {
        return Err(data_node.err(format!(
            "grid data holds {} points but num_row*num_col = {}",
            items.len() / 4,
            expected
        )));
    }

    let mut values = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        values.push(data_node.index(i, item).number()?);
    }
    let points = values
        .chunks_exact(4)
        .map(|q| GridPoint {
            u: q[0],
            v: q[1],
            x: q[2],
            y: q[3],
        })
        .collect();

    Ok(DistortionGrid {
        num_row: num_row as usize,
        num_col: num_col as usize,
        points,
    })
}

fn parse_camera(node: &Node) -> Result<CameraCalibration> {
    let resolution_node = node.require("resolution")?;
    let resolution_f = resolution_node.vector::<2>()?;
    let mut resolution = [0i64; 2];
    for (i, v) in resolution_f.iter().enumerate() {
        if v.fract() != 0.0 || *v <= 0.0 {
            return Err(resolution_node.err(format!(
                "expected positive integer resolution, got {:?}",
                resolution_f
            )));
        }
        resolution[i] = *v as i64;
    }
    Ok(CameraCalibration {
        cc: node.require("cc")?.vector::<2>()?,
        fc: node.require("fc")?.vector::<2>()?,
        kc: node.require("kc")?.vector::<5>()?,
        resolution,
        rolling_shutter_s: node.require("rolling_shutter_s")?.number()?,
    })
}

/// An optional camera block must declare exactly one camera
fn check_camera_count(node: &Node) -> Result<()> {
    let count_node = node.require("num_of_cameras")?;
    let count = count_node.integer()?;
    if count != 1 {
        return Err(count_node.err(format!("expected num_of_cameras 1, got {}", count)));
    }
    Ok(())
}

fn parse_camera_block(node: &Node) -> Result<CameraCalibration> {
    check_camera_count(node)?;
    parse_camera(&node.require("device_1")?)
}

fn parse_slam_block(node: &Node) -> Result<SlamCameraCalibration> {
    check_camera_count(node)?;
    let device = node.require("device_1")?;
    Ok(SlamCameraCalibration {
        camera: parse_camera(&device)?,
        rotation: device.require("rotation")?.vector::<9>()?,
        translation: device.require("translation")?.vector::<3>()?,
    })
}

fn parse_intrinsics(node: &Node) -> Result<SensorIntrinsics> {
    Ok(SensorIntrinsics {
        peak_to_peak: node.require("peak_to_peak")?.number()?,
        std_dev: node.require("std")?.number()?,
        bias: node.require("bias")?.vector::<3>()?,
        calibration_matrix: node.require("calibration_matrix")?.vector::<9>()?,
    })
}

/// Require a vector field to hold an exact literal value
fn require_literal<const N: usize>(node: &Node, key: &str, expected: [f64; N]) -> Result<()> {
    let field = node.require(key)?;
    let actual = field.vector::<N>()?;
    if actual != expected {
        return Err(field.err(format!(
            "expected the fixed value {:?}, got {:?}",
            expected, actual
        )));
    }
    Ok(())
}

fn parse_imu(node: &Node) -> Result<ImuCalibration> {
    // Neutral factory constants; a deviation means an incompatible payload
    require_literal(node, "accel_q_gyro", [0.0, 0.0, 0.0, 1.0])?;
    require_literal(node, "accel_scale", [1.0, 1.0, 1.0])?;
    require_literal(node, "gyro_scale", [1.0, 1.0, 1.0])?;
    require_literal(node, "accel_skew", [0.0, 0.0, 0.0])?;
    require_literal(node, "gyro_skew", [0.0, 0.0, 0.0])?;

    let sweep_node = node.require("gyro_bias_temp_data")?;
    let entries = sweep_node.array()?;
    if entries.is_empty() {
        return Err(sweep_node.err("temperature sweep must not be empty"));
    }
    let mut gyro_bias_temp_data = Vec::with_capacity(entries.len());
    let mut previous = f64::NEG_INFINITY;
    for (i, entry) in entries.iter().enumerate() {
        let entry_node = sweep_node.index(i, entry);
        let temp_node = entry_node.require("temperature")?;
        let temperature = temp_node.number()?;
        if temperature < previous {
            return Err(temp_node.err(format!(
                "temperatures must be non-decreasing ({} after {})",
                temperature, previous
            )));
        }
        previous = temperature;
        gyro_bias_temp_data.push(GyroBiasSample {
            temperature,
            bias: entry_node.require("gyro_bias")?.vector::<3>()?,
        });
    }

    Ok(ImuCalibration {
        accel_bias: node.require("accel_bias")?.vector::<3>()?,
        gyro_bias: node.require("gyro_bias")?.vector::<3>()?,
        gyro_bias_temp_data,
        mag_transform: node.require("mag_transform")?.vector::<9>()?,
        accel_intrinsic: parse_intrinsics(&node.require("accel_intrinsic")?)?,
        gyro_intrinsic: parse_intrinsics(&node.require("gyro_intrinsic")?)?,
        static_detect_window_size: node.require("static_detect_window_size")?.integer()?,
        mean_temperature: node.require("mean_temperature")?.number()?,
        imu_noise: node.require("imu_noise")?.vector::<4>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eye() -> Value {
        json!({
            "intrinsic": [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            "rotation": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            "position": [0.032, 0.0, 0.0],
        })
    }

    fn grid(rows: usize, cols: usize) -> Value {
        let mut data = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                data.extend_from_slice(&[
                    c as f64 / cols as f64,
                    r as f64 / rows as f64,
                    c as f64,
                    r as f64,
                ]);
            }
        }
        json!({ "num_row": rows, "num_col": cols, "data": data })
    }

    fn camera() -> Value {
        json!({
            "cc": [319.5, 239.5],
            "fc": [275.0, 275.0],
            "kc": [0.01, -0.002, 0.0, 0.0, 0.0003],
            "resolution": [640, 480],
            "rolling_shutter_s": 0.021,
        })
    }

    fn intrinsics() -> Value {
        json!({
            "peak_to_peak": 0.02,
            "std": 0.004,
            "bias": [0.001, -0.002, 0.0005],
            "calibration_matrix": [1.001, 0.0, 0.0, 0.0, 0.998, 0.0, 0.0, 0.0, 1.0],
        })
    }

    fn sample() -> Value {
        json!({
            "glasses_version": 8,
            "FSN": "XR1P2403A00042",
            "last_modified_time": "2024-07-01 12:30:45",
            "display": {
                "num_of_displays": 2,
                "target_type": "IMU",
                "left_display": eye(),
                "right_display": eye(),
            },
            "display_distortion": {
                "left_display": grid(3, 4),
                "right_display": grid(3, 4),
            },
            "RGB_camera": { "num_of_cameras": 1, "device_1": camera() },
            "SLAM_camera": {
                "num_of_cameras": 1,
                "device_1": {
                    "cc": [319.5, 239.5],
                    "fc": [275.0, 275.0],
                    "kc": [0.01, -0.002, 0.0, 0.0, 0.0003],
                    "resolution": [640, 480],
                    "rolling_shutter_s": 0.0,
                    "rotation": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                    "translation": [0.01, -0.002, 0.004],
                },
            },
            "IMU": {
                "device_1": {
                    "accel_bias": [0.012, -0.03, 0.008],
                    "gyro_bias": [0.4, -0.2, 0.1],
                    "accel_q_gyro": [0.0, 0.0, 0.0, 1.0],
                    "accel_scale": [1.0, 1.0, 1.0],
                    "gyro_scale": [1.0, 1.0, 1.0],
                    "accel_skew": [0.0, 0.0, 0.0],
                    "gyro_skew": [0.0, 0.0, 0.0],
                    "gyro_bias_temp_data": [
                        { "temperature": 20.0, "gyro_bias": [0.30, -0.15, 0.05] },
                        { "temperature": 30.0, "gyro_bias": [0.40, -0.20, 0.10] },
                        { "temperature": 45.0, "gyro_bias": [0.55, -0.30, 0.18] },
                    ],
                    "mag_transform": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                    "accel_intrinsic": intrinsics(),
                    "gyro_intrinsic": intrinsics(),
                    "static_detect_window_size": 100,
                    "mean_temperature": 32.5,
                    "imu_noise": [0.002, 0.0001, 0.02, 0.0005],
                }
            },
        })
    }

    fn parse_value(v: &Value) -> crate::error::Result<DeviceConfig> {
        parse_device_config(&v.to_string())
    }

    fn expect_schema_error(v: &Value, path_token: &str) {
        match parse_value(v) {
            Err(Error::SchemaValidation { path, .. }) => {
                assert!(
                    path.contains(path_token),
                    "path {:?} should contain {:?}",
                    path,
                    path_token
                );
            }
            other => panic!("expected SchemaValidation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_parse_valid_document() {
        let config = parse_value(&sample()).unwrap();
        assert_eq!(config.glasses_version, 8);
        assert_eq!(config.fsn, "XR1P2403A00042");
        assert_eq!(config.display.num_of_displays, 2);
        assert_eq!(config.distortion_left.points.len(), 12);
        assert_eq!(config.distortion_left.num_row, 3);
        assert!(config.rgb_camera.is_some());
        assert!(config.slam_camera.is_some());
        assert_eq!(config.imu.gyro_bias_temp_data.len(), 3);
        assert_eq!(config.imu.imu_noise.len(), 4);
        assert!(!config.raw.is_empty());
    }

    #[test]
    fn test_version_seven_accepted() {
        let mut doc = sample();
        doc["glasses_version"] = json!(7);
        assert!(parse_value(&doc).is_ok());
        // Integral double form is also an integer
        doc["glasses_version"] = json!(7.0);
        assert!(parse_value(&doc).is_ok());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut doc = sample();
        doc["glasses_version"] = json!(6);
        expect_schema_error(&doc, "glasses_version");
    }

    #[test]
    fn test_non_integral_version_rejected() {
        let mut doc = sample();
        doc["glasses_version"] = json!(7.5);
        expect_schema_error(&doc, "glasses_version");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        assert!(matches!(
            parse_device_config("{ not json"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_missing_fsn() {
        let mut doc = sample();
        doc.as_object_mut().unwrap().remove("FSN");
        expect_schema_error(&doc, "FSN");
    }

    #[test]
    fn test_bad_timestamp() {
        let mut doc = sample();
        doc["last_modified_time"] = json!("2024/07/01 12:30:45");
        expect_schema_error(&doc, "last_modified_time");
        doc["last_modified_time"] = json!("2024-13-01 12:30:45");
        expect_schema_error(&doc, "last_modified_time");
    }

    #[test]
    fn test_wrong_display_count() {
        let mut doc = sample();
        doc["display"]["num_of_displays"] = json!(1);
        expect_schema_error(&doc, "num_of_displays");
    }

    #[test]
    fn test_wrong_target_type() {
        let mut doc = sample();
        doc["display"]["target_type"] = json!("HMD");
        expect_schema_error(&doc, "target_type");
    }

    #[test]
    fn test_grid_dimension_mismatch() {
        let mut doc = sample();
        // Remove one whole point: still a multiple of 4 but 11 != 3*4
        let data = doc["display_distortion"]["left_display"]["data"]
            .as_array_mut()
            .unwrap();
        data.truncate(data.len() - 4);
        expect_schema_error(&doc, "left_display.data");
    }

    #[test]
    fn test_grid_ragged_data() {
        let mut doc = sample();
        let data = doc["display_distortion"]["right_display"]["data"]
            .as_array_mut()
            .unwrap();
        data.pop();
        expect_schema_error(&doc, "right_display.data");
    }

    #[test]
    fn test_wrong_vector_arity() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["gyro_bias"] = json!([0.1, 0.2]);
        expect_schema_error(&doc, "gyro_bias");
    }

    #[test]
    fn test_kc_arity() {
        let mut doc = sample();
        doc["RGB_camera"]["device_1"]["kc"] = json!([0.1, 0.2, 0.3]);
        expect_schema_error(&doc, "kc");
    }

    #[test]
    fn test_camera_count_must_be_one() {
        let mut doc = sample();
        doc["RGB_camera"]["num_of_cameras"] = json!(2);
        expect_schema_error(&doc, "num_of_cameras");
    }

    #[test]
    fn test_optional_cameras_absent() {
        let mut doc = sample();
        doc.as_object_mut().unwrap().remove("RGB_camera");
        doc.as_object_mut().unwrap().remove("SLAM_camera");
        let config = parse_value(&doc).unwrap();
        assert!(config.rgb_camera.is_none());
        assert!(config.slam_camera.is_none());
    }

    #[test]
    fn test_neutral_quaternion_enforced() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["accel_q_gyro"] = json!([0.0, 0.1, 0.0, 0.995]);
        expect_schema_error(&doc, "accel_q_gyro");
    }

    #[test]
    fn test_identity_scale_enforced() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["gyro_scale"] = json!([1.01, 1.0, 1.0]);
        expect_schema_error(&doc, "gyro_scale");
    }

    #[test]
    fn test_empty_temperature_sweep_rejected() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["gyro_bias_temp_data"] = json!([]);
        expect_schema_error(&doc, "gyro_bias_temp_data");
    }

    #[test]
    fn test_decreasing_temperatures_rejected() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["gyro_bias_temp_data"][2]["temperature"] = json!(25.0);
        expect_schema_error(&doc, "gyro_bias_temp_data[2].temperature");
    }

    #[test]
    fn test_equal_temperatures_accepted() {
        let mut doc = sample();
        doc["IMU"]["device_1"]["gyro_bias_temp_data"][1]["temperature"] = json!(20.0);
        assert!(parse_value(&doc).is_ok());
    }

    #[test]
    fn test_raw_text_retained() {
        let text = sample().to_string();
        let config = parse_device_config(&text).unwrap();
        assert_eq!(config.raw, text);
    }
}
