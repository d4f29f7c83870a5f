//! Head orientation tracking
//!
//! Fuses the glasses' gyro and accelerometer into a camera-ready Euler
//! orientation:
//!
//! 1. **Stillness calibration**: while the device rests, factory-bias-
//!    corrected gyro readings are accumulated; their mean becomes the
//!    residual bias subtracted from every later sample.
//! 2. **Complementary filter**: gyro integration gives responsive short-term
//!    rotation, the accelerometer's gravity direction pins pitch and roll
//!    long-term. Yaw has no absolute reference and stays pure integration.
//!
//! | Source | Strength                 | Weakness                 |
//! |--------|--------------------------|--------------------------|
//! | Gyro   | Smooth, fast, all axes   | Bias integrates to drift |
//! | Accel  | Absolute pitch/roll      | Noisy, motion-sensitive  |
//!
//! Integration runs purely on device time. The firmware guarantees a
//! monotonic clock, so a non-increasing timestamp means the stream is
//! corrupt and the tracker refuses to continue rather than integrate a
//! negative interval.

pub mod smoother;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::types::{CalibrationProgress, EulerDeg};

/// One point of the factory gyro-bias temperature curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroBiasPoint {
    pub temperature: f32,
    pub bias: [f32; 3],
}

/// Factory bias data the tracker applies
///
/// `accel_bias` must already be expressed in the tracker's axis convention
/// (the caller remaps it together with the samples, so subtraction commutes
/// with the remap). `gyro_temp_curve` is non-empty and temperature-sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasConfig {
    pub accel_bias: [f32; 3],
    pub gyro_temp_curve: Vec<GyroBiasPoint>,
}

impl BiasConfig {
    /// Zero bias with a flat curve; used when tracking without a loaded
    /// device configuration
    pub fn neutral() -> Self {
        Self {
            accel_bias: [0.0; 3],
            gyro_temp_curve: vec![GyroBiasPoint {
                temperature: 0.0,
                bias: [0.0; 3],
            }],
        }
    }

    /// Factory gyro bias at temperature `t` (clamped linear interpolation)
    pub fn gyro_bias_at(&self, t: f32) -> [f32; 3] {
        let curve = &self.gyro_temp_curve;
        let first = &curve[0];
        let last = &curve[curve.len() - 1];
        if t <= first.temperature {
            return first.bias;
        }
        if t >= last.temperature {
            return last.bias;
        }
        for pair in curve.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if t <= hi.temperature {
                let span = hi.temperature - lo.temperature;
                if span <= 0.0 {
                    return lo.bias;
                }
                let w = (t - lo.temperature) / span;
                return [
                    lo.bias[0] + w * (hi.bias[0] - lo.bias[0]),
                    lo.bias[1] + w * (hi.bias[1] - lo.bias[1]),
                    lo.bias[2] + w * (hi.bias[2] - lo.bias[2]),
                ];
            }
        }
        last.bias
    }
}

/// One inertial sample in the tracker frame (after the stream-side remap)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSample {
    /// Angular rate, deg/s
    pub gyro: [f32; 3],
    /// Linear acceleration, g
    pub accel: [f32; 3],
    /// Die temperature, °C
    pub temperature_c: f32,
}

/// Result of feeding one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerStep {
    /// Still calibrating; carries the progress snapshot
    Calibrating(CalibrationProgress),
    /// Calibration done, first timestamp recorded, nothing to emit yet
    Primed,
    /// A fused orientation was produced
    Updated(TrackerUpdate),
}

/// Output of one successful update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerUpdate {
    pub absolute: EulerDeg,
    pub relative: EulerDeg,
    /// Integration interval, seconds
    pub dt: f64,
    /// Residual gyro bias in effect, deg/s
    pub gyro_bias: [f32; 3],
}

enum State {
    Calibrating { count: u32, accum: [f64; 3] },
    Calibrated {
        residual_bias: [f32; 3],
        /// pitch, yaw, roll in degrees
        euler: [f32; 3],
        zero_offsets: [f32; 3],
        last_ts: Option<u64>,
    },
}

/// Minimum corrected-accel magnitude for the tilt estimate to be trusted
const ACCEL_EPSILON: f32 = 0.01;

/// Complementary-filter head tracker
pub struct HeadTracker {
    config: TrackerConfig,
    bias: BiasConfig,
    state: State,
}

impl HeadTracker {
    pub fn new(config: TrackerConfig, bias: BiasConfig) -> Self {
        debug_assert!(!bias.gyro_temp_curve.is_empty());
        Self {
            config,
            bias,
            state: State::Calibrating {
                count: 0,
                accum: [0.0; 3],
            },
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, State::Calibrated { .. })
    }

    /// Accel bias the tracker subtracts (tracker frame)
    pub fn accel_bias(&self) -> [f32; 3] {
        self.bias.accel_bias
    }

    /// Feed one timestamped sample
    pub fn process(&mut self, hmd_time_ns: u64, sample: TrackerSample) -> Result<TrackerStep> {
        match &mut self.state {
            State::Calibrating { count, accum } => {
                let factory = self.bias.gyro_bias_at(sample.temperature_c);
                accum[0] += (sample.gyro[0] - factory[0]) as f64;
                accum[1] += (sample.gyro[1] - factory[1]) as f64;
                accum[2] += (sample.gyro[2] - factory[2]) as f64;
                *count += 1;

                let target = self.config.calibration_target;
                if *count >= target {
                    let n = *count as f64;
                    let residual_bias = [
                        (accum[0] / n) as f32,
                        (accum[1] / n) as f32,
                        (accum[2] / n) as f32,
                    ];
                    log::info!(
                        "Gyro calibration complete after {} samples: residual bias [{:.4}, {:.4}, {:.4}] deg/s",
                        count,
                        residual_bias[0],
                        residual_bias[1],
                        residual_bias[2]
                    );
                    self.state = State::Calibrated {
                        residual_bias,
                        euler: [0.0; 3],
                        zero_offsets: [0.0; 3],
                        last_ts: None,
                    };
                    Ok(TrackerStep::Calibrating(CalibrationProgress {
                        samples: target,
                        target,
                        complete: true,
                    }))
                } else {
                    Ok(TrackerStep::Calibrating(CalibrationProgress {
                        samples: *count,
                        target,
                        complete: false,
                    }))
                }
            }
            State::Calibrated {
                residual_bias,
                euler,
                zero_offsets,
                last_ts,
            } => {
                let Some(prev) = *last_ts else {
                    *last_ts = Some(hmd_time_ns);
                    return Ok(TrackerStep::Primed);
                };

                if hmd_time_ns <= prev {
                    return Err(Error::Protocol(format!(
                        "non-monotonic device timestamp: {} after {}",
                        hmd_time_ns, prev
                    )));
                }
                let dt = (hmd_time_ns - prev) as f64 / 1e9;
                if !dt.is_finite() || dt <= 0.0 {
                    return Err(Error::Protocol(format!(
                        "invalid integration interval {} s",
                        dt
                    )));
                }
                *last_ts = Some(hmd_time_ns);

                // Gyro integration with factory + residual bias removed
                let factory = self.bias.gyro_bias_at(sample.temperature_c);
                let dtf = dt as f32;
                let mut next = [0.0f32; 3];
                for i in 0..3 {
                    let rate = sample.gyro[i] - factory[i] - residual_bias[i];
                    next[i] = euler[i] + rate * dtf;
                }

                // Gravity-referenced tilt, blended in when the corrected
                // accel magnitude is meaningful
                let ca = [
                    sample.accel[0] - self.bias.accel_bias[0],
                    sample.accel[1] - self.bias.accel_bias[1],
                    sample.accel[2] - self.bias.accel_bias[2],
                ];
                let magnitude = (ca[0] * ca[0] + ca[1] * ca[1] + ca[2] * ca[2]).sqrt();
                if magnitude > ACCEL_EPSILON {
                    let pitch_acc =
                        (-ca[0]).atan2((ca[1] * ca[1] + ca[2] * ca[2]).sqrt()).to_degrees();
                    let roll_acc = ca[1].atan2(ca[2]).to_degrees();
                    let alpha = self.config.alpha;
                    next[0] = alpha * next[0] + (1.0 - alpha) * pitch_acc;
                    // Yaw has no absolute reference; keep the integration
                    next[2] = alpha * next[2] + (1.0 - alpha) * roll_acc;
                }

                for v in &mut next {
                    *v = wrap_degrees(*v);
                }
                *euler = next;

                let absolute = EulerDeg::new(next[0], next[1], next[2]);
                let relative = relative_of(next, *zero_offsets, self.config.axis_scale);
                Ok(TrackerStep::Updated(TrackerUpdate {
                    absolute,
                    relative,
                    dt,
                    gyro_bias: *residual_bias,
                }))
            }
        }
    }

    /// Recenter: the current orientation becomes the identity for relative
    /// output. No-op while calibrating.
    pub fn zero_view(&mut self) {
        if let State::Calibrated {
            euler, zero_offsets, ..
        } = &mut self.state
        {
            *zero_offsets = *euler;
            log::debug!(
                "Zero view at pitch {:.2} yaw {:.2} roll {:.2}",
                euler[0],
                euler[1],
                euler[2]
            );
        }
    }

    /// Drop all state and calibrate again from scratch
    pub fn reset(&mut self) {
        self.state = State::Calibrating {
            count: 0,
            accum: [0.0; 3],
        };
    }
}

fn relative_of(euler: [f32; 3], offsets: [f32; 3], scale: [f32; 3]) -> EulerDeg {
    EulerDeg::new(
        wrap_degrees((euler[0] - offsets[0]) * scale[0]),
        wrap_degrees((euler[1] - offsets[1]) * scale[1]),
        wrap_degrees((euler[2] - offsets[2]) * scale[2]),
    )
}

/// Wrap an angle to (−180, 180]
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}
