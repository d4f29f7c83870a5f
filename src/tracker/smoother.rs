//! 1-euro smoothing for relative orientation
//!
//! A per-axis low-pass whose cutoff adapts to speed: slow motion gets heavy
//! smoothing (jitter removal), fast motion gets a high cutoff (low lag).
//! Angles need one extra trick — inputs are wrapped to (−180, 180], so the
//! filter tracks an unwrapped accumulator built from wrapped per-step deltas
//! and re-wraps on output; otherwise a crossing at ±180° would smooth
//! through zero.
//!
//! Only the relative orientation is ever smoothed. Absolute orientation goes
//! out raw so downstream consumers can do their own filtering.

use crate::config::SmootherConfig;
use crate::tracker::wrap_degrees;
use crate::types::EulerDeg;

/// Smoothing factor for a first-order low-pass at `cutoff` Hz over `dt`
fn smoothing_factor(dt: f32, cutoff: f32) -> f32 {
    let tau = 1.0 / (2.0 * std::f32::consts::PI * cutoff);
    1.0 / (1.0 + tau / dt)
}

/// One-euro filter over a single wrapped angle
#[derive(Debug, Clone, Copy, Default)]
struct OneEuroAngle {
    initialized: bool,
    /// Last wrapped input
    prev: f32,
    /// Unwrapped input accumulator
    unwrapped: f32,
    /// Low-passed unwrapped value
    filtered: f32,
    /// Low-passed derivative, deg/s
    derivative: f32,
}

impl OneEuroAngle {
    /// Seed every state component from one sample
    fn prime(&mut self, angle: f32) {
        self.initialized = true;
        self.prev = angle;
        self.unwrapped = angle;
        self.filtered = angle;
        self.derivative = 0.0;
    }

    fn reset(&mut self) {
        self.initialized = false;
    }

    fn step(&mut self, angle: f32, dt: f32, config: &SmootherConfig) -> f32 {
        if !self.initialized || !dt.is_finite() || dt <= 0.0 || dt > config.max_delta {
            self.prime(angle);
            return angle;
        }

        let delta = wrap_degrees(angle - self.prev);
        self.prev = angle;
        self.unwrapped += delta;

        let a_d = smoothing_factor(dt, config.derivative_cutoff);
        self.derivative = a_d * (delta / dt) + (1.0 - a_d) * self.derivative;

        let cutoff = config.min_cutoff + config.beta * self.derivative.abs();
        let a = smoothing_factor(dt, cutoff);
        self.filtered = a * self.unwrapped + (1.0 - a) * self.filtered;

        wrap_degrees(self.filtered)
    }
}

/// Three-axis pose smoother
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    config: SmootherConfig,
    pitch: OneEuroAngle,
    yaw: OneEuroAngle,
    roll: OneEuroAngle,
}

impl PoseSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            pitch: OneEuroAngle::default(),
            yaw: OneEuroAngle::default(),
            roll: OneEuroAngle::default(),
        }
    }

    /// Seed all axes from one orientation
    pub fn prime(&mut self, pose: EulerDeg) {
        self.pitch.prime(pose.pitch);
        self.yaw.prime(pose.yaw);
        self.roll.prime(pose.roll);
    }

    /// Forget all state; the next sample re-primes
    pub fn reset(&mut self) {
        self.pitch.reset();
        self.yaw.reset();
        self.roll.reset();
    }

    /// Smooth one orientation sample taken `dt` seconds after the previous
    pub fn apply(&mut self, pose: EulerDeg, dt: f32) -> EulerDeg {
        EulerDeg::new(
            self.pitch.step(pose.pitch, dt, &self.config),
            self.yaw.step(pose.yaw, dt, &self.config),
            self.roll.step(pose.roll, dt, &self.config),
        )
    }
}
