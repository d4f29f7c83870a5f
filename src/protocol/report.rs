//! Sensor report frames and the resynchronizing stream framer
//!
//! Frame format: `[MAGIC0] [MAGIC1] [LEN u32 BE] [BODY]`
//!
//! - `MAGIC0` is 0x28 or 0x27, `MAGIC1` is 0x36
//! - `LEN` is always 128; any other value marks a false magic match
//! - the body is little-endian throughout:
//!
//! ```text
//! +0x00  u64   device_id
//! +0x08  u64   hmd_time_ns
//! +0x18  u32   report kind (0x0B = IMU, 0x04 = magnetometer)
//! +0x1C  f32×3 gyro x,y,z
//! +0x28  f32×3 accel x,y,z
//! +0x34  f32×3 mag x,y,z
//! +0x40  f32   temperature °C
//! +0x44  u8    imu id
//! +0x45  u8×3  frame counter (24-bit)
//! ```
//!
//! The TCP stream may begin mid-frame and chunk boundaries are arbitrary, so
//! [`ReportFramer`] buffers bytes and scans for frame boundaries: garbage
//! before a magic pair is discarded and counted, a magic pair with a wrong
//! length advances the scan by a single byte (a real frame may overlap the
//! false match), and malformed bodies are counted without stopping the
//! stream.

use crate::types::{ReportKind, SensorReport};

/// Accepted first magic bytes
const MAGIC0_A: u8 = 0x28;
const MAGIC0_B: u8 = 0x27;
/// Second magic byte
const MAGIC1: u8 = 0x36;
/// Header size: two magic bytes + big-endian length
pub const HEADER_LEN: usize = 6;
/// The only accepted body length
pub const BODY_LEN: usize = 128;

/// Report kind wire values
const KIND_IMU: u32 = 0x0B;
const KIND_MAG: u32 = 0x04;

/// Pending-buffer bound; the front is discarded beyond this
const MAX_PENDING_BYTES: usize = 131_072;

/// Framer health counters
///
/// Monotonic over the life of the framer; snapshotted into diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerCounters {
    /// Bytes discarded while hunting for a frame boundary
    pub dropped_bytes: u64,
    /// Headers whose length field was not the report body size
    pub invalid_report_length: u64,
    /// Bodies that failed to decode
    pub decode_errors: u64,
    /// Reports carrying an unrecognized kind value
    pub unknown_report_types: u64,
    /// IMU reports emitted
    pub imu_reports: u64,
    /// Magnetometer reports emitted
    pub mag_reports: u64,
}

fn is_magic_pair(b0: u8, b1: u8) -> bool {
    (b0 == MAGIC0_A || b0 == MAGIC0_B) && b1 == MAGIC1
}

/// Why a fixed-size body failed to decode
enum BodyError {
    UnknownKind(u32),
}

/// Decode a 128-byte report body
fn decode_body(body: &[u8]) -> Result<SensorReport, BodyError> {
    debug_assert_eq!(body.len(), BODY_LEN);

    let u64_at = |o: usize| {
        u64::from_le_bytes([
            body[o],
            body[o + 1],
            body[o + 2],
            body[o + 3],
            body[o + 4],
            body[o + 5],
            body[o + 6],
            body[o + 7],
        ])
    };
    let u32_at = |o: usize| u32::from_le_bytes([body[o], body[o + 1], body[o + 2], body[o + 3]]);
    let f32_at = |o: usize| f32::from_le_bytes([body[o], body[o + 1], body[o + 2], body[o + 3]]);

    let kind = match u32_at(0x18) {
        KIND_IMU => ReportKind::Imu,
        KIND_MAG => ReportKind::Magnetometer,
        other => return Err(BodyError::UnknownKind(other)),
    };

    Ok(SensorReport {
        device_id: u64_at(0x00),
        hmd_time_ns: u64_at(0x08),
        kind,
        gyro: [f32_at(0x1C), f32_at(0x20), f32_at(0x24)],
        accel: [f32_at(0x28), f32_at(0x2C), f32_at(0x30)],
        mag: [f32_at(0x34), f32_at(0x38), f32_at(0x3C)],
        temperature_c: f32_at(0x40),
        imu_id: body[0x44],
        frame_id: [body[0x45], body[0x46], body[0x47]],
    })
}

/// Encode a report into a full frame (header + body).
///
/// Used by simulators and tests to synthesize device traffic; the library
/// never sends report frames itself.
pub fn encode_frame(report: &SensorReport) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + BODY_LEN);
    out.push(MAGIC0_A);
    out.push(MAGIC1);
    out.extend_from_slice(&(BODY_LEN as u32).to_be_bytes());

    let mut body = [0u8; BODY_LEN];
    body[0x00..0x08].copy_from_slice(&report.device_id.to_le_bytes());
    body[0x08..0x10].copy_from_slice(&report.hmd_time_ns.to_le_bytes());
    let kind = match report.kind {
        ReportKind::Imu => KIND_IMU,
        ReportKind::Magnetometer => KIND_MAG,
    };
    body[0x18..0x1C].copy_from_slice(&kind.to_le_bytes());
    for (i, v) in report.gyro.iter().enumerate() {
        body[0x1C + 4 * i..0x20 + 4 * i].copy_from_slice(&v.to_le_bytes());
    }
    for (i, v) in report.accel.iter().enumerate() {
        body[0x28 + 4 * i..0x2C + 4 * i].copy_from_slice(&v.to_le_bytes());
    }
    for (i, v) in report.mag.iter().enumerate() {
        body[0x34 + 4 * i..0x38 + 4 * i].copy_from_slice(&v.to_le_bytes());
    }
    body[0x40..0x44].copy_from_slice(&report.temperature_c.to_le_bytes());
    body[0x44] = report.imu_id;
    body[0x45..0x48].copy_from_slice(&report.frame_id);

    out.extend_from_slice(&body);
    out
}

/// Append-and-drain framer over a chunked byte stream
///
/// Feed arbitrary chunks with [`ReportFramer::push`]; complete reports come
/// back in byte-stream order. Splitting the stream at any point yields the
/// same report sequence as feeding it whole.
#[derive(Default)]
pub struct ReportFramer {
    pending: Vec<u8>,
    counters: FramerCounters,
}

impl ReportFramer {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(4 * (HEADER_LEN + BODY_LEN)),
            counters: FramerCounters::default(),
        }
    }

    /// Current counter snapshot
    pub fn counters(&self) -> FramerCounters {
        self.counters
    }

    /// Bytes waiting for a complete frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append a chunk and drain every complete report it unlocks
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SensorReport> {
        self.pending.extend_from_slice(bytes);

        // Bound the pending buffer; stale front bytes can never frame
        if self.pending.len() > MAX_PENDING_BYTES {
            let excess = self.pending.len() - MAX_PENDING_BYTES;
            self.pending.drain(0..excess);
            self.counters.dropped_bytes += excess as u64;
        }

        let mut reports = Vec::new();
        loop {
            match self.try_next() {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        reports
    }

    /// Attempt to extract one report; None means more bytes are needed
    fn try_next(&mut self) -> Option<SensorReport> {
        loop {
            if self.pending.len() < 2 {
                return None;
            }

            // Scan for a magic pair, discarding everything in front of it
            let sync = (0..self.pending.len() - 1)
                .find(|&i| is_magic_pair(self.pending[i], self.pending[i + 1]));
            let Some(sync) = sync else {
                // No pair; the final byte may start one, keep it
                let drop = self.pending.len() - 1;
                if drop > 0 {
                    self.pending.drain(0..drop);
                    self.counters.dropped_bytes += drop as u64;
                }
                return None;
            };
            if sync > 0 {
                self.pending.drain(0..sync);
                self.counters.dropped_bytes += sync as u64;
            }

            if self.pending.len() < HEADER_LEN {
                return None;
            }

            let len = u32::from_be_bytes([
                self.pending[2],
                self.pending[3],
                self.pending[4],
                self.pending[5],
            ]) as usize;
            if len != BODY_LEN {
                // False magic; step past its first byte so an overlapping
                // real frame is still found
                self.counters.invalid_report_length += 1;
                self.pending.drain(0..1);
                self.counters.dropped_bytes += 1;
                continue;
            }

            if self.pending.len() < HEADER_LEN + BODY_LEN {
                return None;
            }

            let result = decode_body(&self.pending[HEADER_LEN..HEADER_LEN + BODY_LEN]);
            self.pending.drain(0..HEADER_LEN + BODY_LEN);
            match result {
                Ok(report) => {
                    match report.kind {
                        ReportKind::Imu => self.counters.imu_reports += 1,
                        ReportKind::Magnetometer => self.counters.mag_reports += 1,
                    }
                    return Some(report);
                }
                Err(BodyError::UnknownKind(wire)) => {
                    log::debug!("Dropping report with unknown type 0x{:02X}", wire);
                    self.counters.unknown_report_types += 1;
                }
            }
        }
    }
}
