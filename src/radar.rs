//! HLK-LD2450 radar frame decoding.
//!
//! The sensor streams fixed 30-byte frames over UART at 256000 baud:
//!
//! | Bytes  | Content                               |
//! |--------|---------------------------------------|
//! | 0-3    | Header `AA FF 03 00`                  |
//! | 4-11   | Target 1                              |
//! | 12-19  | Target 2                              |
//! | 20-27  | Target 3                              |
//! | 28-29  | Footer `55 CC`                        |
//!
//! Each target is x, y, speed (sign-magnitude, little-endian, bit 15 set
//! for non-negative values) followed by a plain little-endian resolution;
//! resolution 0 marks an empty slot.

use heapless::Deque;

use crate::entity::EntityId;
use crate::scanner::{Sample, SignalSource};
use crate::settings::Settings;

pub const FRAME_LEN: usize = 30;
pub const FRAME_HEADER: [u8; 4] = [0xAA, 0xFF, 0x03, 0x00];
pub const FRAME_FOOTER: [u8; 2] = [0x55, 0xCC];

/// Simultaneous targets the sensor reports
pub const TARGET_SLOTS: usize = 3;

/// Sensor range limit, reported as the closest distance when no slot is present
pub const MAX_RANGE_CM: u16 = 600;

const TARGET_LEN: usize = 8;

/// One target record of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadarTarget {
    pub x_mm: i16,
    pub y_mm: i16,
    pub speed_cm_s: i16,
    pub resolution: u16,
}

impl RadarTarget {
    fn decode(bytes: &[u8]) -> Self {
        Self {
            x_mm: decode_signed(bytes[0], bytes[1]),
            y_mm: decode_signed(bytes[2], bytes[3]),
            speed_cm_s: decode_signed(bytes[4], bytes[5]),
            resolution: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.resolution != 0
    }

    /// Distance from the sensor in centimeters, rounded
    pub fn distance_cm(&self) -> u16 {
        let x = self.x_mm as f32;
        let y = self.y_mm as f32;
        libm::roundf(libm::sqrtf(x * x + y * y) / 10.0) as u16
    }
}

/// Decode a sign-magnitude field: the top bit of `high` is set for
/// non-negative values, the remaining 15 bits are the magnitude.
pub fn decode_signed(low: u8, high: u8) -> i16 {
    let magnitude = (((high & 0x7F) as i16) << 8) | low as i16;
    if high & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Byte-wise frame accumulator with one-byte-shift resynchronization.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: [u8; FRAME_LEN],
    len: usize,
    frames: u32,
    resyncs: u32,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buf: [0; FRAME_LEN],
            len: 0,
            frames: 0,
            resyncs: 0,
        }
    }

    /// Feed one byte. Returns the decoded targets when it completes a
    /// valid frame.
    ///
    /// A full buffer that fails validation drops its oldest byte and waits
    /// for the next one, so a misaligned stream recovers one byte at a time.
    pub fn push(&mut self, byte: u8) -> Option<[RadarTarget; TARGET_SLOTS]> {
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < FRAME_LEN {
            return None;
        }

        if self.buf[..4] == FRAME_HEADER && self.buf[FRAME_LEN - 2..] == FRAME_FOOTER {
            let mut targets = [RadarTarget::default(); TARGET_SLOTS];
            for (i, t) in targets.iter_mut().enumerate() {
                let start = 4 + i * TARGET_LEN;
                *t = RadarTarget::decode(&self.buf[start..start + TARGET_LEN]);
            }
            self.len = 0;
            self.frames = self.frames.wrapping_add(1);
            Some(targets)
        } else {
            self.buf.copy_within(1.., 0);
            self.len = FRAME_LEN - 1;
            self.resyncs = self.resyncs.wrapping_add(1);
            None
        }
    }

    pub fn buffered(&self) -> usize {
        self.len
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Byte shifts spent resynchronizing
    pub fn resyncs(&self) -> u32 {
        self.resyncs
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples buffered between drains (four frames' worth)
pub const RADAR_QUEUE_LEN: usize = 4 * TARGET_SLOTS;

/// Radar front end: decodes the UART stream and yields one sample per slot
/// per frame. Slot ids are 1-based.
#[derive(Debug, Default)]
pub struct RadarSource {
    decoder: FrameDecoder,
    pending: Deque<Sample, RADAR_QUEUE_LEN>,
    last: [RadarTarget; TARGET_SLOTS],
}

impl RadarSource {
    pub const fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            pending: Deque::new(),
            last: [RadarTarget {
                x_mm: 0,
                y_mm: 0,
                speed_cm_s: 0,
                resolution: 0,
            }; TARGET_SLOTS],
        }
    }

    /// Feed bytes read from the UART. Returns the number of complete
    /// frames decoded.
    pub fn feed(&mut self, bytes: &[u8], now_ms: u64) -> usize {
        let mut frames = 0;
        for &b in bytes {
            if let Some(targets) = self.decoder.push(b) {
                frames += 1;
                self.queue_frame(&targets, now_ms);
            }
        }
        frames
    }

    fn queue_frame(&mut self, targets: &[RadarTarget; TARGET_SLOTS], now_ms: u64) {
        for (i, t) in targets.iter().enumerate() {
            if t.is_valid() {
                log::trace!(
                    "T{}: x={}mm y={}mm dist={}cm speed={}cm/s",
                    i + 1,
                    t.x_mm,
                    t.y_mm,
                    t.distance_cm(),
                    t.speed_cm_s
                );
            }
            if self.pending.is_full() {
                self.pending.pop_front();
            }
            let _ = self.pending.push_back(Sample {
                id: EntityId::Slot(i as u8 + 1),
                value: t.is_valid().then(|| t.distance_cm() as f32),
                name: None,
                timestamp_ms: now_ms,
            });
        }
        self.last = *targets;
    }

    /// Targets of the most recent valid frame
    pub fn last_targets(&self) -> &[RadarTarget; TARGET_SLOTS] {
        &self.last
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl SignalSource for RadarSource {
    fn next_sample(&mut self, settings: &Settings) -> Option<Sample> {
        if !settings.sensor_enable {
            self.pending.clear();
            return None;
        }
        self.pending.pop_front()
    }
}
