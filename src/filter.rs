//! Signal smoothing and distance estimation.
//!
//! Every tracked entity runs its raw measurement through a scalar Kalman
//! filter and then a fixed-window moving average. Zone membership,
//! telemetry and the display all read the Kalman output; the averaged
//! value is kept per entity as a slower companion reading.

use core::fmt::Write;

use crate::protocol::MacString;
use crate::settings::{Settings, MAX_WINDOW_SIZE};

/// Distances at or below zero after correction are clamped to this
pub const MIN_DISTANCE_M: f32 = 0.1;

/// Single-state Kalman filter.
///
/// Seeded by the first measurement; subsequent updates blend the
/// estimate toward each new measurement by the current gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanFilter {
    q: f32, // process noise
    r: f32, // measurement noise
    p: f32, // error covariance
    k: f32, // gain
    x: f32, // estimate
    initialized: bool,
}

impl KalmanFilter {
    pub const fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            q: process_noise,
            r: measurement_noise,
            p: 1.0,
            k: 0.0,
            x: 0.0,
            initialized: false,
        }
    }

    /// Feed one measurement, returning the new estimate.
    pub fn update(&mut self, measurement: f32) -> f32 {
        if !self.initialized {
            self.x = measurement;
            self.initialized = true;
            return measurement;
        }

        self.p += self.q;
        self.k = self.p / (self.p + self.r);
        self.x += self.k * (measurement - self.x);
        self.p *= 1.0 - self.k;

        self.x
    }

    /// Change Q and R. The running estimate and covariance are kept.
    pub fn set_noise(&mut self, process_noise: f32, measurement_noise: f32) {
        self.q = process_noise;
        self.r = measurement_noise;
    }

    /// Forget the estimate; the next measurement seeds the filter again.
    pub fn reset(&mut self) {
        self.p = 1.0;
        self.k = 0.0;
        self.x = 0.0;
        self.initialized = false;
    }

    pub fn estimate(&self) -> f32 {
        self.x
    }

    pub fn gain(&self) -> f32 {
        self.k
    }

    pub fn noise(&self) -> (f32, f32) {
        (self.q, self.r)
    }
}

/// Fixed-capacity moving average over the most recent `window` values.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverage {
    values: [f32; MAX_WINDOW_SIZE],
    window: usize,
    index: usize,
    count: usize,
    sum: f32,
}

impl MovingAverage {
    /// `window` is clamped to `1..=MAX_WINDOW_SIZE`.
    pub fn new(window: usize) -> Self {
        Self {
            values: [0.0; MAX_WINDOW_SIZE],
            window: window.clamp(1, MAX_WINDOW_SIZE),
            index: 0,
            count: 0,
            sum: 0.0,
        }
    }

    /// Push a value and return the mean of the values currently held.
    pub fn update(&mut self, value: f32) -> f32 {
        if self.count == self.window {
            self.sum -= self.values[self.index];
        } else {
            self.count += 1;
        }
        self.values[self.index] = value;
        self.sum += value;
        self.index = (self.index + 1) % self.window;

        self.average()
    }

    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Rebuild with a new window size. Buffered values are dropped.
    pub fn resize(&mut self, window: usize) {
        *self = Self::new(window);
    }
}

/// Outcome of converting a signal strength reading to meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distance {
    Meters(f32),
    /// RSSI of 0 dBm: the radio reported no usable reading
    Invalid,
}

impl Distance {
    pub fn meters(self) -> Option<f32> {
        match self {
            Distance::Meters(m) => Some(m),
            Distance::Invalid => None,
        }
    }
}

/// Log-distance path-loss model:
/// `10 ^ ((tx_power - rssi) / (10 * n)) + correction`, clamped to 0.1 m.
pub fn rssi_to_meters(rssi: i32, tx_power: i32, env_factor: f32, correction: f32) -> Distance {
    if rssi == 0 {
        return Distance::Invalid;
    }
    let exponent = (tx_power - rssi) as f32 / (10.0 * env_factor);
    let meters = libm::powf(10.0, exponent) + correction;
    if meters > 0.0 {
        Distance::Meters(meters)
    } else {
        Distance::Meters(MIN_DISTANCE_M)
    }
}

/// Format a 6-byte address as lowercase colon-separated hex, the form
/// used for entity ids and the allow-list.
pub fn format_mac(mac: &[u8; 6], buf: &mut MacString) {
    buf.clear();
    let _ = write!(
        buf,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
}

/// Trim and lowercase an address typed into a command or stored list.
/// Returns `None` for empty or over-long input.
pub fn normalize_address(address: &str) -> Option<MacString> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut out = MacString::new();
    for c in trimmed.chars() {
        out.push(c.to_ascii_lowercase()).ok()?;
    }
    Some(out)
}

/// Whether an observation from `address` should be tracked.
/// Everything passes while the allow-list is disabled.
pub fn device_allowed(address: &str, settings: &Settings) -> bool {
    if !settings.device_filter_enabled {
        return true;
    }
    settings
        .allowed_devices
        .iter()
        .any(|m| m.as_str().eq_ignore_ascii_case(address))
}
