//! Runtime configuration for both sourcing variants.
//!
//! Compiled-in defaults mirror the values the gateway ships with. Every
//! field can be changed at runtime through the command protocol and is
//! persisted through a [`SettingsStore`] (NVS on ESP-IDF, RAM otherwise).

use core::fmt::Write;

use heapless::{String, Vec};
use thiserror::Error;

use crate::filter::normalize_address;
use crate::protocol::{IdString, MacString};

// ── Compiled-in defaults ──────────────────────────────────────────────

pub const DEFAULT_GATEWAY_ID: &str = "TRAC 001";
pub const DEFAULT_DEVICE_NAME: &str = "LD2450_A";
pub const DEFAULT_MAGIC_WORD: &str = "LD2450";

/// BLE scan duration per loop iteration, seconds
pub const DEFAULT_SCAN_TIME_S: u32 = 5;
pub const DEFAULT_SCAN_INTERVAL: u16 = 100;
pub const DEFAULT_SCAN_WINDOW: u16 = 99;
pub const DEFAULT_ACTIVE_SCAN: bool = true;

/// Calibrated RSSI at 1 m, dBm
pub const DEFAULT_TX_POWER: i32 = -59;
/// Path-loss exponent (2.0 = free space)
pub const DEFAULT_ENV_FACTOR: f32 = 2.0;
pub const DEFAULT_DISTANCE_CORRECTION: f32 = 0.0;

pub const DEFAULT_PROCESS_NOISE: f32 = 0.01;
pub const DEFAULT_MEASUREMENT_NOISE: f32 = 0.1;
pub const DEFAULT_WINDOW_SIZE: usize = 5;
pub const MAX_WINDOW_SIZE: usize = 20;

/// Zone membership threshold for beacons, meters
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.0;
pub const DEFAULT_BEACON_TIMEOUT_S: u32 = 10;
/// Entities not seen for this long drop out of zone computations
pub const DEFAULT_LIVENESS_MS: u64 = 30_000;

pub const DEFAULT_RANGE_CM: u16 = 300;
pub const DEFAULT_DEBOUNCE_MS: u32 = 2500;
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 2000;

/// Maximum number of addresses in the device allow-list
pub const MAX_ALLOWED_DEVICES: usize = 16;

/// Capacity of the comma-joined allow-list string (16 × 17 chars + separators)
pub const DEVICE_FILTER_LEN: usize = 288;

pub type DeviceFilterString = String<DEVICE_FILTER_LEN>;

/// Which sensor front end this unit runs, and therefore which field
/// addresses inbound commands to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// BLE beacon gateway, addressed by `target` = gateway id
    Beacon,
    /// LD2450 radar node, addressed by `m` = magic word
    Radar,
}

/// Rejected setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SettingError {
    #[error("{key} out of range")]
    OutOfRange { key: &'static str },
    #[error("{key} is too long")]
    TooLong { key: &'static str },
    #[error("device allow-list is full")]
    AllowListFull,
    #[error("malformed device address")]
    InvalidAddress,
}

/// Full runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub deployment: Deployment,

    pub gateway_id: IdString,
    pub device_name: IdString,
    pub magic_word: IdString,

    pub scan_time_s: u32,
    pub scan_interval: u16,
    pub scan_window: u16,
    pub active_scan: bool,

    pub tx_power: i32,
    pub env_factor: f32,
    pub distance_correction: f32,

    pub process_noise: f32,
    pub measurement_noise: f32,
    pub window_size: usize,

    /// Meters for beacons; radar uses `range_cm`
    pub distance_threshold: f32,
    pub beacon_timeout_s: u32,
    pub liveness_ms: u64,

    pub device_filter_enabled: bool,
    pub allowed_devices: Vec<MacString, MAX_ALLOWED_DEVICES>,

    pub range_cm: u16,
    pub debounce_ms: u32,
    /// Debounce presence transitions; when off, presence follows detection directly
    pub filter_enable: bool,
    pub sensor_enable: bool,

    pub telemetry_interval_ms: u64,
}

impl Settings {
    /// Defaults for a BLE beacon gateway.
    pub fn beacon() -> Self {
        Self {
            deployment: Deployment::Beacon,
            gateway_id: id_string(DEFAULT_GATEWAY_ID),
            device_name: id_string(DEFAULT_DEVICE_NAME),
            magic_word: id_string(DEFAULT_MAGIC_WORD),
            scan_time_s: DEFAULT_SCAN_TIME_S,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            scan_window: DEFAULT_SCAN_WINDOW,
            active_scan: DEFAULT_ACTIVE_SCAN,
            tx_power: DEFAULT_TX_POWER,
            env_factor: DEFAULT_ENV_FACTOR,
            distance_correction: DEFAULT_DISTANCE_CORRECTION,
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            window_size: DEFAULT_WINDOW_SIZE,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            beacon_timeout_s: DEFAULT_BEACON_TIMEOUT_S,
            liveness_ms: DEFAULT_LIVENESS_MS,
            device_filter_enabled: false,
            allowed_devices: Vec::new(),
            range_cm: DEFAULT_RANGE_CM,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            // Beacon zones are gated by threshold + liveness alone
            filter_enable: false,
            sensor_enable: true,
            telemetry_interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
        }
    }

    /// Defaults for an LD2450 radar node.
    pub fn radar() -> Self {
        Self {
            deployment: Deployment::Radar,
            filter_enable: true,
            ..Self::beacon()
        }
    }

    /// Zone membership threshold in the unit of the entity measurements
    /// (meters for beacons, centimeters for radar slots).
    pub fn zone_threshold(&self) -> f32 {
        match self.deployment {
            Deployment::Beacon => self.distance_threshold,
            Deployment::Radar => self.range_cm as f32,
        }
    }

    /// The identity inbound commands must carry to be processed here.
    pub fn identity(&self) -> &str {
        match self.deployment {
            Deployment::Beacon => &self.gateway_id,
            Deployment::Radar => &self.magic_word,
        }
    }

    /// Name this unit uses when addressing acks and telemetry.
    pub fn unit_name(&self) -> &str {
        match self.deployment {
            Deployment::Beacon => &self.gateway_id,
            Deployment::Radar => &self.device_name,
        }
    }

    // ── Validated setters ───────────────────────────────────────────

    pub fn set_gateway_id(&mut self, id: &str) -> Result<(), SettingError> {
        self.gateway_id = bounded_id(id, "gateway_id")?;
        Ok(())
    }

    pub fn set_device_name(&mut self, name: &str) -> Result<(), SettingError> {
        self.device_name = bounded_id(name, "device_name")?;
        Ok(())
    }

    pub fn set_magic_word(&mut self, word: &str) -> Result<(), SettingError> {
        self.magic_word = bounded_id(word, "magic_word")?;
        Ok(())
    }

    pub fn set_scan_time(&mut self, seconds: u32) -> Result<(), SettingError> {
        self.scan_time_s = in_range(seconds, 1, 60, "scan_time")?;
        Ok(())
    }

    pub fn set_scan_interval(&mut self, interval: u16) -> Result<(), SettingError> {
        self.scan_interval = in_range(interval, 1, 10240, "scan_interval")?;
        Ok(())
    }

    pub fn set_scan_window(&mut self, window: u16) -> Result<(), SettingError> {
        self.scan_window = in_range(window, 1, 10240, "scan_window")?;
        Ok(())
    }

    pub fn set_tx_power(&mut self, dbm: i32) -> Result<(), SettingError> {
        self.tx_power = in_range(dbm, -100, 0, "tx_power")?;
        Ok(())
    }

    pub fn set_env_factor(&mut self, n: f32) -> Result<(), SettingError> {
        self.env_factor = in_range_f32(n, 1.0, 6.0, "env_factor")?;
        Ok(())
    }

    pub fn set_distance_correction(&mut self, meters: f32) -> Result<(), SettingError> {
        self.distance_correction = in_range_f32(meters, -10.0, 10.0, "distance_correction")?;
        Ok(())
    }

    pub fn set_distance_threshold(&mut self, meters: f32) -> Result<(), SettingError> {
        if !(meters > 0.0 && meters <= 100.0) {
            return Err(SettingError::OutOfRange { key: "distance_threshold" });
        }
        self.distance_threshold = meters;
        Ok(())
    }

    pub fn set_process_noise(&mut self, q: f32) -> Result<(), SettingError> {
        if !(q > 0.0 && q <= 100.0) {
            return Err(SettingError::OutOfRange { key: "process_noise" });
        }
        self.process_noise = q;
        Ok(())
    }

    pub fn set_measurement_noise(&mut self, r: f32) -> Result<(), SettingError> {
        if !(r > 0.0 && r <= 100.0) {
            return Err(SettingError::OutOfRange { key: "measurement_noise" });
        }
        self.measurement_noise = r;
        Ok(())
    }

    pub fn set_window_size(&mut self, size: usize) -> Result<(), SettingError> {
        self.window_size = in_range(size, 1, MAX_WINDOW_SIZE, "window_size")?;
        Ok(())
    }

    pub fn set_beacon_timeout(&mut self, seconds: u32) -> Result<(), SettingError> {
        self.beacon_timeout_s = in_range(seconds, 1, 3600, "beacon_timeout")?;
        Ok(())
    }

    pub fn set_range_cm(&mut self, cm: u16) -> Result<(), SettingError> {
        self.range_cm = in_range(cm, 1, 600, "range_cm")?;
        Ok(())
    }

    pub fn set_debounce_ms(&mut self, ms: u32) -> Result<(), SettingError> {
        self.debounce_ms = in_range(ms, 500, 5000, "debounce_ms")?;
        Ok(())
    }

    // ── Device allow-list ───────────────────────────────────────────

    /// Add an address to the allow-list (normalized to lowercase).
    /// Adding an address that is already present is a no-op.
    pub fn add_device(&mut self, address: &str) -> Result<(), SettingError> {
        let mac = normalize_address(address).ok_or(SettingError::InvalidAddress)?;
        if self.allowed_devices.contains(&mac) {
            return Ok(());
        }
        self.allowed_devices
            .push(mac)
            .map_err(|_| SettingError::AllowListFull)
    }

    /// Remove an address from the allow-list. Unknown addresses are ignored.
    pub fn remove_device(&mut self, address: &str) -> Result<(), SettingError> {
        let mac = normalize_address(address).ok_or(SettingError::InvalidAddress)?;
        self.allowed_devices.retain(|m| *m != mac);
        Ok(())
    }

    pub fn clear_devices(&mut self) {
        self.allowed_devices.clear();
    }

    /// Comma-joined allow-list, the persisted form.
    pub fn device_filter_string(&self) -> DeviceFilterString {
        let mut out = DeviceFilterString::new();
        for (i, mac) in self.allowed_devices.iter().enumerate() {
            if i > 0 {
                let _ = out.push(',');
            }
            let _ = out.push_str(mac);
        }
        out
    }

    /// Replace the allow-list from its comma-joined form. Items are trimmed,
    /// empty items skipped, and malformed items dropped with a warning.
    pub fn parse_device_filter(&mut self, joined: &str) {
        self.allowed_devices.clear();
        for item in joined.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = self.add_device(item) {
                log::warn!("Ignoring allow-list entry '{}': {}", item, e);
            }
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Save every setting to the store.
    pub fn save<S: SettingsStore>(&self, store: &mut S) -> Result<(), S::Error> {
        store.set_str(keys::GATEWAY_ID, &self.gateway_id)?;
        store.set_str(keys::DEVICE_NAME, &self.device_name)?;
        store.set_str(keys::MAGIC_WORD, &self.magic_word)?;
        store.set_u32(keys::SCAN_TIME, self.scan_time_s)?;
        store.set_u32(keys::SCAN_INTERVAL, self.scan_interval as u32)?;
        store.set_u32(keys::SCAN_WINDOW, self.scan_window as u32)?;
        store.set_u32(keys::ACTIVE_SCAN, self.active_scan as u32)?;
        store.set_u32(keys::TX_POWER, self.tx_power as u32)?;
        store.set_u32(keys::ENV_FACTOR, self.env_factor.to_bits())?;
        store.set_u32(keys::DISTANCE_THRESHOLD, self.distance_threshold.to_bits())?;
        store.set_u32(keys::DISTANCE_CORRECTION, self.distance_correction.to_bits())?;
        store.set_u32(keys::PROCESS_NOISE, self.process_noise.to_bits())?;
        store.set_u32(keys::MEASUREMENT_NOISE, self.measurement_noise.to_bits())?;
        store.set_u32(keys::WINDOW_SIZE, self.window_size as u32)?;
        store.set_u32(keys::BEACON_TIMEOUT, self.beacon_timeout_s)?;
        store.set_u32(keys::USE_FILTER, self.device_filter_enabled as u32)?;
        store.set_str(keys::DEVICE_FILTER, &self.device_filter_string())?;
        store.set_u32(keys::RANGE_MAX, self.range_cm as u32)?;
        store.set_u32(keys::DEBOUNCE_MS, self.debounce_ms)?;
        store.set_u32(keys::FILTER_ENABLE, self.filter_enable as u32)?;
        store.set_u32(keys::SENSOR_ENABLE, self.sensor_enable as u32)?;
        Ok(())
    }

    /// Overlay values found in the store onto `self`.
    ///
    /// Missing keys keep their current value; stored values that fail
    /// validation are skipped with a warning. Returns `true` if any key was
    /// present.
    pub fn load<S: SettingsStore>(&mut self, store: &mut S) -> Result<bool, S::Error> {
        let mut found = false;
        let mut buf = [0u8; DEVICE_FILTER_LEN];

        if let Some(v) = store.get_str(keys::GATEWAY_ID, &mut buf)? {
            found = true;
            warn_invalid(keys::GATEWAY_ID, self.set_gateway_id(v));
        }
        if let Some(v) = store.get_str(keys::DEVICE_NAME, &mut buf)? {
            found = true;
            warn_invalid(keys::DEVICE_NAME, self.set_device_name(v));
        }
        if let Some(v) = store.get_str(keys::MAGIC_WORD, &mut buf)? {
            found = true;
            warn_invalid(keys::MAGIC_WORD, self.set_magic_word(v));
        }
        if let Some(v) = store.get_u32(keys::SCAN_TIME)? {
            found = true;
            warn_invalid(keys::SCAN_TIME, self.set_scan_time(v));
        }
        if let Some(v) = store.get_u32(keys::SCAN_INTERVAL)? {
            found = true;
            warn_invalid(keys::SCAN_INTERVAL, self.set_scan_interval(v as u16));
        }
        if let Some(v) = store.get_u32(keys::SCAN_WINDOW)? {
            found = true;
            warn_invalid(keys::SCAN_WINDOW, self.set_scan_window(v as u16));
        }
        if let Some(v) = store.get_u32(keys::ACTIVE_SCAN)? {
            found = true;
            self.active_scan = v != 0;
        }
        if let Some(v) = store.get_u32(keys::TX_POWER)? {
            found = true;
            warn_invalid(keys::TX_POWER, self.set_tx_power(v as i32));
        }
        if let Some(v) = store.get_u32(keys::ENV_FACTOR)? {
            found = true;
            warn_invalid(keys::ENV_FACTOR, self.set_env_factor(f32::from_bits(v)));
        }
        if let Some(v) = store.get_u32(keys::DISTANCE_THRESHOLD)? {
            found = true;
            warn_invalid(
                keys::DISTANCE_THRESHOLD,
                self.set_distance_threshold(f32::from_bits(v)),
            );
        }
        if let Some(v) = store.get_u32(keys::DISTANCE_CORRECTION)? {
            found = true;
            warn_invalid(
                keys::DISTANCE_CORRECTION,
                self.set_distance_correction(f32::from_bits(v)),
            );
        }
        if let Some(v) = store.get_u32(keys::PROCESS_NOISE)? {
            found = true;
            warn_invalid(keys::PROCESS_NOISE, self.set_process_noise(f32::from_bits(v)));
        }
        if let Some(v) = store.get_u32(keys::MEASUREMENT_NOISE)? {
            found = true;
            warn_invalid(
                keys::MEASUREMENT_NOISE,
                self.set_measurement_noise(f32::from_bits(v)),
            );
        }
        if let Some(v) = store.get_u32(keys::WINDOW_SIZE)? {
            found = true;
            warn_invalid(keys::WINDOW_SIZE, self.set_window_size(v as usize));
        }
        if let Some(v) = store.get_u32(keys::BEACON_TIMEOUT)? {
            found = true;
            warn_invalid(keys::BEACON_TIMEOUT, self.set_beacon_timeout(v));
        }
        if let Some(v) = store.get_u32(keys::USE_FILTER)? {
            found = true;
            self.device_filter_enabled = v != 0;
        }
        if let Some(v) = store.get_str(keys::DEVICE_FILTER, &mut buf)? {
            found = true;
            self.parse_device_filter(v);
        }
        if let Some(v) = store.get_u32(keys::RANGE_MAX)? {
            found = true;
            warn_invalid(keys::RANGE_MAX, self.set_range_cm(v as u16));
        }
        if let Some(v) = store.get_u32(keys::DEBOUNCE_MS)? {
            found = true;
            warn_invalid(keys::DEBOUNCE_MS, self.set_debounce_ms(v));
        }
        if let Some(v) = store.get_u32(keys::FILTER_ENABLE)? {
            found = true;
            self.filter_enable = v != 0;
        }
        if let Some(v) = store.get_u32(keys::SENSOR_ENABLE)? {
            found = true;
            self.sensor_enable = v != 0;
        }

        Ok(found)
    }

    /// Log the active configuration at startup.
    pub fn log_summary(&self) {
        match self.deployment {
            Deployment::Beacon => {
                log::info!(
                    "Gateway '{}': threshold {:.2} m, tx_power {} dBm, n={:.1}, correction {:.2} m",
                    self.gateway_id,
                    self.distance_threshold,
                    self.tx_power,
                    self.env_factor,
                    self.distance_correction
                );
                log::info!(
                    "Filters: Q={:.3} R={:.3} window {}; beacon timeout {} s; scan {} s",
                    self.process_noise,
                    self.measurement_noise,
                    self.window_size,
                    self.beacon_timeout_s,
                    self.scan_time_s
                );
                log::info!(
                    "Device filter {} ({} addresses)",
                    if self.device_filter_enabled { "enabled" } else { "disabled" },
                    self.allowed_devices.len()
                );
            }
            Deployment::Radar => {
                log::info!(
                    "Radar '{}' (magic '{}'): range {} cm, debounce {} ms, filter {}, sensor {}",
                    self.device_name,
                    self.magic_word,
                    self.range_cm,
                    self.debounce_ms,
                    if self.filter_enable { "on" } else { "off" },
                    if self.sensor_enable { "on" } else { "off" }
                );
            }
        }
    }
}

/// Persisted key names. Kept within the 15-character NVS limit.
pub mod keys {
    pub const GATEWAY_ID: &str = "gateway_id";
    pub const DEVICE_NAME: &str = "device_name";
    pub const MAGIC_WORD: &str = "magic_word";
    pub const SCAN_TIME: &str = "scan_time";
    pub const SCAN_INTERVAL: &str = "scan_interval";
    pub const SCAN_WINDOW: &str = "scan_window";
    pub const ACTIVE_SCAN: &str = "active_scan";
    pub const TX_POWER: &str = "tx_power";
    pub const ENV_FACTOR: &str = "env_factor";
    pub const DISTANCE_THRESHOLD: &str = "dist_thresh";
    pub const DISTANCE_CORRECTION: &str = "dist_corr";
    pub const PROCESS_NOISE: &str = "proc_noise";
    pub const MEASUREMENT_NOISE: &str = "meas_noise";
    pub const WINDOW_SIZE: &str = "window_size";
    pub const BEACON_TIMEOUT: &str = "beacon_timeout";
    pub const USE_FILTER: &str = "use_filter";
    pub const DEVICE_FILTER: &str = "device_filter";
    pub const RANGE_MAX: &str = "range_max";
    pub const DEBOUNCE_MS: &str = "debounce_ms";
    pub const FILTER_ENABLE: &str = "filter_enable";
    pub const SENSOR_ENABLE: &str = "sensor_enable";
}

/// Key/value persistence backend.
///
/// Shaped after ESP-IDF NVS: numbers are stored as `u32` (floats by bit
/// pattern, signed values by two's-complement cast, booleans as 0/1) and
/// strings are read into a caller-provided buffer.
pub trait SettingsStore {
    type Error: core::fmt::Debug;

    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, Self::Error>;
    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), Self::Error>;
    fn get_str<'a>(&mut self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a str>, Self::Error>;
    fn set_str(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;
}

/// Maximum number of keys a [`MemoryStore`] holds
pub const MEMORY_STORE_SLOTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryStoreError {
    #[error("store is full")]
    Full,
    #[error("key or value too long")]
    TooLong,
}

#[derive(Debug, Clone)]
enum StoredValue {
    Number(u32),
    Text(DeviceFilterString),
}

/// RAM-backed [`SettingsStore`] for builds without flash persistence.
/// Contents are lost on reset.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<(String<15>, StoredValue), MEMORY_STORE_SLOTS>,
}

impl MemoryStore {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, key: &str) -> Option<&StoredValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    fn put(&mut self, key: &str, value: StoredValue) -> Result<(), MemoryStoreError> {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k.as_str() == key) {
            slot.1 = value;
            return Ok(());
        }
        let k = String::try_from(key).map_err(|_| MemoryStoreError::TooLong)?;
        self.entries
            .push((k, value))
            .map_err(|_| MemoryStoreError::Full)
    }
}

impl SettingsStore for MemoryStore {
    type Error = MemoryStoreError;

    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        Ok(match self.find(key) {
            Some(StoredValue::Number(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        self.put(key, StoredValue::Number(value))
    }

    fn get_str<'a>(&mut self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a str>, Self::Error> {
        let Some(StoredValue::Text(s)) = self.find(key) else {
            return Ok(None);
        };
        let bytes = s.as_bytes();
        if bytes.len() > buf.len() {
            return Err(MemoryStoreError::TooLong);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(core::str::from_utf8(&buf[..bytes.len()]).ok())
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        let mut s = DeviceFilterString::new();
        s.push_str(value).map_err(|_| MemoryStoreError::TooLong)?;
        self.put(key, StoredValue::Text(s))
    }
}

fn id_string(s: &str) -> IdString {
    let mut out = IdString::new();
    let _ = write!(out, "{}", s);
    out
}

fn bounded_id(s: &str, key: &'static str) -> Result<IdString, SettingError> {
    if s.is_empty() {
        return Err(SettingError::OutOfRange { key });
    }
    IdString::try_from(s).map_err(|_| SettingError::TooLong { key })
}

fn in_range<T: PartialOrd>(v: T, min: T, max: T, key: &'static str) -> Result<T, SettingError> {
    if v >= min && v <= max {
        Ok(v)
    } else {
        Err(SettingError::OutOfRange { key })
    }
}

fn in_range_f32(v: f32, min: f32, max: f32, key: &'static str) -> Result<f32, SettingError> {
    // NaN fails both comparisons
    if v >= min && v <= max {
        Ok(v)
    } else {
        Err(SettingError::OutOfRange { key })
    }
}

fn warn_invalid(key: &str, result: Result<(), SettingError>) {
    if let Err(e) = result {
        log::warn!("Stored {} ignored: {}", key, e);
    }
}
