//! Serial link to the mesh radio: inbound command framing, command
//! parsing and application, and NDJSON output serialization.
//!
//! Inbound text is framed on a newline or a closing brace, whichever comes
//! first. A partial message with no new bytes for [`IDLE_TIMEOUT_MS`] is
//! discarded. Commands not addressed to this unit are dropped without an
//! acknowledgement.

use core::fmt::Write;

use heapless::Vec;

use crate::protocol::{
    ConfigCommand, DeviceMessage, IdString, Identity, RawCommand, SettingChange, MAX_CHANGES,
    MAX_MSG_LEN,
};
use crate::settings::{Deployment, SettingError, Settings};

/// A partial inbound message older than this is discarded
pub const IDLE_TIMEOUT_MS: u64 = 100;

/// Largest inbound message accepted
pub const MAX_INBOUND_LEN: usize = 512;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) if len < buf.len() => {
            // NDJSON line terminator
            buf[len] = b'\n';
            Some(len + 1)
        }
        // No room for the terminator: a truncated line would corrupt the stream
        Ok(_) | Err(_) => None,
    }
}

/// Serialize into a fresh line buffer.
pub fn message_line(msg: &DeviceMessage) -> Option<Vec<u8, MAX_MSG_LEN>> {
    let mut buf = [0u8; MAX_MSG_LEN];
    let len = serialize_message(msg, &mut buf)?;
    Vec::from_slice(&buf[..len]).ok()
}

// ── Inbound framing ────────────────────────────────────────────────────

/// Accumulates inbound bytes into complete messages.
pub struct CommandReader {
    buf: [u8; MAX_INBOUND_LEN],
    pos: usize,
    last_byte_ms: u64,
}

impl CommandReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_INBOUND_LEN],
            pos: 0,
            last_byte_ms: 0,
        }
    }

    /// Feed a byte received at `now_ms`. Returns the complete message when
    /// this byte terminates one. A closing brace is kept in the message;
    /// a newline is not.
    pub fn feed(&mut self, byte: u8, now_ms: u64) -> Option<&[u8]> {
        self.expire(now_ms);
        self.last_byte_ms = now_ms;

        if byte == b'\n' {
            return self.take();
        }
        if self.pos == self.buf.len() {
            log::warn!("Inbound message exceeds {} bytes, discarding", MAX_INBOUND_LEN);
            self.pos = 0;
            return None;
        }
        self.buf[self.pos] = byte;
        self.pos += 1;

        if byte == b'}' {
            self.take()
        } else {
            None
        }
    }

    /// Discard a partial message that has been idle too long. Returns
    /// `true` if something was dropped.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        if self.pos > 0 && now_ms.saturating_sub(self.last_byte_ms) >= IDLE_TIMEOUT_MS {
            log::debug!("Inbound message timed out after {} bytes", self.pos);
            self.pos = 0;
            return true;
        }
        false
    }

    pub fn pending(&self) -> usize {
        self.pos
    }

    fn take(&mut self) -> Option<&[u8]> {
        if self.pos == 0 {
            return None;
        }
        let msg = &self.buf[..self.pos];
        self.pos = 0;
        Some(msg)
    }
}

impl Default for CommandReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice from the first `{` through the first `}` after it.
pub fn extract_json(data: &[u8]) -> Option<&[u8]> {
    let start = data.iter().position(|&b| b == b'{')?;
    let len = data[start..].iter().position(|&b| b == b'}')?;
    Some(&data[start..=start + len])
}

// ── Command parsing ────────────────────────────────────────────────────

/// Parse an inbound message into an addressed command.
///
/// Returns `None` for anything that must be dropped silently: no JSON
/// object, malformed JSON, or no identifying field.
pub fn parse_command(data: &[u8]) -> Option<ConfigCommand> {
    let json = extract_json(data)?;
    let raw = match serde_json_core::from_slice::<RawCommand>(json) {
        Ok((raw, _)) => raw,
        Err(e) => {
            log::debug!("Dropping malformed command: {:?}", e);
            return None;
        }
    };

    let identity = match (raw.target, raw.m) {
        (Some(target), _) => Identity::Target(target),
        (None, Some(m)) => Identity::Magic(m),
        (None, None) => {
            log::debug!("Dropping command without target");
            return None;
        }
    };

    let mut changes: Vec<SettingChange, MAX_CHANGES> = Vec::new();
    let mut missing_value = false;
    let mut add = |c: SettingChange| {
        let _ = changes.push(c);
    };

    match raw.cmd.as_deref() {
        Some("set_gateway_id") => match raw.value {
            Some(v) => add(SettingChange::GatewayId(v)),
            None => missing_value = true,
        },
        Some(other) => log::debug!("Ignoring unknown CMD '{}'", other),
        None => {}
    }

    if let Some(v) = raw.scan_time {
        add(SettingChange::ScanTime(v));
    }
    if let Some(v) = raw.scan_interval {
        add(SettingChange::ScanInterval(v));
    }
    if let Some(v) = raw.scan_window {
        add(SettingChange::ScanWindow(v));
    }
    if let Some(v) = raw.active_scan {
        add(SettingChange::ActiveScan(v));
    }
    if let Some(v) = raw.tx_power {
        add(SettingChange::TxPower(v));
    }
    if let Some(v) = raw.env_factor {
        add(SettingChange::EnvFactor(v));
    }
    if let Some(v) = raw.distance_correction {
        add(SettingChange::DistanceCorrection(v));
    }
    if let Some(v) = raw.distance_threshold {
        add(SettingChange::DistanceThreshold(v));
    }
    if let Some(v) = raw.process_noise {
        add(SettingChange::ProcessNoise(v));
    }
    if let Some(v) = raw.measurement_noise {
        add(SettingChange::MeasurementNoise(v));
    }
    if let Some(v) = raw.window_size {
        add(SettingChange::WindowSize(v));
    }
    if let Some(v) = raw.beacon_timeout {
        add(SettingChange::BeaconTimeout(v));
    }
    if let Some(v) = raw.mac_add {
        add(SettingChange::MacAdd(v));
    }
    if let Some(v) = raw.mac_remove {
        add(SettingChange::MacRemove(v));
    }
    if raw.mac_clear == Some(true) {
        add(SettingChange::MacClear);
    }
    if let Some(v) = raw.mac_enable {
        add(SettingChange::MacEnable(v));
    }
    if let Some(v) = raw.range_cm {
        add(SettingChange::RangeCm(v));
    }
    if let Some(v) = raw.debounce_ms {
        add(SettingChange::DebounceMs(v));
    }
    if let Some(v) = raw.filter_enable {
        add(SettingChange::FilterEnable(v));
    }
    if let Some(v) = raw.sensor_enable {
        add(SettingChange::SensorEnable(v));
    }
    if let Some(v) = raw.device_name {
        add(SettingChange::DeviceName(v));
    }
    if let Some(v) = raw.magic_word {
        add(SettingChange::MagicWord(v));
    }

    Some(ConfigCommand {
        identity,
        changes,
        missing_value,
    })
}

// ── Command application ────────────────────────────────────────────────

/// Result of processing a command addressed to this unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Identity the acknowledgement is addressed with
    pub ack_id: IdString,
    pub ok: bool,
}

impl CommandOutcome {
    pub fn ack(&self) -> DeviceMessage<'_> {
        DeviceMessage::Ack {
            ack: &self.ack_id,
            ok: self.ok,
        }
    }
}

/// Apply a command to the runtime settings.
///
/// Returns `None` when the command is addressed to another unit. All
/// changes are validated against a staged copy first; if any is rejected,
/// or the command carries no recognized setting, nothing is applied and the
/// outcome is `ok: false`.
pub fn handle_command(cmd: &ConfigCommand, settings: &mut Settings) -> Option<CommandOutcome> {
    let addressed = match (&cmd.identity, settings.deployment) {
        (Identity::Target(t), Deployment::Beacon) => t.as_str() == settings.gateway_id.as_str(),
        (Identity::Magic(m), Deployment::Radar) => m.as_str() == settings.magic_word.as_str(),
        _ => false,
    };
    if !addressed {
        log::debug!("Command not addressed to {}", settings.identity());
        return None;
    }

    let mut ack_id = IdString::new();
    let _ = write!(ack_id, "{}", settings.unit_name());
    let reject = |ack_id: IdString| Some(CommandOutcome { ack_id, ok: false });

    if cmd.missing_value {
        log::warn!("set_gateway_id without value");
        return reject(ack_id);
    }
    if cmd.changes.is_empty() {
        log::info!("Command carried no recognized settings");
        return reject(ack_id);
    }

    let mut staged = settings.clone();
    for change in &cmd.changes {
        if let Err(e) = apply_change(&mut staged, change) {
            log::warn!("Command rejected: {}", e);
            return reject(ack_id);
        }
    }

    *settings = staged;
    log::info!("Applied {} setting(s)", cmd.changes.len());
    Some(CommandOutcome { ack_id, ok: true })
}

fn apply_change(s: &mut Settings, change: &SettingChange) -> Result<(), SettingError> {
    match change {
        SettingChange::GatewayId(v) => s.set_gateway_id(v),
        SettingChange::ScanTime(v) => s.set_scan_time(narrow(*v, "scan_time")?),
        SettingChange::ScanInterval(v) => s.set_scan_interval(narrow(*v, "scan_interval")?),
        SettingChange::ScanWindow(v) => s.set_scan_window(narrow(*v, "scan_window")?),
        SettingChange::ActiveScan(v) => {
            s.active_scan = *v;
            Ok(())
        }
        SettingChange::TxPower(v) => s.set_tx_power(narrow(*v, "tx_power")?),
        SettingChange::EnvFactor(v) => s.set_env_factor(*v),
        SettingChange::DistanceCorrection(v) => s.set_distance_correction(*v),
        SettingChange::DistanceThreshold(v) => s.set_distance_threshold(*v),
        SettingChange::ProcessNoise(v) => s.set_process_noise(*v),
        SettingChange::MeasurementNoise(v) => s.set_measurement_noise(*v),
        SettingChange::WindowSize(v) => s.set_window_size(narrow(*v, "window_size")?),
        SettingChange::BeaconTimeout(v) => s.set_beacon_timeout(narrow(*v, "beacon_timeout")?),
        SettingChange::MacAdd(v) => s.add_device(v),
        SettingChange::MacRemove(v) => s.remove_device(v),
        SettingChange::MacClear => {
            s.clear_devices();
            Ok(())
        }
        SettingChange::MacEnable(v) => {
            s.device_filter_enabled = *v;
            Ok(())
        }
        SettingChange::RangeCm(v) => s.set_range_cm(narrow(*v, "range_cm")?),
        SettingChange::DebounceMs(v) => s.set_debounce_ms(narrow(*v, "debounce_ms")?),
        SettingChange::FilterEnable(v) => {
            s.filter_enable = *v;
            Ok(())
        }
        SettingChange::SensorEnable(v) => {
            s.sensor_enable = *v;
            Ok(())
        }
        SettingChange::DeviceName(v) => s.set_device_name(v),
        SettingChange::MagicWord(v) => s.set_magic_word(v),
    }
}

/// Fit a wire integer into the setter's type; anything that does not fit
/// is out of range.
fn narrow<T: TryFrom<i64>>(value: i64, key: &'static str) -> Result<T, SettingError> {
    T::try_from(value).map_err(|_| SettingError::OutOfRange { key })
}
