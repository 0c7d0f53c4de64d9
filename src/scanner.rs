//! Signal sources and BLE advertisement parsing.
//!
//! Both sensor front ends (BLE beacons here, the LD2450 radar in
//! `radar.rs`) implement [`SignalSource`], which yields normalized
//! [`Sample`]s. Everything downstream of the source is written once against
//! that interface.
//!
//! Platform scan callbacks push raw reports into a [`BeaconSource`]; the
//! main loop drains it. Radio access itself lives in the firmware binaries.

use heapless::Deque;

use crate::entity::EntityId;
use crate::filter::{device_allowed, format_mac, rssi_to_meters};
use crate::protocol::{MacString, NameString};
use crate::settings::Settings;

/// A normalized observation of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: EntityId,
    /// Distance in the deployment's unit (meters for beacons, cm for radar),
    /// `None` when the reading is invalid or the slot is empty
    pub value: Option<f32>,
    /// Advertised name, if the report carried one
    pub name: Option<NameString>,
    /// Monotonic milliseconds
    pub timestamp_ms: u64,
}

/// A sensor front end producing samples for the tracking core.
pub trait SignalSource {
    /// Next buffered sample, or `None` when the source is drained.
    /// Conversion uses the settings current at the time of the call.
    fn next_sample(&mut self, settings: &Settings) -> Option<Sample>;
}

/// One BLE advertisement as delivered by the scan callback.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconReport {
    pub address: MacString,
    pub rssi: i32,
    pub name: Option<NameString>,
    pub timestamp_ms: u64,
}

/// Parse BLE advertisement data (AD structures) for the local name.
///
/// AD structure format: [length] [type] [data...]
/// Types we care about:
///   0x08 = Shortened local name
///   0x09 = Complete local name (preferred)
pub struct BleAdvParser;

impl BleAdvParser {
    /// Build a report from a raw advertisement.
    pub fn parse(addr: &[u8; 6], rssi: i8, ad_data: &[u8], timestamp_ms: u64) -> BeaconReport {
        let mut address = MacString::new();
        format_mac(addr, &mut address);
        BeaconReport {
            address,
            rssi: rssi as i32,
            name: Self::local_name(ad_data),
            timestamp_ms,
        }
    }

    pub fn local_name(ad_data: &[u8]) -> Option<NameString> {
        let mut shortened = None;
        let mut pos = 0;
        while pos < ad_data.len() {
            let len = ad_data[pos] as usize;
            if len == 0 || pos + 1 + len > ad_data.len() {
                break;
            }

            let ad_type = ad_data[pos + 1];
            let data = &ad_data[pos + 2..pos + 1 + len];

            match ad_type {
                0x09 => return to_name(data),
                0x08 if shortened.is_none() => shortened = to_name(data),
                _ => {}
            }

            pos += 1 + len;
        }
        shortened
    }
}

fn to_name(data: &[u8]) -> Option<NameString> {
    let s = core::str::from_utf8(data).ok()?;
    if s.is_empty() {
        return None;
    }
    let mut name = NameString::new();
    for c in s.chars() {
        if name.push(c).is_err() {
            break;
        }
    }
    Some(name)
}

/// BLE scan parameters the radio driver needs, copied out of [`Settings`]
/// so a scan task can pick them up without holding the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub active: bool,
    /// Scan interval in 0.625 ms units
    pub interval: u16,
    /// Scan window in 0.625 ms units
    pub window: u16,
    /// Length of one scan round
    pub duration_ms: u32,
}

impl ScanParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            active: settings.active_scan,
            interval: settings.scan_interval,
            // The controller rejects a window longer than the interval
            window: settings.scan_window.min(settings.scan_interval),
            duration_ms: settings.scan_time_s * 1000,
        }
    }

    pub fn interval_us(&self) -> u64 {
        self.interval as u64 * 625
    }

    pub fn window_us(&self) -> u64 {
        self.window as u64 * 625
    }
}

/// Maximum buffered beacon reports between drains
pub const BEACON_QUEUE_LEN: usize = 32;

/// Beacon front end: buffers scan reports and turns them into distance
/// samples, applying the device allow-list.
#[derive(Debug, Default)]
pub struct BeaconSource {
    pending: Deque<BeaconReport, BEACON_QUEUE_LEN>,
    dropped: u32,
}

impl BeaconSource {
    pub const fn new() -> Self {
        Self {
            pending: Deque::new(),
            dropped: 0,
        }
    }

    /// Queue a report. When the queue is full the oldest report is dropped.
    pub fn push(&mut self, report: BeaconReport) {
        if self.pending.is_full() {
            self.pending.pop_front();
            self.dropped = self.dropped.wrapping_add(1);
        }
        let _ = self.pending.push_back(report);
    }

    /// Queue a raw advertisement.
    pub fn push_advertisement(&mut self, addr: &[u8; 6], rssi: i8, ad_data: &[u8], now_ms: u64) {
        self.push(BleAdvParser::parse(addr, rssi, ad_data, now_ms));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Reports discarded because the queue overflowed
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl SignalSource for BeaconSource {
    fn next_sample(&mut self, settings: &Settings) -> Option<Sample> {
        while let Some(report) = self.pending.pop_front() {
            if !device_allowed(&report.address, settings) {
                log::trace!("{} not in allow-list", report.address);
                continue;
            }
            let value = rssi_to_meters(
                report.rssi,
                settings.tx_power,
                settings.env_factor,
                settings.distance_correction,
            )
            .meters();
            if value.is_none() {
                log::debug!("{} reported invalid RSSI", report.address);
            }
            return Some(Sample {
                id: EntityId::Address(report.address),
                value,
                name: report.name,
                timestamp_ms: report.timestamp_ms,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01];

    fn report(addr: &str, rssi: i32) -> BeaconReport {
        BeaconReport {
            address: MacString::try_from(addr).unwrap(),
            rssi,
            name: None,
            timestamp_ms: 100,
        }
    }

    // ── Advertisement parsing ───────────────────────────────────────

    #[test]
    fn parse_complete_name() {
        // flags, then complete local name "Tag"
        let ad = [0x02, 0x01, 0x06, 0x04, 0x09, b'T', b'a', b'g'];
        let r = BleAdvParser::parse(&ADDR, -60, &ad, 42);
        assert_eq!(r.address.as_str(), "aa:bb:cc:dd:ee:01");
        assert_eq!(r.rssi, -60);
        assert_eq!(r.name.as_deref(), Some("Tag"));
        assert_eq!(r.timestamp_ms, 42);
    }

    #[test]
    fn complete_name_preferred_over_shortened() {
        let ad = [0x03, 0x08, b'T', b'g', 0x04, 0x09, b'T', b'a', b'g'];
        assert_eq!(BleAdvParser::local_name(&ad).as_deref(), Some("Tag"));
    }

    #[test]
    fn shortened_name_used_alone() {
        let ad = [0x03, 0x08, b'T', b'g'];
        assert_eq!(BleAdvParser::local_name(&ad).as_deref(), Some("Tg"));
    }

    #[test]
    fn no_name_and_truncated_data() {
        assert_eq!(BleAdvParser::local_name(&[0x02, 0x01, 0x06]), None);
        // Length runs past the end
        assert_eq!(BleAdvParser::local_name(&[0x09, 0x09, b'A']), None);
        assert_eq!(BleAdvParser::local_name(&[]), None);
    }

    // ── Beacon source ───────────────────────────────────────────────

    #[test]
    fn converts_rssi_to_distance() {
        let s = Settings::beacon();
        let mut src = BeaconSource::new();
        src.push(report("aa:bb:cc:dd:ee:01", -59));
        let sample = src.next_sample(&s).unwrap();
        assert_eq!(sample.value, Some(1.0));
        assert_eq!(sample.timestamp_ms, 100);
        assert!(src.next_sample(&s).is_none());
    }

    #[test]
    fn zero_rssi_yields_invalid_sample() {
        let s = Settings::beacon();
        let mut src = BeaconSource::new();
        src.push(report("aa:bb:cc:dd:ee:01", 0));
        assert_eq!(src.next_sample(&s).unwrap().value, None);
    }

    #[test]
    fn allow_list_skips_unlisted() {
        let mut s = Settings::beacon();
        s.device_filter_enabled = true;
        s.add_device("aa:bb:cc:dd:ee:02").unwrap();
        let mut src = BeaconSource::new();
        src.push(report("aa:bb:cc:dd:ee:01", -60));
        src.push(report("aa:bb:cc:dd:ee:02", -60));
        let sample = src.next_sample(&s).unwrap();
        assert_eq!(
            sample.id,
            EntityId::Address(MacString::try_from("aa:bb:cc:dd:ee:02").unwrap())
        );
        assert!(src.next_sample(&s).is_none());
    }

    #[test]
    fn scan_params_follow_settings() {
        let mut s = Settings::beacon();
        let p = ScanParams::from_settings(&s);
        assert!(p.active);
        assert_eq!((p.interval, p.window, p.duration_ms), (100, 99, 5000));
        assert_eq!(p.interval_us(), 62_500);

        s.set_scan_window(400).unwrap();
        assert_eq!(ScanParams::from_settings(&s).window, 100);
    }

    #[test]
    fn overflow_drops_oldest() {
        let s = Settings::beacon();
        let mut src = BeaconSource::new();
        for i in 0..BEACON_QUEUE_LEN as u64 + 2 {
            let mut r = report("aa:bb:cc:dd:ee:01", -60);
            r.timestamp_ms = i;
            src.push(r);
        }
        assert_eq!(src.len(), BEACON_QUEUE_LEN);
        assert_eq!(src.dropped(), 2);
        assert_eq!(src.next_sample(&s).unwrap().timestamp_ms, 2);
    }
}
