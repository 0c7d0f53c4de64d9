//! JSON message protocol spoken with the mesh radio over the serial link.
//!
//! Outbound messages are newline-delimited JSON (NDJSON); inbound
//! commands are flat JSON objects addressed to one unit by gateway id or
//! magic word. Uses `heapless` types for no_std/no-alloc operation.

use heapless::{String, Vec};
use serde::{Deserialize, Serialize, Serializer};

/// Maximum length for MAC address strings ("aa:bb:cc:dd:ee:ff")
pub type MacString = String<18>;

/// Maximum length for advertised device names
pub type NameString = String<33>;

/// Gateway ids, device names, magic words
pub type IdString = String<32>;

/// A zone member as listed in a zone snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ZoneMember<'a> {
    /// Entity name
    pub n: &'a str,
    /// Filtered distance
    #[serde(serialize_with = "round2")]
    pub d: f32,
}

/// Messages sent from the unit to the mesh.
///
/// Untagged: each variant is identified on the wire by its field set.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DeviceMessage<'a> {
    /// State of the tracked (closest) entity
    Beacon {
        name: &'a str,
        #[serde(serialize_with = "round2")]
        distance: f32,
        /// Seconds since the entity was last observed
        #[serde(serialize_with = "round1")]
        last_seen: f32,
        beacon: bool,
    },
    /// Current zone members
    ZoneSnapshot {
        zone: &'a str,
        s: &'a [ZoneMember<'a>],
    },
    /// One entity entered or left the zone
    ZoneChange {
        zone: &'a str,
        n: &'a str,
        /// Only sent on entry
        #[serde(
            skip_serializing_if = "Option::is_none",
            serialize_with = "round2_opt"
        )]
        d: Option<f32>,
        present: bool,
    },
    /// Radar slot report
    Radar {
        /// Device name
        d: &'a str,
        /// Magic word
        m: &'a str,
        t1: bool,
        t1_d: u16,
        t2: bool,
        t2_d: u16,
        t3: bool,
        t3_d: u16,
        /// Closest present slot distance, cm
        x: u16,
        /// Error code, always 0
        e: u8,
    },
    /// Command acknowledgement
    Ack { ack: &'a str, ok: bool },
}

/// One runtime setting change carried by a [`ConfigCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    GatewayId(IdString),
    ScanTime(i64),
    ScanInterval(i64),
    ScanWindow(i64),
    ActiveScan(bool),
    TxPower(i64),
    EnvFactor(f32),
    DistanceCorrection(f32),
    DistanceThreshold(f32),
    ProcessNoise(f32),
    MeasurementNoise(f32),
    WindowSize(i64),
    BeaconTimeout(i64),
    MacAdd(IdString),
    MacRemove(IdString),
    MacClear,
    MacEnable(bool),
    RangeCm(i64),
    DebounceMs(i64),
    FilterEnable(bool),
    SensorEnable(bool),
    DeviceName(IdString),
    MagicWord(IdString),
}

/// Upper bound on changes in one command: one per recognized field
pub const MAX_CHANGES: usize = 24;

/// How an inbound command addresses its unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// `target` field, matched against the gateway id
    Target(IdString),
    /// `m` field, matched against the magic word
    Magic(IdString),
}

/// A parsed, addressed configuration command.
///
/// Built from [`RawCommand`] in `comm::parse_command()`. `changes` keeps the
/// field order of [`RawCommand`], not the order on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCommand {
    pub identity: Identity,
    pub changes: Vec<SettingChange, MAX_CHANGES>,
    /// `set_gateway_id` arrived without a `value`
    pub missing_value: bool,
}

/// Wire format for inbound commands. A flat struct that `serde_json_core`
/// can deserialize without `deserialize_any`; unknown fields are skipped.
/// Integer settings are read as `i64` so that negative or oversized values
/// still parse and are rejected by validation with an acknowledgement.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawCommand {
    #[serde(default)]
    pub target: Option<IdString>,
    #[serde(default)]
    pub m: Option<IdString>,
    #[serde(default, rename = "CMD")]
    pub cmd: Option<String<16>>,
    #[serde(default)]
    pub value: Option<IdString>,

    #[serde(default)]
    pub scan_time: Option<i64>,
    #[serde(default)]
    pub scan_interval: Option<i64>,
    #[serde(default)]
    pub scan_window: Option<i64>,
    #[serde(default)]
    pub active_scan: Option<bool>,
    #[serde(default)]
    pub tx_power: Option<i64>,
    #[serde(default)]
    pub env_factor: Option<f32>,
    #[serde(default)]
    pub distance_correction: Option<f32>,
    #[serde(default)]
    pub distance_threshold: Option<f32>,
    #[serde(default)]
    pub process_noise: Option<f32>,
    #[serde(default)]
    pub measurement_noise: Option<f32>,
    #[serde(default)]
    pub window_size: Option<i64>,
    #[serde(default)]
    pub beacon_timeout: Option<i64>,

    #[serde(default)]
    pub mac_add: Option<IdString>,
    #[serde(default)]
    pub mac_remove: Option<IdString>,
    #[serde(default)]
    pub mac_clear: Option<bool>,
    #[serde(default)]
    pub mac_enable: Option<bool>,

    #[serde(default)]
    pub range_cm: Option<i64>,
    #[serde(default)]
    pub debounce_ms: Option<i64>,
    #[serde(default)]
    pub filter_enable: Option<bool>,
    #[serde(default)]
    pub sensor_enable: Option<bool>,
    #[serde(default)]
    pub device_name: Option<IdString>,
    #[serde(default)]
    pub magic_word: Option<IdString>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message. Sized for a zone snapshot
/// listing every entity the table can hold.
pub const MAX_MSG_LEN: usize = 1024;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

// ── Float formatting ───────────────────────────────────────────────────

/// Distances go out with two decimals
fn round2<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f32(libm::roundf(*value * 100.0) / 100.0)
}

/// Elapsed seconds go out with one decimal
fn round1<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f32(libm::roundf(*value * 10.0) / 10.0)
}

fn round2_opt<S: Serializer>(value: &Option<f32>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => round2(v, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json<'b>(msg: &DeviceMessage, buf: &'b mut [u8]) -> &'b str {
        let len = serde_json_core::to_slice(msg, buf).unwrap();
        core::str::from_utf8(&buf[..len]).unwrap()
    }

    // ── DeviceMessage serialization ─────────────────────────────────

    #[test]
    fn serialize_beacon_rounds_fields() {
        let msg = DeviceMessage::Beacon {
            name: "Tag-7",
            distance: 0.8349,
            last_seen: 3.26,
            beacon: true,
        };
        let mut buf = [0u8; 128];
        let json = to_json(&msg, &mut buf);
        assert!(json.contains(r#""name":"Tag-7""#));
        assert!(json.contains(r#""distance":0.83"#));
        assert!(!json.contains("0.834"));
        assert!(json.contains(r#""last_seen":3.3"#));
        assert!(json.contains(r#""beacon":true"#));
        assert!(!json.contains("type"));
    }

    #[test]
    fn serialize_zone_snapshot() {
        let members = [
            ZoneMember { n: "A", d: 0.5 },
            ZoneMember { n: "B", d: 0.756 },
        ];
        let msg = DeviceMessage::ZoneSnapshot {
            zone: "TRAC 001",
            s: &members,
        };
        let mut buf = [0u8; 128];
        let json = to_json(&msg, &mut buf);
        assert_eq!(
            json,
            r#"{"zone":"TRAC 001","s":[{"n":"A","d":0.5},{"n":"B","d":0.76}]}"#
        );
    }

    #[test]
    fn serialize_empty_zone_snapshot() {
        let msg = DeviceMessage::ZoneSnapshot { zone: "G", s: &[] };
        let mut buf = [0u8; 64];
        assert_eq!(to_json(&msg, &mut buf), r#"{"zone":"G","s":[]}"#);
    }

    #[test]
    fn serialize_zone_enter_and_leave() {
        let enter = DeviceMessage::ZoneChange {
            zone: "G1",
            n: "Tag",
            d: Some(0.9),
            present: true,
        };
        let mut buf = [0u8; 128];
        let json = to_json(&enter, &mut buf);
        assert!(json.contains(r#""d":0.9"#));
        assert!(json.contains(r#""present":true"#));

        let leave = DeviceMessage::ZoneChange {
            zone: "G1",
            n: "Tag",
            d: None,
            present: false,
        };
        let json = to_json(&leave, &mut buf);
        assert_eq!(json, r#"{"zone":"G1","n":"Tag","present":false}"#);
    }

    #[test]
    fn serialize_radar_payload() {
        let msg = DeviceMessage::Radar {
            d: "LD2450_A",
            m: "LD2450",
            t1: true,
            t1_d: 120,
            t2: false,
            t2_d: 0,
            t3: false,
            t3_d: 0,
            x: 120,
            e: 0,
        };
        let mut buf = [0u8; 256];
        let json = to_json(&msg, &mut buf);
        assert!(json.starts_with(r#"{"d":"LD2450_A","m":"LD2450","t1":true,"t1_d":120"#));
        assert!(json.ends_with(r#""x":120,"e":0}"#));
    }

    #[test]
    fn whole_distance_prints_shortest_form() {
        let members = [ZoneMember { n: "A", d: 0.999 }];
        let msg = DeviceMessage::ZoneSnapshot { zone: "G", s: &members };
        let mut buf = [0u8; 64];
        assert_eq!(to_json(&msg, &mut buf), r#"{"zone":"G","s":[{"n":"A","d":1.0}]}"#);
    }

    #[test]
    fn serialize_ack() {
        let msg = DeviceMessage::Ack { ack: "G1", ok: true };
        let mut buf = [0u8; 64];
        assert_eq!(to_json(&msg, &mut buf), r#"{"ack":"G1","ok":true}"#);
    }

    // ── RawCommand wire format ──────────────────────────────────────

    #[test]
    fn raw_command_ignores_unknown_fields() {
        let json = br#"{"target":"G1","foo":12,"distance_threshold":2.5,"bar":"x"}"#;
        let (raw, _) = serde_json_core::from_slice::<RawCommand>(json).unwrap();
        assert_eq!(raw.target.as_deref(), Some("G1"));
        assert_eq!(raw.distance_threshold, Some(2.5));
        assert!(raw.m.is_none());
    }

    #[test]
    fn raw_command_keeps_out_of_width_integers() {
        let json = br#"{"m":"LD2450","debounce_ms":-100,"range_cm":70000}"#;
        let (raw, _) = serde_json_core::from_slice::<RawCommand>(json).unwrap();
        assert_eq!(raw.debounce_ms, Some(-100));
        assert_eq!(raw.range_cm, Some(70_000));
    }

    #[test]
    fn raw_command_gateway_rename() {
        let json = br#"{"target":"G1","CMD":"set_gateway_id","value":"G2"}"#;
        let (raw, _) = serde_json_core::from_slice::<RawCommand>(json).unwrap();
        assert_eq!(raw.cmd.as_deref(), Some("set_gateway_id"));
        assert_eq!(raw.value.as_deref(), Some("G2"));
    }

    // ── Version constant ────────────────────────────────────────────

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "VERSION should be semver (major.minor.patch)"
        );
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
