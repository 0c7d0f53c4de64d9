//! Main-loop context tying sources, tracking, telemetry and commands together.
//!
//! The firmware owns one [`Engine`] and drives it once per loop iteration:
//! [`Engine::handle_inbound`] with whatever serial bytes arrived,
//! [`Engine::ingest`] to drain the signal source, [`Engine::run_pass`] for
//! the tracking pass and telemetry, then [`Engine::display_frame`] for the
//! screen. All state lives here; nothing is process-global.

use heapless::Vec;

use crate::comm::{handle_command, message_line, parse_command, CommandReader};
use crate::entity::{EntityId, EntityTable, MAX_ENTITIES, UNKNOWN_NAME};
use crate::presentation::{BeaconView, DisplayMode, DisplayState, RadarView, RefreshLimiter};
use crate::protocol::{ConfigCommand, DeviceMessage, ZoneMember};
use crate::scanner::SignalSource;
use crate::settings::{Deployment, Settings, SettingsStore};
use crate::zone::{TrackingReport, ZoneEvent, ZoneTracker, NO_DISTANCE};

/// Destination for outbound NDJSON lines (the mesh radio UART).
pub trait LineSink {
    /// Write one complete line, terminator included.
    fn send_line(&mut self, line: &[u8]);
}

/// What the display should show on this refresh. Owned, so it can be
/// handed to a display task.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayFrame {
    Beacon {
        mode: DisplayMode,
        view: Option<BeaconView>,
    },
    Radar(RadarView),
}

pub struct Engine {
    settings: Settings,
    entities: EntityTable,
    zone: ZoneTracker,
    reader: CommandReader,
    last_telemetry_ms: Option<u64>,
    /// A confirmed presence flip happened since the last pass
    presence_changed: bool,
    display: DisplayState,
    refresh: RefreshLimiter,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            entities: EntityTable::new(),
            zone: ZoneTracker::new(),
            reader: CommandReader::new(),
            last_telemetry_ms: None,
            presence_changed: false,
            display: DisplayState::new(),
            refresh: RefreshLimiter::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn zone(&self) -> &ZoneTracker {
        &self.zone
    }

    // ── Inbound commands ────────────────────────────────────────────

    /// Feed serial bytes received at `now_ms`, applying every complete
    /// command addressed to this unit. Returns `true` if any command
    /// changed the settings.
    pub fn handle_inbound<K: LineSink, S: SettingsStore>(
        &mut self,
        bytes: &[u8],
        now_ms: u64,
        sink: &mut K,
        store: &mut S,
    ) -> bool {
        self.reader.expire(now_ms);
        let mut changed = false;
        for &b in bytes {
            let Some(cmd) = self.reader.feed(b, now_ms).and_then(parse_command) else {
                continue;
            };
            changed |= self.apply_command(&cmd, sink, store);
        }
        changed
    }

    /// Apply a parsed command, persist on success and acknowledge.
    pub fn apply_command<K: LineSink, S: SettingsStore>(
        &mut self,
        cmd: &ConfigCommand,
        sink: &mut K,
        store: &mut S,
    ) -> bool {
        let Some(outcome) = handle_command(cmd, &mut self.settings) else {
            return false;
        };
        if outcome.ok {
            self.entities.apply_settings(&self.settings);
            if let Err(e) = self.settings.save(store) {
                log::warn!("Failed to persist settings: {:?}", e);
            }
        }
        emit(sink, &outcome.ack());
        outcome.ok
    }

    // ── Sampling and tracking ───────────────────────────────────────

    /// Drain the source into the entity table. Returns the number of
    /// samples consumed.
    pub fn ingest<Src: SignalSource + ?Sized>(&mut self, source: &mut Src) -> usize {
        let mut count = 0;
        while let Some(sample) = source.next_sample(&self.settings) {
            if self
                .entities
                .observe(&sample, &self.settings, self.zone.members())
            {
                self.presence_changed = true;
            }
            count += 1;
        }
        count
    }

    /// Run the tracking pass and send whatever telemetry it calls for.
    pub fn run_pass<K: LineSink>(&mut self, now_ms: u64, sink: &mut K) -> TrackingReport {
        let report = self.zone.advance(
            &self.entities,
            now_ms,
            self.settings.zone_threshold(),
            self.settings.liveness_ms,
        );
        let presence_changed = core::mem::take(&mut self.presence_changed);
        let periodic = self.telemetry_due(now_ms);

        match self.settings.deployment {
            Deployment::Beacon => {
                self.send_zone_events(&report, now_ms, sink);
                if periodic {
                    self.send_zone_snapshot(sink);
                }
            }
            Deployment::Radar => {
                if periodic || presence_changed {
                    self.send_radar_payload(sink);
                }
            }
        }
        report
    }

    fn telemetry_due(&mut self, now_ms: u64) -> bool {
        match self.last_telemetry_ms {
            Some(last) if now_ms.saturating_sub(last) < self.settings.telemetry_interval_ms => {
                false
            }
            _ => {
                self.last_telemetry_ms = Some(now_ms);
                true
            }
        }
    }

    fn name_of(&self, id: &EntityId) -> &str {
        self.entities.get(id).map_or(UNKNOWN_NAME, |e| e.name())
    }

    // ── Outbound telemetry ──────────────────────────────────────────

    fn send_zone_events<K: LineSink>(&self, report: &TrackingReport, now_ms: u64, sink: &mut K) {
        let zone = self.settings.gateway_id.as_str();
        for event in &report.events {
            let msg = match event {
                ZoneEvent::Entered { id, distance } => DeviceMessage::ZoneChange {
                    zone,
                    n: self.name_of(id),
                    d: Some(*distance),
                    present: true,
                },
                ZoneEvent::Left { id } => DeviceMessage::ZoneChange {
                    zone,
                    n: self.name_of(id),
                    d: None,
                    present: false,
                },
                ZoneEvent::TrackedDeparted { id } => DeviceMessage::Beacon {
                    name: self.name_of(id),
                    distance: NO_DISTANCE,
                    last_seen: self.settings.beacon_timeout_s as f32 + 1.0,
                    beacon: false,
                },
                ZoneEvent::TrackedReturned { id } => DeviceMessage::Beacon {
                    name: self.name_of(id),
                    distance: self.entities.get(id).map_or(NO_DISTANCE, |e| e.filtered()),
                    last_seen: 0.0,
                    beacon: true,
                },
            };
            emit(sink, &msg);
        }

        if report.closest_changed {
            if let Some(e) = self.zone.closest().and_then(|id| self.entities.get(id)) {
                let elapsed = e.elapsed_s(now_ms);
                emit(
                    sink,
                    &DeviceMessage::Beacon {
                        name: e.name(),
                        distance: e.filtered(),
                        last_seen: elapsed,
                        beacon: elapsed < self.settings.beacon_timeout_s as f32,
                    },
                );
            }
        }
    }

    fn send_zone_snapshot<K: LineSink>(&self, sink: &mut K) {
        let mut members: Vec<ZoneMember, MAX_ENTITIES> = Vec::new();
        for e in self
            .zone
            .members()
            .iter()
            .filter_map(|id| self.entities.get(id))
        {
            let _ = members.push(ZoneMember {
                n: e.name(),
                d: e.filtered(),
            });
        }
        emit(
            sink,
            &DeviceMessage::ZoneSnapshot {
                zone: &self.settings.gateway_id,
                s: &members,
            },
        );
    }

    fn send_radar_payload<K: LineSink>(&self, sink: &mut K) {
        let view = self.radar_view();
        let [t1, t2, t3] = view.slots;
        emit(
            sink,
            &DeviceMessage::Radar {
                d: &self.settings.device_name,
                m: &self.settings.magic_word,
                t1: t1.present,
                t1_d: t1.distance_cm,
                t2: t2.present,
                t2_d: t2.distance_cm,
                t3: t3.present,
                t3_d: t3.distance_cm,
                x: view.closest_cm,
                e: 0,
            },
        );
    }

    // ── Presentation ────────────────────────────────────────────────

    pub fn radar_view(&self) -> RadarView {
        RadarView::from_table(&self.entities, &self.settings)
    }

    /// The next display frame, or `None` if the refresh interval has not
    /// elapsed yet.
    pub fn display_frame(&mut self, now_ms: u64) -> Option<DisplayFrame> {
        if !self.refresh.due(now_ms) {
            return None;
        }
        match self.settings.deployment {
            Deployment::Beacon => {
                let view = BeaconView::tracked(&self.entities, &self.zone, &self.settings, now_ms);
                let present = view.as_ref().is_some_and(|v| v.present);
                let mode = self.display.update(present, now_ms);
                Some(DisplayFrame::Beacon { mode, view })
            }
            Deployment::Radar => Some(DisplayFrame::Radar(self.radar_view())),
        }
    }
}

fn emit<K: LineSink>(sink: &mut K, msg: &DeviceMessage) {
    match message_line(msg) {
        Some(line) => sink.send_line(&line),
        None => log::warn!("Outbound message too large, dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MacString, NameString};
    use crate::radar::{RadarSource, FRAME_FOOTER, FRAME_HEADER, FRAME_LEN};
    use crate::scanner::{BeaconReport, BeaconSource};
    use crate::settings::MemoryStore;

    #[derive(Default)]
    struct Lines(std::vec::Vec<std::string::String>);

    impl LineSink for Lines {
        fn send_line(&mut self, line: &[u8]) {
            let text = core::str::from_utf8(line).unwrap();
            assert!(text.ends_with('\n'));
            self.0.push(text.trim_end().into());
        }
    }

    fn tag(rssi: i32, t: u64) -> BeaconReport {
        BeaconReport {
            address: MacString::try_from("aa:bb:cc:dd:ee:01").unwrap(),
            rssi,
            name: Some(NameString::try_from("Tag").unwrap()),
            timestamp_ms: t,
        }
    }

    fn device(last: u8, rssi: i32, t: u64) -> BeaconReport {
        use core::fmt::Write;
        let mut address = MacString::new();
        write!(address, "10:00:00:00:00:{:02x}", last).unwrap();
        BeaconReport {
            address,
            rssi,
            name: None,
            timestamp_ms: t,
        }
    }

    /// Target at x=300 mm, y=400 mm: 50 cm
    const T_50CM: [u8; 8] = [0x2C, 0x81, 0x90, 0x81, 0x00, 0x80, 0x68, 0x01];

    fn frame(slot1: [u8; 8]) -> [u8; FRAME_LEN] {
        let mut f = [0u8; FRAME_LEN];
        f[..4].copy_from_slice(&FRAME_HEADER);
        f[4..12].copy_from_slice(&slot1);
        f[FRAME_LEN - 2..].copy_from_slice(&FRAME_FOOTER);
        f
    }

    // ── Beacon telemetry ────────────────────────────────────────────

    #[test]
    fn beacon_arrival_reports_entry_closest_and_snapshot() {
        let mut engine = Engine::new(Settings::beacon());
        let mut src = BeaconSource::new();
        let mut out = Lines::default();

        // -50 dBm at tx -59, n=2: ~0.35 m
        src.push(tag(-50, 1000));
        assert_eq!(engine.ingest(&mut src), 1);
        let report = engine.run_pass(1000, &mut out);
        assert!(report.closest_changed);

        assert_eq!(out.0.len(), 3);
        assert_eq!(
            out.0[0],
            r#"{"zone":"TRAC 001","n":"Tag","d":0.35,"present":true}"#
        );
        assert!(out.0[1].contains(r#""name":"Tag","distance":0.35"#));
        assert!(out.0[1].contains(r#""beacon":true"#));
        assert_eq!(out.0[2], r#"{"zone":"TRAC 001","s":[{"n":"Tag","d":0.35}]}"#);
    }

    #[test]
    fn beacon_departure_and_return() {
        let mut engine = Engine::new(Settings::beacon());
        let mut src = BeaconSource::new();
        let mut out = Lines::default();
        src.push(tag(-50, 1000));
        engine.ingest(&mut src);
        engine.run_pass(1000, &mut out);
        out.0.clear();

        // Stale after the liveness window
        engine.run_pass(40_000, &mut out);
        assert_eq!(out.0.len(), 3);
        assert_eq!(out.0[0], r#"{"zone":"TRAC 001","n":"Tag","present":false}"#);
        assert!(out.0[1].contains(r#""last_seen":11.0"#));
        assert!(out.0[1].contains(r#""beacon":false"#));
        assert_eq!(out.0[2], r#"{"zone":"TRAC 001","s":[]}"#);
        assert!(engine.zone().disappearance_reported());

        // No repeat while still gone
        out.0.clear();
        engine.run_pass(40_500, &mut out);
        assert!(out.0.is_empty());

        src.push(tag(-50, 41_000));
        engine.ingest(&mut src);
        engine.run_pass(41_000, &mut out);
        assert_eq!(out.0.len(), 2);
        assert!(out.0[0].contains(r#""present":true"#));
        assert!(out.0[1].contains(r#""last_seen":0.0"#));
        assert!(out.0[1].contains(r#""beacon":true"#));
        assert!(!engine.zone().disappearance_reported());
    }

    #[test]
    fn snapshot_follows_telemetry_interval() {
        let mut engine = Engine::new(Settings::beacon());
        let mut out = Lines::default();
        engine.run_pass(0, &mut out);
        engine.run_pass(1999, &mut out);
        assert_eq!(out.0.len(), 1);
        engine.run_pass(2000, &mut out);
        assert_eq!(out.0.len(), 2);
    }

    // ── Commands ────────────────────────────────────────────────────

    #[test]
    fn addressed_command_applies_persists_and_acks() {
        let mut engine = Engine::new(Settings::beacon());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();

        let cmd = br#"{"target":"TRAC 001","distance_threshold":2.5}"#;
        assert!(engine.handle_inbound(cmd, 0, &mut out, &mut store));
        assert_eq!(out.0, [r#"{"ack":"TRAC 001","ok":true}"#]);
        assert_eq!(engine.settings().distance_threshold, 2.5);

        let mut restored = Settings::beacon();
        assert!(restored.load(&mut store).unwrap());
        assert_eq!(restored.distance_threshold, 2.5);
    }

    #[test]
    fn command_for_another_unit_is_silent() {
        let mut engine = Engine::new(Settings::beacon());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        let cmd = br#"{"target":"G2","distance_threshold":2.5}"#;
        assert!(!engine.handle_inbound(cmd, 0, &mut out, &mut store));
        assert!(out.0.is_empty());
        assert!(store.is_empty());
        assert_eq!(engine.settings().distance_threshold, 1.0);
    }

    #[test]
    fn rejected_command_is_not_persisted() {
        let mut engine = Engine::new(Settings::beacon());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        let cmd = br#"{"target":"TRAC 001","window_size":50}"#;
        assert!(!engine.handle_inbound(cmd, 0, &mut out, &mut store));
        assert_eq!(out.0, [r#"{"ack":"TRAC 001","ok":false}"#]);
        assert!(store.is_empty());
    }

    #[test]
    fn out_of_width_values_are_acked_false() {
        let mut engine = Engine::new(Settings::radar());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();

        engine.handle_inbound(br#"{"m":"LD2450","debounce_ms":-100}"#, 0, &mut out, &mut store);
        engine.handle_inbound(br#"{"m":"LD2450","range_cm":70000}"#, 10, &mut out, &mut store);
        engine.handle_inbound(
            br#"{"m":"LD2450","range_cm":450,"debounce_ms":-1}"#,
            20,
            &mut out,
            &mut store,
        );
        assert_eq!(out.0, [r#"{"ack":"LD2450_A","ok":false}"#; 3]);
        assert_eq!(engine.settings().range_cm, 300);
        assert_eq!(engine.settings().debounce_ms, 2500);
        assert!(store.is_empty());
    }

    #[test]
    fn stale_partial_message_is_discarded() {
        let mut engine = Engine::new(Settings::beacon());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        engine.handle_inbound(br#"{"target":"TRA"#, 0, &mut out, &mut store);
        engine.handle_inbound(br#"{"target":"TRAC 001","scan_time":7}"#, 200, &mut out, &mut store);
        assert_eq!(out.0, [r#"{"ack":"TRAC 001","ok":true}"#]);
        assert_eq!(engine.settings().scan_time_s, 7);
    }

    #[test]
    fn split_command_across_reads() {
        let mut engine = Engine::new(Settings::radar());
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        engine.handle_inbound(br#"{"m":"LD2450","#, 0, &mut out, &mut store);
        engine.handle_inbound(br#""range_cm":150}"#, 20, &mut out, &mut store);
        assert_eq!(out.0, [r#"{"ack":"LD2450_A","ok":true}"#]);
        assert_eq!(engine.settings().zone_threshold(), 150.0);
    }

    // ── Table pressure and allow-list ───────────────────────────────

    #[test]
    fn full_table_keeps_zone_members() {
        let mut engine = Engine::new(Settings::beacon());
        let mut src = BeaconSource::new();
        let mut out = Lines::default();

        // Two members at ~0.35 m, fourteen bystanders at ~35 m
        src.push(device(1, -50, 1000));
        src.push(device(2, -50, 1000));
        for i in 3..=(MAX_ENTITIES as u8) {
            src.push(device(i, -90, 1000 + i as u64));
        }
        engine.ingest(&mut src);
        engine.run_pass(1000, &mut out);
        assert_eq!(engine.entities().len(), MAX_ENTITIES);
        assert_eq!(engine.zone().members().len(), 2);
        out.0.clear();

        src.push(device(0x40, -90, 1100));
        engine.ingest(&mut src);
        engine.run_pass(1100, &mut out);
        assert!(out.0.iter().all(|l| !l.contains(r#""present":false"#)));
        assert_eq!(engine.zone().members().len(), 2);
        assert_eq!(engine.entities().len(), MAX_ENTITIES);
    }

    #[test]
    fn allow_list_change_drops_tracked_beacon() {
        let mut engine = Engine::new(Settings::beacon());
        let mut src = BeaconSource::new();
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        src.push(tag(-50, 1000));
        engine.ingest(&mut src);
        engine.run_pass(1000, &mut out);
        assert_eq!(engine.zone().members().len(), 1);
        out.0.clear();

        let cmd = br#"{"target":"TRAC 001","mac_add":"bb:bb:bb:bb:bb:bb","mac_enable":true}"#;
        assert!(engine.handle_inbound(cmd, 1100, &mut out, &mut store));
        out.0.clear();

        engine.run_pass(1200, &mut out);
        assert!(engine.zone().members().is_empty());
        assert!(engine.zone().closest().is_none());
        assert_eq!(out.0.len(), 2);
        assert_eq!(out.0[0], r#"{"zone":"TRAC 001","n":"Tag","present":false}"#);
        assert!(out.0[1].contains(r#""beacon":false"#));
    }

    // ── Radar telemetry ─────────────────────────────────────────────

    #[test]
    fn radar_payload_on_confirmed_change_only() {
        let mut engine = Engine::new(Settings::radar());
        let mut radar = RadarSource::new();
        let mut out = Lines::default();

        radar.feed(&frame(T_50CM), 0);
        engine.ingest(&mut radar);
        engine.run_pass(0, &mut out);
        assert_eq!(
            out.0,
            [r#"{"d":"LD2450_A","m":"LD2450","t1":false,"t1_d":0,"t2":false,"t2_d":0,"t3":false,"t3_d":0,"x":600,"e":0}"#]
        );

        // Debounce completes
        radar.feed(&frame(T_50CM), 2500);
        engine.ingest(&mut radar);
        engine.run_pass(2500, &mut out);
        assert_eq!(out.0.len(), 2);
        assert!(out.0[1].contains(r#""t1":true,"t1_d":50"#));
        assert!(out.0[1].contains(r#""x":50"#));

        // A single miss only starts debouncing: no change, not yet periodic
        radar.feed(&frame([0; 8]), 2600);
        engine.ingest(&mut radar);
        engine.run_pass(2600, &mut out);
        assert_eq!(out.0.len(), 2);
    }

    #[test]
    fn sensor_disable_stops_ingestion() {
        let mut engine = Engine::new(Settings::radar());
        let mut radar = RadarSource::new();
        let mut out = Lines::default();
        let mut store = MemoryStore::new();
        engine.handle_inbound(br#"{"m":"LD2450","sensor_enable":false}"#, 0, &mut out, &mut store);
        radar.feed(&frame(T_50CM), 10);
        assert_eq!(engine.ingest(&mut radar), 0);
        assert!(engine.entities().is_empty());
    }

    // ── Display ─────────────────────────────────────────────────────

    #[test]
    fn display_tracks_then_alerts() {
        let mut engine = Engine::new(Settings::beacon());
        let mut src = BeaconSource::new();
        let mut out = Lines::default();
        src.push(tag(-50, 1000));
        engine.ingest(&mut src);
        engine.run_pass(1000, &mut out);

        match engine.display_frame(1000) {
            Some(DisplayFrame::Beacon { mode, view }) => {
                assert_eq!(mode, DisplayMode::Tracking);
                assert_eq!(view.unwrap().name, "Tag");
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(engine.display_frame(1200).is_none());

        engine.run_pass(40_000, &mut out);
        match engine.display_frame(40_000) {
            Some(DisplayFrame::Beacon { mode, .. }) => assert_eq!(mode, DisplayMode::Alert),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn radar_display_frame() {
        let mut s = Settings::radar();
        s.filter_enable = false;
        let mut engine = Engine::new(s);
        let mut radar = RadarSource::new();
        radar.feed(&frame(T_50CM), 0);
        engine.ingest(&mut radar);
        match engine.display_frame(0) {
            Some(DisplayFrame::Radar(view)) => {
                assert!(view.slots[0].present);
                assert_eq!(view.closest_cm, 50);
                assert!(!view.filter_enable);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
