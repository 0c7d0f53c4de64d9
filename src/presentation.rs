//! Read-only display projection of the tracking state.
//!
//! The firmware's display loop pulls a view at most every
//! [`REFRESH_INTERVAL_MS`] and renders it; nothing here mutates tracking
//! state.

use crate::entity::{EntityId, EntityTable};
use crate::protocol::{IdString, NameString};
use crate::radar::{MAX_RANGE_CM, TARGET_SLOTS};
use crate::settings::Settings;
use crate::zone::ZoneTracker;

/// Minimum time between display refreshes
pub const REFRESH_INTERVAL_MS: u64 = 500;

/// How long the "gone" alert stays up after the tracked entity is lost
pub const ALERT_DURATION_MS: u64 = 5000;

/// What the beacon display should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Nothing tracked; backlight off
    Off,
    /// Tracked entity present
    Tracking,
    /// Tracked entity just went absent
    Alert,
}

/// Display mode machine: Tracking while present, a timed Alert on a
/// present → absent flip, Off otherwise.
#[derive(Debug)]
pub struct DisplayState {
    mode: DisplayMode,
    alert_until_ms: u64,
    was_present: bool,
}

impl DisplayState {
    pub const fn new() -> Self {
        Self {
            mode: DisplayMode::Off,
            alert_until_ms: 0,
            was_present: false,
        }
    }

    pub fn update(&mut self, present: bool, now_ms: u64) -> DisplayMode {
        if present {
            self.mode = DisplayMode::Tracking;
        } else if self.was_present {
            log::info!("Tracked entity gone");
            self.mode = DisplayMode::Alert;
            self.alert_until_ms = now_ms + ALERT_DURATION_MS;
        } else if self.mode == DisplayMode::Alert && now_ms >= self.alert_until_ms {
            self.mode = DisplayMode::Off;
        } else if self.mode == DisplayMode::Tracking {
            self.mode = DisplayMode::Off;
        }
        self.was_present = present;
        self.mode
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiter for display refreshes.
#[derive(Debug, Default)]
pub struct RefreshLimiter {
    last_ms: Option<u64>,
}

impl RefreshLimiter {
    pub const fn new() -> Self {
        Self { last_ms: None }
    }

    /// `true` at most once per [`REFRESH_INTERVAL_MS`]
    pub fn due(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms.saturating_sub(last) < REFRESH_INTERVAL_MS => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }
}

/// The tracked beacon as shown on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconView {
    pub gateway: IdString,
    pub name: NameString,
    pub distance: f32,
    pub elapsed_s: f32,
    pub present: bool,
}

impl BeaconView {
    /// View of the tracked entity, or of the departed one while its
    /// departure is outstanding.
    pub fn tracked(
        table: &EntityTable,
        tracker: &ZoneTracker,
        settings: &Settings,
        now_ms: u64,
    ) -> Option<Self> {
        let id = tracker.closest().or(tracker.departed())?;
        let e = table.get(id)?;
        let elapsed_s = e.elapsed_s(now_ms);
        let mut name = NameString::new();
        let _ = name.push_str(e.name());
        Some(Self {
            gateway: settings.gateway_id.clone(),
            name,
            distance: e.filtered(),
            elapsed_s,
            present: tracker.closest().is_some() && elapsed_s < settings.beacon_timeout_s as f32,
        })
    }
}

/// Per-slot radar state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotView {
    pub present: bool,
    /// Last filtered distance in cm, 0 unless present
    pub distance_cm: u16,
}

/// Radar state as shown on screen and sent in the slot report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadarView {
    pub slots: [SlotView; TARGET_SLOTS],
    /// Closest present slot, or the sensor range limit
    pub closest_cm: u16,
    pub range_cm: u16,
    pub filter_enable: bool,
}

impl RadarView {
    pub fn from_table(table: &EntityTable, settings: &Settings) -> Self {
        let mut slots = [SlotView::default(); TARGET_SLOTS];
        let mut closest_cm = MAX_RANGE_CM;
        for (i, slot) in slots.iter_mut().enumerate() {
            let Some(e) = table.get(&EntityId::Slot(i as u8 + 1)) else {
                continue;
            };
            // A confirmed slot keeps its last filtered distance while debouncing a miss
            if e.is_present() {
                let cm = libm::roundf(e.filtered()) as u16;
                *slot = SlotView {
                    present: true,
                    distance_cm: cm,
                };
                closest_cm = closest_cm.min(cm);
            }
        }
        Self {
            slots,
            closest_cm,
            range_cm: settings.range_cm,
            filter_enable: settings.filter_enable,
        }
    }

    pub fn any_present(&self) -> bool {
        self.slots.iter().any(|s| s.present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MacString;
    use crate::scanner::Sample;

    fn observe(table: &mut EntityTable, s: &Settings, id: EntityId, v: Option<f32>, t: u64) {
        table.observe(
            &Sample {
                id,
                value: v,
                name: None,
                timestamp_ms: t,
            },
            s,
            &[],
        );
    }

    // ── Display mode ────────────────────────────────────────────────

    #[test]
    fn tracking_then_alert_then_off() {
        let mut d = DisplayState::new();
        assert_eq!(d.update(false, 0), DisplayMode::Off);
        assert_eq!(d.update(true, 100), DisplayMode::Tracking);
        assert_eq!(d.update(false, 1000), DisplayMode::Alert);
        assert_eq!(d.update(false, 5999), DisplayMode::Alert);
        assert_eq!(d.update(false, 6000), DisplayMode::Off);
        assert_eq!(d.update(false, 7000), DisplayMode::Off);
    }

    #[test]
    fn return_during_alert_resumes_tracking() {
        let mut d = DisplayState::new();
        d.update(true, 0);
        d.update(false, 100);
        assert_eq!(d.update(true, 200), DisplayMode::Tracking);
    }

    #[test]
    fn refresh_limiter_spacing() {
        let mut r = RefreshLimiter::new();
        assert!(r.due(0));
        assert!(!r.due(499));
        assert!(r.due(500));
        assert!(!r.due(600));
    }

    // ── Views ───────────────────────────────────────────────────────

    #[test]
    fn beacon_view_of_tracked_entity() {
        let s = Settings::beacon();
        let id = EntityId::Address(MacString::try_from("aa:bb:cc:dd:ee:ff").unwrap());
        let mut table = EntityTable::new();
        observe(&mut table, &s, id.clone(), Some(0.5), 1000);
        let mut z = ZoneTracker::new();
        assert!(BeaconView::tracked(&table, &z, &s, 1000).is_none());

        z.advance(&table, 1500, s.zone_threshold(), s.liveness_ms);
        let v = BeaconView::tracked(&table, &z, &s, 1500).unwrap();
        assert_eq!(v.gateway, "TRAC 001");
        assert_eq!(v.name, "Unknown");
        assert_eq!(v.distance, 0.5);
        assert_eq!(v.elapsed_s, 0.5);
        assert!(v.present);

        // Still a zone member but not heard from for beacon_timeout
        let v = BeaconView::tracked(&table, &z, &s, 11_000).unwrap();
        assert!(!v.present);
    }

    #[test]
    fn beacon_view_of_departed_entity() {
        let s = Settings::beacon();
        let id = EntityId::Address(MacString::try_from("aa:bb:cc:dd:ee:ff").unwrap());
        let mut table = EntityTable::new();
        observe(&mut table, &s, id.clone(), Some(0.5), 1000);
        let mut z = ZoneTracker::new();
        z.advance(&table, 1000, s.zone_threshold(), s.liveness_ms);
        z.advance(&table, 40_000, s.zone_threshold(), s.liveness_ms);
        let v = BeaconView::tracked(&table, &z, &s, 40_000).unwrap();
        assert!(!v.present);
    }

    #[test]
    fn radar_view_reports_present_slots() {
        let mut s = Settings::radar();
        s.filter_enable = false;
        let mut table = EntityTable::new();
        observe(&mut table, &s, EntityId::Slot(1), Some(120.0), 100);
        observe(&mut table, &s, EntityId::Slot(3), Some(80.4), 100);
        let v = RadarView::from_table(&table, &s);
        assert_eq!(
            v.slots,
            [
                SlotView {
                    present: true,
                    distance_cm: 120
                },
                SlotView::default(),
                SlotView {
                    present: true,
                    distance_cm: 80
                },
            ]
        );
        assert_eq!(v.closest_cm, 80);
        assert_eq!(v.range_cm, 300);
        assert!(!v.filter_enable);
        assert!(v.any_present());
    }

    #[test]
    fn radar_view_defaults_to_max_range() {
        let s = Settings::radar();
        let v = RadarView::from_table(&EntityTable::new(), &s);
        assert_eq!(v.closest_cm, MAX_RANGE_CM);
        assert!(!v.any_present());
    }
}
