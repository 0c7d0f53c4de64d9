//! Tracked entities and the fixed-capacity table that holds them.
//!
//! An entity is created on first observation and updated on every later
//! one. Records are never dropped on inactivity; stale entities simply stop
//! qualifying for zone membership. When the table is full a stale entity
//! makes room, or failing that the farthest one outside the zone. Zone
//! members are never displaced; the newcomer is dropped instead.

use core::fmt;

use heapless::Vec;

use crate::filter::{device_allowed, KalmanFilter, MovingAverage};
use crate::presence::{PresenceMachine, PresenceState};
use crate::protocol::{MacString, NameString};
use crate::scanner::Sample;
use crate::settings::Settings;

/// Maximum number of simultaneously tracked entities
pub const MAX_ENTITIES: usize = 16;

/// Name reported for beacons that never advertised one
pub const UNKNOWN_NAME: &str = "Unknown";

/// Stable identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityId {
    /// BLE address, lowercase colon-separated hex
    Address(MacString),
    /// Radar target slot, 1..=3
    Slot(u8),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Address(mac) => f.write_str(mac),
            EntityId::Slot(n) => write!(f, "T{}", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedEntity {
    id: EntityId,
    name: NameString,
    raw: f32,
    kalman: KalmanFilter,
    average: MovingAverage,
    filtered: f32,
    averaged: f32,
    last_seen_ms: u64,
    /// Whether the most recent sample carried a valid measurement
    detected: bool,
    presence: PresenceMachine,
    /// Passes the device allow-list as currently configured
    allowed: bool,
}

impl TrackedEntity {
    pub fn new(id: EntityId, settings: &Settings) -> Self {
        let mut name = NameString::new();
        match &id {
            EntityId::Address(_) => {
                let _ = name.push_str(UNKNOWN_NAME);
            }
            EntityId::Slot(_) => {
                use core::fmt::Write;
                let _ = write!(name, "{}", id);
            }
        }
        Self {
            name,
            raw: 0.0,
            kalman: KalmanFilter::new(settings.process_noise, settings.measurement_noise),
            average: MovingAverage::new(settings.window_size),
            filtered: 0.0,
            averaged: 0.0,
            last_seen_ms: 0,
            detected: false,
            presence: PresenceMachine::new(),
            allowed: permitted(&id, settings),
            id,
        }
    }

    /// Run one sample through the filter pipeline and the presence machine.
    /// Returns `true` when the confirmed presence flipped.
    pub fn observe(&mut self, sample: &Sample, settings: &Settings) -> bool {
        if let Some(name) = &sample.name {
            if !name.is_empty() {
                self.name = name.clone();
            }
        }

        match sample.value {
            Some(raw) => {
                let stale = self.age_ms(sample.timestamp_ms) >= settings.liveness_ms;
                if !self.detected || stale {
                    // New track in this slot or long gap: seed from scratch
                    self.kalman.reset();
                    self.average.resize(settings.window_size);
                }
                self.raw = raw;
                self.filtered = self.kalman.update(raw);
                self.averaged = self.average.update(self.filtered);
                self.last_seen_ms = sample.timestamp_ms;
                self.detected = true;
            }
            None => self.detected = false,
        }

        let changed = self.presence.update(
            self.detected,
            sample.timestamp_ms,
            settings.debounce_ms,
            settings.filter_enable,
        );
        if changed {
            log::info!(
                "{} ({}) {}",
                self.name,
                self.id,
                if self.presence.is_present() { "present" } else { "absent" }
            );
        }
        changed
    }

    /// Push new noise parameters and window size into the filters.
    /// The Kalman estimate survives; the moving average is rebuilt only
    /// if its size changed.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.kalman
            .set_noise(settings.process_noise, settings.measurement_noise);
        if self.average.window() != settings.window_size {
            self.average.resize(settings.window_size);
        }
        let allowed = permitted(&self.id, settings);
        if allowed != self.allowed {
            log::info!(
                "{} ({}) {} by allow-list",
                self.name,
                self.id,
                if allowed { "admitted" } else { "excluded" }
            );
            self.allowed = allowed;
        }
    }

    /// Zone membership: allowed, a valid measurement within `threshold`,
    /// seen within the liveness window, and confirmed present.
    pub fn is_member(&self, now_ms: u64, threshold: f32, liveness_ms: u64) -> bool {
        self.allowed
            && self.detected
            && self.filtered <= threshold
            && self.age_ms(now_ms) < liveness_ms
            && self.presence.is_present()
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms)
    }

    /// Seconds since the last valid observation
    pub fn elapsed_s(&self, now_ms: u64) -> f32 {
        self.age_ms(now_ms) as f32 / 1000.0
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> f32 {
        self.raw
    }

    pub fn filtered(&self) -> f32 {
        self.filtered
    }

    pub fn averaged(&self) -> f32 {
        self.averaged
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn presence(&self) -> PresenceState {
        self.presence.state()
    }

    pub fn is_present(&self) -> bool {
        self.presence.is_present()
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Distance used to rank eviction candidates; an entity with no
    /// current measurement counts as infinitely far.
    fn eviction_distance(&self) -> f32 {
        if self.detected {
            self.filtered
        } else {
            f32::INFINITY
        }
    }
}

/// Radar slots are not subject to the allow-list.
fn permitted(id: &EntityId, settings: &Settings) -> bool {
    match id {
        EntityId::Address(mac) => device_allowed(mac, settings),
        EntityId::Slot(_) => true,
    }
}

/// Fixed-capacity entity storage with linear lookup.
#[derive(Debug, Default)]
pub struct EntityTable {
    entries: Vec<TrackedEntity, MAX_ENTITIES>,
}

impl EntityTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entries.iter().find(|e| e.id == *id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut TrackedEntity> {
        self.entries.iter_mut().find(|e| e.id == *id)
    }

    /// Feed a sample to its entity, creating the entity if needed.
    ///
    /// When the table is full, a stale entity is replaced first (oldest
    /// `last_seen` wins), then the farthest entity outside the zone.
    /// Current zone members and anything in `protected` stay; if nothing
    /// else can go, the sample is dropped. Returns whether the entity's
    /// confirmed presence flipped.
    pub fn observe(
        &mut self,
        sample: &Sample,
        settings: &Settings,
        protected: &[EntityId],
    ) -> bool {
        let idx = match self.entries.iter().position(|e| e.id == sample.id) {
            Some(idx) => idx,
            None => {
                // Unseen entity with nothing to measure yet
                if sample.value.is_none() {
                    return false;
                }
                match self.insert(sample.id.clone(), settings, sample.timestamp_ms, protected) {
                    Some(idx) => idx,
                    None => return false,
                }
            }
        };
        self.entries[idx].observe(sample, settings)
    }

    fn insert(
        &mut self,
        id: EntityId,
        settings: &Settings,
        now_ms: u64,
        protected: &[EntityId],
    ) -> Option<usize> {
        let entity = TrackedEntity::new(id, settings);
        if !self.entries.is_full() {
            self.entries.push(entity).ok()?;
            return Some(self.entries.len() - 1);
        }

        let Some(victim) = self.eviction_victim(settings, now_ms, protected) else {
            log::debug!("Entity table full of zone members, dropping {}", entity.id);
            return None;
        };
        log::debug!(
            "Entity table full, replacing {} with {}",
            self.entries[victim].id,
            entity.id
        );
        self.entries[victim] = entity;
        Some(victim)
    }

    fn eviction_victim(
        &self,
        settings: &Settings,
        now_ms: u64,
        protected: &[EntityId],
    ) -> Option<usize> {
        let threshold = settings.zone_threshold();
        let liveness_ms = settings.liveness_ms;
        let evictable = |e: &TrackedEntity| {
            !protected.contains(&e.id) && !e.is_member(now_ms, threshold, liveness_ms)
        };

        let stale = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| evictable(*e) && e.age_ms(now_ms) >= liveness_ms)
            .min_by_key(|(_, e)| e.last_seen_ms)
            .map(|(i, _)| i);
        if stale.is_some() {
            return stale;
        }

        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| evictable(*e))
            .max_by(|(_, a), (_, b)| a.eviction_distance().total_cmp(&b.eviction_distance()))
            .map(|(i, _)| i)
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        for e in self.entries.iter_mut() {
            e.apply_settings(settings);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
