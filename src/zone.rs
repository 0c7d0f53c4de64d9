//! Zone membership and closest-entity tracking.
//!
//! Once per scan/read cycle [`ZoneTracker::advance`] recomputes which
//! entities are inside the zone, reports arrivals and departures, and keeps
//! track of the single closest member. When the tracked entity disappears
//! a departure is reported exactly once; if it comes back a single return
//! is reported.

use heapless::Vec;

use crate::entity::{EntityId, EntityTable, MAX_ENTITIES};

/// Distance reported while nothing is tracked
pub const NO_DISTANCE: f32 = 999.0;

/// Upper bound on events from one pass: every member can enter and every
/// previous member can leave, plus departure/return of the tracked entity.
pub const MAX_EVENTS: usize = 2 * MAX_ENTITIES + 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    /// Entity joined the zone at the given filtered distance
    Entered { id: EntityId, distance: f32 },
    /// Entity left the zone
    Left { id: EntityId },
    /// The tracked closest entity is gone and nobody replaced it
    TrackedDeparted { id: EntityId },
    /// A previously departed tracked entity is back in the zone
    TrackedReturned { id: EntityId },
}

/// Outcome of one tracking pass.
#[derive(Debug, Default)]
pub struct TrackingReport {
    /// A different entity is now the closest one
    pub closest_changed: bool,
    pub events: Vec<ZoneEvent, MAX_EVENTS>,
}

impl TrackingReport {
    fn push(&mut self, event: ZoneEvent) {
        // Sized for the worst case; a full buffer means a logic error upstream
        if self.events.push(event).is_err() {
            log::warn!("Zone event buffer full");
        }
    }
}

#[derive(Debug)]
pub struct ZoneTracker {
    current: Vec<EntityId, MAX_ENTITIES>,
    previous: Vec<EntityId, MAX_ENTITIES>,
    closest: Option<EntityId>,
    closest_distance: f32,
    /// Tracked entity whose departure has been reported and not yet
    /// followed by a return or a replacement
    departed: Option<EntityId>,
}

impl ZoneTracker {
    pub const fn new() -> Self {
        Self {
            current: Vec::new(),
            previous: Vec::new(),
            closest: None,
            closest_distance: NO_DISTANCE,
            departed: None,
        }
    }

    /// Run one tracking pass over the entity table.
    ///
    /// `threshold` and `liveness_ms` are read fresh on every call so that
    /// runtime configuration changes apply on the next pass.
    pub fn advance(
        &mut self,
        entities: &EntityTable,
        now_ms: u64,
        threshold: f32,
        liveness_ms: u64,
    ) -> TrackingReport {
        let mut report = TrackingReport::default();

        // 1. Membership and best candidate (strict <, first wins ties)
        self.current.clear();
        let mut candidate: Option<(&EntityId, f32)> = None;
        for e in entities.iter() {
            if !e.is_member(now_ms, threshold, liveness_ms) {
                continue;
            }
            let _ = self.current.push(e.id().clone());
            if candidate.map_or(true, |(_, d)| e.filtered() < d) {
                candidate = Some((e.id(), e.filtered()));
            }
        }

        // 2. Composition change
        if !same_members(&self.current, &self.previous) {
            for id in self.current.iter().filter(|id| !self.previous.contains(id)) {
                let distance = entities.get(id).map_or(NO_DISTANCE, |e| e.filtered());
                log::info!("{} entered zone at {:.2}", id, distance);
                report.push(ZoneEvent::Entered {
                    id: id.clone(),
                    distance,
                });
            }
            for id in self.previous.iter().filter(|id| !self.current.contains(id)) {
                log::info!("{} left zone", id);
                report.push(ZoneEvent::Left { id: id.clone() });
            }
            self.previous.clone_from(&self.current);

            if let Some(tracked) = &self.closest {
                if !self.current.contains(tracked) {
                    if let Some((id, distance)) = candidate {
                        log::info!("Tracked {} left, re-electing {}", tracked, id);
                        self.closest = Some(id.clone());
                        self.closest_distance = distance;
                        self.departed = None;
                        report.closest_changed = true;
                    }
                }
            }
        }

        // 3. Tracked entity gone with nobody left to take over
        if let Some(tracked) = &self.closest {
            if !self.current.contains(tracked) {
                log::info!("Tracked {} departed", tracked);
                report.push(ZoneEvent::TrackedDeparted {
                    id: tracked.clone(),
                });
                self.departed = self.closest.take();
                self.closest_distance = NO_DISTANCE;
            }
        }

        // 4. Return of a departed entity
        let mut returned = false;
        if let Some(gone) = &self.departed {
            if self.current.contains(gone) {
                log::info!("Tracked {} returned", gone);
                report.push(ZoneEvent::TrackedReturned { id: gone.clone() });
                returned = true;
            }
        }

        // 5. Closest election
        if let Some((id, distance)) = candidate {
            match self.closest.clone() {
                None => {
                    let comeback = returned && self.departed.as_ref() == Some(id);
                    self.closest = Some(id.clone());
                    self.closest_distance = distance;
                    self.departed = None;
                    report.closest_changed |= !comeback;
                }
                Some(tracked) if tracked != *id => {
                    let tracked_distance = entities
                        .get(&tracked)
                        .map_or(NO_DISTANCE, |e| e.filtered());
                    if distance < tracked_distance {
                        log::info!("Closest changed: {} -> {}", tracked, id);
                        self.closest = Some(id.clone());
                        self.closest_distance = distance;
                        report.closest_changed = true;
                    } else {
                        self.closest_distance = tracked_distance;
                    }
                }
                Some(_) => self.closest_distance = distance,
            }
        }
        if returned && self.closest.is_some() {
            self.departed = None;
        }

        report
    }

    pub fn closest(&self) -> Option<&EntityId> {
        self.closest.as_ref()
    }

    /// Filtered distance of the tracked entity, or [`NO_DISTANCE`]
    pub fn closest_distance(&self) -> f32 {
        self.closest_distance
    }

    pub fn members(&self) -> &[EntityId] {
        &self.current
    }

    /// Departure of the tracked entity has been reported and it has been
    /// neither replaced nor seen again.
    pub fn disappearance_reported(&self) -> bool {
        self.departed.is_some()
    }

    pub fn departed(&self) -> Option<&EntityId> {
        self.departed.as_ref()
    }
}

impl Default for ZoneTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Order-independent equality; ids are unique within each list
fn same_members(a: &[EntityId], b: &[EntityId]) -> bool {
    a.len() == b.len() && a.iter().all(|id| b.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MacString;
    use crate::scanner::Sample;
    use crate::settings::Settings;

    const THRESHOLD: f32 = 1.0;
    const LIVENESS: u64 = 30_000;

    fn addr(s: &str) -> EntityId {
        EntityId::Address(MacString::try_from(s).unwrap())
    }

    /// Put an entity at exactly `distance` (invalid sample first reseeds
    /// the filter so the estimate equals the measurement)
    fn place(table: &mut EntityTable, s: &Settings, id: &EntityId, distance: f32, t: u64) {
        for value in [None, Some(distance)] {
            let sample = Sample {
                id: id.clone(),
                value,
                name: None,
                timestamp_ms: t,
            };
            table.observe(&sample, s, &[]);
        }
    }

    fn pass(z: &mut ZoneTracker, table: &EntityTable, t: u64) -> TrackingReport {
        z.advance(table, t, THRESHOLD, LIVENESS)
    }

    // ── Membership ──────────────────────────────────────────────────

    #[test]
    fn only_entities_within_threshold_are_members() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 1.2, 100);
        place(&mut table, &s, &e2, 0.8, 100);

        let mut z = ZoneTracker::new();
        let r = pass(&mut z, &table, 200);
        assert_eq!(z.members(), &[e2.clone()]);
        assert_eq!(z.closest(), Some(&e2));
        assert!(r.closest_changed);
        assert_eq!(
            r.events.as_slice(),
            &[ZoneEvent::Entered {
                id: e2,
                distance: 0.8
            }]
        );
    }

    #[test]
    fn swap_produces_arrival_departure_and_new_closest() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 1.2, 100);
        place(&mut table, &s, &e2, 0.8, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);

        place(&mut table, &s, &e1, 0.6, 300);
        place(&mut table, &s, &e2, 1.5, 300);
        let r = pass(&mut z, &table, 400);

        assert!(r.events.contains(&ZoneEvent::Entered {
            id: e1.clone(),
            distance: 0.6
        }));
        assert!(r.events.contains(&ZoneEvent::Left { id: e2.clone() }));
        assert_eq!(r.events.len(), 2);
        assert_eq!(z.closest(), Some(&e1));
        assert!(r.closest_changed);
        assert!(!z.disappearance_reported());
    }

    #[test]
    fn stale_entities_drop_out() {
        let s = Settings::beacon();
        let e1 = addr("00:00:00:00:00:01");
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 1000);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 1000);
        assert_eq!(z.members().len(), 1);

        let r = pass(&mut z, &table, 1000 + LIVENESS);
        assert!(z.members().is_empty());
        assert!(r.events.contains(&ZoneEvent::Left { id: e1.clone() }));
        assert!(r.events.contains(&ZoneEvent::TrackedDeparted { id: e1 }));
    }

    #[test]
    fn threshold_read_fresh_each_pass() {
        let s = Settings::beacon();
        let e1 = addr("00:00:00:00:00:01");
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 1.5, 100);
        let mut z = ZoneTracker::new();
        assert!(z.advance(&table, 200, 1.0, LIVENESS).events.is_empty());
        let r = z.advance(&table, 300, 2.0, LIVENESS);
        assert_eq!(r.events.len(), 1);
        assert_eq!(z.closest(), Some(&e1));
    }

    #[test]
    fn unchanged_composition_emits_nothing() {
        let s = Settings::beacon();
        let e1 = addr("00:00:00:00:00:01");
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);
        let r = pass(&mut z, &table, 300);
        assert!(r.events.is_empty());
        assert!(!r.closest_changed);
    }

    // ── Closest election ────────────────────────────────────────────

    #[test]
    fn tie_keeps_previous_closest() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);

        place(&mut table, &s, &e2, 0.5, 300);
        let r = pass(&mut z, &table, 400);
        assert_eq!(z.closest(), Some(&e1));
        assert!(!r.closest_changed);
    }

    #[test]
    fn strictly_closer_member_takes_over() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 100);
        place(&mut table, &s, &e2, 0.9, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);
        assert_eq!(z.closest(), Some(&e1));

        place(&mut table, &s, &e2, 0.3, 300);
        let r = pass(&mut z, &table, 400);
        assert!(r.events.is_empty());
        assert!(r.closest_changed);
        assert_eq!(z.closest(), Some(&e2));
        assert_eq!(z.closest_distance(), 0.3);
    }

    #[test]
    fn closest_distance_sentinel_when_idle() {
        let z = ZoneTracker::new();
        assert_eq!(z.closest(), None);
        assert_eq!(z.closest_distance(), NO_DISTANCE);
    }

    // ── Departure / return ──────────────────────────────────────────

    #[test]
    fn departure_reported_once_then_single_return() {
        let s = Settings::beacon();
        let e1 = addr("00:00:00:00:00:01");
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);

        place(&mut table, &s, &e1, 3.0, 300);
        let r = pass(&mut z, &table, 400);
        assert!(r.events.contains(&ZoneEvent::TrackedDeparted { id: e1.clone() }));
        assert!(z.disappearance_reported());
        assert_eq!(z.closest(), None);
        assert_eq!(z.closest_distance(), NO_DISTANCE);

        for t in [500, 600, 700] {
            let r = pass(&mut z, &table, t);
            assert!(r.events.is_empty(), "re-emitted at {}", t);
        }

        place(&mut table, &s, &e1, 0.4, 800);
        let r = pass(&mut z, &table, 900);
        let returns = r
            .events
            .iter()
            .filter(|e| matches!(e, ZoneEvent::TrackedReturned { .. }))
            .count();
        assert_eq!(returns, 1);
        assert!(!z.disappearance_reported());
        assert_eq!(z.closest(), Some(&e1));
        assert!(!r.closest_changed);

        let r = pass(&mut z, &table, 1000);
        assert!(r.events.is_empty());
    }

    #[test]
    fn replacement_clears_departure() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.5, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);
        place(&mut table, &s, &e1, 3.0, 300);
        pass(&mut z, &table, 400);
        assert!(z.disappearance_reported());

        place(&mut table, &s, &e2, 0.7, 500);
        let r = pass(&mut z, &table, 600);
        assert!(r.closest_changed);
        assert_eq!(z.closest(), Some(&e2));
        assert!(!z.disappearance_reported());
        assert!(!r
            .events
            .iter()
            .any(|e| matches!(e, ZoneEvent::TrackedReturned { .. })));
    }

    #[test]
    fn tracked_leaving_with_others_present_re_elects() {
        let s = Settings::beacon();
        let (e1, e2) = (addr("00:00:00:00:00:01"), addr("00:00:00:00:00:02"));
        let mut table = EntityTable::new();
        place(&mut table, &s, &e1, 0.3, 100);
        place(&mut table, &s, &e2, 0.9, 100);
        let mut z = ZoneTracker::new();
        pass(&mut z, &table, 200);

        place(&mut table, &s, &e1, 5.0, 300);
        let r = pass(&mut z, &table, 400);
        assert_eq!(z.closest(), Some(&e2));
        assert!(r.closest_changed);
        assert!(!r
            .events
            .iter()
            .any(|e| matches!(e, ZoneEvent::TrackedDeparted { .. })));
    }

    #[test]
    fn closest_is_always_a_member_after_pass() {
        let s = Settings::beacon();
        let ids = [
            addr("00:00:00:00:00:01"),
            addr("00:00:00:00:00:02"),
            addr("00:00:00:00:00:03"),
        ];
        let distances = [
            [0.5, 0.9, 2.0],
            [1.5, 0.9, 0.2],
            [1.5, 1.9, 0.2],
            [0.1, 1.9, 3.0],
            [2.1, 2.9, 3.0],
            [0.8, 0.7, 0.6],
        ];
        let mut table = EntityTable::new();
        let mut z = ZoneTracker::new();
        for (step, row) in distances.iter().enumerate() {
            let t = 100 * (step as u64 + 1);
            for (id, d) in ids.iter().zip(row) {
                place(&mut table, &s, id, *d, t);
            }
            pass(&mut z, &table, t);
            if let Some(c) = z.closest() {
                assert!(z.members().contains(c), "step {}", step);
            }
        }
    }
}
