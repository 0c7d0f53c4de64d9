//! Debounced presence classification.
//!
//! One machine runs per tracked entity. A detection has to persist for the
//! debounce duration before the entity is confirmed present; a confirmed
//! entity drops to absent after a miss followed by another miss. Callers
//! only see `changed` when the confirmed state flips.

/// Classification of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceState {
    #[default]
    Absent,
    Debouncing,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceMachine {
    state: PresenceState,
    previous: PresenceState,
    entered_at_ms: u64,
    /// Last confirmed state: `true` once Present was reached, `false`
    /// once Absent was reached. Debouncing never changes it.
    confirmed: bool,
}

impl PresenceMachine {
    pub const fn new() -> Self {
        Self {
            state: PresenceState::Absent,
            previous: PresenceState::Absent,
            entered_at_ms: 0,
            confirmed: false,
        }
    }

    /// Advance with one detection sample. Returns `true` when the
    /// confirmed presence flipped on this update.
    ///
    /// With `debounce_enabled` false the state mirrors `detected` directly.
    pub fn update(
        &mut self,
        detected: bool,
        now_ms: u64,
        debounce_ms: u32,
        debounce_enabled: bool,
    ) -> bool {
        let was_confirmed = self.confirmed;

        if !debounce_enabled {
            let next = if detected {
                PresenceState::Present
            } else {
                PresenceState::Absent
            };
            self.transition(next, now_ms);
        } else {
            match (self.state, detected) {
                (PresenceState::Absent, true) => {
                    self.transition(PresenceState::Debouncing, now_ms)
                }
                (PresenceState::Absent, false) => {}
                (PresenceState::Debouncing, true) => {
                    let elapsed = now_ms.saturating_sub(self.entered_at_ms);
                    if elapsed >= debounce_ms as u64 {
                        self.transition(PresenceState::Present, now_ms);
                    }
                }
                (PresenceState::Debouncing, false) => {
                    self.transition(PresenceState::Absent, now_ms)
                }
                (PresenceState::Present, true) => {}
                (PresenceState::Present, false) => {
                    self.transition(PresenceState::Debouncing, now_ms)
                }
            }
        }

        match self.state {
            PresenceState::Present => self.confirmed = true,
            PresenceState::Absent => self.confirmed = false,
            PresenceState::Debouncing => {}
        }

        self.confirmed != was_confirmed
    }

    fn transition(&mut self, next: PresenceState, now_ms: u64) {
        if next != self.state {
            self.previous = self.state;
            self.state = next;
            self.entered_at_ms = now_ms;
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn previous_state(&self) -> PresenceState {
        self.previous
    }

    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    /// Confirmed presence, stable across a Debouncing excursion.
    pub fn is_present(&self) -> bool {
        self.confirmed
    }
}

impl Default for PresenceMachine {
    fn default() -> Self {
        Self::new()
    }
}
