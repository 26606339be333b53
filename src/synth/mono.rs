//! Key tracking and legato/retrigger policy for monophonic envelopes.

/// What a shared envelope should do in response to a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonoAction {
    /// First key down: start the envelope from rest.
    Restart,
    /// Another key while one is held, retrigger enabled: ramp down and restart.
    Retrigger,
    /// Another key while one is held, legato: keep the current phase.
    Legato,
    /// Last key up: release the envelope.
    Release,
    /// Nothing changes.
    None,
}

/// Tracks held keys for one monophonic envelope.
///
/// Keys live in a 128-bit map, so a repeated note-on never counts twice and
/// a note-off for a key that was never pressed is ignored. The pressed-key
/// count is the number of set bits and therefore can't go negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonophonicAggregator {
    keys: u128,
    /// Keys released while the pedal was down.
    deferred: u128,
    pedal_down: bool,
    retrigger: bool,
}

#[inline]
fn bit(key: u8) -> u128 {
    1u128 << (key & 0x7F)
}

impl MonophonicAggregator {
    pub fn new(retrigger: bool) -> Self {
        Self {
            retrigger,
            ..Self::default()
        }
    }

    pub fn set_retrigger(&mut self, retrigger: bool) {
        self.retrigger = retrigger;
    }

    pub fn retrigger(&self) -> bool {
        self.retrigger
    }

    pub fn note_on(&mut self, key: u8) -> MonoAction {
        let was_empty = self.keys == 0;

        self.keys |= bit(key);
        self.deferred &= !bit(key);

        if was_empty {
            MonoAction::Restart
        } else if self.retrigger {
            MonoAction::Retrigger
        } else {
            MonoAction::Legato
        }
    }

    pub fn note_off(&mut self, key: u8) -> MonoAction {
        if self.keys & bit(key) == 0 {
            return MonoAction::None;
        }

        if self.pedal_down {
            self.deferred |= bit(key);
            return MonoAction::None;
        }

        self.keys &= !bit(key);

        if self.keys == 0 {
            MonoAction::Release
        } else {
            MonoAction::None
        }
    }

    /// Sustain pedal. Lifting it releases every key let go while it was down.
    pub fn set_pedal(&mut self, down: bool) -> MonoAction {
        if down {
            self.pedal_down = true;
            return MonoAction::None;
        }

        if !self.pedal_down {
            return MonoAction::None;
        }

        self.pedal_down = false;

        let had_keys = self.keys != 0;
        self.keys &= !self.deferred;
        self.deferred = 0;

        if had_keys && self.keys == 0 {
            MonoAction::Release
        } else {
            MonoAction::None
        }
    }

    pub fn all_notes_off(&mut self) -> MonoAction {
        let had_keys = self.keys != 0;

        self.keys = 0;
        self.deferred = 0;

        if had_keys {
            MonoAction::Release
        } else {
            MonoAction::None
        }
    }

    /// Forget every key without signalling a release.
    pub fn clear(&mut self) {
        self.keys = 0;
        self.deferred = 0;
        self.pedal_down = false;
    }

    pub fn pressed_key_count(&self) -> u32 {
        self.keys.count_ones()
    }

    pub fn is_pressed(&self, key: u8) -> bool {
        self.keys & bit(key) != 0
    }

    pub fn pedal_down(&self) -> bool {
        self.pedal_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_restarts() {
        let mut mono = MonophonicAggregator::new(false);
        assert_eq!(mono.note_on(60), MonoAction::Restart);
        assert_eq!(mono.pressed_key_count(), 1);
    }

    #[test]
    fn overlapping_key_is_legato_without_retrigger() {
        let mut mono = MonophonicAggregator::new(false);
        mono.note_on(60);
        assert_eq!(mono.note_on(64), MonoAction::Legato);
    }

    #[test]
    fn overlapping_key_retriggers() {
        let mut mono = MonophonicAggregator::new(true);
        mono.note_on(60);
        assert_eq!(mono.note_on(64), MonoAction::Retrigger);
    }

    #[test]
    fn release_only_after_last_key() {
        let mut mono = MonophonicAggregator::new(false);
        mono.note_on(60);
        mono.note_on(64);

        assert_eq!(mono.note_off(60), MonoAction::None);
        assert_eq!(mono.note_off(64), MonoAction::Release);
        assert_eq!(mono.pressed_key_count(), 0);
    }

    #[test]
    fn spurious_note_off_never_goes_negative() {
        let mut mono = MonophonicAggregator::new(false);
        assert_eq!(mono.note_off(60), MonoAction::None);
        assert_eq!(mono.pressed_key_count(), 0);

        assert_eq!(mono.note_on(60), MonoAction::Restart);
    }

    #[test]
    fn repeated_note_on_counts_once() {
        let mut mono = MonophonicAggregator::new(false);
        mono.note_on(60);
        mono.note_on(60);
        assert_eq!(mono.pressed_key_count(), 1);
        assert_eq!(mono.note_off(60), MonoAction::Release);
    }

    #[test]
    fn pedal_defers_release() {
        let mut mono = MonophonicAggregator::new(false);
        mono.note_on(60);
        mono.set_pedal(true);

        assert_eq!(mono.note_off(60), MonoAction::None);
        assert_eq!(mono.pressed_key_count(), 1);

        assert_eq!(mono.set_pedal(false), MonoAction::Release);
        assert_eq!(mono.pressed_key_count(), 0);
    }

    #[test]
    fn replayed_key_under_pedal_stays_held() {
        let mut mono = MonophonicAggregator::new(false);
        mono.note_on(60);
        mono.set_pedal(true);
        mono.note_off(60);
        mono.note_on(60);

        assert_eq!(mono.set_pedal(false), MonoAction::None);
        assert!(mono.is_pressed(60));
    }

    #[test]
    fn all_notes_off_releases() {
        let mut mono = MonophonicAggregator::new(true);
        mono.note_on(1);
        mono.note_on(127);
        assert_eq!(mono.all_notes_off(), MonoAction::Release);
        assert_eq!(mono.all_notes_off(), MonoAction::None);
    }
}
