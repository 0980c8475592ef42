//! IV Index and its persisted transition state.

use std::cmp::Ordering;
use std::fmt;

/// Minimum dwell time in each IV Index state.
pub const HOURS_PER_STATE: u64 = 96;

/// IV Recovery may be used at most once in this period.
pub const IV_RECOVERY_PERIOD_HOURS: u64 = 192;

/// Largest index step accepted without the unlimited recovery flag.
pub const MAX_IV_RECOVERY_STEP: u32 = 42;

const MS_PER_HOUR: u64 = 3_600_000;

/// IV Index with the IV Update flag.
///
/// Within one index the "update active" state precedes normal operation,
/// so `(5, true) < (5, false) < (6, true)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct IvIndex {
    pub index: u32,
    pub update_active: bool,
}

impl IvIndex {
    pub fn new(index: u32, update_active: bool) -> Self {
        Self {
            index,
            update_active,
        }
    }

    /// Index used to transmit messages.
    pub fn transmit_index(&self) -> u32 {
        if self.update_active && self.index > 0 {
            self.index - 1
        } else {
            self.index
        }
    }

    /// Index matching the IVI bit of a received Network PDU.
    pub fn index_for_ivi(&self, ivi: u8) -> u32 {
        if u32::from(ivi) == self.index & 1 {
            self.index
        } else {
            self.index.max(1) - 1
        }
    }

    /// The state preceding this one, if any.
    pub fn previous(&self) -> Option<IvIndex> {
        if !self.update_active {
            Some(IvIndex::new(self.index, true))
        } else if self.index > 0 {
            Some(IvIndex::new(self.index - 1, false))
        } else {
            None
        }
    }
}

impl Ord for IvIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then_with(|| other.update_active.cmp(&self.update_active))
    }
}

impl PartialOrd for IvIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IvIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.update_active {
            "update active"
        } else {
            "normal operation"
        };
        write!(f, "{} ({})", self.index, state)
    }
}

/// Persisted IV Index state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IvIndexState {
    pub iv_index: IvIndex,
    /// Unix time (ms) of the last accepted transition.
    pub transition_ms: Option<u64>,
    /// Whether the last transition was made using IV Recovery.
    pub recovery_active: bool,
}

impl IvIndexState {
    /// Checks whether a received IV Index may overwrite the stored one.
    ///
    /// The index must move forward (at most 42 steps unless `unlimited`),
    /// or the IV Update flag must clear at the same index. When the time of
    /// the previous transition is known, every implied state change needs
    /// 96 hours; IV Recovery skips one state, but only once per 192 hours.
    /// `test_mode` removes the dwell requirement for one state.
    pub fn can_overwrite(
        &self,
        received: IvIndex,
        now_ms: u64,
        test_mode: bool,
        unlimited: bool,
    ) -> bool {
        let current = self.iv_index;

        let forward = received.index > current.index
            && (unlimited || received.index <= current.index.saturating_add(MAX_IV_RECOVERY_STEP));
        let same_index = received.index == current.index
            && (current.update_active || !received.update_active);
        if !forward && !same_index {
            return false;
        }

        let Some(transition_ms) = self.transition_ms else {
            return true;
        };

        let steps = i64::from(received.index) - i64::from(current.index);
        let state_diff = steps * 2 - 1
            + i64::from(current.update_active)
            + i64::from(!received.update_active)
            - i64::from(self.recovery_active || test_mode);
        let state_diff = state_diff.max(0) as u64;

        let required_hours = state_diff * HOURS_PER_STATE;
        let elapsed_hours = now_ms.saturating_sub(transition_ms) / MS_PER_HOUR;

        if self.recovery_active && state_diff > 1 && elapsed_hours < IV_RECOVERY_PERIOD_HOURS {
            return false;
        }

        elapsed_hours >= required_hours
    }
}
