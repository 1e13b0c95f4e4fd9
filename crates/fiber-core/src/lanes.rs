//! Priority lanes.
//!
//! A lane is a single bit; a set of lanes is the union of those bits. Lower
//! bits win: the highest priority lane of a set is its lowest set bit.

use std::cell::Cell;

use bitflags::bitflags;

use crate::platform::PriorityLevel;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        const SYNC = 0b00001;
        const INPUT_CONTINUOUS = 0b00010;
        const DEFAULT = 0b00100;
        const TRANSITION = 0b01000;
        const IDLE = 0b10000;
    }
}

/// A single lane. Kept as an alias so signatures read like the model.
pub type Lane = Lanes;

pub const NO_LANE: Lane = Lanes::empty();
pub const NO_LANES: Lanes = Lanes::empty();

impl Lanes {
    /// Isolates the lowest set bit.
    pub fn highest_priority(self) -> Lane {
        let bits = self.bits();
        Lanes::from_bits_retain(bits & bits.wrapping_neg())
    }
}

pub fn merge_lanes(a: Lanes, b: Lanes) -> Lanes {
    a | b
}

pub fn remove_lanes(set: Lanes, subset: Lanes) -> Lanes {
    set & !subset
}

/// Whether every bit of `subset` is contained in `set`. The empty lane is a
/// subset of everything, which is what lets placeholder updates always apply.
pub fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set & subset == subset
}

pub fn includes_some_lane(a: Lanes, b: Lanes) -> bool {
    a.intersects(b)
}

pub fn highest_priority_lane(lanes: Lanes) -> Lane {
    lanes.highest_priority()
}

pub fn lanes_to_scheduler_priority(lanes: Lanes) -> PriorityLevel {
    let lane = lanes.highest_priority();
    if lane == Lanes::SYNC {
        PriorityLevel::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        PriorityLevel::UserBlocking
    } else if lane == Lanes::DEFAULT {
        PriorityLevel::Normal
    } else {
        PriorityLevel::Idle
    }
}

pub fn scheduler_priority_to_lane(priority: PriorityLevel) -> Lane {
    match priority {
        PriorityLevel::Immediate => Lanes::SYNC,
        PriorityLevel::UserBlocking => Lanes::INPUT_CONTINUOUS,
        PriorityLevel::Normal => Lanes::DEFAULT,
        PriorityLevel::Low | PriorityLevel::Idle => Lanes::IDLE,
    }
}

thread_local! {
    static TRANSITION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside a transition until dropped.
pub(crate) struct TransitionScope {
    previous: usize,
}

impl TransitionScope {
    pub(crate) fn enter() -> Self {
        let previous = TRANSITION_DEPTH.with(|depth| {
            let previous = depth.get();
            depth.set(previous + 1);
            previous
        });
        Self { previous }
    }
}

impl Drop for TransitionScope {
    fn drop(&mut self) {
        TRANSITION_DEPTH.with(|depth| depth.set(self.previous));
    }
}

pub(crate) fn is_transition_active() -> bool {
    TRANSITION_DEPTH.with(|depth| depth.get() > 0)
}

/// Picks the lane for an update dispatched right now: transitions win,
/// otherwise the scheduler's current priority decides.
pub(crate) fn request_update_lane(current_priority: PriorityLevel) -> Lane {
    if is_transition_active() {
        return Lanes::TRANSITION;
    }
    scheduler_priority_to_lane(current_priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_is_lowest_bit() {
        let set = Lanes::DEFAULT | Lanes::TRANSITION | Lanes::INPUT_CONTINUOUS;
        assert_eq!(set.highest_priority(), Lanes::INPUT_CONTINUOUS);
        assert_eq!(NO_LANES.highest_priority(), NO_LANE);
    }

    #[test]
    fn empty_lane_is_subset_of_any_render() {
        assert!(is_subset_of_lanes(Lanes::SYNC, NO_LANE));
        assert!(is_subset_of_lanes(Lanes::SYNC | Lanes::DEFAULT, Lanes::DEFAULT));
        assert!(!is_subset_of_lanes(Lanes::SYNC, Lanes::DEFAULT));
    }

    #[test]
    fn priority_mapping_round_trips_for_mapped_lanes() {
        for lane in [Lanes::SYNC, Lanes::INPUT_CONTINUOUS, Lanes::DEFAULT] {
            assert_eq!(scheduler_priority_to_lane(lanes_to_scheduler_priority(lane)), lane);
        }
        assert_eq!(lanes_to_scheduler_priority(Lanes::TRANSITION), PriorityLevel::Idle);
    }

    #[test]
    fn transition_scope_overrides_requested_lane() {
        assert_eq!(request_update_lane(PriorityLevel::Normal), Lanes::DEFAULT);
        {
            let _scope = TransitionScope::enter();
            assert_eq!(request_update_lane(PriorityLevel::Immediate), Lanes::TRANSITION);
        }
        assert_eq!(request_update_lane(PriorityLevel::Immediate), Lanes::SYNC);
    }
}
