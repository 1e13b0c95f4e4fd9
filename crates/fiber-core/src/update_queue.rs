//! Lane-tagged update queues and the priority-aware reducer.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::lanes::{is_subset_of_lanes, Lane, Lanes, NO_LANE, NO_LANES};

/// A state transition: replace the value or derive it from the previous one.
pub enum Action<S> {
    Replace(S),
    Reduce(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    pub fn apply(&self, state: &S) -> S {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Reduce(reducer) => reducer(state),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Action::Replace(value) => Action::Replace(value.clone()),
            Action::Reduce(reducer) => Action::Reduce(Rc::clone(reducer)),
        }
    }
}

pub struct Update<S> {
    pub action: Action<S>,
    pub lane: Lane,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            lane: self.lane,
        }
    }
}

impl<S> fmt::Debug for Update<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Replace(_) => "replace",
            Action::Reduce(_) => "reduce",
        };
        f.debug_struct("Update")
            .field("action", &kind)
            .field("lane", &self.lane)
            .finish()
    }
}

pub fn create_update<S>(action: Action<S>, lane: Lane) -> Update<S> {
    Update { action, lane }
}

/// Pending updates in insertion order.
///
/// Modeled as a ring buffer: `back()` is the last enqueued update and
/// iterating from the front yields insertion order.
pub struct UpdateQueue<S> {
    pending: VecDeque<Update<S>>,
}

impl<S> Default for UpdateQueue<S> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<S> UpdateQueue<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, update: Update<S>) {
        self.pending.push_back(update);
    }

    pub fn last(&self) -> Option<&Update<S>> {
        self.pending.back()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> VecDeque<Update<S>> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Update<S>> {
        self.pending.iter()
    }

    /// Drops the `count` oldest updates, once a committed pass consumed them.
    pub(crate) fn consume_front(&mut self, count: usize) {
        let count = count.min(self.pending.len());
        self.pending.drain(..count);
    }
}

pub fn enqueue_update<S>(queue: &mut UpdateQueue<S>, update: Update<S>) {
    queue.enqueue(update);
}

/// Outcome of [`process_update_queue`].
pub struct ProcessedQueue<S> {
    /// Fully reduced value for this render.
    pub memoized_state: S,
    /// State to resume from on the next pass.
    pub base_state: S,
    /// Skipped updates plus everything applied after the first skip.
    pub base_queue: VecDeque<Update<S>>,
    /// Lanes of the skipped updates.
    pub skipped_lanes: Lanes,
}

/// Reduces `updates` over `base_state`, applying only the updates whose lane
/// is included in `render_lanes`.
pub fn process_update_queue<S, I>(base_state: S, updates: I, render_lanes: Lanes) -> ProcessedQueue<S>
where
    S: Clone,
    I: IntoIterator<Item = Update<S>>,
{
    let mut state = base_state;
    let mut new_base_state: Option<S> = None;
    let mut base_queue = VecDeque::new();
    let mut skipped_lanes = NO_LANES;

    for update in updates {
        if !is_subset_of_lanes(render_lanes, update.lane) {
            if base_queue.is_empty() {
                new_base_state = Some(state.clone());
            }
            skipped_lanes |= update.lane;
            base_queue.push_back(update);
        } else {
            if !base_queue.is_empty() {
                base_queue.push_back(Update {
                    action: update.action.clone(),
                    lane: NO_LANE,
                });
            }
            state = update.action.apply(&state);
        }
    }

    let base_state = match new_base_state {
        Some(frozen) => frozen,
        None => state.clone(),
    };
    ProcessedQueue {
        memoized_state: state,
        base_state,
        base_queue,
        skipped_lanes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(suffix: &'static str, lane: Lane) -> Update<String> {
        create_update(
            Action::Reduce(Rc::new(move |state: &String| format!("{state}{suffix}"))),
            lane,
        )
    }

    #[test]
    fn same_lane_updates_apply_in_enqueue_order() {
        let mut queue = UpdateQueue::new();
        enqueue_update(&mut queue, append("a", Lanes::DEFAULT));
        enqueue_update(&mut queue, create_update(Action::Replace("x".to_string()), Lanes::DEFAULT));
        enqueue_update(&mut queue, append("b", Lanes::DEFAULT));
        assert_eq!(queue.last().map(|update| update.lane), Some(Lanes::DEFAULT));

        let result = process_update_queue(String::new(), queue.take_pending(), Lanes::DEFAULT);
        assert_eq!(result.memoized_state, "xb");
        assert_eq!(result.base_state, "xb");
        assert!(result.base_queue.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn skipped_update_freezes_base_state_and_keeps_order() {
        let updates = vec![
            append("a", Lanes::SYNC),
            append("b", Lanes::DEFAULT),
            append("c", Lanes::SYNC),
        ];
        let result = process_update_queue(String::new(), updates, Lanes::SYNC);
        assert_eq!(result.memoized_state, "ac");
        assert_eq!(result.base_state, "a");
        assert_eq!(result.skipped_lanes, Lanes::DEFAULT);
        let lanes: Vec<Lane> = result.base_queue.iter().map(|update| update.lane).collect();
        assert_eq!(lanes, vec![Lanes::DEFAULT, NO_LANE]);

        let replay = process_update_queue(result.base_state, result.base_queue, Lanes::DEFAULT);
        assert_eq!(replay.memoized_state, "abc");
        assert!(replay.base_queue.is_empty());
    }
}
