//! Queue store
//!
//! Sole owner of the queue aggregate. Every structural change goes through
//! here so the invariants hold after each call:
//!
//! - `current` is `Some` and in range iff `items` is non-empty
//! - `stop_after`, when set, is a valid index
//! - with shuffle on, `shuffle_order` is a permutation of `[0, items.len())`
//!   and `shuffle_order[cursor] == current` whenever the cursor is set
//!
//! ```text
//! items:          [A, B, C, D, E]     current = 1 (B)
//! shuffle_order:  [3, 1, 4, 0, 2]     cursor  = 1 (order[1] == 1)
//!                     ^  ^
//!               playing  up next: order[2] = 4 (E)
//! ```

use crate::error::{QueueError, Result};
use crate::shuffle::{self, ShuffleEngine};
use crate::snapshot::QueueSnapshot;
use crate::types::{Direction, RepeatMode, ShuffleMode, Track};
use std::time::Duration;

/// Where newly inserted items land in the shuffle order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderPlacement {
    /// Right after the cursor (play next)
    AfterCursor,
    /// At the end of the order (enqueue)
    End,
}

/// Result of walking the queue one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub index: usize,
    cursor: Option<usize>,
}

/// The queue aggregate: items, cursor, mode flags and revision
#[derive(Debug, Clone)]
pub struct Queue {
    items: Vec<Track>,
    current: Option<usize>,
    stop_after: Option<usize>,
    shuffle_order: Option<Vec<usize>>,
    /// Position of `current` in `shuffle_order`, `None` before the first slot
    shuffle_cursor: Option<usize>,
    repeat: RepeatMode,
    revision: u64,
}

impl Queue {
    /// Create new empty queue
    pub fn new(repeat: RepeatMode) -> Self {
        Self {
            items: Vec::new(),
            current: None,
            stop_after: None,
            shuffle_order: None,
            shuffle_cursor: None,
            repeat,
            revision: 0,
        }
    }

    // ===== Queries =====

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Track at the current index
    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|index| self.items.get(index))
    }

    pub fn stop_after(&self) -> Option<usize> {
        self.stop_after
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        if self.shuffle_order.is_some() {
            ShuffleMode::On
        } else {
            ShuffleMode::Off
        }
    }

    pub fn shuffle_order(&self) -> Option<&[usize]> {
        self.shuffle_order.as_deref()
    }

    pub fn shuffle_cursor(&self) -> Option<usize> {
        self.shuffle_cursor
    }

    /// Monotonic change counter
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Track that would play after the current one ends
    ///
    /// Pure lookahead. RepeatOne returns the current track, RepeatAll wraps,
    /// Off returns `None` past the last track.
    pub fn peek_next(&self, repeat: RepeatMode) -> Option<&Track> {
        self.step(Direction::Forward, repeat)
            .and_then(|step| self.items.get(step.index))
    }

    /// Track that "previous" would move to under the queue's repeat mode
    ///
    /// A user going back under RepeatOne wraps like RepeatAll.
    pub fn peek_previous(&self) -> Option<&Track> {
        let repeat = match self.repeat {
            RepeatMode::One => RepeatMode::All,
            other => other,
        };
        self.step(Direction::Backward, repeat)
            .and_then(|step| self.items.get(step.index))
    }

    /// Sum of track durations from `index` to the end of the queue
    pub fn duration_from(&self, index: usize) -> Duration {
        self.items.iter().skip(index).map(|track| track.duration).sum()
    }

    /// Immutable copy for display or persistence
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            revision: self.revision,
            items: self.items.clone(),
            current_index: self.current,
            stop_after: self.stop_after,
            shuffle_order: self.shuffle_order.clone(),
            shuffle_cursor: self.shuffle_cursor,
            repeat: self.repeat,
        }
    }

    /// Check every aggregate invariant
    pub fn is_consistent(&self) -> bool {
        let len = self.items.len();

        let current_ok = match self.current {
            Some(index) => index < len,
            None => len == 0,
        };
        let stop_ok = self.stop_after.map_or(true, |index| index < len);
        let order_ok = match &self.shuffle_order {
            Some(order) => {
                shuffle::is_permutation(order, len)
                    && match self.shuffle_cursor {
                        Some(cursor) => order.get(cursor).copied() == self.current,
                        None => true,
                    }
            }
            None => self.shuffle_cursor.is_none(),
        };

        current_ok && stop_ok && order_ok
    }

    // ===== Traversal =====

    /// Compute the index one step away without mutating anything
    pub(crate) fn step(&self, direction: Direction, repeat: RepeatMode) -> Option<Step> {
        let current = self.current?;

        if repeat == RepeatMode::One {
            return Some(Step {
                index: current,
                cursor: self.shuffle_cursor,
            });
        }

        if let Some(order) = &self.shuffle_order {
            let cursor = shuffle::index_after(order, self.shuffle_cursor, direction, repeat)?;
            return Some(Step {
                index: order[cursor],
                cursor: Some(cursor),
            });
        }

        let last = self.items.len() - 1;
        let index = match direction {
            Direction::Forward if current < last => current + 1,
            Direction::Backward if current > 0 => current - 1,
            Direction::Forward if repeat == RepeatMode::All => 0,
            Direction::Backward if repeat == RepeatMode::All => last,
            _ => return None,
        };

        Some(Step {
            index,
            cursor: None,
        })
    }

    /// Move the cursor to a previously computed step
    pub(crate) fn apply_step(&mut self, step: Step) {
        self.current = Some(step.index);
        if self.shuffle_order.is_some() {
            self.shuffle_cursor = step.cursor;
        }
        self.clear_passed_stop();
        self.bump();
    }

    /// Point the cursor at `index`
    pub fn set_current(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;

        self.current = Some(index);
        if let Some(order) = &self.shuffle_order {
            self.shuffle_cursor = shuffle::position_of(order, index);
        }
        self.clear_passed_stop();
        self.bump();
        Ok(())
    }

    // ===== Mutations =====

    /// Replace the queue wholesale
    ///
    /// `start` is clamped into range. An empty track list with a start index
    /// is rejected; an empty list without one clears the queue.
    pub fn open(
        &mut self,
        tracks: Vec<Track>,
        start: Option<usize>,
        shuffle_mode: ShuffleMode,
        shuffler: &mut ShuffleEngine,
    ) -> Result<()> {
        if tracks.is_empty() {
            if let Some(index) = start {
                return Err(QueueError::InvalidIndex { index, len: 0 });
            }
        }

        let len = tracks.len();
        let current = if len == 0 {
            None
        } else {
            Some(start.unwrap_or(0).min(len - 1))
        };

        self.items = tracks;
        self.current = current;
        self.stop_after = None;
        self.shuffle_cursor = None;
        self.shuffle_order = None;
        if shuffle_mode.is_on() {
            self.regenerate_order(shuffler);
        }

        self.bump();
        Ok(())
    }

    /// Append tracks to the end of the queue
    ///
    /// Returns `true` when the queue was empty before (current becomes 0).
    pub fn enqueue(&mut self, tracks: Vec<Track>, shuffler: &mut ShuffleEngine) -> bool {
        let at = self.items.len();
        self.insert_items(at, tracks, OrderPlacement::End, shuffler)
    }

    /// Insert tracks right after the current one
    ///
    /// With shuffle on they are also spliced right after the current slot of
    /// the shuffle order. Returns `true` when the queue was empty before.
    pub fn play_next(&mut self, tracks: Vec<Track>, shuffler: &mut ShuffleEngine) -> bool {
        let at = self.current.map_or(0, |index| index + 1);
        self.insert_items(at, tracks, OrderPlacement::AfterCursor, shuffler)
    }

    /// Insert tracks at an arbitrary position (`at` may equal `len`)
    pub fn insert_at(
        &mut self,
        at: usize,
        tracks: Vec<Track>,
        shuffler: &mut ShuffleEngine,
    ) -> Result<bool> {
        if at > self.items.len() {
            return Err(QueueError::InvalidIndex {
                index: at,
                len: self.items.len(),
            });
        }

        Ok(self.insert_items(at, tracks, OrderPlacement::AfterCursor, shuffler))
    }

    fn insert_items(
        &mut self,
        at: usize,
        tracks: Vec<Track>,
        placement: OrderPlacement,
        shuffler: &mut ShuffleEngine,
    ) -> bool {
        if tracks.is_empty() {
            return false;
        }

        let count = tracks.len();
        let was_empty = self.items.is_empty();
        self.items.splice(at..at, tracks);

        if was_empty {
            self.current = Some(0);
            if self.shuffle_order.is_some() {
                self.regenerate_order(shuffler);
            }
            self.bump();
            return true;
        }

        self.current = self.current.map(|index| if index >= at { index + count } else { index });
        self.stop_after = self
            .stop_after
            .map(|index| if index >= at { index + count } else { index });

        if let Some(order) = &mut self.shuffle_order {
            shuffle::shift_for_insert(order, at, count);
            match placement {
                OrderPlacement::AfterCursor => {
                    for index in (at..at + count).rev() {
                        shuffle::insert_after_current(order, self.shuffle_cursor, index);
                    }
                }
                OrderPlacement::End => order.extend(at..at + count),
            }
        }

        self.bump();
        false
    }

    /// Relocate one item, shifting the items in between
    ///
    /// The current index follows the current track; the stop position
    /// follows the track it was set on. Returns `false` when `from == to`.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<bool> {
        self.check_index(from)?;
        self.check_index(to)?;

        if from == to {
            return Ok(false);
        }

        let track = self.items.remove(from);
        self.items.insert(to, track);

        let remap = |index: usize| -> usize {
            if index == from {
                to
            } else if from < to && index > from && index <= to {
                index - 1
            } else if to < from && index >= to && index < from {
                index + 1
            } else {
                index
            }
        };

        self.current = self.current.map(remap);
        self.stop_after = self.stop_after.map(remap);
        if let Some(order) = &mut self.shuffle_order {
            for index in order.iter_mut() {
                *index = remap(*index);
            }
        }

        self.bump();
        Ok(true)
    }

    /// Remove one item
    ///
    /// Removing the current track leaves the cursor on the track that would
    /// have played next (the next item, or the next shuffle slot); removing
    /// the last item while it is current falls back to the new last item.
    pub fn remove(&mut self, index: usize) -> Result<Track> {
        self.check_index(index)?;

        let removed = self.items.remove(index);
        let was_current = self.current == Some(index);

        self.stop_after = match self.stop_after {
            Some(stop) if stop == index => None,
            Some(stop) if stop > index => Some(stop - 1),
            other => other,
        };

        if self.items.is_empty() {
            self.current = None;
            self.stop_after = None;
            if self.shuffle_order.is_some() {
                self.shuffle_order = Some(Vec::new());
            }
            self.shuffle_cursor = None;
            self.bump();
            return Ok(removed);
        }

        let last = self.items.len() - 1;

        if let Some(order) = &mut self.shuffle_order {
            let slot = shuffle::remove_index(order, index);
            self.shuffle_cursor = match (slot, self.shuffle_cursor) {
                (Some(slot), Some(cursor)) if slot < cursor => Some(cursor - 1),
                (Some(slot), Some(cursor)) if slot == cursor => Some(cursor.min(last)),
                (_, None) if was_current => Some(0),
                (_, cursor) => cursor,
            };

            self.current = if was_current {
                self.shuffle_cursor.map(|cursor| order[cursor])
            } else {
                self.current
                    .map(|current| if index < current { current - 1 } else { current })
            };
        } else {
            self.current = self.current.map(|current| {
                if index < current {
                    current - 1
                } else {
                    current.min(last)
                }
            });
        }

        self.bump();
        Ok(removed)
    }

    /// Remove every occurrence of the given track ids
    pub fn remove_ids(&mut self, ids: &[String]) -> Vec<Track> {
        let mut removed = Vec::new();
        let mut index = 0;

        while index < self.items.len() {
            if ids.contains(&self.items[index].id) {
                if let Ok(track) = self.remove(index) {
                    removed.push(track);
                }
            } else {
                index += 1;
            }
        }

        removed
    }

    /// Empty the queue, keeping the mode flags
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
        self.stop_after = None;
        self.shuffle_cursor = None;
        if self.shuffle_order.is_some() {
            self.shuffle_order = Some(Vec::new());
        }
        self.bump();
    }

    /// Set (or with `None` clear) the stop-after position
    pub fn set_stop_after(&mut self, index: Option<usize>) -> Result<()> {
        if let Some(index) = index {
            self.check_index(index)?;
        }

        self.stop_after = index;
        self.bump();
        Ok(())
    }

    /// Clear the stop position if the current index reached it
    ///
    /// Returns `true` when the stop position was consumed.
    pub(crate) fn take_stop_if_reached(&mut self) -> bool {
        if self.current.is_some() && self.stop_after == self.current {
            self.stop_after = None;
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) -> bool {
        if self.repeat == repeat {
            return false;
        }

        self.repeat = repeat;
        self.bump();
        true
    }

    /// Switch shuffle on or off
    ///
    /// Turning it on builds a fresh order led by the current track; turning it
    /// off returns to queue order at the same track.
    pub fn set_shuffle(&mut self, mode: ShuffleMode, shuffler: &mut ShuffleEngine) -> bool {
        if self.shuffle_mode() == mode {
            return false;
        }

        match mode {
            ShuffleMode::On => self.regenerate_order(shuffler),
            ShuffleMode::Off => {
                self.shuffle_order = None;
                self.shuffle_cursor = None;
            }
        }

        self.bump();
        true
    }

    /// Reshuffle on demand
    ///
    /// With shuffle on, a new order replaces the old one. With shuffle off,
    /// the items after the current track are shuffled in place. Returns
    /// `false` when there was nothing to shuffle.
    pub fn reshuffle(&mut self, shuffler: &mut ShuffleEngine) -> bool {
        if self.shuffle_order.is_some() {
            self.regenerate_order(shuffler);
            self.bump();
            return true;
        }

        let Some(current) = self.current else {
            return false;
        };

        // Need at least two upcoming items to change anything
        if self.items.len() < current + 3 {
            return false;
        }

        shuffler.shuffle_slice(&mut self.items[current + 1..]);
        if self.stop_after.is_some_and(|stop| stop > current) {
            self.stop_after = None;
        }

        self.bump();
        true
    }

    /// Rebuild from already validated parts (snapshot restore)
    pub(crate) fn from_parts(
        items: Vec<Track>,
        current: Option<usize>,
        shuffle_order: Option<Vec<usize>>,
        shuffle_cursor: Option<usize>,
        repeat: RepeatMode,
        revision: u64,
    ) -> Self {
        Self {
            items,
            current,
            stop_after: None,
            shuffle_order,
            shuffle_cursor,
            repeat,
            revision,
        }
    }

    /// Build a fresh order led by the current track
    ///
    /// The generated order keeps the current track out of its first slot, so
    /// once the current track is moved to the front the track after it is a
    /// different one.
    fn regenerate_order(&mut self, shuffler: &mut ShuffleEngine) {
        let mut order = shuffler.generate(self.items.len(), self.current);
        self.shuffle_cursor = self
            .current
            .and_then(|current| shuffle::lead_with(&mut order, current));
        self.shuffle_order = Some(order);
    }

    /// Advance the revision for a change the store itself did not make
    pub(crate) fn touch(&mut self) {
        self.bump();
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    /// Drop a stop position the cursor has moved beyond
    ///
    /// Only meaningful in queue order; in shuffle order a lower index may
    /// still be ahead.
    fn clear_passed_stop(&mut self) {
        if self.shuffle_order.is_some() {
            return;
        }

        if let (Some(stop), Some(current)) = (self.stop_after, self.current) {
            if stop < current {
                self.stop_after = None;
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.items.len() {
            Ok(())
        } else {
            Err(QueueError::InvalidIndex {
                index,
                len: self.items.len(),
            })
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(RepeatMode::Off)
    }
}
