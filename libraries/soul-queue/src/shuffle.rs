//! Shuffle order generation and maintenance
//!
//! A shuffle order is a permutation of queue indices: `order[k]` is the k-th
//! track to play while shuffle is on. `generate` never puts the excluded
//! (playing) track first; the queue then moves that track to the front with
//! `lead_with` so it counts as already played and the walk covers every other
//! track exactly once. The cursor is `None` only before the first slot of an
//! order with no playing track.

use crate::types::{Direction, RepeatMode};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Fisher-Yates permutation generator
#[derive(Debug)]
pub struct ShuffleEngine {
    rng: StdRng,
}

impl ShuffleEngine {
    /// Create engine seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create engine with a fixed seed (reproducible orders)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a permutation of `[0, size)`
    ///
    /// When `exclude` is given and `size > 1`, the first element is never
    /// `exclude`: if the shuffle put it there it is swapped with a random
    /// later slot. A single-element order is always `[0]`.
    pub fn generate(&mut self, size: usize, exclude: Option<usize>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..size).collect();
        order.shuffle(&mut self.rng);

        if let Some(excluded) = exclude {
            if size > 1 && order[0] == excluded {
                let swap_with = self.rng.gen_range(1..size);
                order.swap(0, swap_with);
            }
        }

        order
    }

    /// Shuffle a slice in place (used for shuffling upcoming items)
    pub fn shuffle_slice<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

impl Default for ShuffleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the order from `position` one step in `direction`
///
/// `position` is the cursor into the order (`None` = before the first slot).
/// Returns the new cursor, or `None` when the order is exhausted. RepeatAll
/// wraps at both ends; RepeatOne stays put.
pub fn index_after(
    order: &[usize],
    position: Option<usize>,
    direction: Direction,
    repeat: RepeatMode,
) -> Option<usize> {
    if order.is_empty() {
        return None;
    }

    let last = order.len() - 1;

    if repeat == RepeatMode::One {
        if let Some(pos) = position {
            return Some(pos.min(last));
        }
    }

    match (direction, position) {
        (Direction::Forward, None) => Some(0),
        (Direction::Forward, Some(pos)) if pos < last => Some(pos + 1),
        (Direction::Forward, Some(_)) => (repeat == RepeatMode::All).then_some(0),
        (Direction::Backward, Some(pos)) if pos > 0 => Some(pos - 1),
        (Direction::Backward, _) => (repeat == RepeatMode::All).then_some(last),
    }
}

/// Move queue index `index` to the front of the order
///
/// Returns the cursor of the moved entry (always slot 0), or `None` when the
/// index is not in the order.
pub fn lead_with(order: &mut Vec<usize>, index: usize) -> Option<usize> {
    let slot = position_of(order, index)?;
    let entry = order.remove(slot);
    order.insert(0, entry);
    Some(0)
}

/// Splice `target` into the order right after the cursor
///
/// Used by "play next" so the spliced track plays next whether or not the
/// order was just generated. The rest of the order keeps its relative
/// sequence.
pub fn insert_after_current(order: &mut Vec<usize>, position: Option<usize>, target: usize) {
    let at = position.map_or(0, |pos| (pos + 1).min(order.len()));
    order.insert(at, target);
}

/// Make room for `count` new queue items inserted at queue index `at`
///
/// Entries pointing at or after `at` move up by `count`.
pub fn shift_for_insert(order: &mut [usize], at: usize, count: usize) {
    for index in order.iter_mut() {
        if *index >= at {
            *index += count;
        }
    }
}

/// Drop queue index `removed` from the order
///
/// Entries after it move down by one. Returns the slot the index occupied.
pub fn remove_index(order: &mut Vec<usize>, removed: usize) -> Option<usize> {
    let slot = order.iter().position(|&index| index == removed)?;
    order.remove(slot);

    for index in order.iter_mut() {
        if *index > removed {
            *index -= 1;
        }
    }

    Some(slot)
}

/// Position of queue index `index` in the order
pub fn position_of(order: &[usize], index: usize) -> Option<usize> {
    order.iter().position(|&entry| entry == index)
}

/// Check that `order` is a permutation of `[0, size)`
pub fn is_permutation(order: &[usize], size: usize) -> bool {
    if order.len() != size {
        return false;
    }

    let mut seen = vec![false; size];
    for &index in order {
        if index >= size || seen[index] {
            return false;
        }
        seen[index] = true;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_permutation() {
        let mut engine = ShuffleEngine::with_seed(7);
        for size in 0..20 {
            let order = engine.generate(size, None);
            assert!(is_permutation(&order, size), "size {size}: {order:?}");
        }
    }

    #[test]
    fn generate_empty_returns_empty() {
        let mut engine = ShuffleEngine::new();
        assert!(engine.generate(0, Some(0)).is_empty());
    }

    #[test]
    fn generate_single_cannot_avoid_exclude() {
        let mut engine = ShuffleEngine::new();
        assert_eq!(engine.generate(1, Some(0)), vec![0]);
    }

    #[test]
    fn generate_never_starts_with_excluded() {
        let mut engine = ShuffleEngine::with_seed(1234);
        for _ in 0..500 {
            let order = engine.generate(2, Some(1));
            assert_eq!(order, vec![0, 1]);

            let order = engine.generate(5, Some(3));
            assert_ne!(order[0], 3);
            assert!(is_permutation(&order, 5));
        }
    }

    #[test]
    fn same_seed_same_order() {
        let mut a = ShuffleEngine::with_seed(99);
        let mut b = ShuffleEngine::with_seed(99);
        assert_eq!(a.generate(30, Some(4)), b.generate(30, Some(4)));
    }

    #[test]
    fn index_after_forward_off_exhausts() {
        let order = [2, 0, 1];
        assert_eq!(index_after(&order, None, Direction::Forward, RepeatMode::Off), Some(0));
        assert_eq!(index_after(&order, Some(0), Direction::Forward, RepeatMode::Off), Some(1));
        assert_eq!(index_after(&order, Some(2), Direction::Forward, RepeatMode::Off), None);
    }

    #[test]
    fn index_after_wraps_under_repeat_all() {
        let order = [2, 0, 1];
        assert_eq!(index_after(&order, Some(2), Direction::Forward, RepeatMode::All), Some(0));
        assert_eq!(index_after(&order, Some(0), Direction::Backward, RepeatMode::All), Some(2));
        assert_eq!(index_after(&order, None, Direction::Backward, RepeatMode::All), Some(2));
    }

    #[test]
    fn index_after_backward_off_stops_at_start() {
        let order = [1, 0];
        assert_eq!(index_after(&order, Some(0), Direction::Backward, RepeatMode::Off), None);
        assert_eq!(index_after(&order, None, Direction::Backward, RepeatMode::Off), None);
        assert_eq!(index_after(&order, Some(1), Direction::Backward, RepeatMode::Off), Some(0));
    }

    #[test]
    fn index_after_repeat_one_stays() {
        let order = [1, 0, 2];
        assert_eq!(index_after(&order, Some(1), Direction::Forward, RepeatMode::One), Some(1));
        assert_eq!(index_after(&order, Some(1), Direction::Backward, RepeatMode::One), Some(1));
        // Before the first slot there is nothing to repeat yet
        assert_eq!(index_after(&order, None, Direction::Forward, RepeatMode::One), Some(0));
    }

    #[test]
    fn index_after_empty_order() {
        assert_eq!(index_after(&[], None, Direction::Forward, RepeatMode::All), None);
    }

    #[test]
    fn insert_after_current_splices_next() {
        let mut order = vec![3, 1, 0, 2];
        insert_after_current(&mut order, Some(1), 4);
        assert_eq!(order, vec![3, 1, 4, 0, 2]);

        let mut order = vec![1, 0];
        insert_after_current(&mut order, None, 2);
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn lead_with_moves_playing_track_to_front() {
        let mut engine = ShuffleEngine::with_seed(3);
        let mut order = engine.generate(6, Some(4));
        let up_next = order[0];

        assert_eq!(lead_with(&mut order, 4), Some(0));
        assert_eq!(order[0], 4);
        assert_eq!(order[1], up_next);
        assert!(is_permutation(&order, 6));

        assert_eq!(lead_with(&mut vec![0, 1], 5), None);
    }

    #[test]
    fn shift_and_remove_keep_permutation() {
        let mut order = vec![2, 0, 1];
        shift_for_insert(&mut order, 1, 2);
        assert_eq!(order, vec![4, 0, 3]);
        order.extend([1, 2]);
        assert!(is_permutation(&order, 5));

        let slot = remove_index(&mut order, 3);
        assert_eq!(slot, Some(2));
        assert_eq!(order, vec![3, 0, 1, 2]);
        assert!(is_permutation(&order, 4));
    }

    #[test]
    fn is_permutation_rejects_duplicates_and_gaps() {
        assert!(!is_permutation(&[0, 0], 2));
        assert!(!is_permutation(&[0, 2], 2));
        assert!(!is_permutation(&[0], 2));
        assert!(is_permutation(&[], 0));
    }
}
