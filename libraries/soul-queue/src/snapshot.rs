//! Queue snapshots and the persistence boundary
//!
//! [`QueueSnapshot`] is the full point-in-time copy handed to readers.
//! [`PersistedQueue`] is the compact form an external store saves between
//! sessions: track ids instead of tracks, resolved again on restore.

use crate::error::{QueueError, Result};
use crate::queue::Queue;
use crate::shuffle::{self, ShuffleEngine};
use crate::types::{RepeatMode, ShuffleMode, Track};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Immutable copy of the queue aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Revision the copy was taken at
    pub revision: u64,

    /// Queue items in insertion order
    pub items: Vec<Track>,

    /// Index of the current track
    pub current_index: Option<usize>,

    /// Deferred stop position
    pub stop_after: Option<usize>,

    /// Play order while shuffle is on
    pub shuffle_order: Option<Vec<usize>>,

    /// Position of the current track in the shuffle order (restore derives
    /// it from `current_index`)
    pub shuffle_cursor: Option<usize>,

    /// Repeat mode
    pub repeat: RepeatMode,
}

impl QueueSnapshot {
    pub fn shuffle_mode(&self) -> ShuffleMode {
        if self.shuffle_order.is_some() {
            ShuffleMode::On
        } else {
            ShuffleMode::Off
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|index| self.items.get(index))
    }

    /// Compact form for an external store
    pub fn to_persisted(&self, position: Duration) -> PersistedQueue {
        PersistedQueue {
            track_ids: self.items.iter().map(|track| track.id.clone()).collect(),
            current_index: self.current_index,
            repeat: self.repeat,
            shuffle: self.shuffle_mode(),
            shuffle_order: self.shuffle_order.clone(),
            shuffle_position: self.shuffle_cursor,
            position_ms: u64::try_from(position.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Snapshot format saved across process restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQueue {
    /// Ordered track ids
    pub track_ids: Vec<String>,

    /// Index of the current track
    pub current_index: Option<usize>,

    pub repeat: RepeatMode,

    pub shuffle: ShuffleMode,

    /// Play order while shuffle is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_order: Option<Vec<usize>>,

    /// Position of the current track in the shuffle order (restore derives
    /// it from `current_index`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_position: Option<usize>,

    /// Position in the current track
    #[serde(default)]
    pub position_ms: u64,
}

impl PersistedQueue {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Library lookup used to turn persisted ids back into tracks
pub trait TrackResolver {
    fn resolve(&self, id: &str) -> Option<Track>;
}

impl<F> TrackResolver for F
where
    F: Fn(&str) -> Option<Track>,
{
    fn resolve(&self, id: &str) -> Option<Track> {
        self(id)
    }
}

/// Queue rebuilt from a persisted snapshot
#[derive(Debug)]
pub(crate) struct Restored {
    pub queue: Queue,
    pub dropped: Vec<String>,
    pub position: Duration,
}

/// Rebuild a queue from its persisted form
///
/// Unknown ids are dropped and everything pointing at them is repaired: the
/// current index moves to the next surviving track, the shuffle order loses
/// the dropped entries (or is regenerated when it no longer forms a valid
/// permutation).
pub(crate) fn rebuild(
    persisted: &PersistedQueue,
    resolver: &dyn TrackResolver,
    shuffler: &mut ShuffleEngine,
    revision: u64,
) -> Restored {
    let mut items = Vec::with_capacity(persisted.track_ids.len());
    let mut remapped: Vec<Option<usize>> = Vec::with_capacity(persisted.track_ids.len());
    let mut dropped = Vec::new();

    for id in &persisted.track_ids {
        match resolver.resolve(id) {
            Some(track) => {
                remapped.push(Some(items.len()));
                items.push(track);
            }
            None => {
                remapped.push(None);
                dropped.push(id.clone());
            }
        }
    }

    let current = restore_current(persisted.current_index, &remapped, items.len());

    let (shuffle_order, shuffle_cursor) = if persisted.shuffle.is_on() {
        let order: Option<Vec<usize>> = persisted.shuffle_order.as_ref().map(|order| {
            order
                .iter()
                .filter_map(|&index| remapped.get(index).copied().flatten())
                .collect()
        });

        match order {
            Some(order) if shuffle::is_permutation(&order, items.len()) => {
                let cursor = current.and_then(|index| shuffle::position_of(&order, index));
                (Some(order), cursor)
            }
            _ => {
                if persisted.shuffle_order.is_some() {
                    warn!("Persisted shuffle order is not a valid permutation, regenerating");
                }
                let mut order = shuffler.generate(items.len(), current);
                let cursor = current.and_then(|index| shuffle::lead_with(&mut order, index));
                (Some(order), cursor)
            }
        }
    } else {
        (None, None)
    };

    let position = if current.is_some() && dropped.is_empty() {
        Duration::from_millis(persisted.position_ms)
    } else {
        Duration::ZERO
    };

    Restored {
        queue: Queue::from_parts(
            items,
            current,
            shuffle_order,
            shuffle_cursor,
            persisted.repeat,
            revision,
        ),
        dropped,
        position,
    }
}

/// Map the persisted current index onto the surviving items
fn restore_current(
    persisted: Option<usize>,
    remapped: &[Option<usize>],
    len: usize,
) -> Option<usize> {
    if len == 0 {
        return None;
    }

    let Some(index) = persisted else {
        return Some(0);
    };

    if index >= remapped.len() {
        return Some(len - 1);
    }

    remapped[index..]
        .iter()
        .find_map(|entry| *entry)
        .or_else(|| remapped[..index].iter().rev().find_map(|entry| *entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn create_test_track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            title: format!("Track {}", id),
            artists: vec!["Test Artist".to_string()],
            album_id: None,
            duration: Duration::from_secs(180),
            location: PathBuf::from(format!("/music/{}.mp3", id)),
        }
    }

    fn library(ids: &[&str]) -> HashMap<String, Track> {
        ids.iter()
            .map(|id| (id.to_string(), create_test_track(id)))
            .collect()
    }

    fn persisted(ids: &[&str], current: Option<usize>) -> PersistedQueue {
        PersistedQueue {
            track_ids: ids.iter().map(|id| id.to_string()).collect(),
            current_index: current,
            repeat: RepeatMode::All,
            shuffle: ShuffleMode::Off,
            shuffle_order: None,
            shuffle_position: None,
            position_ms: 42_000,
        }
    }

    #[test]
    fn rebuild_with_all_tracks_known() {
        let lib = library(&["a", "b", "c"]);
        let resolver = |id: &str| lib.get(id).cloned();
        let mut shuffler = ShuffleEngine::with_seed(1);

        let restored = rebuild(&persisted(&["a", "b", "c"], Some(1)), &resolver, &mut shuffler, 7);

        assert!(restored.dropped.is_empty());
        assert_eq!(restored.queue.current_track().unwrap().id, "b");
        assert_eq!(restored.queue.repeat_mode(), RepeatMode::All);
        assert_eq!(restored.queue.revision(), 7);
        assert_eq!(restored.position, Duration::from_secs(42));
        assert!(restored.queue.is_consistent());
    }

    #[test]
    fn rebuild_drops_unknown_ids() {
        let lib = library(&["a", "c"]);
        let resolver = |id: &str| lib.get(id).cloned();
        let mut shuffler = ShuffleEngine::with_seed(1);

        let restored = rebuild(&persisted(&["a", "b", "c"], Some(1)), &resolver, &mut shuffler, 1);

        assert_eq!(restored.dropped, vec!["b".to_string()]);
        assert_eq!(restored.queue.len(), 2);
        // Current track vanished, next surviving track takes over
        assert_eq!(restored.queue.current_track().unwrap().id, "c");
        assert_eq!(restored.position, Duration::ZERO);
    }

    #[test]
    fn rebuild_current_falls_back_to_earlier_track() {
        let lib = library(&["a"]);
        let resolver = |id: &str| lib.get(id).cloned();
        let mut shuffler = ShuffleEngine::with_seed(1);

        let restored = rebuild(&persisted(&["a", "b", "c"], Some(2)), &resolver, &mut shuffler, 1);
        assert_eq!(restored.queue.current_index(), Some(0));
    }

    #[test]
    fn rebuild_with_nothing_known_is_empty() {
        let resolver = |_: &str| -> Option<Track> { None };
        let mut shuffler = ShuffleEngine::with_seed(1);

        let restored = rebuild(&persisted(&["a", "b"], Some(0)), &resolver, &mut shuffler, 1);
        assert!(restored.queue.is_empty());
        assert_eq!(restored.queue.current_index(), None);
        assert_eq!(restored.dropped.len(), 2);
    }

    #[test]
    fn rebuild_repairs_shuffle_order() {
        let lib = library(&["a", "b", "d"]);
        let resolver = |id: &str| lib.get(id).cloned();
        let mut shuffler = ShuffleEngine::with_seed(1);

        let mut saved = persisted(&["a", "b", "c", "d"], Some(3));
        saved.shuffle = ShuffleMode::On;
        saved.shuffle_order = Some(vec![2, 3, 0, 1]);
        saved.shuffle_position = Some(1);

        let restored = rebuild(&saved, &resolver, &mut shuffler, 1);
        // "c" (index 2) dropped, "d" moves to index 2
        assert_eq!(restored.queue.shuffle_order(), Some(&[2, 0, 1][..]));
        assert_eq!(restored.queue.current_index(), Some(2));
        assert_eq!(restored.queue.shuffle_cursor(), Some(0));
        assert!(restored.queue.is_consistent());
    }

    #[test]
    fn rebuild_regenerates_invalid_shuffle_order() {
        let lib = library(&["a", "b", "c"]);
        let resolver = |id: &str| lib.get(id).cloned();
        let mut shuffler = ShuffleEngine::with_seed(1);

        let mut saved = persisted(&["a", "b", "c"], Some(0));
        saved.shuffle = ShuffleMode::On;
        saved.shuffle_order = Some(vec![0, 0, 7]);

        let restored = rebuild(&saved, &resolver, &mut shuffler, 1);
        assert!(restored.queue.is_consistent());
        assert_eq!(restored.queue.shuffle_mode(), ShuffleMode::On);
        assert_eq!(restored.queue.shuffle_cursor(), Some(0));
        assert_eq!(restored.queue.shuffle_order().unwrap()[0], 0);
    }

    #[test]
    fn persisted_json_round_trip() {
        let mut saved = persisted(&["a", "b"], Some(1));
        saved.shuffle = ShuffleMode::On;
        saved.shuffle_order = Some(vec![1, 0]);

        let json = saved.to_json().unwrap();
        assert!(json.contains("\"repeat\":\"all\""));
        assert_eq!(PersistedQueue::from_json(&json).unwrap(), saved);
    }

    #[test]
    fn persisted_json_without_optional_fields() {
        let json = r#"{"track_ids":["a"],"current_index":0,"repeat":"off","shuffle":"off"}"#;
        let saved = PersistedQueue::from_json(json).unwrap();
        assert_eq!(saved.shuffle_order, None);
        assert_eq!(saved.position_ms, 0);
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            PersistedQueue::from_json("{not json"),
            Err(QueueError::Serialization(_))
        ));
    }
}
