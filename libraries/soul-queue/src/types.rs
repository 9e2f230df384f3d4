//! Core types for queue management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Track information held by the queue
///
/// Immutable value owned by the library. The queue keeps copies; it never
/// manages a track's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Unique track identifier from the library
    pub id: String,

    /// Track title
    pub title: String,

    /// Artist name(s), primary artist first
    pub artists: Vec<String>,

    /// Album identifier (optional)
    pub album_id: Option<String>,

    /// Track duration
    pub duration: Duration,

    /// Source locator for the audio backend
    pub location: PathBuf,
}

impl Track {
    /// Artist names joined for display
    pub fn artist_display(&self) -> String {
        self.artists.join(", ")
    }
}

/// Transport state of the playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No queue loaded
    Idle,

    /// Queue loaded, not playing
    Ready,

    /// Currently playing
    Playing,

    /// Paused mid-track
    Paused,

    /// Stopped by the user, by queue exhaustion, or by the stop position
    Stopped,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop when queue ends
    #[default]
    Off,

    /// Loop entire queue
    All,

    /// Loop current track only
    One,
}

impl RepeatMode {
    /// Next mode in the Off -> All -> One -> Off cycle
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// Shuffle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    /// Play in queue order
    #[default]
    Off,

    /// Play in shuffle order
    On,
}

impl ShuffleMode {
    pub fn toggle(self) -> Self {
        match self {
            ShuffleMode::Off => ShuffleMode::On,
            ShuffleMode::On => ShuffleMode::Off,
        }
    }

    pub fn is_on(self) -> bool {
        self == ShuffleMode::On
    }
}

/// Traversal direction through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// External interruption reported by the OS audio-routing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interruption {
    /// Another app took audio focus
    FocusLost,

    /// Output device went away (headphones unplugged, bluetooth dropped)
    DeviceDisconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_cycles() {
        assert_eq!(RepeatMode::Off.cycle(), RepeatMode::All);
        assert_eq!(RepeatMode::All.cycle(), RepeatMode::One);
        assert_eq!(RepeatMode::One.cycle(), RepeatMode::Off);
    }

    #[test]
    fn shuffle_mode_toggles() {
        assert_eq!(ShuffleMode::Off.toggle(), ShuffleMode::On);
        assert_eq!(ShuffleMode::On.toggle(), ShuffleMode::Off);
        assert!(ShuffleMode::On.is_on());
    }

    #[test]
    fn artist_display_joins_names() {
        let track = Track {
            id: "t1".to_string(),
            title: "Song".to_string(),
            artists: vec!["Artist A".to_string(), "Artist B".to_string()],
            album_id: Some("album1".to_string()),
            duration: Duration::from_secs(200),
            location: PathBuf::from("/music/song.flac"),
        };

        assert_eq!(track.artist_display(), "Artist A, Artist B");
    }
}
