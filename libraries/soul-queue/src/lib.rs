//! Soul Player - Playback Queue Engine
//!
//! Platform-agnostic play queue and now-playing state for Soul Player.
//!
//! This crate provides:
//! - Queue store with current index, stop-after position and revision counter
//! - Shuffle orders that never replay the current track first
//! - Repeat modes (Off, All, One)
//! - Playback state machine (Idle, Ready, Playing, Paused, Stopped)
//! - Queue mutations (enqueue, play next, move, remove, stop after)
//! - Observer fan-out with per-observer ordering and deduplication
//! - Snapshot/restore for persisting the queue across restarts
//! - A single-writer worker service for multi-threaded callers
//!
//! # Architecture
//!
//! `soul-queue` owns no audio output, no UI and no database. The audio
//! backend reports track ends and progress; the library resolves track ids
//! on restore; a [`SnapshotSink`] stores persisted queues.
//!
//! # Example: Basic Queue
//!
//! ```rust
//! use soul_queue::{EngineConfig, PlaybackState, QueueEngine, ShuffleMode, Track};
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! let track = |id: &str| Track {
//!     id: id.to_string(),
//!     title: format!("Song {}", id),
//!     artists: vec!["Artist Name".to_string()],
//!     album_id: Some("album1".to_string()),
//!     duration: Duration::from_secs(180),
//!     location: PathBuf::from(format!("/music/{}.mp3", id)),
//! };
//!
//! let mut engine = QueueEngine::new(EngineConfig::default());
//! engine
//!     .open_queue(vec![track("a"), track("b"), track("c")], Some(0), ShuffleMode::Off)
//!     .unwrap();
//! engine.play().unwrap();
//!
//! engine.on_track_ended().unwrap();
//! assert_eq!(engine.current_track().unwrap().id, "b");
//! assert_eq!(engine.state(), PlaybackState::Playing);
//! ```
//!
//! # Example: Observers
//!
//! ```rust
//! use soul_queue::{EngineEvent, QueueEngine, SignalKind};
//!
//! let mut engine = QueueEngine::default();
//! let subscription = engine.subscribe(&[SignalKind::Mode]);
//!
//! engine.cycle_repeat_mode();
//!
//! match subscription.try_recv() {
//!     Some(EngineEvent::ModeChanged { repeat, .. }) => println!("repeat is now {:?}", repeat),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! # Example: Service
//!
//! ```rust,no_run
//! use soul_queue::{Command, EngineConfig, QueueService};
//!
//! let config = EngineConfig::load(None).unwrap();
//! let service = QueueService::start(config, None).unwrap();
//!
//! service.execute(Command::CycleRepeatMode).unwrap();
//! println!("{:?}", service.repeat_mode());
//!
//! service.shutdown();
//! ```

mod config;
mod engine;
mod error;
mod events;
mod queue;
pub mod shuffle;
mod snapshot;
mod service;
mod transport;
pub mod types;

// Public exports
pub use config::EngineConfig;
pub use engine::QueueEngine;
pub use error::{ErrorKind, QueueError, Result};
pub use events::{EngineEvent, ObserverRegistry, ObserverToken, SignalKind, Subscription};
pub use queue::Queue;
pub use service::{Command, EngineView, QueueService, SnapshotSink};
pub use shuffle::ShuffleEngine;
pub use snapshot::{PersistedQueue, QueueSnapshot, TrackResolver};
pub use types::{Direction, Interruption, PlaybackState, RepeatMode, ShuffleMode, Track};
