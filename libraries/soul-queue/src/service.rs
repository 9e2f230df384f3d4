//! Single-writer queue service
//!
//! Runs a [`QueueEngine`] on its own thread so commands arriving from the UI,
//! OS media buttons and the audio backend are applied one at a time.
//!
//! ```text
//! UI / media keys / backend          queue-engine thread        queue-persistence thread
//!        │                                  │                              │
//!        │  execute(Command) / send(...)    │                              │
//!        │─────────────────────────────────>│ QueueEngine::*               │
//!        │                                  │── 1. publish EngineView      │
//!        │                                  │── 2. publish signals ──> observers
//!        │<─ ─ ─ ─ ─ ─ ─ ─ 3. reply ─ ─ ─ ─ │                              │
//!        │  view() (copy-on-read)           │                              │
//!        │<─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─│ try_send(PersistedQueue)     │
//!        │                                  │─────────────────────────────>│ SnapshotSink::save
//! ```
//!
//! Queries never touch the worker: after every command the worker publishes
//! an immutable [`EngineView`] which readers clone out of a lock.

use crate::config::EngineConfig;
use crate::engine::QueueEngine;
use crate::error::{QueueError, Result};
use crate::events::{ObserverRegistry, ObserverToken, SignalKind, Subscription};
use crate::snapshot::{PersistedQueue, QueueSnapshot, TrackResolver};
use crate::types::{Interruption, PlaybackState, RepeatMode, ShuffleMode, Track};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Commands accepted by the service
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OpenQueue {
        tracks: Vec<Track>,
        start: Option<usize>,
        shuffle: ShuffleMode,
    },
    Enqueue(Vec<Track>),
    PlayNext(Vec<Track>),
    InsertAt {
        index: usize,
        tracks: Vec<Track>,
    },
    MoveSong {
        from: usize,
        to: usize,
    },
    RemoveFromQueue(usize),
    RemoveTracks(Vec<String>),
    PlaySongAt(usize),
    SetStopPosition(Option<usize>),
    Clear,
    Reshuffle,
    Play,
    Pause,
    TogglePlayPause,
    Stop,
    SkipNext,
    SkipPrevious,
    Seek(Duration),
    CycleRepeatMode,
    ToggleShuffleMode,
    SetRepeatMode(RepeatMode),
    SetShuffleMode(ShuffleMode),

    /// Backend finished the current track
    TrackEnded,
    /// Backend progress report
    PositionChanged(Duration),
    Interrupted(Interruption),
    FocusLost,
    FocusGained,
}

/// External store for persisted queues
///
/// Called on the persistence thread, never on the engine thread.
pub trait SnapshotSink: Send + 'static {
    fn save(&mut self, snapshot: &PersistedQueue) -> Result<()>;
}

/// Point-in-time view of the engine for readers
#[derive(Debug, Clone, PartialEq)]
pub struct EngineView {
    pub snapshot: QueueSnapshot,
    pub state: PlaybackState,
    pub position: Duration,
    /// Track that plays when the current one ends
    pub next: Option<Track>,
    /// Track "previous" would move to
    pub previous: Option<Track>,
}

impl EngineView {
    fn capture(engine: &QueueEngine) -> Self {
        Self {
            snapshot: engine.snapshot(),
            state: engine.state(),
            position: engine.position(),
            next: engine.peek_next().cloned(),
            previous: engine.peek_previous().cloned(),
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.snapshot.current_track()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.snapshot.current_index
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.snapshot.repeat
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.snapshot.shuffle_mode()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    pub fn len(&self) -> usize {
        self.snapshot.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.items.is_empty()
    }
}

enum Message {
    Command {
        command: Command,
        reply: Option<Sender<Result<()>>>,
    },
    Restore {
        persisted: PersistedQueue,
        resolver: Box<dyn TrackResolver + Send>,
        reply: Sender<Vec<String>>,
    },
    Shutdown,
}

/// Handle to the running engine
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct QueueService {
    commands: Sender<Message>,
    view: Arc<RwLock<Arc<EngineView>>>,
    observers: Arc<ObserverRegistry>,
    engine_thread: Mutex<Option<JoinHandle<()>>>,
    persistence_thread: Mutex<Option<JoinHandle<()>>>,
}

impl QueueService {
    /// Start the engine worker (and the persistence worker if `sink` is given)
    pub fn start(config: EngineConfig, sink: Option<Box<dyn SnapshotSink>>) -> Result<Self> {
        config.validate()?;

        let observers = Arc::new(ObserverRegistry::new(config.observer_capacity));
        let (command_tx, command_rx) = bounded::<Message>(config.command_capacity);

        let (persist_tx, persistence_thread) = match sink {
            Some(sink) => {
                let (tx, rx) = bounded::<PersistedQueue>(config.persistence_capacity);
                let handle = thread::Builder::new()
                    .name("queue-persistence".to_string())
                    .spawn(move || persistence_loop(rx, sink))
                    .map_err(|e| QueueError::Worker(e.to_string()))?;
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let engine = QueueEngine::with_observers(config, Arc::clone(&observers));
        let view = Arc::new(RwLock::new(Arc::new(EngineView::capture(&engine))));
        let worker_view = Arc::clone(&view);

        let engine_thread = thread::Builder::new()
            .name("queue-engine".to_string())
            .spawn(move || engine_loop(engine, command_rx, worker_view, persist_tx))
            .map_err(|e| QueueError::Worker(e.to_string()))?;

        info!("Queue service started");

        Ok(Self {
            commands: command_tx,
            view,
            observers,
            engine_thread: Mutex::new(Some(engine_thread)),
            persistence_thread: Mutex::new(persistence_thread),
        })
    }

    /// Run a command and wait for its result
    pub fn execute(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Message::Command {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| QueueError::EngineStopped)?;

        reply_rx.recv().map_err(|_| QueueError::EngineStopped)?
    }

    /// Queue a command without waiting for its result
    ///
    /// Blocks only while `command_capacity` commands are already pending, so
    /// a flood of sends slows down instead of losing commands. Failures still
    /// reach observers as failure signals.
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(Message::Command {
                command,
                reply: None,
            })
            .map_err(|_| QueueError::EngineStopped)
    }

    /// Restore a persisted queue, returning the ids that were dropped
    pub fn restore<R>(&self, persisted: PersistedQueue, resolver: R) -> Result<Vec<String>>
    where
        R: TrackResolver + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Message::Restore {
                persisted,
                resolver: Box::new(resolver),
                reply: reply_tx,
            })
            .map_err(|_| QueueError::EngineStopped)?;

        reply_rx.recv().map_err(|_| QueueError::EngineStopped)
    }

    /// Latest published view
    pub fn view(&self) -> Arc<EngineView> {
        Arc::clone(&self.view.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn current_track(&self) -> Option<Track> {
        self.view().current_track().cloned()
    }

    pub fn peek_next(&self) -> Option<Track> {
        self.view().next.clone()
    }

    pub fn peek_previous(&self) -> Option<Track> {
        self.view().previous.clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.view().snapshot.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.view().is_playing()
    }

    pub fn state(&self) -> PlaybackState {
        self.view().state
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.view().repeat_mode()
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.view().shuffle_mode()
    }

    pub fn subscribe(&self, kinds: &[SignalKind]) -> Subscription {
        self.observers.subscribe(kinds)
    }

    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        self.observers.unsubscribe(token)
    }

    /// Stop both workers after the commands already queued
    ///
    /// Idempotent. Commands sent afterwards fail with `EngineStopped`.
    pub fn shutdown(&self) {
        let engine_thread = self
            .engine_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(engine_thread) = engine_thread else {
            return;
        };

        // Worker may already be gone if it panicked
        let _ = self.commands.send(Message::Shutdown);
        if engine_thread.join().is_err() {
            error!("Queue engine thread panicked");
        }

        let persistence_thread = self
            .persistence_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = persistence_thread {
            if handle.join().is_err() {
                error!("Queue persistence thread panicked");
            }
        }

        info!("Queue service stopped");
    }
}

impl Drop for QueueService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

/// Reply owed to the sender of a message
enum Reply {
    Command(Option<Sender<Result<()>>>, Result<()>),
    Restore(Sender<Vec<String>>, Vec<String>),
}

impl Reply {
    fn send(self) {
        // Caller may have given up waiting
        match self {
            Reply::Command(Some(reply), result) => {
                let _ = reply.send(result);
            }
            Reply::Command(None, _) => {}
            Reply::Restore(reply, dropped) => {
                let _ = reply.send(dropped);
            }
        }
    }
}

/// Engine worker: apply messages in arrival order
///
/// After each message the new view is published first, then the signals,
/// then the reply, so neither observers nor callers can read a view older
/// than what they were told about.
fn engine_loop(
    mut engine: QueueEngine,
    commands: Receiver<Message>,
    view: Arc<RwLock<Arc<EngineView>>>,
    persist: Option<Sender<PersistedQueue>>,
) {
    debug!("Queue engine thread started");
    engine.hold_signals();

    for message in commands.iter() {
        let revision = engine.revision();

        let reply = match message {
            Message::Command { command, reply } => {
                let result = dispatch(&mut engine, command);
                Reply::Command(reply, result)
            }
            Message::Restore {
                persisted,
                resolver,
                reply,
            } => {
                let dropped = engine.restore(&persisted, resolver.as_ref());
                Reply::Restore(reply, dropped)
            }
            Message::Shutdown => break,
        };

        *view.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(EngineView::capture(&engine));
        let signals = engine.take_held_signals();
        engine.observers().publish(&signals);
        reply.send();

        if engine.revision() != revision {
            if let Some(persist) = &persist {
                match persist.try_send(engine.persisted()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(
                            "Persistence is behind, skipped snapshot at revision {}",
                            engine.revision()
                        )
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("Persistence worker is gone")
                    }
                }
            }
        }
    }

    // Final snapshot carries the latest position; wait for room this time
    if let Some(persist) = persist {
        if persist.send(engine.persisted()).is_err() {
            warn!("Persistence worker is gone, final snapshot not saved");
        }
    }

    debug!("Queue engine thread exiting");
}

fn dispatch(engine: &mut QueueEngine, command: Command) -> Result<()> {
    match command {
        Command::OpenQueue {
            tracks,
            start,
            shuffle,
        } => engine.open_queue(tracks, start, shuffle)?,
        Command::Enqueue(tracks) => engine.enqueue(tracks),
        Command::PlayNext(tracks) => engine.play_next(tracks),
        Command::InsertAt { index, tracks } => engine.insert_at(index, tracks)?,
        Command::MoveSong { from, to } => engine.move_song(from, to)?,
        Command::RemoveFromQueue(index) => {
            engine.remove_from_queue(index)?;
        }
        Command::RemoveTracks(ids) => {
            engine.remove_tracks(&ids);
        }
        Command::PlaySongAt(index) => engine.play_song_at(index)?,
        Command::SetStopPosition(index) => engine.set_stop_position(index)?,
        Command::Clear => engine.clear(),
        Command::Reshuffle => engine.reshuffle(),
        Command::Play => engine.play()?,
        Command::Pause => engine.pause()?,
        Command::TogglePlayPause => engine.toggle_play_pause()?,
        Command::Stop => engine.stop()?,
        Command::SkipNext => engine.skip_next()?,
        Command::SkipPrevious => engine.skip_previous()?,
        Command::Seek(position) => engine.seek(position)?,
        Command::CycleRepeatMode => {
            engine.cycle_repeat_mode();
        }
        Command::ToggleShuffleMode => {
            engine.toggle_shuffle_mode();
        }
        Command::SetRepeatMode(mode) => engine.set_repeat_mode(mode),
        Command::SetShuffleMode(mode) => engine.set_shuffle_mode(mode),
        Command::TrackEnded => engine.on_track_ended()?,
        Command::PositionChanged(position) => engine.on_position_changed(position),
        Command::Interrupted(cause) => engine.on_interruption(cause),
        Command::FocusLost => engine.on_focus_lost(),
        Command::FocusGained => engine.on_focus_gained(),
    }

    Ok(())
}

/// Persistence worker: save snapshots until the engine hangs up
fn persistence_loop(snapshots: Receiver<PersistedQueue>, mut sink: Box<dyn SnapshotSink>) {
    debug!("Queue persistence thread started");

    for snapshot in snapshots.iter() {
        if let Err(e) = sink.save(&snapshot) {
            warn!("Failed to save queue snapshot: {}", e);
        }
    }

    debug!("Queue persistence thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn start_rejects_invalid_config() {
        let config = EngineConfig {
            command_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            QueueService::start(config, None),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn view_follows_commands() {
        let service = QueueService::start(EngineConfig::default(), None).unwrap();
        assert_eq!(service.state(), PlaybackState::Idle);

        service
            .execute(Command::OpenQueue {
                tracks: vec![create_test_track("a"), create_test_track("b")],
                start: Some(0),
                shuffle: ShuffleMode::Off,
            })
            .unwrap();

        let view = service.view();
        assert_eq!(view.state, PlaybackState::Ready);
        assert_eq!(view.current_track().unwrap().id, "a");
        assert_eq!(view.next.as_ref().unwrap().id, "b");
    }

    #[test]
    fn execute_returns_command_errors() {
        let service = QueueService::start(EngineConfig::default(), None).unwrap();
        assert_eq!(service.execute(Command::Play), Err(QueueError::EmptyQueue));
        assert!(matches!(
            service.execute(Command::PlaySongAt(3)),
            Err(QueueError::InvalidIndex { index: 3, len: 0 })
        ));
    }

    #[test]
    fn commands_after_shutdown_fail() {
        let service = QueueService::start(EngineConfig::default(), None).unwrap();
        service.shutdown();
        service.shutdown();

        assert_eq!(service.execute(Command::Play), Err(QueueError::EngineStopped));
        assert_eq!(service.send(Command::Play), Err(QueueError::EngineStopped));
    }
}
