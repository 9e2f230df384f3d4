//! Queue engine - mutation protocol and playback state machine
//!
//! Synchronous core: owns the queue store, the shuffle engine and the
//! transport, and runs every command to completion before returning. Each
//! command compares what observers can see before and after it ran and
//! publishes one signal per kind of change.
//!
//! The engine is single-writer by construction (`&mut self`). `QueueService`
//! puts it on a worker thread when commands come from several places.

use crate::config::EngineConfig;
use crate::error::{QueueError, Result};
use crate::events::{EngineEvent, ObserverRegistry, ObserverToken, SignalKind, Subscription};
use crate::queue::Queue;
use crate::shuffle::ShuffleEngine;
use crate::snapshot::{self, PersistedQueue, QueueSnapshot, TrackResolver};
use crate::transport::Transport;
use crate::types::{Direction, Interruption, PlaybackState, RepeatMode, ShuffleMode, Track};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a command did beyond what a before/after comparison shows
#[derive(Debug, Clone, Copy, Default)]
struct Changes {
    /// Items, order or stop position changed
    queue: bool,
    /// Current track must be reported even if its id did not change
    track: bool,
    /// Current track started over
    restarted: bool,
}

impl Changes {
    fn queue() -> Self {
        Self {
            queue: true,
            ..Self::default()
        }
    }

    fn track() -> Self {
        Self {
            track: true,
            ..Self::default()
        }
    }

    fn restart() -> Self {
        Self {
            restarted: true,
            ..Self::default()
        }
    }
}

/// Observer-visible state captured before a command runs
#[derive(Debug)]
struct Observed {
    revision: u64,
    track_id: Option<String>,
    state: PlaybackState,
    repeat: RepeatMode,
    shuffle: ShuffleMode,
}

/// Playback queue and now-playing state engine
#[derive(Debug)]
pub struct QueueEngine {
    queue: Queue,
    shuffler: ShuffleEngine,
    transport: Transport,
    config: EngineConfig,
    observers: Arc<ObserverRegistry>,
    /// Signals waiting for `take_held_signals`; `None` publishes at once
    held: Option<Vec<EngineEvent>>,
}

impl QueueEngine {
    /// Create engine with its own observer registry
    pub fn new(config: EngineConfig) -> Self {
        let observers = Arc::new(ObserverRegistry::new(config.observer_capacity));
        Self::with_observers(config, observers)
    }

    /// Create engine publishing to a shared observer registry
    pub fn with_observers(config: EngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        let mut shuffler = match config.shuffle_seed {
            Some(seed) => ShuffleEngine::with_seed(seed),
            None => ShuffleEngine::new(),
        };

        let mut queue = Queue::new(config.initial_repeat);
        queue.set_shuffle(config.initial_shuffle, &mut shuffler);

        info!(
            "Queue engine initialized (repeat: {:?}, shuffle: {:?})",
            config.initial_repeat, config.initial_shuffle
        );

        Self {
            queue,
            shuffler,
            transport: Transport::new(),
            config,
            observers,
            held: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry signals are published to
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn subscribe(&self, kinds: &[SignalKind]) -> Subscription {
        self.observers.subscribe(kinds)
    }

    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        self.observers.unsubscribe(token)
    }

    /// Keep signals back until `take_held_signals` instead of publishing them
    ///
    /// Lets a caller make the new state readable before observers hear of it.
    pub(crate) fn hold_signals(&mut self) {
        self.held.get_or_insert_with(Vec::new);
    }

    /// Signals held since the last call, in emission order
    pub(crate) fn take_held_signals(&mut self) -> Vec<EngineEvent> {
        self.held.as_mut().map(std::mem::take).unwrap_or_default()
    }

    // ===== Queue Mutation =====

    /// Replace the queue wholesale
    ///
    /// The engine ends up Ready at `start` (Idle for an empty list). Playback
    /// starts with `play` or `play_song_at`.
    pub fn open_queue(
        &mut self,
        tracks: Vec<Track>,
        start: Option<usize>,
        shuffle: ShuffleMode,
    ) -> Result<()> {
        let before = self.observe();
        let count = tracks.len();

        self.queue
            .open(tracks, start, shuffle, &mut self.shuffler)
            .or_else(|e| self.reject(e))?;

        self.transport.set_state(if self.queue.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Ready
        });

        info!("Opened queue with {} track(s) at {:?}", count, self.queue.current_index());
        self.commit(
            before,
            Changes {
                queue: true,
                track: true,
                restarted: false,
            },
        );
        Ok(())
    }

    /// Append tracks to the end of the queue
    pub fn enqueue(&mut self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }

        let before = self.observe();
        let count = tracks.len();
        let was_empty = self.queue.enqueue(tracks, &mut self.shuffler);
        if was_empty {
            self.transport.set_state(PlaybackState::Ready);
        }

        debug!("Enqueued {} track(s), queue length {}", count, self.queue.len());
        self.commit(before, Changes::queue());
    }

    /// Insert tracks so they play right after the current one
    pub fn play_next(&mut self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }

        let before = self.observe();
        let count = tracks.len();
        let was_empty = self.queue.play_next(tracks, &mut self.shuffler);
        if was_empty {
            self.transport.set_state(PlaybackState::Ready);
        }

        debug!("Queued {} track(s) to play next", count);
        self.commit(before, Changes::queue());
    }

    /// Insert tracks at `index` (`index == len` appends)
    pub fn insert_at(&mut self, index: usize, tracks: Vec<Track>) -> Result<()> {
        let before = self.observe();
        let count = tracks.len();

        let was_empty = self
            .queue
            .insert_at(index, tracks, &mut self.shuffler)
            .or_else(|e| self.reject(e))?;
        if count == 0 {
            return Ok(());
        }
        if was_empty {
            self.transport.set_state(PlaybackState::Ready);
        }

        debug!("Inserted {} track(s) at {}", count, index);
        self.commit(before, Changes::queue());
        Ok(())
    }

    /// Relocate one item; the current track keeps playing
    pub fn move_song(&mut self, from: usize, to: usize) -> Result<()> {
        let before = self.observe();

        let moved = self.queue.move_item(from, to).or_else(|e| self.reject(e))?;
        if moved {
            debug!("Moved item {} to {}", from, to);
            self.commit(before, Changes::queue());
        }
        Ok(())
    }

    /// Remove one item
    ///
    /// Removing the current track moves on to the track that would have
    /// played next without interrupting playback. Removing the last item
    /// leaves the engine Idle.
    pub fn remove_from_queue(&mut self, index: usize) -> Result<Track> {
        let before = self.observe();
        let was_current = self.queue.current_index() == Some(index);

        let removed = self.queue.remove(index).or_else(|e| self.reject(e))?;
        if self.queue.is_empty() {
            self.transport.set_state(PlaybackState::Idle);
        }

        debug!("Removed '{}' from index {}", removed.id, index);
        self.commit(
            before,
            Changes {
                queue: true,
                track: was_current,
                restarted: false,
            },
        );
        Ok(removed)
    }

    /// Remove every occurrence of the given track ids
    pub fn remove_tracks(&mut self, ids: &[String]) -> Vec<Track> {
        let before = self.observe();

        let removed = self.queue.remove_ids(ids);
        if removed.is_empty() {
            return removed;
        }
        if self.queue.is_empty() {
            self.transport.set_state(PlaybackState::Idle);
        }

        let current_removed = before
            .track_id
            .as_ref()
            .is_some_and(|id| ids.contains(id));

        debug!("Removed {} track(s) by id", removed.len());
        self.commit(
            before,
            Changes {
                queue: true,
                track: current_removed,
                restarted: false,
            },
        );
        removed
    }

    /// Jump to `index` and start playing it from the top
    pub fn play_song_at(&mut self, index: usize) -> Result<()> {
        let before = self.observe();

        self.queue.set_current(index).or_else(|e| self.reject(e))?;
        self.transport.set_state(PlaybackState::Playing);

        debug!("Playing item {}", index);
        self.commit(before, Changes::track());
        Ok(())
    }

    /// Stop after the track at `index` ends (`None` clears it)
    pub fn set_stop_position(&mut self, index: Option<usize>) -> Result<()> {
        let before = self.observe();

        self.queue.set_stop_after(index).or_else(|e| self.reject(e))?;

        debug!("Stop position set to {:?}", index);
        self.commit(before, Changes::queue());
        Ok(())
    }

    /// Empty the queue; the engine goes Idle
    pub fn clear(&mut self) {
        let before = self.observe();

        self.queue.clear();
        self.transport.set_state(PlaybackState::Idle);

        debug!("Queue cleared");
        self.commit(before, Changes::queue());
    }

    /// Reshuffle on demand
    ///
    /// With shuffle on a new order replaces the old one; with shuffle off the
    /// tracks after the current one are shuffled in place.
    pub fn reshuffle(&mut self) {
        let before = self.observe();

        if self.queue.reshuffle(&mut self.shuffler) {
            debug!("Queue reshuffled");
            self.commit(before, Changes::queue());
        }
    }

    // ===== Modes =====

    /// Off -> All -> One -> Off
    pub fn cycle_repeat_mode(&mut self) -> RepeatMode {
        let next = self.queue.repeat_mode().cycle();
        self.set_repeat_mode(next);
        next
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        let before = self.observe();
        if self.queue.set_repeat(mode) {
            debug!("Repeat mode: {:?}", mode);
            self.commit(before, Changes::default());
        }
    }

    pub fn toggle_shuffle_mode(&mut self) -> ShuffleMode {
        let next = self.queue.shuffle_mode().toggle();
        self.set_shuffle_mode(next);
        next
    }

    /// Switch shuffle; the current track keeps playing
    pub fn set_shuffle_mode(&mut self, mode: ShuffleMode) {
        let before = self.observe();
        if self.queue.set_shuffle(mode, &mut self.shuffler) {
            debug!("Shuffle mode: {:?}", mode);
            self.commit(before, Changes::queue());
        }
    }

    // ===== Transport =====

    /// Start or resume playback
    ///
    /// From Stopped the current track starts over. Rejected with
    /// `EmptyQueue` while Idle.
    pub fn play(&mut self) -> Result<()> {
        let before = self.observe();

        match self.transport.state() {
            PlaybackState::Idle => return self.reject(QueueError::EmptyQueue),
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Stopped => self.transport.rewind(),
            PlaybackState::Ready | PlaybackState::Paused => {}
        }

        self.transport.set_state(PlaybackState::Playing);
        self.commit(before, Changes::default());
        Ok(())
    }

    /// Pause playback; a no-op unless Playing
    pub fn pause(&mut self) -> Result<()> {
        let before = self.observe();

        match self.transport.state() {
            PlaybackState::Idle => self.reject(QueueError::EmptyQueue),
            PlaybackState::Playing => {
                self.transport.set_state(PlaybackState::Paused);
                self.commit(before, Changes::default());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.transport.state().is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Stop playback and rewind the current track
    pub fn stop(&mut self) -> Result<()> {
        let before = self.observe();

        if self.transport.state() == PlaybackState::Idle {
            return self.reject(QueueError::EmptyQueue);
        }

        self.transport.set_state(PlaybackState::Stopped);
        self.transport.rewind();
        self.commit(before, Changes::default());
        Ok(())
    }

    /// The backend finished the current track
    ///
    /// Stops at the stop position or at the end of the queue (repeat off),
    /// restarts the same track under repeat one, otherwise advances and keeps
    /// playing.
    pub fn on_track_ended(&mut self) -> Result<()> {
        let before = self.observe();

        if self.queue.is_empty() {
            return self.reject(QueueError::EmptyQueue);
        }

        if self.queue.take_stop_if_reached() {
            info!("Reached stop position at {:?}", self.queue.current_index());
            self.transport.set_state(PlaybackState::Stopped);
            self.transport.rewind();
            self.commit(before, Changes::queue());
            return Ok(());
        }

        let repeat = self.queue.repeat_mode();
        if repeat == RepeatMode::One {
            self.transport.set_state(PlaybackState::Playing);
            self.commit(before, Changes::restart());
            return Ok(());
        }

        match self.queue.step(Direction::Forward, repeat) {
            Some(step) => {
                self.queue.apply_step(step);
                self.transport.set_state(PlaybackState::Playing);
                self.commit(before, Changes::track());
            }
            None => {
                debug!("End of queue reached");
                self.transport.set_state(PlaybackState::Stopped);
                self.transport.rewind();
                self.commit(before, Changes::default());
            }
        }

        Ok(())
    }

    /// User skip forward
    ///
    /// Wraps under repeat all and repeat one, does nothing at the last track
    /// with repeat off.
    pub fn skip_next(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return self.reject(QueueError::EmptyQueue);
        }

        let repeat = match self.queue.repeat_mode() {
            RepeatMode::One => RepeatMode::All,
            other => other,
        };
        self.skip(Direction::Forward, repeat);
        Ok(())
    }

    /// User skip backward
    ///
    /// Restarts the current track when it has played past the rewind
    /// threshold. Otherwise moves to the previous track, wrapping under repeat
    /// all and repeat one and doing nothing at the first track with repeat
    /// off.
    pub fn skip_previous(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return self.reject(QueueError::EmptyQueue);
        }

        let repeat = match self.queue.repeat_mode() {
            RepeatMode::One => RepeatMode::All,
            other => other,
        };
        let past_threshold = self
            .config
            .rewind_threshold()
            .is_some_and(|threshold| self.transport.position() > threshold);

        if past_threshold {
            let before = self.observe();
            debug!("Restarting current track");
            self.commit(before, Changes::restart());
            return Ok(());
        }

        self.skip(Direction::Backward, repeat);
        Ok(())
    }

    fn skip(&mut self, direction: Direction, repeat: RepeatMode) {
        let before = self.observe();

        let Some(step) = self.queue.step(direction, repeat) else {
            debug!("Skip {:?} at queue boundary ignored", direction);
            return;
        };

        self.queue.apply_step(step);
        if self.config.auto_play_on_skip {
            self.transport.set_state(PlaybackState::Playing);
        }
        self.commit(before, Changes::track());
    }

    /// Jump to `position` in the current track
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let Some(duration) = self.queue.current_track().map(|track| track.duration) else {
            return self.reject(QueueError::EmptyQueue);
        };

        let position = if duration.is_zero() {
            position
        } else {
            position.min(duration)
        };
        self.transport.set_position(position);
        Ok(())
    }

    /// Progress report from the backend
    pub fn on_position_changed(&mut self, position: Duration) {
        if !self.queue.is_empty() {
            self.transport.set_position(position);
        }
    }

    // ===== Interruptions =====

    /// Focus loss or device loss: pause, never resume on our own
    pub fn on_interruption(&mut self, cause: Interruption) {
        let before = self.observe();

        if self.transport.interrupt(cause) {
            info!("Playback paused by {:?}", cause);
            self.commit(before, Changes::default());
        }
    }

    pub fn on_focus_lost(&mut self) {
        self.on_interruption(Interruption::FocusLost);
    }

    /// Focus is back; resuming is up to the audio backend
    pub fn on_focus_gained(&mut self) {
        if self.transport.clear_interruption() {
            debug!("Audio focus regained, staying paused");
        }
    }

    // ===== Persistence =====

    /// Compact snapshot for an external store
    pub fn persisted(&self) -> PersistedQueue {
        self.queue.snapshot().to_persisted(self.transport.position())
    }

    /// Load a persisted queue
    ///
    /// Ids the resolver does not know are dropped and reported with an
    /// `InconsistentSnapshot` failure signal; everything else is restored.
    /// The engine ends up Ready at the saved position (Idle if nothing was
    /// left). Returns the dropped ids.
    pub fn restore(
        &mut self,
        persisted: &PersistedQueue,
        resolver: &dyn TrackResolver,
    ) -> Vec<String> {
        let before = self.observe();

        let restored =
            snapshot::rebuild(persisted, resolver, &mut self.shuffler, self.queue.revision());
        self.queue = restored.queue;
        self.transport.set_state(if self.queue.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Ready
        });

        info!(
            "Restored queue with {} track(s) at {:?}",
            self.queue.len(),
            self.queue.current_index()
        );
        self.commit(
            before,
            Changes {
                queue: true,
                track: true,
                restarted: false,
            },
        );
        self.transport.set_position(restored.position);

        if !restored.dropped.is_empty() {
            let err = QueueError::InconsistentSnapshot {
                dropped: restored.dropped.clone(),
            };
            warn!("{}: {:?}", err, restored.dropped);
            self.publish_failure(&err);
        }

        restored.dropped
    }

    // ===== Queries =====

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.state().is_playing()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current_track()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.queue.current_index()
    }

    /// Track that plays when the current one ends
    pub fn peek_next(&self) -> Option<&Track> {
        self.queue.peek_next(self.queue.repeat_mode())
    }

    pub fn peek_previous(&self) -> Option<&Track> {
        self.queue.peek_previous()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.queue.repeat_mode()
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.queue.shuffle_mode()
    }

    pub fn stop_position(&self) -> Option<usize> {
        self.queue.stop_after()
    }

    pub fn position(&self) -> Duration {
        self.transport.position()
    }

    /// Interruption behind the current pause, if any
    pub fn interruption(&self) -> Option<Interruption> {
        self.transport.interruption()
    }

    pub fn revision(&self) -> u64 {
        self.queue.revision()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        self.queue.tracks()
    }

    /// Total duration from `index` to the end of the queue
    pub fn queue_duration_from(&self, index: usize) -> Duration {
        self.queue.duration_from(index)
    }

    /// "current/total", 1-based ("0/0" when empty)
    pub fn position_info(&self) -> String {
        let current = self.queue.current_index().map_or(0, |index| index + 1);
        format!("{}/{}", current, self.queue.len())
    }

    // ===== Internal =====

    fn observe(&self) -> Observed {
        Observed {
            revision: self.queue.revision(),
            track_id: self.queue.current_track().map(|track| track.id.clone()),
            state: self.transport.state(),
            repeat: self.queue.repeat_mode(),
            shuffle: self.queue.shuffle_mode(),
        }
    }

    /// Publish the signals for everything that changed since `before`
    fn commit(&mut self, before: Observed, changes: Changes) {
        let track_changed = changes.track
            || changes.restarted
            || before.track_id.as_deref() != self.queue.current_track().map(|t| t.id.as_str());
        let state_changed = before.state != self.transport.state();
        let mode_changed = before.repeat != self.queue.repeat_mode()
            || before.shuffle != self.queue.shuffle_mode();

        if !(changes.queue || track_changed || state_changed || mode_changed) {
            return;
        }

        // Transport-only transitions still get their own revision
        if self.queue.revision() == before.revision {
            self.queue.touch();
        }
        if track_changed {
            self.transport.rewind();
        }

        let revision = self.queue.revision();
        let mut events = Vec::with_capacity(4);

        if changes.queue {
            events.push(EngineEvent::QueueChanged {
                revision,
                length: self.queue.len(),
            });
        }
        if track_changed {
            events.push(EngineEvent::TrackChanged {
                revision,
                index: self.queue.current_index(),
                track: self.queue.current_track().cloned(),
                previous_track_id: before.track_id,
                restarted: changes.restarted,
            });
        }
        if state_changed {
            events.push(EngineEvent::PlayStateChanged {
                revision,
                state: self.transport.state(),
            });
        }
        if mode_changed {
            events.push(EngineEvent::ModeChanged {
                revision,
                repeat: self.queue.repeat_mode(),
                shuffle: self.queue.shuffle_mode(),
            });
        }

        self.emit(events);
    }

    /// Report a rejected command and hand the error back
    fn reject<T>(&mut self, err: QueueError) -> Result<T> {
        warn!("Command rejected: {}", err);
        self.publish_failure(&err);
        Err(err)
    }

    fn publish_failure(&mut self, err: &QueueError) {
        let failure = EngineEvent::Failure {
            revision: self.queue.revision(),
            kind: err.kind(),
            message: err.to_string(),
        };
        self.emit(vec![failure]);
    }

    fn emit(&mut self, events: Vec<EngineEvent>) {
        match &mut self.held {
            Some(held) => held.extend(events),
            None => self.observers.publish(&events),
        }
    }
}

impl Default for QueueEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
