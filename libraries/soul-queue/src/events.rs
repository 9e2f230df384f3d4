//! Engine signals and observer fan-out
//!
//! Every successful mutation or transition produces one signal per kind of
//! change, tagged with the queue revision it left behind. Observers register
//! for the kinds they care about and receive them on their own bounded
//! channel, so a slow observer never holds up the engine: when its channel is
//! full the signal is dropped and the observer catches up from the revision
//! of the next one it sees.

use crate::error::ErrorKind;
use crate::types::{PlaybackState, RepeatMode, ShuffleMode, Track};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Signals published by the queue engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Items were added, removed, reordered or replaced
    QueueChanged {
        revision: u64,
        /// New queue length
        length: usize,
    },

    /// The current track changed (or restarted from the top)
    TrackChanged {
        revision: u64,
        /// New current index, `None` once the queue is empty
        index: Option<usize>,
        /// New current track
        track: Option<Track>,
        /// ID of the previous track (if any)
        previous_track_id: Option<String>,
        /// Same track started over ("previous" past the rewind threshold)
        restarted: bool,
    },

    /// Transport state changed
    PlayStateChanged {
        revision: u64,
        state: PlaybackState,
    },

    /// Repeat or shuffle mode changed
    ModeChanged {
        revision: u64,
        repeat: RepeatMode,
        shuffle: ShuffleMode,
    },

    /// A command was rejected or only partially applied
    Failure {
        revision: u64,
        kind: ErrorKind,
        message: String,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> SignalKind {
        match self {
            EngineEvent::QueueChanged { .. } => SignalKind::Queue,
            EngineEvent::TrackChanged { .. } => SignalKind::Track,
            EngineEvent::PlayStateChanged { .. } => SignalKind::PlayState,
            EngineEvent::ModeChanged { .. } => SignalKind::Mode,
            EngineEvent::Failure { .. } => SignalKind::Failure,
        }
    }

    /// Queue revision the signal describes
    pub fn revision(&self) -> u64 {
        match self {
            EngineEvent::QueueChanged { revision, .. }
            | EngineEvent::TrackChanged { revision, .. }
            | EngineEvent::PlayStateChanged { revision, .. }
            | EngineEvent::ModeChanged { revision, .. }
            | EngineEvent::Failure { revision, .. } => *revision,
        }
    }
}

/// Signal kinds observers can subscribe to selectively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Queue,
    Track,
    PlayState,
    Mode,
    Failure,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Queue,
        SignalKind::Track,
        SignalKind::PlayState,
        SignalKind::Mode,
        SignalKind::Failure,
    ];
}

/// Capability token identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(u64);

/// Receiving end of a registration
#[derive(Debug)]
pub struct Subscription {
    token: ObserverToken,
    receiver: Receiver<EngineEvent>,
}

impl Subscription {
    pub fn token(&self) -> ObserverToken {
        self.token
    }

    pub fn receiver(&self) -> &Receiver<EngineEvent> {
        &self.receiver
    }

    /// Next signal if one is waiting
    pub fn try_recv(&self) -> Option<EngineEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next signal
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything currently buffered
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.receiver.try_iter().collect()
    }
}

struct Observer {
    kinds: Vec<SignalKind>,
    sender: Sender<EngineEvent>,
    /// Last revision delivered per kind
    delivered: HashMap<SignalKind, u64>,
}

impl Observer {
    /// Whether `event` is new to this observer
    ///
    /// A kind is delivered at most once per revision and never for an older
    /// revision than one already seen. Failures carry the revision they were
    /// rejected at and are always delivered.
    fn wants(&self, event: &EngineEvent) -> bool {
        let kind = event.kind();
        if !self.kinds.contains(&kind) {
            return false;
        }

        kind == SignalKind::Failure
            || self
                .delivered
                .get(&kind)
                .map_or(true, |&last| event.revision() > last)
    }
}

struct RegistryInner {
    next_token: u64,
    observers: HashMap<ObserverToken, Observer>,
}

/// Registered observers and their channels
///
/// Shared between the engine (publishing) and the service handle
/// (register/unregister), so it locks internally.
pub struct ObserverRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl ObserverRegistry {
    /// Create registry buffering up to `capacity` signals per observer
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_token: 1,
                observers: HashMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Register for the given signal kinds
    pub fn subscribe(&self, kinds: &[SignalKind]) -> Subscription {
        let (sender, receiver) = bounded(self.capacity);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let token = ObserverToken(inner.next_token);
        inner.next_token += 1;
        inner.observers.insert(
            token,
            Observer {
                kinds: kinds.to_vec(),
                sender,
                delivered: HashMap::new(),
            },
        );

        debug!("Observer {:?} subscribed to {:?}", token, kinds);
        Subscription { token, receiver }
    }

    /// Drop a registration; returns `false` for an unknown token
    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.observers.remove(&token).is_some();
        if removed {
            debug!("Observer {:?} unsubscribed", token);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .len()
    }

    /// Deliver signals, in order, to every interested observer
    ///
    /// Never blocks. Observers whose receiver was dropped are removed.
    pub fn publish(&self, events: &[EngineEvent]) {
        if events.is_empty() {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut disconnected = Vec::new();

        for (token, observer) in inner.observers.iter_mut() {
            for event in events {
                if !observer.wants(event) {
                    continue;
                }

                match observer.sender.try_send(event.clone()) {
                    Ok(()) => {
                        observer.delivered.insert(event.kind(), event.revision());
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Observer {:?} is not keeping up, dropped {:?} at revision {}",
                            token,
                            event.kind(),
                            event.revision()
                        );
                        // Skipped revision still counts as seen so order holds
                        observer.delivered.insert(event.kind(), event.revision());
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        disconnected.push(*token);
                        break;
                    }
                }
            }
        }

        for token in disconnected {
            inner.observers.remove(&token);
            debug!("Observer {:?} went away, removed", token);
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observer_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_changed(revision: u64) -> EngineEvent {
        EngineEvent::QueueChanged {
            revision,
            length: 3,
        }
    }

    fn state_changed(revision: u64, state: PlaybackState) -> EngineEvent {
        EngineEvent::PlayStateChanged { revision, state }
    }

    #[test]
    fn delivers_only_subscribed_kinds() {
        let registry = ObserverRegistry::new(16);
        let queue_only = registry.subscribe(&[SignalKind::Queue]);
        let everything = registry.subscribe(&SignalKind::ALL);

        registry.publish(&[queue_changed(1), state_changed(1, PlaybackState::Playing)]);

        assert_eq!(queue_only.drain(), vec![queue_changed(1)]);
        assert_eq!(everything.drain().len(), 2);
    }

    #[test]
    fn duplicate_and_stale_revisions_are_skipped() {
        let registry = ObserverRegistry::new(16);
        let sub = registry.subscribe(&[SignalKind::Queue]);

        registry.publish(&[queue_changed(2)]);
        registry.publish(&[queue_changed(2)]);
        registry.publish(&[queue_changed(1)]);
        registry.publish(&[queue_changed(3)]);

        let revisions: Vec<u64> = sub.drain().iter().map(EngineEvent::revision).collect();
        assert_eq!(revisions, vec![2, 3]);
    }

    #[test]
    fn failures_are_never_deduplicated() {
        let registry = ObserverRegistry::new(16);
        let sub = registry.subscribe(&[SignalKind::Failure]);
        let failure = EngineEvent::Failure {
            revision: 4,
            kind: ErrorKind::InvalidIndex,
            message: "Invalid index 9 (queue length 2)".to_string(),
        };

        registry.publish(&[failure.clone()]);
        registry.publish(&[failure]);
        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let registry = ObserverRegistry::new(2);
        let sub = registry.subscribe(&[SignalKind::Queue]);

        for revision in 1..=5 {
            registry.publish(&[queue_changed(revision)]);
        }

        let revisions: Vec<u64> = sub.drain().iter().map(EngineEvent::revision).collect();
        assert_eq!(revisions, vec![1, 2]);

        registry.publish(&[queue_changed(6)]);
        assert_eq!(sub.try_recv(), Some(queue_changed(6)));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ObserverRegistry::new(4);
        let sub = registry.subscribe(&[SignalKind::Queue]);

        assert!(registry.unsubscribe(sub.token()));
        assert!(!registry.unsubscribe(sub.token()));

        registry.publish(&[queue_changed(1)]);
        assert!(sub.try_recv().is_none());
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn dropped_subscription_is_cleaned_up() {
        let registry = ObserverRegistry::new(4);
        let sub = registry.subscribe(&[SignalKind::Queue]);
        drop(sub);

        registry.publish(&[queue_changed(1)]);
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn tokens_are_unique() {
        let registry = ObserverRegistry::new(4);
        let a = registry.subscribe(&[SignalKind::Queue]);
        let b = registry.subscribe(&[SignalKind::Queue]);
        assert_ne!(a.token(), b.token());
    }
}
