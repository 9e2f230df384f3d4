//! Transport state of the playback state machine
//!
//! Holds the state, the position in the current track and whether the last
//! pause came from outside. Transition rules live in the engine; this type only
//! reports whether a requested change actually changed anything.

use crate::types::{Interruption, PlaybackState};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    state: PlaybackState,
    position: Duration,
    interrupted: Option<Interruption>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            position: Duration::ZERO,
            interrupted: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    /// Interruption that caused the current pause, if any
    pub fn interruption(&self) -> Option<Interruption> {
        self.interrupted
    }

    /// Move to `state`, returning `true` if it differs from the old one
    ///
    /// Any user-driven transition forgets a pending interruption.
    pub fn set_state(&mut self, state: PlaybackState) -> bool {
        if state != PlaybackState::Paused {
            self.interrupted = None;
        }

        if self.state == state {
            return false;
        }

        self.state = state;
        if matches!(state, PlaybackState::Idle) {
            self.position = Duration::ZERO;
        }
        true
    }

    /// Pause because of an external interruption
    pub fn interrupt(&mut self, cause: Interruption) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        self.state = PlaybackState::Paused;
        self.interrupted = Some(cause);
        true
    }

    /// Forget the interruption without resuming
    pub fn clear_interruption(&mut self) -> bool {
        self.interrupted.take().is_some()
    }

    pub fn set_position(&mut self, position: Duration) {
        self.position = position;
    }

    /// Back to the start of the track
    pub fn rewind(&mut self) {
        self.position = Duration::ZERO;
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let transport = Transport::new();
        assert_eq!(transport.state(), PlaybackState::Idle);
        assert_eq!(transport.position(), Duration::ZERO);
        assert_eq!(transport.interruption(), None);
    }

    #[test]
    fn set_state_reports_changes() {
        let mut transport = Transport::new();
        assert!(transport.set_state(PlaybackState::Ready));
        assert!(!transport.set_state(PlaybackState::Ready));
        assert!(transport.set_state(PlaybackState::Playing));
    }

    #[test]
    fn interrupt_only_pauses_when_playing() {
        let mut transport = Transport::new();
        transport.set_state(PlaybackState::Ready);
        assert!(!transport.interrupt(Interruption::FocusLost));

        transport.set_state(PlaybackState::Playing);
        assert!(transport.interrupt(Interruption::DeviceDisconnected));
        assert_eq!(transport.state(), PlaybackState::Paused);
        assert_eq!(transport.interruption(), Some(Interruption::DeviceDisconnected));
    }

    #[test]
    fn resuming_forgets_interruption() {
        let mut transport = Transport::new();
        transport.set_state(PlaybackState::Playing);
        transport.interrupt(Interruption::FocusLost);

        transport.set_state(PlaybackState::Playing);
        assert_eq!(transport.interruption(), None);
    }

    #[test]
    fn idle_resets_position() {
        let mut transport = Transport::new();
        transport.set_state(PlaybackState::Playing);
        transport.set_position(Duration::from_secs(30));
        transport.set_state(PlaybackState::Idle);
        assert_eq!(transport.position(), Duration::ZERO);
    }
}
