//! Readiness latch and poll schedule.
//!
//! Two observers race to declare the runtime ready: the loader callback and the poll timer.
//! Whichever gets there first latches; the other becomes a no-op.

use crate::model::ReadinessState;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub(crate) struct Readiness {
    state: ReadinessState,
    latched: bool,
    poll_deadline: Option<Instant>,
    ready_tx: watch::Sender<bool>,
}

impl Readiness {
    pub fn new(ready_tx: watch::Sender<bool>) -> Self {
        Self {
            state: ReadinessState::Uninitialized,
            latched: false,
            poll_deadline: None,
            ready_tx,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn poll_deadline(&self) -> Option<Instant> {
        self.poll_deadline
    }

    /// Loader requested; first poll fires after `initial_delay`. A delay too large to
    /// represent leaves polling off.
    pub fn begin_loading(&mut self, now: Instant, initial_delay: Duration) {
        self.state = ReadinessState::Loading;
        self.poll_deadline = now.checked_add(initial_delay);
    }

    /// Advance after a poll tick. Returns true if the state moved to `Polling`.
    pub fn poll_tick(&mut self, now: Instant, interval: Duration) -> bool {
        if self.latched {
            self.poll_deadline = None;
            return false;
        }
        self.poll_deadline = now.checked_add(interval);
        if self.state == ReadinessState::Loading {
            self.state = ReadinessState::Polling;
            return true;
        }
        false
    }

    /// Set the readiness flag exactly once. Returns false if it was already set.
    pub fn latch(&mut self) -> bool {
        if self.latched {
            return false;
        }
        self.latched = true;
        self.state = ReadinessState::Ready;
        self.poll_deadline = None;
        self.ready_tx.send_replace(true);
        true
    }

    /// A reinjection is under way. The boolean signal stays up.
    pub fn begin_reinjection(&mut self) {
        if self.latched {
            self.state = ReadinessState::Loading;
        }
    }

    /// An applet instance finished loading after the latch. Returns true if the state changed.
    pub fn reaffirm(&mut self) -> bool {
        self.ready_tx.send_if_modified(|ready| {
            let changed = !*ready;
            *ready = true;
            changed
        });
        let changed = self.state != ReadinessState::Ready;
        self.state = ReadinessState::Ready;
        changed
    }

    pub fn cancel_poll(&mut self) {
        self.poll_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readiness() -> (Readiness, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Readiness::new(tx), rx)
    }

    #[test]
    fn latch_is_set_once_and_cancels_poll() {
        let (mut r, rx) = readiness();
        let now = Instant::now();
        r.begin_loading(now, Duration::from_millis(500));
        assert_eq!(r.poll_deadline(), Some(now + Duration::from_millis(500)));

        assert!(r.latch());
        assert!(!r.latch());
        assert_eq!(r.state(), ReadinessState::Ready);
        assert_eq!(r.poll_deadline(), None);
        assert!(*rx.borrow());
    }

    #[test]
    fn poll_tick_moves_loading_to_polling() {
        let (mut r, _rx) = readiness();
        let now = Instant::now();
        r.begin_loading(now, Duration::from_millis(500));
        assert!(r.poll_tick(now, Duration::from_millis(100)));
        assert_eq!(r.state(), ReadinessState::Polling);
        assert!(!r.poll_tick(now, Duration::from_millis(100)));
        assert_eq!(r.poll_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn poll_tick_after_latch_clears_deadline() {
        let (mut r, _rx) = readiness();
        let now = Instant::now();
        r.begin_loading(now, Duration::from_millis(500));
        r.latch();
        assert!(!r.poll_tick(now, Duration::from_millis(100)));
        assert_eq!(r.poll_deadline(), None);
    }

    #[test]
    fn oversized_delays_disable_polling_instead_of_panicking() {
        let (mut r, _rx) = readiness();
        let now = Instant::now();
        r.begin_loading(now, Duration::MAX);
        assert_eq!(r.state(), ReadinessState::Loading);
        assert_eq!(r.poll_deadline(), None);

        r.begin_loading(now, Duration::from_millis(500));
        r.poll_tick(now, Duration::MAX);
        assert_eq!(r.poll_deadline(), None);
    }

    #[test]
    fn reinjection_keeps_signal_up() {
        let (mut r, rx) = readiness();
        r.latch();
        r.begin_reinjection();
        assert_eq!(r.state(), ReadinessState::Loading);
        assert!(*rx.borrow());
        assert!(r.reaffirm());
        assert_eq!(r.state(), ReadinessState::Ready);
    }
}
