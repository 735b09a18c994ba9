use crate::model::SizeRecord;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a size request checked against the last applied size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeDecision {
    Unchanged,
    Rejected,
    Apply(SizeRecord),
}

#[derive(Debug, Default)]
pub(crate) struct SizeSync {
    last: SizeRecord,
}

impl SizeSync {
    pub fn decide(&self, width: u32, height: u32, ready: bool) -> SizeDecision {
        let requested = SizeRecord { width, height };
        if requested == self.last {
            return SizeDecision::Unchanged;
        }
        if !ready || width == 0 || height == 0 {
            return SizeDecision::Rejected;
        }
        SizeDecision::Apply(requested)
    }

    pub fn commit(&mut self, size: SizeRecord) {
        self.last = size;
    }

    pub fn last(&self) -> SizeRecord {
        self.last
    }
}

/// Trailing-edge debounce: every signal pushes the deadline out by `delay`.
#[derive(Debug)]
pub(crate) struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// A delay too large to represent never fires.
    pub fn signal(&mut self, now: Instant) {
        self.deadline = now.checked_add(self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the pending deadline once it has elapsed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
