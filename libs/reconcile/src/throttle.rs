//! Trailing-edge throttle with an explicit in-flight gate.

use std::time::{Duration, Instant};

/// Coalesces triggers into at most one action per window.
///
/// The first [`mark`](Self::mark) arms a window. Further marks inside the
/// window only keep the throttle dirty. When the window elapses,
/// [`poll`](Self::poll) reports whether an action is due: it is due only if
/// the throttle is still dirty at that moment. While an action is in flight
/// no window is armed; marks made meanwhile arm a fresh window when the
/// caller reports [`complete`](Self::complete).
#[derive(Debug, Clone)]
pub struct TrailingThrottle {
    window: Duration,
    dirty: bool,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl TrailingThrottle {
    /// Create an idle throttle.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            dirty: false,
            deadline: None,
            in_flight: false,
        }
    }

    /// Record that the condition requiring action holds.
    pub fn mark(&mut self, now: Instant) {
        self.dirty = true;
        if self.deadline.is_none() && !self.in_flight {
            self.deadline = Some(now + self.window);
        }
    }

    /// Record that the condition no longer holds.
    ///
    /// An armed window keeps running; it simply fires nothing unless marked
    /// again before it ends.
    pub fn clear(&mut self) {
        self.dirty = false;
    }

    /// When the armed window ends, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check the window at `now`.
    ///
    /// Returns true when the window has elapsed while dirty; the caller must
    /// then perform the action and report [`complete`](Self::complete).
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                if self.dirty {
                    self.dirty = false;
                    self.in_flight = true;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Report that the in-flight action finished, successfully or not.
    pub fn complete(&mut self, now: Instant) {
        self.in_flight = false;
        if self.dirty && self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    /// Drop any armed window and pending mark.
    pub fn reset(&mut self) {
        self.dirty = false;
        self.deadline = None;
    }

    /// Returns true if a mark is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true while an action is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}
