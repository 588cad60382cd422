//! Latest-wins throttle
//!
//! The first value offered while no window is open passes straight through and
//! opens a window. Values offered inside the window replace each other; when
//! the window ends the most recent one is emitted and a new window opens.

use tokio::time::{Duration, Instant};

pub struct Throttle<T> {
    window: Duration,
    pending: Option<T>,
    window_end: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            window_end: None,
        }
    }

    /// Offer a value. Returns it if it may be emitted right away.
    pub fn push(&mut self, now: Instant, value: T) -> Option<T> {
        match self.window_end {
            Some(end) if now < end => {
                self.pending = Some(value);
                None
            }
            _ => {
                // Anything still held from the expired window is older
                self.pending = None;
                self.window_end = Some(now + self.window);
                Some(value)
            }
        }
    }

    /// When the held value is due, if there is one
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.window_end)
    }

    /// Close the current window, emitting the held value if any
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match self.pending.take() {
            Some(value) => {
                self.window_end = Some(now + self.window);
                Some(value)
            }
            None => {
                self.window_end = None;
                None
            }
        }
    }

    /// Take the held value without waiting for the window
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take()
    }
}
