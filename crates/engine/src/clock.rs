//! Sleep strategy for the poll loop.
//!
//! Waiting on a still-running search is the only deliberate suspension in a
//! retrieval. It goes through [`Sleeper`] so tests can run the poll state
//! machine without wall-clock delay.

use std::time::Duration;

/// Blocks the current retrieval for a duration.
pub trait Sleeper {
    /// Sleep for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real sleeping via `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}
