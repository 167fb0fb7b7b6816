use jiff::Timestamp;
use std::time::Duration;

pub trait Clock: Send + Sync + 'static {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Blocks the calling thread for (about) the given duration.
    ///
    /// The wait is bounded: unlike a catch-up loop, the clock is not
    /// guaranteed to have advanced past any particular point when this
    /// returns. Callers that need a target time must re-read `now` and
    /// decide for themselves.
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
