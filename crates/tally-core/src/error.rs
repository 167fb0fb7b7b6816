use thiserror::Error;

/// Result of a single `get` call: the dispensed id or a typed failure.
pub type IdResult = Result<i64, DispenseError>;

/// Failures a `get` call can surface to its caller.
///
/// Each variant carries a stable numeric [`code`](DispenseError::code) so
/// failures stay distinguishable in logs and metrics streams that only see
/// an integer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispenseError {
    /// The allocator has not completed its first store sync. Retryable
    /// after backoff.
    #[error("allocator is not initialized yet")]
    NotReady,
    /// The business key is absent from the reconciled tag set. Not
    /// retryable without registering the tag out of band.
    #[error("unknown key: {0}")]
    UnknownKey(String),
    /// Both segments of a buffer are exhausted and no refill succeeded in
    /// time. Retryable, but a capacity alarm condition.
    #[error("both segments are exhausted for key: {0}")]
    SegmentsExhausted(String),
    /// The clock was still behind the last issued timestamp after the
    /// tolerated wait.
    #[error("clock still behind after waiting out a {offset_ms}ms regression")]
    ClockWaitFailed { offset_ms: i64 },
    /// The generator state lock was poisoned by a panicking holder.
    #[error("generator state lock is poisoned")]
    StatePoisoned,
    /// The clock regressed by more than the tolerated drift. Alarm, do not
    /// tight-loop retry.
    #[error("clock moved backwards by {offset_ms}ms")]
    ClockMovedBackwards { offset_ms: i64 },
    /// The elapsed time since the configured epoch no longer fits in the
    /// timestamp field.
    #[error("timestamp field exhausted for the configured epoch")]
    OverTimeLimit,
}

impl DispenseError {
    /// Stable numeric code for observability.
    pub fn code(&self) -> i64 {
        match self {
            DispenseError::NotReady => -1,
            DispenseError::UnknownKey(_) => -2,
            DispenseError::SegmentsExhausted(_) => -3,
            DispenseError::ClockWaitFailed { .. } => -4,
            DispenseError::StatePoisoned => -5,
            DispenseError::ClockMovedBackwards { .. } => -6,
            DispenseError::OverTimeLimit => -7,
        }
    }
}
