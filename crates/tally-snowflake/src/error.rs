use jiff::Timestamp;
use thiserror::Error;

/// Errors raised while constructing a snowflake allocator.
///
/// All of these are fatal: a misconfigured allocator must never become
/// usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid worker id {worker_id}; expected 0..={max_worker_id}")]
    InvalidWorkerId { worker_id: u16, max_worker_id: u16 },
    #[error("epoch is ahead of current clock time: epoch={epoch}, now={now}")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
    #[error("worker id coordination failed: {0}")]
    Coordination(String),
}
