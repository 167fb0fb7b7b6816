use thiserror::Error;

/// Failures surfaced by an [`AllocationStore`](crate::AllocationStore).
///
/// These never reach a dispensing caller directly: refill and
/// reconciliation catch and log them, and the only visible effect is
/// delayed range availability.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("unknown tag: {0}")]
    TagNotFound(String),
    #[error("allocation store unavailable: {0}")]
    Unavailable(String),
}
