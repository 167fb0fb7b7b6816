use crate::error::IdResult;
use async_trait::async_trait;

/// The public capability of an ID allocator.
///
/// Implementations are interchangeable behind this trait: a deployment
/// configures either the segment allocator or the snowflake allocator and
/// callers never see the difference.
#[async_trait]
pub trait IdProvider: Send + Sync + 'static {
    /// Bootstraps the allocator.
    ///
    /// Returns `true` once `get` may be called. Calling `init` again on an
    /// already-initialized allocator is harmless.
    async fn init(&self) -> bool;

    /// Dispenses the next unique id for the given business key.
    ///
    /// Allocators that do not partition by key (snowflake) ignore `key`.
    async fn get(&self, key: &str) -> IdResult;
}
