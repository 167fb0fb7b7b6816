pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use jiff::Timestamp;

/// One persisted allocation row: the durable high-water mark for a tag.
///
/// In-flight dispensing progress is never persisted; only `max_id` is
/// durable. A process restart therefore re-fetches a fresh range — gaps,
/// not reuse, are the safety property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Business tag this counter belongs to.
    pub tag: String,
    /// Highest id ever handed out to any allocator instance, exclusive.
    pub max_id: i64,
    /// The store-side authoritative step for this tag.
    pub step: i64,
    /// When the row was last advanced, if known.
    pub updated_at: Option<Timestamp>,
}

/// Persistent counter collaborator of the segment allocator.
///
/// Both advance operations must be atomic read-modify-writes: two
/// concurrent advances for the same tag must observe disjoint ranges.
#[async_trait]
pub trait AllocationStore: Send + Sync + 'static {
    /// Lists every known business tag.
    async fn list_tags(&self) -> Result<Vec<String>, StoreError>;

    /// Lists every allocation row, for operator inspection.
    async fn list_records(&self) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Advances the tag's counter by its store-configured step and returns
    /// the row as persisted after the advance.
    async fn advance_and_fetch(&self, tag: &str) -> Result<AllocationRecord, StoreError>;

    /// Advances the tag's counter by the caller-supplied step and returns
    /// the row as persisted after the advance. The returned `step` is the
    /// store-side authoritative value, which may differ from what was
    /// requested.
    async fn advance_by_and_fetch(
        &self,
        tag: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError>;
}

#[async_trait]
impl<T: AllocationStore + ?Sized> AllocationStore for std::sync::Arc<T> {
    async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_tags().await
    }

    async fn list_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        (**self).list_records().await
    }

    async fn advance_and_fetch(&self, tag: &str) -> Result<AllocationRecord, StoreError> {
        (**self).advance_and_fetch(tag).await
    }

    async fn advance_by_and_fetch(
        &self,
        tag: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError> {
        (**self).advance_by_and_fetch(tag, step).await
    }
}
