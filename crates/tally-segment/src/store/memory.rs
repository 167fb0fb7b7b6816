use crate::error::StoreError;
use crate::store::{AllocationRecord, AllocationStore};
use async_trait::async_trait;
use dashmap::DashMap;
use jiff::Timestamp;

#[derive(Debug, Clone)]
struct Row {
    max_id: i64,
    step: i64,
    updated_at: Option<Timestamp>,
}

/// In-memory implementation of [`AllocationStore`] using DashMap.
///
/// Atomicity of the advance operations comes from DashMap's per-entry
/// locking: `get_mut` holds the shard lock for the row while the counter is
/// bumped, so concurrent advances for one tag observe disjoint ranges.
///
/// Serves as the fake store in tests and as a usable store for
/// single-process deployments that don't need durability.
#[derive(Debug, Default)]
pub struct MemoryAllocationStore {
    rows: DashMap<String, Row>,
}

impl MemoryAllocationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tag with the given configured step, starting at zero.
    ///
    /// Replaces any existing row for the tag.
    pub fn insert_tag(&self, tag: impl Into<String>, step: i64) {
        self.rows.insert(
            tag.into(),
            Row {
                max_id: 0,
                step,
                updated_at: None,
            },
        );
    }

    /// Removes a tag. Returns `true` if the row existed.
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.rows.remove(tag).is_some()
    }
}

#[async_trait]
impl AllocationStore for MemoryAllocationStore {
    async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rows.iter().map(|e| e.key().clone()).collect())
    }

    async fn list_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        Ok(self
            .rows
            .iter()
            .map(|e| AllocationRecord {
                tag: e.key().clone(),
                max_id: e.value().max_id,
                step: e.value().step,
                updated_at: e.value().updated_at,
            })
            .collect())
    }

    async fn advance_and_fetch(&self, tag: &str) -> Result<AllocationRecord, StoreError> {
        let mut row = self
            .rows
            .get_mut(tag)
            .ok_or_else(|| StoreError::TagNotFound(tag.to_owned()))?;
        let step = row.step;
        row.max_id += step;
        row.updated_at = Some(Timestamp::now());
        Ok(AllocationRecord {
            tag: tag.to_owned(),
            max_id: row.max_id,
            step: row.step,
            updated_at: row.updated_at,
        })
    }

    async fn advance_by_and_fetch(
        &self,
        tag: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError> {
        let mut row = self
            .rows
            .get_mut(tag)
            .ok_or_else(|| StoreError::TagNotFound(tag.to_owned()))?;
        row.max_id += step;
        row.updated_at = Some(Timestamp::now());
        // The row's own step column is authoritative and is what callers
        // use as their minimum step; a custom advance does not rewrite it.
        Ok(AllocationRecord {
            tag: tag.to_owned(),
            max_id: row.max_id,
            step: row.step,
            updated_at: row.updated_at,
        })
    }
}
