//! Segment-based ID allocation.
//!
//! Each business key owns a double-buffered pair of id ranges backed by a
//! persistent counter ([`AllocationStore`]). The fast path dispenses from
//! the current range with an atomic increment; a background task prefetches
//! the other range before the current one runs dry, sizing its request to
//! the observed consumption velocity.

pub mod allocator;
pub mod error;
pub mod segment;
pub mod settings;
pub mod store;

pub use allocator::SegmentAllocator;
pub use error::StoreError;
pub use segment::{Segment, SegmentBuffer};
pub use settings::SegmentSettings;
pub use store::{memory::MemoryAllocationStore, AllocationRecord, AllocationStore};
