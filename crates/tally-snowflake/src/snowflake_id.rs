use modular_bitfield::prelude::*;
use std::fmt;

#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnowflakeId {
    /// 12 bits for the per-millisecond sequence (4096 ids per ms).
    pub sequence: B12,
    /// 10 bits for the worker id (up to 1024 live allocators).
    pub worker_id: B10,
    /// 41 bits for milliseconds since a custom epoch (~69 years).
    pub timestamp: B41,
    #[skip]
    __: B1,
}

impl SnowflakeId {
    /// The packed value: `(timestamp << 22) | (worker_id << 12) | sequence`.
    ///
    /// Fields sit above the least significant bit in declaration order, so
    /// the integer is non-negative and sorts by timestamp first.
    pub fn as_i64(self) -> i64 {
        i64::from_le_bytes(self.into_bytes())
    }

    /// Decomposes a packed id back into its fields, losslessly.
    pub fn from_i64(value: i64) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }
}

impl fmt::Debug for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeId")
            .field("timestamp", &self.timestamp())
            .field("worker_id", &self.worker_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}
