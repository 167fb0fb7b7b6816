//! Snowflake-style ID allocation.
//!
//! Packs a 41-bit millisecond timestamp, a 10-bit worker id and a 12-bit
//! per-millisecond sequence into one 64-bit id. Generation is purely local:
//! no I/O after construction, only a clock read and a mutex-guarded cursor
//! update per id. The worker id comes once, at construction, from an
//! external coordination service ([`WorkerIdProvider`]).

pub mod error;
mod snowflake;
mod snowflake_id;
mod worker;

pub use error::Error;
pub use snowflake::{Snowflake, SnowflakeSettings};
pub use snowflake_id::SnowflakeId;
pub use worker::{NodeIdentity, StaticWorkerId, WorkerIdProvider};
