//! Shared surface of the tally ID dispenser.
//!
//! This crate defines the capability every allocator implements
//! ([`IdProvider`]), the dispensing error taxonomy with its stable numeric
//! codes ([`DispenseError`]), and the [`Clock`] seam the allocators use so
//! time-dependent behavior stays testable.

mod clock;
pub mod error;
mod provider;

pub use clock::{Clock, SystemClock};
pub use error::{DispenseError, IdResult};
pub use provider::IdProvider;
