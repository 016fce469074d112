//! Lock-free, single-writer/multi-reader double-buffer slot array.
//!
//! [`Dbo`] is the base register abstraction of the real-time publish/
//! subscribe data plane: a fixed array of slots, each backed by two banks,
//! where one writer commits new data by flipping a slot's bank selector and
//! any number of readers concurrently hold the previously committed bank
//! without ever blocking the writer.

mod backoff;
mod dbo;
mod error;
mod invariants;

pub use dbo::{Dbo, ReadGuard, WriteGuard};
pub use error::{DboError, Result};
