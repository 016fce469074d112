//! Bounded multi-event message box with per-client read cursors.
//!
//! [`Mbx`] is built on one [`rtpubsub_dbo::Dbo`] whose slots are addressed
//! directly by `sequence % max_events`, so a writer rotating through events
//! never blocks on a reader that is working through an older event at a
//! different physical slot, and vice versa.

mod error;
mod invariants;
mod mbx;

pub use error::{MbxError, Result};
pub use mbx::{Mbx, PopGuard, PopMode, WriteSession};
