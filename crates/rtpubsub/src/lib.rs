//! RT Publisher / RT Subscriber façades.
//!
//! [`Publisher`] wires one [`rtpubsub_irt::Irt`] instance per registered
//! message to a zero-copy data-handle API; [`Subscriber`] wires a fixed
//! array of input/output [`rtpubsub_mbx::Mbx`] pins to a single
//! tick-dispatched step callback. Both are thin orchestration over the
//! lower layers: all of the lock-free bookkeeping lives in
//! `rtpubsub-dbo`, `rtpubsub-mbx`, and `rtpubsub-irt`.

mod error;
mod publisher;
mod subscriber;

pub use error::{PubSubError, Result};
pub use publisher::{MessageId, Publisher, PublisherInitializer, WriteView};
pub use subscriber::{StepCallback, Subscriber, SubscriberInitializer};

pub use rtpubsub_mbx::PopMode;
