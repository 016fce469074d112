use rtpubsub_dbo::DboError;
use thiserror::Error;

/// Errors produced by [`crate::Mbx`] operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbxError {
    /// A constructor argument was zero or otherwise out of range.
    #[error("bad argument: {0}")]
    BadArg(&'static str),

    /// A client id was outside `[0, max_clients)`.
    #[error("client id {id} out of range (max_clients = {max_clients})")]
    BadClient { id: usize, max_clients: usize },

    /// A payload exceeded the configured maximum.
    #[error("payload of {got} bytes exceeds max_payload {max_payload}")]
    Overflow { max_payload: usize, got: usize },

    /// No event is available for the client under the requested read mode.
    #[error("no event available")]
    Empty,

    /// The underlying double buffer could not supply a slot, typically
    /// because a reader is still on the physical slot a push would reuse.
    #[error(transparent)]
    Dbo(#[from] DboError),
}

pub type Result<T> = std::result::Result<T, MbxError>;
