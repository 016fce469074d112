use rtpubsub_irt::IrtError;
use rtpubsub_mbx::MbxError;
use thiserror::Error;

/// Errors produced by [`crate::Publisher`] and [`crate::Subscriber`]
/// operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubError {
    /// A constructor or builder argument was zero or otherwise out of range.
    #[error("bad argument: {0}")]
    BadArg(&'static str),

    /// A message, input, or output id was outside the configured range.
    #[error("pin id {id} out of range (count = {count})")]
    BadPin { id: usize, count: usize },

    /// The facade (or the IRT/MBX beneath it) is not in a state that
    /// permits the requested operation.
    #[error("invalid state for this operation")]
    InvalidState,

    /// A payload exceeded the configured maximum for the pin or message.
    #[error("payload of {got} bytes exceeds configured maximum {max}")]
    Overflow { max: usize, got: usize },

    /// The underlying timer array reported an error.
    #[error(transparent)]
    Irt(#[from] IrtError),

    /// The underlying message box reported an error.
    #[error(transparent)]
    Mbx(#[from] MbxError),
}

pub type Result<T> = std::result::Result<T, PubSubError>;
