use rtpubsub_dbo::DboError;
use thiserror::Error;

/// Errors produced by [`crate::Irt`] operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrtError {
    /// A constructor argument was zero or otherwise out of range.
    #[error("bad argument: {0}")]
    BadArg(&'static str),

    /// An instance id was outside `[0, n_instances)`.
    #[error("instance id {id} out of range (n_instances = {n_instances})")]
    BadInstance { id: usize, n_instances: usize },

    /// The workspace or the targeted instance is not in a state that
    /// permits the requested operation (not initialized, already in use by
    /// another call, mid (de)initialization, or a reentrant `update` call).
    #[error("invalid state for this operation")]
    InvalidState,

    /// A payload exceeded the configured maximum for the instance.
    #[error("payload of {got} bytes exceeds max_instance_payload {max}")]
    Overflow { max: usize, got: usize },

    /// The underlying double buffer could not supply a slot.
    #[error(transparent)]
    Dbo(#[from] DboError),
}

pub type Result<T> = std::result::Result<T, IrtError>;
