//! Error type shared by every stage of matrix construction and multiplication.
//!
//! Nothing here is retried. A matrix that failed to build, or an exchange that
//! failed part way, leaves no usable state behind.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpmvError>;

#[derive(Debug, Error)]
pub enum SpmvError {
    /// Input file missing or unreadable.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row or entry counts in the input stream disagree with each other.
    #[error("participant {participant}: malformed input: {reason}")]
    MalformedInput { participant: usize, reason: String },

    /// A configured ceiling on the communication plan was exceeded.
    #[error(
        "participant {participant}: {resource} count {count} exceeds the configured limit of {limit}"
    )]
    ResourceExhaustion {
        participant: usize,
        resource: &'static str,
        count: usize,
        limit: usize,
    },

    /// An expected message from a peer was absent or malformed.
    #[error("participant {participant}: communication with {peer} failed: {reason}")]
    Communication {
        participant: usize,
        peer: usize,
        reason: String,
    },

    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument { arg: &'static str, reason: String },

    /// Configuration or report (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpmvError {
    pub(crate) fn malformed(participant: usize, reason: impl Into<String>) -> Self {
        SpmvError::MalformedInput {
            participant,
            reason: reason.into(),
        }
    }

    pub(crate) fn communication(participant: usize, peer: usize, reason: impl Into<String>) -> Self {
        SpmvError::Communication {
            participant,
            peer,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        SpmvError::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }
}
