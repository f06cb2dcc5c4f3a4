//! Error-related types.

use thiserror::Error;

use crate::{chain::ChainState, frame::FramingError};

/// A fatal error that ends the session.
///
/// Both variants close the transport and resolve every pending command with
/// [`Outcome::ConnectionClosed`](crate::session::Outcome::ConnectionClosed).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport reported an error (or a write failed).
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The server sent something the frame buffer refuses to hold.
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// An argument error.
///
/// Returned by the command builders before any byte is sent.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum ArgumentError {
    #[error("`{argument}` must not be empty")]
    Empty { argument: &'static str },
    #[error("Invalid byte b'\\x{byte:02x}' at index {at} in `{argument}`")]
    InvalidByteAt {
        argument: &'static str,
        byte: u8,
        at: usize,
    },
    #[error("Request key `{key}` is reserved for untagged data")]
    ReservedKey { key: String },
}

/// Misuse of the command chain.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum ChainError {
    #[error("`execute` requires a chain that is being built, found {state:?}")]
    NotBuilding { state: ChainState },
}
