//! Link error types.

use std::io;

use thiserror::Error;

use mqwire_core::ProtocolError;

/// Errors surfaced by the link layer.
///
/// Apart from [`LinkError::Closed`], any error returned from a read or
/// write has already closed the transport; the link stays poisoned until
/// a new transport is installed.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Callback error: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The transport slot is empty: either closed after an earlier error
    /// or never installed.
    #[error("Transport closed")]
    Closed,
}

impl From<mqwire_core::Error> for LinkError {
    fn from(err: mqwire_core::Error) -> Self {
        match err {
            mqwire_core::Error::Io(e) => LinkError::Io(e),
            mqwire_core::Error::Protocol(e) => LinkError::Protocol(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
