//! Error types for ivf-core

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Out of bounds: {what} requires {requested}, limit is {limit}")]
    OutOfBounds {
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    #[error("Allocation of {bytes} bytes failed: {reason}")]
    Allocation { bytes: usize, reason: String },

    #[error("Malformed list data: {0}")]
    Format(String),

    #[error("Incompatible format: expected {expected}, found {found}")]
    Version { expected: String, found: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn out_of_bounds(what: &'static str, requested: usize, limit: usize) -> Self {
        Error::OutOfBounds {
            what,
            requested,
            limit,
        }
    }

    /// Map a read failure, treating a short read as a truncated record.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Format(format!("truncated record: {err}"))
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
