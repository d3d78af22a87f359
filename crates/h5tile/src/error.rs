//! Error types for the high-level API.

use h5tile_format::{ErrorKind, FormatError};

/// Errors that can occur when using the high-level API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error opening the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Low-level decoding error.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// No object at the given path.
    #[error("no object at {0}")]
    NotFound(String),
    /// The object at the given path is a group or a named datatype.
    #[error("not a variable: {0}")]
    NotAVariable(String),
    /// The object at the given path is not a group.
    #[error("not a group: {0}")]
    NotAGroup(String),
}

impl Error {
    /// Which failure class this belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Format(e) => e.kind(),
            Error::NotFound(_) | Error::NotAVariable(_) | Error::NotAGroup(_) => {
                ErrorKind::Structural
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
