//! Error types for message assembly and streaming.

use std::io;

use crate::email::Section;

/// Result type alias for mimestream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message assembly and streaming errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from a file source or an output sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller supplied an output region of zero length.
    #[error("Output buffer should be greater than 0")]
    EmptyBuffer,

    /// A file cursor pointed past the end of its list.
    #[error("{section} index {index} out of range (len {len})")]
    FileIndexOutOfRange {
        /// Which file list was indexed.
        section: Section,
        /// Offending index.
        index: usize,
        /// Length of the list.
        len: usize,
    },

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),
}

impl Error {
    /// Returns true if this error is a caller usage error rather than a
    /// failure of an underlying source or sink.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::EmptyBuffer | Self::FileIndexOutOfRange { .. } | Self::InvalidContentType(_)
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::EmptyBuffer => Self::new(io::ErrorKind::InvalidInput, Error::EmptyBuffer),
            other => Self::other(other),
        }
    }
}
