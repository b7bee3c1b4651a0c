use std::io;

use thiserror::Error;

/// An error produced while resolving a cache lookup or a fetcher.
///
/// This error enum is the single failure surface of the crate. It is
/// delivered to callers through the failure callback of a
/// [`Fetch`](crate::Fetch) and is intended to be matched on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A value was requested under a format name that was never registered.
    #[error("format not found: `{0}`")]
    FormatNotFound(String),
    /// The key is absent in both the memory and the disk tier.
    #[error("object not found for key `{0}`")]
    ObjectNotFound(String),
    /// Bytes were present but could not be decoded into the target value type.
    #[error("invalid data")]
    InvalidData,
    /// A network body was shorter than its declared content length.
    #[error("missing data: received {received} of {expected} declared bytes")]
    MissingData {
        /// The length the server declared.
        expected: u64,
        /// The number of bytes actually received.
        received: u64,
    },
    /// A network response status outside the accepted success range.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),
    /// A filesystem error, passed through with its original description.
    #[error("io error: {0}")]
    Io(String),
    /// A transport-level error, passed through with its original description.
    #[error("download failed: {0}")]
    Download(String),
}

impl CacheError {
    /// A stable numeric code identifying the error class.
    pub fn code(&self) -> i32 {
        match self {
            CacheError::ObjectNotFound(_) => -100,
            CacheError::FormatNotFound(_) => -101,
            CacheError::InvalidData => -102,
            CacheError::MissingData { .. } => -103,
            CacheError::InvalidStatusCode(_) => -104,
            CacheError::Io(_) => -105,
            CacheError::Download(_) => -106,
        }
    }

    /// Maps an [`io::Error`] for `key`, turning `NotFound` into
    /// [`ObjectNotFound`](Self::ObjectNotFound).
    pub(crate) fn from_io_for_key(err: io::Error, key: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::ObjectNotFound(key.to_string()),
            _ => err.into(),
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        // Use the innermost source, the outer layers only repeat the URL.
        let mut error: &dyn std::error::Error = &err;
        while let Some(source) = error.source() {
            error = source;
        }
        Self::Download(error.to_string())
    }
}

/// The contents of a cache lookup, either `Ok(T)` or the error explaining
/// why no value could be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
