use std::io;
use std::net;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //Poll adapter
    /// The event loop could not be bound to a new adapter.
    #[error("poll: failed to bind event loop: {0}")]
    ErrAllocation(String),
    #[error("poll: event loop is already bound to an adapter")]
    ErrLoopAlreadyBound,
    #[error("poll: unknown watch")]
    ErrUnknownWatch,
    #[error("poll: unknown timeout")]
    ErrUnknownTimeout,
    #[error("poll: adapter destroyed")]
    ErrAdapterDestroyed,

    //Session
    #[error("session: client is not ready")]
    ErrSessionNotReady,
    #[error("session: client is not connected")]
    ErrSessionDisconnected,
    #[error("session: server connection failure: {0}")]
    ErrConnectionFailure(String),

    //Browser
    #[error("browser: failure: {0}")]
    ErrBrowserFailure(String),
    #[error("browser: unknown browse id")]
    ErrUnknownBrowse,
    #[error("invalid service type: {0:?}")]
    ErrInvalidServiceType(String),

    //Resolver
    /// A terminal outcome arrived for a task that was already reclaimed.
    #[error("resolver: unknown or already released task")]
    ErrUnknownTask,
    #[error("resolver: invalid instance name {0:?}")]
    ErrInvalidInstance(String),

    //DNS-SD engine
    /// ErrConnectionClosed indicates an operation executed after the engine
    /// has already been closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    //DNS message
    #[error("insufficient data for base length type")]
    ErrBaseLen,
    #[error("insufficient data for calculated length type")]
    ErrCalcLen,
    #[error("segment length too long")]
    ErrSegTooLong,
    #[error("zero length segment")]
    ErrZeroSegLen,
    #[error("name too long")]
    ErrNameTooLong,
    #[error("name is empty")]
    ErrEmptyName,
    #[error("too many pointers (>10)")]
    ErrTooManyPtr,
    #[error("invalid pointer")]
    ErrInvalidPtr,
    #[error("insufficient data for resource body length")]
    ErrResourceLen,
    #[error("resource length too long")]
    ErrResTooLong,
    #[error("character string exceeds maximum length (255)")]
    ErrStringTooLong,
    #[error("too many records in section")]
    ErrTooManyRecords,
    #[error("message has trailing escape")]
    ErrTrailingEscape,

    //Third Party Error
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("parse ip: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl Error {
    /// Returns true for I/O errors that only mean "try again later".
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(IoError(e)) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_compares_by_kind() {
        let a: Error = io::Error::new(io::ErrorKind::WouldBlock, "a").into();
        let b: Error = io::Error::new(io::ErrorKind::WouldBlock, "b").into();
        let c: Error = io::Error::new(io::ErrorKind::BrokenPipe, "c").into();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_would_block());
        assert!(!c.is_would_block());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::ErrConnectionFailure("daemon disconnected".to_owned()).to_string(),
            "session: server connection failure: daemon disconnected"
        );
        assert_eq!(Error::ErrTooManyPtr.to_string(), "too many pointers (>10)");
    }
}
