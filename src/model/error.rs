//! Errors surfaced by the document store and its control loop.

use std::fmt;
use std::io;

/// The kind of a control request, used for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Start,
    Continue,
    Follow,
    Load,
    Search,
    Reload,
    Close,
    Append,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Start => "start",
            RequestKind::Continue => "continue",
            RequestKind::Follow => "follow",
            RequestKind::Load => "load",
            RequestKind::Search => "search",
            RequestKind::Reload => "reload",
            RequestKind::Close => "close",
            RequestKind::Append => "append",
        };
        f.write_str(name)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// A request other than reload/close reached a closed store.
    AlreadyClosed(RequestKind),
    /// The non-seekable ledger is saturated; stop prefetching and retry later.
    OverChunkLimit,
    /// The file chunk is already resident. Callers treat this as "nothing to do".
    AlreadyLoaded(usize),
    /// The underlying source failed.
    Io(io::Error),
    /// The control loop is gone, so the request could not be delivered or answered.
    Disconnected,
    /// Configuration values rejected at construction time.
    Config(String),
}

impl StoreError {
    /// Errors that leave the caller with a usable chunk anyway.
    pub fn is_benign(&self) -> bool {
        matches!(self, StoreError::AlreadyLoaded(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyClosed(kind) => write!(f, "already closed: {kind}"),
            StoreError::OverChunkLimit => write!(f, "over chunk limit"),
            StoreError::AlreadyLoaded(chunk) => write!(f, "chunk {chunk} already loaded"),
            StoreError::Io(e) => write!(f, "source I/O error: {e}"),
            StoreError::Disconnected => write!(f, "control loop disconnected"),
            StoreError::Config(msg) => write!(f, "invalid store configuration: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        StoreError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_request() {
        let err = StoreError::AlreadyClosed(RequestKind::Load);
        assert_eq!(err.to_string(), "already closed: load");
    }

    #[test]
    fn test_only_already_loaded_is_benign() {
        assert!(StoreError::AlreadyLoaded(3).is_benign());
        assert!(!StoreError::OverChunkLimit.is_benign());
        assert!(!StoreError::AlreadyClosed(RequestKind::Search).is_benign());
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;
        let err = StoreError::from(io::Error::other("boom"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("boom"));
    }
}
