//! Store error types.
//!
//! Every backend translates its native errors into [`StoreError`] at the
//! adapter boundary, so callers can test outcomes the same way regardless of
//! which backend served the call.

use std::io;
use thiserror::Error;

/// Boxed collaborator error, surfaced unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File or directory not found.
    #[error("{0}: no such file or directory")]
    NotExist(String),

    /// Path already exists.
    #[error("{0}: file exists")]
    AlreadyExists(String),

    /// Expected a file.
    #[error("{0}: is a directory")]
    IsADirectory(String),

    /// Expected a directory.
    #[error("{0}: not a directory")]
    NotADirectory(String),

    /// Directory not empty.
    #[error("{0}: directory not empty")]
    DirectoryNotEmpty(String),

    /// Could not reach or authenticate with the backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Permission denied.
    #[error("{0}: permission denied")]
    PermissionDenied(String),

    /// Unrecognized scheme or option.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed connection string, option value, or seek position.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Handle used after close.
    #[error("{0}: handle already closed")]
    Closed(String),

    /// Scheme registered twice.
    #[error("scheme {0:?} is already registered")]
    DuplicateScheme(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected error from a backend client library.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Backend-independent classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotExist,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    ConnectionFailed,
    PermissionDenied,
    Unsupported,
    InvalidInput,
    Closed,
    Other,
}

impl StoreError {
    pub fn not_exist(path: impl Into<String>) -> Self {
        Self::NotExist(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Wrap a client-library error that has no taxonomy counterpart.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist(_) => ErrorKind::NotExist,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::IsADirectory(_) => ErrorKind::IsADirectory,
            Self::NotADirectory(_) => ErrorKind::NotADirectory,
            Self::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            Self::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Unsupported(_) | Self::DuplicateScheme(_) => ErrorKind::Unsupported,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Closed(_) => ErrorKind::Closed,
            Self::Io(_) | Self::Backend(_) => ErrorKind::Other,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Translate a native I/O error for `path` into the shared taxonomy.
    ///
    /// Kinds without a taxonomy counterpart stay wrapped in [`StoreError::Io`].
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotExist(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io(err),
        }
    }
}

/// Convert StoreError to std::io::Error for compatibility.
impl From<StoreError> for io::Error {
    fn from(e: StoreError) -> Self {
        let kind = match e.kind() {
            ErrorKind::NotExist => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::DirectoryNotEmpty => io::ErrorKind::DirectoryNotEmpty,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::ConnectionFailed => io::ErrorKind::ConnectionRefused,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
            ErrorKind::Closed => io::ErrorKind::BrokenPipe,
            ErrorKind::Other => match e {
                StoreError::Io(inner) => return inner,
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, e)
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;
