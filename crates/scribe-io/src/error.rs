//! # Design
//!
//! - Constant-message errors; operation kind and path travel as fields.
//! - Every variant classifies into a [`FailureKind`] for callers and events.
//! - Source errors are preserved rather than interpolated.

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};

use scribe_events::{FailureKind, OperationKind};
use thiserror::Error;

/// Result type for file engine operations.
pub type FileIoResult<T> = Result<T, FileIoError>;

/// Errors delivered by the file engine.
#[derive(Debug, Error)]
pub enum FileIoError {
    /// The target path does not exist.
    #[error("file not found")]
    NotFound {
        /// Operation that observed the failure.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The operating system refused access.
    #[error("permission denied")]
    PermissionDenied {
        /// Operation that observed the failure.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Any other operating system failure.
    #[error("file system failure")]
    OsFailure {
        /// Operation that observed the failure.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The bytes could not be decoded as text.
    #[error("text decode failure")]
    DecodeFailure {
        /// Operation that observed the failure.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The operation observed a cancellation request.
    #[error("operation canceled")]
    Canceled {
        /// Operation that was canceled.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
    },
    /// An operation with the same identifier is already running or queued.
    #[error("operation already in flight")]
    AlreadyInFlight {
        /// Operation that was rejected.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
    },
    /// The path already exists.
    #[error("file already exists")]
    AlreadyExists {
        /// Operation that was rejected.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The engine is shutting down or stopped and accepts no new work.
    #[error("file engine stopped")]
    EngineStopped {
        /// Operation that was rejected.
        operation: OperationKind,
        /// Path involved.
        path: PathBuf,
    },
    /// A file name failed validation before any file was touched.
    #[error("invalid file name")]
    InvalidName {
        /// Path the name would have produced.
        path: PathBuf,
        /// Validation failure.
        source: FileNameError,
    },
}

/// Reasons a file name is rejected by [`crate::validate_file_name`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileNameError {
    /// The name is empty.
    #[error("file name is empty")]
    Empty,
    /// The name contains a character reserved by common file systems.
    #[error("file name contains an illegal character")]
    IllegalCharacter {
        /// Offending character.
        character: char,
    },
    /// The stem is a reserved device name.
    #[error("file name is a reserved device name")]
    Reserved {
        /// Upper-cased stem that matched.
        stem: String,
    },
    /// The name ends with a dot or a space.
    #[error("file name ends with a dot or space")]
    TrailingDotOrSpace,
    /// The name starts with a space.
    #[error("file name starts with a space")]
    LeadingSpace,
    /// The name exceeds the character limit.
    #[error("file name is too long")]
    TooLong {
        /// Length in characters.
        length: usize,
    },
}

impl FileIoError {
    /// Classify an IO error raised while performing `operation` on `path`.
    pub fn from_io(operation: OperationKind, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                operation,
                path,
                source,
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                operation,
                path,
                source,
            },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                operation,
                path,
                source,
            },
            io::ErrorKind::InvalidData => Self::DecodeFailure {
                operation,
                path,
                source,
            },
            _ => Self::OsFailure {
                operation,
                path,
                source,
            },
        }
    }

    pub(crate) fn canceled(operation: OperationKind, path: impl Into<PathBuf>) -> Self {
        Self::Canceled {
            operation,
            path: path.into(),
        }
    }

    pub(crate) fn not_found(operation: OperationKind, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            operation,
            path: path.into(),
            source: io::ErrorKind::NotFound.into(),
        }
    }

    /// Failure classification used by callers and events.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::PermissionDenied { .. } => FailureKind::PermissionDenied,
            Self::OsFailure { .. } | Self::InvalidName { .. } => FailureKind::OsFailure,
            Self::DecodeFailure { .. } => FailureKind::DecodeFailure,
            Self::Canceled { .. } | Self::EngineStopped { .. } => FailureKind::Canceled,
            Self::AlreadyInFlight { .. } => FailureKind::AlreadyInFlight,
            Self::AlreadyExists { .. } => FailureKind::AlreadyExists,
        }
    }

    /// Operation kind the error was raised for.
    #[must_use]
    pub const fn operation_kind(&self) -> OperationKind {
        match self {
            Self::NotFound { operation, .. }
            | Self::PermissionDenied { operation, .. }
            | Self::OsFailure { operation, .. }
            | Self::DecodeFailure { operation, .. }
            | Self::Canceled { operation, .. }
            | Self::AlreadyInFlight { operation, .. }
            | Self::AlreadyExists { operation, .. }
            | Self::EngineStopped { operation, .. } => *operation,
            Self::InvalidName { .. } => OperationKind::CreateEmpty,
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::OsFailure { path, .. }
            | Self::DecodeFailure { path, .. }
            | Self::Canceled { path, .. }
            | Self::AlreadyInFlight { path, .. }
            | Self::AlreadyExists { path, .. }
            | Self::EngineStopped { path, .. }
            | Self::InvalidName { path, .. } => path,
        }
    }

    /// `true` when the failure is a cancellation (explicit or shutdown).
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self.kind(), FailureKind::Canceled)
    }

    /// Render the error and its source chain on one line.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            rendered.push_str(": ");
            rendered.push_str(&err.to_string());
            source = err.source();
        }
        rendered
    }
}
