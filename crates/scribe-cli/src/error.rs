//! CLI error type and process exit codes.

use std::fmt::{self, Display, Formatter};

use scribe_io::{FailureKind, FileIoError};

/// CLI-level error distinguishing bad input, engine failures, and everything
/// else.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Engine(FileIoError),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Engine(err) => match err.kind() {
                FailureKind::NotFound => 4,
                FailureKind::AlreadyExists | FailureKind::AlreadyInFlight => 5,
                FailureKind::Canceled => 130,
                FailureKind::PermissionDenied
                | FailureKind::OsFailure
                | FailureKind::DecodeFailure => 3,
            },
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Engine(err) => format!("{}: {}", err.path().display(), err.chain()),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<FileIoError> for CliError {
    fn from(err: FileIoError) -> Self {
        match err {
            FileIoError::InvalidName { path, source } => {
                Self::Validation(format!("{}: {source}", path.display()))
            }
            other => Self::Engine(other),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}
