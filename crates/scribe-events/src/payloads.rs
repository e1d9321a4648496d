//! Event payload types carried between the file engine and its observers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Kind of file operation an event or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Whole-file read and decode.
    Load,
    /// Backed-up write of new content.
    Save,
    /// Creation of a zero-length file.
    CreateEmpty,
    /// Chunked read of a large file.
    StreamLoad,
}

impl OperationKind {
    /// Stable prefix used when deriving operation identifiers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Save => "save",
            Self::CreateEmpty => "create",
            Self::StreamLoad => "stream",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy shared by results and failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The target path does not exist.
    NotFound,
    /// Access to the path was refused by the operating system.
    PermissionDenied,
    /// Any other operating system failure (disk full, I/O error, ...).
    OsFailure,
    /// The bytes could not be turned into text.
    DecodeFailure,
    /// The operation was canceled before it completed.
    Canceled,
    /// An operation with the same identifier is already running.
    AlreadyInFlight,
    /// The path already exists and the operation refuses to overwrite it.
    AlreadyExists,
}

/// How the surrounding application should surface a failure to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Interrupt the user with a blocking notification.
    Blocking,
    /// Show a non-blocking hint.
    Advisory,
    /// Say nothing.
    Silent,
}

impl FailureKind {
    /// Machine-friendly label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::OsFailure => "os_failure",
            Self::DecodeFailure => "decode_failure",
            Self::Canceled => "canceled",
            Self::AlreadyInFlight => "already_in_flight",
            Self::AlreadyExists => "already_exists",
        }
    }

    /// Presentation policy for this failure kind.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::NotFound | Self::PermissionDenied | Self::OsFailure | Self::DecodeFailure => {
                Severity::Blocking
            }
            Self::AlreadyInFlight | Self::AlreadyExists => Severity::Advisory,
            Self::Canceled => Severity::Silent,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the background file engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, dispatcher not yet running.
    Idle,
    /// Accepting and executing work.
    Running,
    /// Shutdown requested; no new work is accepted.
    StopRequested,
    /// Waiting for in-flight operations to finish.
    Draining,
    /// Dispatcher has exited.
    Stopped,
}

impl LifecycleState {
    /// Machine-friendly label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Typed events surfaced by the file engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileEvent {
    /// An operation was admitted and started executing.
    OperationStarted {
        /// Derived operation identifier (`kind:path`).
        operation_id: String,
        /// Operation kind.
        kind: OperationKind,
        /// Target path.
        path: String,
    },
    /// A chunk boundary was reached during a chunked read or write.
    Progress {
        /// Derived operation identifier.
        operation_id: String,
        /// Bytes processed so far.
        current: u64,
        /// Total bytes expected.
        total: u64,
    },
    /// An operation finished successfully.
    OperationCompleted {
        /// Derived operation identifier.
        operation_id: String,
        /// Operation kind.
        kind: OperationKind,
        /// Target path.
        path: String,
        /// Bytes read or written.
        bytes: u64,
    },
    /// An operation failed.
    OperationFailed {
        /// Derived operation identifier.
        operation_id: String,
        /// Operation kind.
        kind: OperationKind,
        /// Target path.
        path: String,
        /// Failure classification.
        error_kind: FailureKind,
        /// Rendered error chain.
        message: String,
    },
    /// An operation observed a cancellation request and stopped.
    OperationCanceled {
        /// Derived operation identifier.
        operation_id: String,
        /// Operation kind.
        kind: OperationKind,
        /// Target path.
        path: String,
    },
    /// A file was read with the legacy fallback encoding; re-saving as UTF-8 is recommended.
    EncodingFallback {
        /// Path of the affected file.
        path: String,
        /// Name of the fallback encoding that produced the text.
        encoding: String,
    },
    /// The engine moved to a new lifecycle state.
    LifecycleChanged {
        /// New lifecycle state.
        state: LifecycleState,
    },
}

impl FileEvent {
    /// Machine-friendly discriminator for subscribers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OperationStarted { .. } => "operation_started",
            Self::Progress { .. } => "progress",
            Self::OperationCompleted { .. } => "operation_completed",
            Self::OperationFailed { .. } => "operation_failed",
            Self::OperationCanceled { .. } => "operation_canceled",
            Self::EncodingFallback { .. } => "encoding_fallback",
            Self::LifecycleChanged { .. } => "lifecycle_changed",
        }
    }
}

/// Metadata wrapper around events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: FileEvent,
}
