#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Asynchronous, cancellable text-file engine.
//!
//! Layout: `facade.rs` (the [`FileSystem`] handle applications use),
//! `worker.rs` (per-operation execution), `registry.rs` (in-flight and
//! cancellation bookkeeping), `encoding.rs` (decode cascade), `chunk.rs`
//! (streaming chunk sizes), `backup.rs` (save protection), `names.rs`
//! (file-name rules), `request.rs` and `error.rs` (shared types). The
//! dispatcher that owns background tasks is private.

pub mod backup;
pub mod chunk;
mod dispatch;
pub mod encoding;
pub mod error;
pub mod facade;
pub mod names;
pub mod registry;
pub mod request;
pub mod worker;

pub use backup::{BackupRecord, RollbackOutcome, WriteRollback, backup_path_for};
pub use chunk::ChunkPolicy;
pub use encoding::{Decoded, EncodingCascade, Malformed, StreamDecoder, TextEncoding, UTF8_BOM};
pub use error::{FileIoError, FileIoResult, FileNameError};
pub use facade::{FileSystem, ShutdownReport, Strategy};
pub use names::validate_file_name;
pub use registry::{Admission, OperationGuard, OperationRegistry};
pub use request::{FileOperationRequest, OperationId, normalize_path};
pub use scribe_events::{FailureKind, LifecycleState, OperationKind};
pub use worker::{FileIoWorker, LoadedText, SaveOutcome, StreamEvent, StreamSummary};
