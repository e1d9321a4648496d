//! Executes individual file operations: load, save, create, and streaming load.
//!
//! # Design
//! - Every operation takes the [`OperationGuard`] that admitted it and polls
//!   it for cancellation at chunk boundaries only.
//! - IO errors never escape as panics; each is classified into a
//!   [`FileIoError`] with the operation kind and path attached.
//! - Saves are protected by a [`BackupRecord`] and a [`WriteRollback`].
//! - Completion is logged with size, elapsed time, and throughput, counted in
//!   [`Metrics`], and published on the [`EventBus`].

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scribe_config::{ConfigResult, EngineConfig};
use scribe_events::{EventBus, FileEvent};
use scribe_telemetry::Metrics;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::backup::{BackupRecord, WriteRollback};
use crate::chunk::ChunkPolicy;
use crate::encoding::{EncodingCascade, StreamDecoder, TextEncoding};
use crate::error::{FileIoError, FileIoResult};
use crate::registry::{OperationGuard, OperationRegistry};
use crate::request::FileOperationRequest;

/// Text produced by a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedText {
    /// Decoded text.
    pub text: String,
    /// Encoding that produced the text.
    pub encoding: TextEncoding,
    /// `true` when the legacy fallback was used.
    pub lossy: bool,
    /// Size of the file in bytes.
    pub size: u64,
}

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Encoded bytes written, including any byte-order mark.
    pub bytes_written: u64,
    /// Whether the chunked write loop was used.
    pub chunked: bool,
    /// Whether an existing file was backed up first.
    pub backed_up: bool,
}

/// Result of a completed streaming load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Bytes read in the final (successful) pass.
    pub bytes_read: u64,
    /// Chunk events emitted in the final pass.
    pub chunks: usize,
    /// Encoding of the delivered text.
    pub encoding: TextEncoding,
    /// `true` when the legacy fallback was used.
    pub lossy: bool,
    /// Whether the session restarted under the fallback encoding.
    pub restarted: bool,
}

/// Incremental output of a streaming load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Decoded text for the bytes starting at `offset`.
    Chunk {
        /// Decoded text.
        text: String,
        /// Byte offset where the chunk began.
        offset: u64,
        /// Total file size.
        total: u64,
    },
    /// The primary encoding failed; everything delivered so far must be
    /// discarded and the file is re-read from the start under `encoding`.
    Restarted {
        /// Encoding used from here on.
        encoding: TextEncoding,
        /// Total file size.
        total: u64,
    },
    /// No more chunks. `remainder` holds any text not yet delivered (for
    /// small files, the whole content).
    Finished {
        /// Text not delivered through chunks.
        remainder: String,
        /// Encoding of the delivered text.
        encoding: TextEncoding,
        /// `true` when the legacy fallback was used.
        lossy: bool,
    },
}

impl StreamEvent {
    /// `(current_offset, total_size)`, with `(-1, -1)` marking completion.
    #[must_use]
    pub fn position(&self) -> (i64, i64) {
        match self {
            Self::Chunk { offset, total, .. } => (to_i64(*offset), to_i64(*total)),
            Self::Restarted { total, .. } => (0, to_i64(*total)),
            Self::Finished { .. } => (-1, -1),
        }
    }

    /// Whether this is the completion event.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Anything an operation returns that has a byte size worth reporting.
pub(crate) trait Measured {
    fn bytes(&self) -> u64;
}

impl Measured for LoadedText {
    fn bytes(&self) -> u64 {
        self.size
    }
}

impl Measured for SaveOutcome {
    fn bytes(&self) -> u64 {
        self.bytes_written
    }
}

impl Measured for StreamSummary {
    fn bytes(&self) -> u64 {
        self.bytes_read
    }
}

impl Measured for () {
    fn bytes(&self) -> u64 {
        0
    }
}

enum StreamPass {
    Done {
        bytes: u64,
        chunks: usize,
        remainder: String,
    },
    Malformed,
}

struct WorkerInner {
    cascade: EncodingCascade,
    chunks: ChunkPolicy,
    streaming_threshold: u64,
    chunked_write_threshold: u64,
    write_chunk_bytes: usize,
    chunk_pause: Duration,
    registry: OperationRegistry,
    events: EventBus,
    metrics: Metrics,
    #[cfg(test)]
    write_fault: std::sync::OnceLock<(usize, io::ErrorKind)>,
}

/// Performs file operations on behalf of the facade.
#[derive(Clone)]
pub struct FileIoWorker {
    inner: Arc<WorkerInner>,
}

impl FileIoWorker {
    /// Build a worker from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the legacy encoding label is unusable.
    pub fn new(
        config: &EngineConfig,
        registry: OperationRegistry,
        events: EventBus,
        metrics: Metrics,
    ) -> ConfigResult<Self> {
        Ok(Self {
            inner: Arc::new(WorkerInner {
                cascade: EncodingCascade::from_config(config)?,
                chunks: ChunkPolicy::new(&config.chunks),
                streaming_threshold: config.streaming_threshold_bytes,
                chunked_write_threshold: config.chunked_write_threshold_bytes,
                write_chunk_bytes: config.write_chunk_bytes.max(1),
                chunk_pause: config.chunk_pause(),
                registry,
                events,
                metrics,
                #[cfg(test)]
                write_fault: std::sync::OnceLock::new(),
            }),
        })
    }

    /// Registry the worker reports into.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    /// Event bus the worker publishes on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Metrics the worker records into.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Encoding rules in effect.
    #[must_use]
    pub fn cascade(&self) -> &EncodingCascade {
        &self.inner.cascade
    }

    /// Admit `request` into the registry.
    ///
    /// # Errors
    ///
    /// See [`OperationRegistry::try_begin`].
    pub fn admit(&self, request: &FileOperationRequest) -> FileIoResult<OperationGuard> {
        let guard = self.inner.registry.try_begin(request)?;
        self.refresh_active_gauge();
        Ok(guard)
    }

    /// Read and decode a whole file.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PermissionDenied`, `OsFailure`, or `Canceled` when a
    /// cancellation was pending before the read began.
    pub async fn load(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
    ) -> FileIoResult<LoadedText> {
        ensure_not_canceled(guard, request)?;
        let bytes = fs::read(request.path())
            .await
            .map_err(|source| FileIoError::from_io(request.kind(), request.path(), source))?;
        Ok(self.decoded(request.path(), &bytes))
    }

    /// Blocking variant of [`FileIoWorker::load`] for small files read on
    /// the calling thread.
    ///
    /// # Errors
    ///
    /// See [`FileIoWorker::load`].
    pub fn read_text_blocking(&self, request: &FileOperationRequest) -> FileIoResult<LoadedText> {
        let bytes = std::fs::read(request.path())
            .map_err(|source| FileIoError::from_io(request.kind(), request.path(), source))?;
        Ok(self.decoded(request.path(), &bytes))
    }

    fn decoded(&self, path: &Path, bytes: &[u8]) -> LoadedText {
        let decoded = self.inner.cascade.decode(bytes);
        if decoded.lossy {
            self.note_fallback(path, decoded.encoding);
        }
        LoadedText {
            text: decoded.text,
            encoding: decoded.encoding,
            lossy: decoded.lossy,
            size: to_u64(bytes.len()),
        }
    }

    /// Load a large file through the streaming path and assemble the text.
    ///
    /// # Errors
    ///
    /// See [`FileIoWorker::stream_load`].
    pub async fn load_streamed(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
    ) -> FileIoResult<LoadedText> {
        let mut text = String::new();
        let summary = self
            .stream_load(guard, request, |event| match event {
                StreamEvent::Chunk { text: piece, .. } => text.push_str(&piece),
                StreamEvent::Restarted { .. } => text.clear(),
                StreamEvent::Finished { remainder, .. } => text.push_str(&remainder),
            })
            .await?;
        Ok(LoadedText {
            text,
            encoding: summary.encoding,
            lossy: summary.lossy,
            size: summary.bytes_read,
        })
    }

    /// Write `request`'s content, protecting any existing file with a backup.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`/`OsFailure` for IO failures and `Canceled` when a
    /// cancellation was observed. In every error case the target has been
    /// restored (or the partial new file removed) before the error returns.
    pub async fn save(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
    ) -> FileIoResult<SaveOutcome> {
        ensure_not_canceled(guard, request)?;
        let path = request.path();
        let io_error = |source| FileIoError::from_io(request.kind(), path, source);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let backup = BackupRecord::create(path).await.map_err(io_error)?;
        let rollback = WriteRollback::new(path.to_path_buf(), backup);
        let backed_up = rollback.has_backup();

        let payload = self.inner.cascade.encode(request.content().unwrap_or_default());
        let chunked = to_u64(payload.len()) > self.inner.chunked_write_threshold;
        match self.write_payload(guard, request, &payload, chunked).await {
            Ok(()) => {
                rollback.commit().await;
                Ok(SaveOutcome {
                    bytes_written: to_u64(payload.len()),
                    chunked,
                    backed_up,
                })
            }
            Err(err) => {
                let outcome = rollback.rollback().await;
                debug!(
                    operation_id = %request.id(),
                    outcome = ?outcome,
                    "save rolled back"
                );
                Err(err)
            }
        }
    }

    async fn write_payload(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
        payload: &[u8],
        chunked: bool,
    ) -> FileIoResult<()> {
        let path = request.path();
        let io_error = |source| FileIoError::from_io(request.kind(), path, source);
        let mut file = fs::File::create(path).await.map_err(io_error)?;
        let chunk_len = if chunked {
            self.inner.write_chunk_bytes
        } else {
            payload.len().max(1)
        };
        let total = to_u64(payload.len());
        let mut written = 0usize;
        for chunk in payload.chunks(chunk_len) {
            if chunked && guard.is_canceled() {
                return Err(FileIoError::canceled(request.kind(), path));
            }
            self.write_chunk(&mut file, chunk, written)
                .await
                .map_err(io_error)?;
            written += chunk.len();
            if chunked {
                self.publish_progress(request, to_u64(written), total);
                self.pause().await;
            }
        }
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        Ok(())
    }

    async fn write_chunk(
        &self,
        file: &mut fs::File,
        chunk: &[u8],
        written: usize,
    ) -> io::Result<()> {
        if let Some((keep, kind)) = self.injected_fault(written, chunk.len()) {
            file.write_all(&chunk[..keep]).await?;
            file.flush().await?;
            return Err(io::Error::new(kind, "injected write fault"));
        }
        file.write_all(chunk).await
    }

    #[cfg(test)]
    fn injected_fault(&self, written: usize, len: usize) -> Option<(usize, io::ErrorKind)> {
        let (limit, kind) = *self.inner.write_fault.get()?;
        (written + len > limit).then(|| (limit.saturating_sub(written), kind))
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self)]
    const fn injected_fault(
        &self,
        _written: usize,
        _len: usize,
    ) -> Option<(usize, io::ErrorKind)> {
        None
    }

    #[cfg(test)]
    fn fail_writes_after(&self, bytes: usize, kind: io::ErrorKind) {
        let _ = self.inner.write_fault.set((bytes, kind));
    }

    /// Create a zero-length file, creating parent directories first.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the path exists, otherwise the classified IO error.
    pub async fn create_empty(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
    ) -> FileIoResult<()> {
        ensure_not_canceled(guard, request)?;
        let path = request.path();
        let io_error = |source| FileIoError::from_io(request.kind(), path, source);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(io_error)?;
        Ok(())
    }

    /// Read a file incrementally, handing each decoded chunk to `sink`.
    ///
    /// Files below the streaming threshold are loaded whole and delivered as
    /// a single [`StreamEvent::Finished`]. Larger files produce
    /// [`StreamEvent::Chunk`]s with strictly increasing offsets, then
    /// `Finished`. If the primary encoding fails mid-stream, a
    /// [`StreamEvent::Restarted`] is emitted and the file is re-read from the
    /// start under the legacy encoding.
    ///
    /// # Errors
    ///
    /// `Canceled` when a cancellation is observed before a chunk (no
    /// `Finished` is emitted), or the classified IO error.
    pub async fn stream_load<F>(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
        mut sink: F,
    ) -> FileIoResult<StreamSummary>
    where
        F: FnMut(StreamEvent),
    {
        ensure_not_canceled(guard, request)?;
        let path = request.path();
        let total = fs::metadata(path)
            .await
            .map_err(|source| FileIoError::from_io(request.kind(), path, source))?
            .len();

        if total < self.inner.streaming_threshold {
            let loaded = self.load(guard, request).await?;
            let summary = StreamSummary {
                bytes_read: loaded.size,
                chunks: 0,
                encoding: loaded.encoding,
                lossy: loaded.lossy,
                restarted: false,
            };
            sink(StreamEvent::Finished {
                remainder: loaded.text,
                encoding: loaded.encoding,
                lossy: loaded.lossy,
            });
            return Ok(summary);
        }

        let chunk_size = self.inner.chunks.plan(total);
        let mut decoder = self.inner.cascade.primary_stream();
        let mut restarted = false;
        loop {
            match self
                .stream_pass(guard, request, &mut decoder, chunk_size, total, &mut sink)
                .await?
            {
                StreamPass::Done {
                    bytes,
                    chunks,
                    remainder,
                } => {
                    let encoding = decoder.encoding();
                    let lossy = decoder.is_lossy();
                    sink(StreamEvent::Finished {
                        remainder,
                        encoding,
                        lossy,
                    });
                    return Ok(StreamSummary {
                        bytes_read: bytes,
                        chunks,
                        encoding,
                        lossy,
                        restarted,
                    });
                }
                StreamPass::Malformed => {
                    decoder = self.inner.cascade.legacy_stream();
                    restarted = true;
                    self.note_fallback(path, decoder.encoding());
                    sink(StreamEvent::Restarted {
                        encoding: decoder.encoding(),
                        total,
                    });
                }
            }
        }
    }

    async fn stream_pass<F>(
        &self,
        guard: &OperationGuard,
        request: &FileOperationRequest,
        decoder: &mut StreamDecoder,
        chunk_size: usize,
        total: u64,
        sink: &mut F,
    ) -> FileIoResult<StreamPass>
    where
        F: FnMut(StreamEvent),
    {
        let path = request.path();
        let io_error = |source| FileIoError::from_io(request.kind(), path, source);
        let mut file = fs::File::open(path).await.map_err(io_error)?;
        let mut buffer = vec![0u8; chunk_size.max(1)];
        let mut offset = 0u64;
        let mut chunks = 0usize;
        loop {
            if guard.is_canceled() {
                return Err(FileIoError::canceled(request.kind(), path));
            }
            let read = read_full(&mut file, &mut buffer).await.map_err(io_error)?;
            if read == 0 {
                break;
            }
            let Ok(text) = decoder.feed(&buffer[..read], false) else {
                return Ok(StreamPass::Malformed);
            };
            sink(StreamEvent::Chunk {
                text,
                offset,
                total,
            });
            offset += to_u64(read);
            chunks += 1;
            self.publish_progress(request, offset, total);
            if read < buffer.len() {
                break;
            }
            self.pause().await;
        }
        let Ok(remainder) = decoder.feed(&[], true) else {
            return Ok(StreamPass::Malformed);
        };
        Ok(StreamPass::Done {
            bytes: offset,
            chunks,
            remainder,
        })
    }

    async fn pause(&self) {
        if self.inner.chunk_pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.inner.chunk_pause).await;
        }
    }

    fn publish_progress(&self, request: &FileOperationRequest, current: u64, total: u64) {
        self.inner.events.publish(FileEvent::Progress {
            operation_id: request.id().to_string(),
            current,
            total,
        });
    }

    fn note_fallback(&self, path: &Path, encoding: TextEncoding) {
        warn!(
            path = %path.display(),
            encoding = encoding.name(),
            "decoded with legacy fallback encoding; re-saving as UTF-8 is recommended"
        );
        self.inner.metrics.inc_encoding_fallback();
        self.inner.events.publish(FileEvent::EncodingFallback {
            path: path.display().to_string(),
            encoding: encoding.name().to_string(),
        });
    }

    pub(crate) fn refresh_active_gauge(&self) {
        self.inner
            .metrics
            .set_active_operations(self.inner.registry.active_count());
    }

    /// Announce that `request` started executing.
    pub(crate) fn started(&self, request: &FileOperationRequest) {
        debug!(operation_id = %request.id(), "file operation started");
        self.inner.events.publish(FileEvent::OperationStarted {
            operation_id: request.id().to_string(),
            kind: request.kind(),
            path: request.path().display().to_string(),
        });
    }

    /// Record the outcome of `request`, release its guard, and hand the
    /// result back for delivery.
    pub(crate) fn settle<T: Measured>(
        &self,
        request: &FileOperationRequest,
        started: Instant,
        guard: OperationGuard,
        result: FileIoResult<T>,
    ) -> FileIoResult<T> {
        self.report(request, started, &result);
        drop(guard);
        self.refresh_active_gauge();
        result
    }

    pub(crate) fn report<T: Measured>(
        &self,
        request: &FileOperationRequest,
        started: Instant,
        result: &FileIoResult<T>,
    ) {
        let kind = request.kind();
        let operation_id = request.id().to_string();
        let path = request.path().display().to_string();
        let elapsed = started.elapsed();
        match result {
            Ok(value) => {
                let bytes = value.bytes();
                info!(
                    operation_id = %operation_id,
                    kind = kind.as_str(),
                    bytes,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    throughput_mib_s = throughput_mib_per_sec(bytes, elapsed),
                    "file operation completed"
                );
                self.inner.metrics.inc_operation(kind.as_str(), "ok");
                self.inner.metrics.add_bytes(kind.as_str(), bytes);
                self.inner.events.publish(FileEvent::OperationCompleted {
                    operation_id,
                    kind,
                    path,
                    bytes,
                });
            }
            Err(err) if err.is_canceled() => {
                info!(operation_id = %operation_id, kind = kind.as_str(), "file operation canceled");
                self.inner.metrics.inc_operation(kind.as_str(), "canceled");
                self.inner.events.publish(FileEvent::OperationCanceled {
                    operation_id,
                    kind,
                    path,
                });
            }
            Err(err) => {
                let message = err.chain();
                warn!(
                    operation_id = %operation_id,
                    kind = kind.as_str(),
                    error_kind = err.kind().as_str(),
                    error = %message,
                    "file operation failed"
                );
                self.inner.metrics.inc_operation(kind.as_str(), err.kind().as_str());
                self.inner.events.publish(FileEvent::OperationFailed {
                    operation_id,
                    kind,
                    path,
                    error_kind: err.kind(),
                    message,
                });
            }
        }
    }
}

impl std::fmt::Debug for FileIoWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIoWorker")
            .field("cascade", &self.inner.cascade)
            .field("chunks", &self.inner.chunks)
            .field("streaming_threshold", &self.inner.streaming_threshold)
            .finish_non_exhaustive()
    }
}

fn ensure_not_canceled(guard: &OperationGuard, request: &FileOperationRequest) -> FileIoResult<()> {
    if guard.is_canceled() {
        Err(FileIoError::canceled(request.kind(), request.path()))
    } else {
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn throughput_mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}

/// Fill `buffer` unless end of file comes first; returns the bytes read.
async fn read_full<R>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::SHIFT_JIS;
    use scribe_config::{ChunkSettings, EngineConfig};
    use std::error::Error;

    type TestResult = Result<(), Box<dyn Error>>;

    fn small_config() -> EngineConfig {
        EngineConfig {
            streaming_threshold_bytes: 1024,
            sync_threshold_bytes: 256,
            chunked_write_threshold_bytes: 1024,
            write_chunk_bytes: 256,
            chunk_pause_ms: 0,
            chunks: ChunkSettings {
                min_bytes: 128,
                default_bytes: 256,
                max_bytes: 512,
                medium_from_bytes: 4096,
                large_from_bytes: 16_384,
            },
            ..EngineConfig::default()
        }
    }

    fn worker(config: &EngineConfig) -> Result<FileIoWorker, Box<dyn Error>> {
        Ok(FileIoWorker::new(
            config,
            OperationRegistry::new(),
            EventBus::new(),
            Metrics::new()?,
        )?)
    }

    #[tokio::test]
    async fn load_reports_utf8_for_ascii() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ten.txt");
        std::fs::write(&path, "0123456789")?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::load(&path)?;
        let guard = worker.admit(&request)?;

        let loaded = worker.load(&guard, &request).await?;
        assert_eq!(loaded.text, "0123456789");
        assert_eq!(loaded.encoding, TextEncoding::Utf8);
        assert!(!loaded.lossy);
        assert_eq!(loaded.size, 10);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_not_found() -> TestResult {
        let dir = tempfile::tempdir()?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::load(dir.path().join("absent.txt"))?;
        let guard = worker.admit(&request)?;
        let err = worker.load(&guard, &request).await.err().ok_or("expected error")?;
        assert_eq!(err.kind(), scribe_events::FailureKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn save_writes_bom_and_discards_backup() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("note.txt");
        let worker = worker(&small_config())?;

        let request = FileOperationRequest::save(&path, "first")?;
        let guard = worker.admit(&request)?;
        let outcome = worker.save(&guard, &request).await?;
        drop(guard);
        assert!(!outcome.backed_up);
        assert_eq!(std::fs::read(&path)?, b"\xEF\xBB\xBFfirst");

        let request = FileOperationRequest::save(&path, "second")?;
        let guard = worker.admit(&request)?;
        let outcome = worker.save(&guard, &request).await?;
        assert!(outcome.backed_up);
        assert!(!outcome.chunked);
        assert_eq!(outcome.bytes_written, 9);
        assert!(!crate::backup::backup_path_for(&path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn large_saves_use_the_chunk_loop() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("big.txt");
        let worker = worker(&small_config())?;
        let content = "x".repeat(4000);
        let request = FileOperationRequest::save(&path, content.as_str())?;
        let guard = worker.admit(&request)?;
        let mut stream = worker.events().subscribe(None);

        let outcome = worker.save(&guard, &request).await?;
        assert!(outcome.chunked);
        assert_eq!(std::fs::read_to_string(&path)?.trim_start_matches('\u{feff}'), content);

        let mut progress = Vec::new();
        while let Some(envelope) = stream.try_next() {
            if let FileEvent::Progress { current, total, .. } = envelope.event {
                progress.push((current, total));
            }
        }
        assert_eq!(progress.len(), 4003usize.div_ceil(256));
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(progress.last().map(|p| p.0), Some(4003));
        Ok(())
    }

    #[tokio::test]
    async fn mid_write_failure_restores_original_and_removes_backup() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("precious.txt");
        std::fs::write(&path, "original content")?;
        let worker = worker(&small_config())?;
        worker.fail_writes_after(600, io::ErrorKind::Other);

        let request = FileOperationRequest::save(&path, "y".repeat(4000).as_str())?;
        let guard = worker.admit(&request)?;
        let err = worker.save(&guard, &request).await.err().ok_or("expected error")?;

        assert_eq!(err.kind(), scribe_events::FailureKind::OsFailure);
        assert_eq!(std::fs::read_to_string(&path)?, "original content");
        assert!(!crate::backup::backup_path_for(&path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn permission_denied_mid_write_restores_before_reporting() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("locked.txt");
        std::fs::write(&path, "original content")?;
        let worker = worker(&small_config())?;
        worker.fail_writes_after(300, io::ErrorKind::PermissionDenied);

        let request = FileOperationRequest::save(&path, "p".repeat(4000).as_str())?;
        let guard = worker.admit(&request)?;
        let err = worker.save(&guard, &request).await.err().ok_or("expected error")?;

        assert_eq!(err.kind(), scribe_events::FailureKind::PermissionDenied);
        assert_eq!(err.operation_kind(), scribe_events::OperationKind::Save);
        assert_eq!(std::fs::read_to_string(&path)?, "original content");
        assert!(!crate::backup::backup_path_for(&path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn save_keeps_backup_left_by_failed_restore() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "garbled half write")?;
        let stale = crate::backup::backup_path_for(&path);
        std::fs::write(&stale, "precious original")?;
        let worker = worker(&small_config())?;

        let request = FileOperationRequest::save(&path, "new text")?;
        let guard = worker.admit(&request)?;
        let outcome = worker.save(&guard, &request).await?;

        assert!(outcome.backed_up);
        assert!(!stale.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("note.txt.backup.1"))?,
            "precious original"
        );
        assert_eq!(
            std::fs::read_to_string(&path)?.trim_start_matches('\u{feff}'),
            "new text"
        );
        Ok(())
    }

    #[tokio::test]
    async fn mid_write_failure_on_new_file_leaves_nothing() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fresh.txt");
        let worker = worker(&small_config())?;
        worker.fail_writes_after(10, io::ErrorKind::Other);

        let request = FileOperationRequest::save(&path, "z".repeat(100).as_str())?;
        let guard = worker.admit(&request)?;
        assert!(worker.save(&guard, &request).await.is_err());
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn canceled_save_keeps_original() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, "keep me")?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::save(&path, "w".repeat(5000).as_str())?;
        let guard = worker.admit(&request)?;
        worker.registry().request_cancel(request.id());

        let err = worker.save(&guard, &request).await.err().ok_or("expected error")?;
        assert!(err.is_canceled());
        assert_eq!(std::fs::read_to_string(&path)?, "keep me");
        Ok(())
    }

    #[tokio::test]
    async fn create_empty_refuses_existing_paths() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a").join("b.txt");
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::create_empty(&path)?;
        let guard = worker.admit(&request)?;
        worker.create_empty(&guard, &request).await?;
        assert_eq!(std::fs::metadata(&path)?.len(), 0);

        let err = worker
            .create_empty(&guard, &request)
            .await
            .err()
            .ok_or("expected error")?;
        assert_eq!(err.kind(), scribe_events::FailureKind::AlreadyExists);
        Ok(())
    }

    #[tokio::test]
    async fn stream_below_threshold_emits_single_finished() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("small.txt");
        std::fs::write(&path, "tiny")?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::stream_load(&path)?;
        let guard = worker.admit(&request)?;

        let mut events = Vec::new();
        let summary = worker
            .stream_load(&guard, &request, |event| events.push(event))
            .await?;
        assert_eq!(summary.chunks, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position(), (-1, -1));
        assert!(matches!(&events[0], StreamEvent::Finished { remainder, .. } if remainder == "tiny"));
        Ok(())
    }

    #[tokio::test]
    async fn stream_chunks_reassemble_multibyte_text() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("multi.txt");
        let content = "猫のメモ。".repeat(300);
        std::fs::write(&path, &content)?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::stream_load(&path)?;
        let guard = worker.admit(&request)?;

        let mut events = Vec::new();
        let summary = worker
            .stream_load(&guard, &request, |event| events.push(event))
            .await?;

        let offsets: Vec<i64> = events.iter().map(|e| e.position().0).collect();
        assert!(offsets[..offsets.len() - 1].windows(2).all(|w| w[0] < w[1]));
        assert_eq!(offsets.last(), Some(&-1));
        let assembled: String = events
            .into_iter()
            .map(|event| match event {
                StreamEvent::Chunk { text, .. } => text,
                StreamEvent::Finished { remainder, .. } => remainder,
                StreamEvent::Restarted { .. } => String::new(),
            })
            .collect();
        assert_eq!(assembled, content);
        assert_eq!(summary.bytes_read, to_u64(content.len()));
        assert!(!summary.restarted);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_stream_restarts_under_legacy_encoding() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("legacy.txt");
        // Valid UTF-8 for the first chunks, then Shift_JIS bytes.
        let mut bytes = "a".repeat(600).into_bytes();
        let legacy_text = "漢字".repeat(400);
        let (sjis, _, _) = SHIFT_JIS.encode(&legacy_text);
        bytes.extend_from_slice(&sjis);
        std::fs::write(&path, &bytes)?;

        let worker = worker(&small_config())?;
        let request = FileOperationRequest::stream_load(&path)?;
        let guard = worker.admit(&request)?;
        let mut events = Vec::new();
        let summary = worker
            .stream_load(&guard, &request, |event| events.push(event))
            .await?;

        assert!(summary.restarted);
        assert!(summary.lossy);
        let restart_at = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Restarted { .. }))
            .ok_or("no restart event")?;
        let assembled: String = events[restart_at + 1..]
            .iter()
            .map(|event| match event {
                StreamEvent::Chunk { text, .. } => text.clone(),
                StreamEvent::Finished { remainder, .. } => remainder.clone(),
                StreamEvent::Restarted { .. } => String::new(),
            })
            .collect();
        let (expected, _) = SHIFT_JIS.decode_without_bom_handling(&bytes);
        assert_eq!(assembled, expected);
        assert_eq!(worker.metrics().snapshot().encoding_fallbacks_total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn canceled_stream_never_finishes() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cancel.txt");
        std::fs::write(&path, "q".repeat(8192))?;
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::stream_load(&path)?;
        let guard = worker.admit(&request)?;
        let registry = worker.registry().clone();
        let id = request.id().clone();

        let mut events = Vec::new();
        let result = worker
            .stream_load(&guard, &request, |event| {
                if matches!(event, StreamEvent::Chunk { offset: 0, .. }) {
                    registry.request_cancel(&id);
                }
                events.push(event);
            })
            .await;

        assert!(result.is_err_and(|err| err.is_canceled()));
        assert_eq!(events.len(), 1);
        assert!(!events.iter().any(StreamEvent::is_finished));
        Ok(())
    }

    #[tokio::test]
    async fn settle_records_outcome_and_releases_guard() -> TestResult {
        let worker = worker(&small_config())?;
        let request = FileOperationRequest::load("/nowhere/x.txt")?;
        let guard = worker.admit(&request)?;
        assert_eq!(worker.metrics().snapshot().active_operations, 1);

        let result: FileIoResult<()> = Err(FileIoError::canceled(request.kind(), request.path()));
        let _ = worker.settle(&request, Instant::now(), guard, result);

        assert!(worker.registry().all_active_finished());
        assert_eq!(worker.metrics().snapshot().active_operations, 0);
        assert_eq!(worker.metrics().operation_count("load", "canceled"), 1);
        Ok(())
    }
}
