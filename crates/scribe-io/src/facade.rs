//! Application-facing surface of the file engine.
//!
//! # Design
//! - [`FileSystem`] is a cheap handle (`Clone`, `Arc` inside); there is no
//!   global instance.
//! - Loads pick a strategy from the file size: absent files fail immediately,
//!   small files are read on the calling thread, medium files are queued as
//!   one load, large files are queued through the streaming path.
//! - Requests are registered at submission, so a second request for an
//!   in-flight id fails with `AlreadyInFlight` and queued work can be canceled.
//! - Results reach callers through callbacks delivered exactly once; the
//!   awaitable forms wrap the same path with a oneshot channel.
//! - `shutdown()` drains, then cancels, then aborts, within configured budgets.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use scribe_config::{ConfigResult, EngineConfig};
use scribe_events::{EventBus, FileEvent, LifecycleState, OperationKind};
use scribe_telemetry::Metrics;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatch::{self, Command, Delivery, Job, StreamDelivery, Work};
use crate::error::{FileIoError, FileIoResult};
use crate::names::{note_file_name, note_stem, validate_file_name};
use crate::registry::OperationRegistry;
use crate::request::{FileOperationRequest, OperationId, normalize_path};
use crate::worker::{FileIoWorker, LoadedText, SaveOutcome, StreamEvent};

const MAX_NOTE_NAME_ATTEMPTS: u32 = 10_000;

/// How a load is carried out, chosen from the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The file does not exist; `NotFound` is reported immediately.
    Absent,
    /// Small file, read on the calling thread before the call returns.
    Sync,
    /// Medium file, queued as a single background load.
    Async,
    /// Large file, queued through the chunked streaming path.
    Streaming,
}

/// What `shutdown()` had to do to stop the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The drain timeout expired with operations still active.
    pub forced: bool,
    /// Operations asked to cancel after the drain timeout, sorted.
    pub canceled: Vec<OperationId>,
    /// Operations that were still running after the grace period and were
    /// aborted; always a subset of `canceled`, sorted.
    pub aborted: Vec<OperationId>,
}

struct Inner {
    worker: FileIoWorker,
    config: EngineConfig,
    commands: mpsc::Sender<Command>,
    lifecycle: watch::Sender<LifecycleState>,
    shutdown_gate: tokio::sync::Mutex<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running file engine.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<Inner>,
}

impl FileSystem {
    /// Validate `config` and start the background dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when `config` fails validation.
    pub fn start(config: EngineConfig, events: EventBus, metrics: Metrics) -> ConfigResult<Self> {
        scribe_config::validate(&config)?;
        let worker = FileIoWorker::new(&config, OperationRegistry::new(), events, metrics)?;
        let (commands, receiver) = mpsc::channel(config.queue_capacity);
        let (lifecycle, _) = watch::channel(LifecycleState::Idle);
        let dispatcher = dispatch::spawn(worker.clone(), receiver);
        let fs = Self {
            inner: Arc::new(Inner {
                worker,
                config,
                commands,
                lifecycle,
                shutdown_gate: tokio::sync::Mutex::new(()),
                dispatcher: Mutex::new(Some(dispatcher)),
            }),
        };
        fs.transition(LifecycleState::Running);
        info!(
            sync_threshold_bytes = fs.inner.config.sync_threshold_bytes,
            streaming_threshold_bytes = fs.inner.config.streaming_threshold_bytes,
            legacy_encoding = fs.inner.worker.cascade().legacy().name(),
            "file engine started"
        );
        Ok(fs)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        *self.inner.lifecycle.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.inner.lifecycle.subscribe()
    }

    /// Event bus carrying progress, completion, and lifecycle events.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        self.inner.worker.events()
    }

    /// Metrics recorded by the engine.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        self.inner.worker.metrics()
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Ids of the operations currently queued or running, sorted.
    #[must_use]
    pub fn active_operations(&self) -> Vec<OperationId> {
        self.inner.worker.registry().active_ids()
    }

    /// Size of the regular file at `path`, or `None` if there is none.
    #[must_use]
    pub fn file_size(&self, path: impl AsRef<Path>) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|meta| meta.len())
    }

    /// Load strategy that `load_async` would use for `path` right now.
    #[must_use]
    pub fn strategy_for(&self, path: impl AsRef<Path>) -> Strategy {
        let config = &self.inner.config;
        match self.file_size(path) {
            None => Strategy::Absent,
            Some(size) if size < config.sync_threshold_bytes => Strategy::Sync,
            Some(size) if size < config.streaming_threshold_bytes => Strategy::Async,
            Some(_) => Strategy::Streaming,
        }
    }

    /// Load `path`, delivering the text to `callback` exactly once.
    ///
    /// For [`Strategy::Absent`] and [`Strategy::Sync`] the callback runs
    /// before this returns; otherwise it runs on a background task. A request
    /// refused outright (engine stopped, unusable path) also reports
    /// `Absent`.
    pub fn load_async<F>(&self, path: impl AsRef<Path>, callback: F) -> Strategy
    where
        F: FnOnce(FileIoResult<LoadedText>) + Send + 'static,
    {
        let request = match self.prepare(FileOperationRequest::load(path.as_ref())) {
            Ok(request) => request,
            Err(err) => {
                callback(Err(err));
                return Strategy::Absent;
            }
        };
        let strategy = self.strategy_for(request.path());
        debug!(operation_id = %request.id(), strategy = ?strategy, "load requested");
        match strategy {
            Strategy::Absent => callback(Err(FileIoError::not_found(
                OperationKind::Load,
                request.path(),
            ))),
            Strategy::Sync => callback(self.load_blocking(&request)),
            Strategy::Async | Strategy::Streaming => {
                let work = Work::Load {
                    delivery: Delivery::new(callback),
                    streamed: strategy == Strategy::Streaming,
                };
                self.dispatch(request, work);
            }
        }
        strategy
    }

    fn load_blocking(&self, request: &FileOperationRequest) -> FileIoResult<LoadedText> {
        let worker = &self.inner.worker;
        let guard = worker.admit(request)?;
        worker.started(request);
        let started = Instant::now();
        let result = worker.read_text_blocking(request);
        worker.settle(request, started, guard, result)
    }

    /// Save `content` to `path` in the background.
    pub fn save_async<F>(&self, path: impl AsRef<Path>, content: impl Into<Arc<str>>, callback: F)
    where
        F: FnOnce(FileIoResult<SaveOutcome>) + Send + 'static,
    {
        match self.prepare(FileOperationRequest::save(path.as_ref(), content)) {
            Ok(request) => self.dispatch(request, Work::Save(Delivery::new(callback))),
            Err(err) => callback(Err(err)),
        }
    }

    /// Create an empty file at `path` in the background.
    pub fn create_empty_async<F>(&self, path: impl AsRef<Path>, callback: F)
    where
        F: FnOnce(FileIoResult<()>) + Send + 'static,
    {
        match self.prepare(FileOperationRequest::create_empty(path.as_ref())) {
            Ok(request) => self.dispatch(request, Work::Create(Delivery::new(callback))),
            Err(err) => callback(Err(err)),
        }
    }

    /// Stream `path` to `callback`.
    ///
    /// The callback receives `Ok` chunk and restart events in offset order,
    /// then exactly one terminal delivery: `Ok(StreamEvent::Finished)` or an
    /// error. A canceled stream ends with a `Canceled` error and no
    /// `Finished`.
    pub fn stream_load<F>(&self, path: impl AsRef<Path>, callback: F)
    where
        F: FnMut(FileIoResult<StreamEvent>) + Send + 'static,
    {
        let delivery = StreamDelivery::new(callback);
        match self.prepare(FileOperationRequest::stream_load(path.as_ref())) {
            Ok(request) => self.dispatch(request, Work::Stream(delivery)),
            Err(err) => {
                delivery.fail(err);
            }
        }
    }

    /// Awaitable [`FileSystem::load_async`].
    ///
    /// # Errors
    ///
    /// Any error the load reports.
    pub async fn load(&self, path: impl AsRef<Path>) -> FileIoResult<LoadedText> {
        let path = path.as_ref();
        let (respond_to, rx) = oneshot::channel();
        self.load_async(path, move |result| {
            let _ = respond_to.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(self.stopped(OperationKind::Load, path)))
    }

    /// Awaitable [`FileSystem::save_async`].
    ///
    /// # Errors
    ///
    /// Any error the save reports; the target has been restored by then.
    pub async fn save(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Arc<str>>,
    ) -> FileIoResult<SaveOutcome> {
        let path = path.as_ref();
        let (respond_to, rx) = oneshot::channel();
        self.save_async(path, content, move |result| {
            let _ = respond_to.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(self.stopped(OperationKind::Save, path)))
    }

    /// Awaitable [`FileSystem::create_empty_async`].
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the path exists, otherwise the classified error.
    pub async fn create_empty(&self, path: impl AsRef<Path>) -> FileIoResult<()> {
        let path = path.as_ref();
        let (respond_to, rx) = oneshot::channel();
        self.create_empty_async(path, move |result| {
            let _ = respond_to.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(self.stopped(OperationKind::CreateEmpty, path)))
    }

    /// Validate `name` and create `<folder>/<name>.txt`, retrying with
    /// `_1`, `_2`, ... suffixes while the name is taken.
    ///
    /// # Errors
    ///
    /// `InvalidName` when `name` breaks the file-name rules, otherwise the
    /// first error other than `AlreadyExists`.
    pub async fn create_note(&self, folder: impl AsRef<Path>, name: &str) -> FileIoResult<PathBuf> {
        let folder = folder.as_ref();
        let name = name.trim();
        validate_file_name(name).map_err(|source| FileIoError::InvalidName {
            path: folder.join(name),
            source,
        })?;
        let stem = note_stem(name);
        for attempt in 0..MAX_NOTE_NAME_ATTEMPTS {
            let candidate = folder.join(note_file_name(stem, attempt));
            match self.create_empty(&candidate).await {
                Ok(()) => {
                    return normalize_path(&candidate).map_err(|source| {
                        FileIoError::from_io(OperationKind::CreateEmpty, &candidate, source)
                    });
                }
                Err(FileIoError::AlreadyExists { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Err(FileIoError::AlreadyExists {
            operation: OperationKind::CreateEmpty,
            path: folder.join(note_file_name(stem, 0)),
            source: io::ErrorKind::AlreadyExists.into(),
        })
    }

    /// Request cancellation of the `kind` operation on `path`.
    ///
    /// Returns `false`, and changes nothing, when no such operation is queued
    /// or running.
    pub fn cancel(&self, path: impl AsRef<Path>, kind: OperationKind) -> bool {
        let Ok(path) = normalize_path(path.as_ref()) else {
            return false;
        };
        let id = OperationId::new(kind, &path);
        let flagged = self.inner.worker.registry().cancel_if_active(&id);
        debug!(operation_id = %id, flagged, "cancellation requested");
        flagged
    }

    /// Cancel both the save and the streaming load of `path`.
    pub fn cancel_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let save = self.cancel(path, OperationKind::Save);
        let stream = self.cancel(path, OperationKind::StreamLoad);
        save || stream
    }

    /// Stop the engine: refuse new work, wait up to the drain timeout, then
    /// cancel and finally abort whatever remains.
    ///
    /// Idempotent. A concurrent call waits for the first to finish; calls
    /// after the engine stopped return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let _gate = self.inner.shutdown_gate.lock().await;
        if self.lifecycle() == LifecycleState::Stopped {
            return ShutdownReport::default();
        }
        self.transition(LifecycleState::StopRequested);

        let registry = self.inner.worker.registry();
        let mut report = ShutdownReport::default();
        if !registry.all_active_finished() {
            self.transition(LifecycleState::Draining);
            let drained = timeout(self.inner.config.drain_timeout(), registry.wait_idle())
                .await
                .is_ok();
            if !drained {
                report.forced = true;
                report.canceled = registry.active_ids();
                warn!(
                    remaining = report.canceled.len(),
                    "drain timeout expired; canceling remaining file operations"
                );
                for id in &report.canceled {
                    registry.cancel_if_active(id);
                }
                let settled = timeout(self.inner.config.force_grace(), registry.wait_idle())
                    .await
                    .is_ok();
                if !settled {
                    report.aborted = self.abort_running().await;
                }
            }
        }

        self.stop_dispatcher().await;
        self.transition(LifecycleState::Stopped);
        info!(
            forced = report.forced,
            canceled = report.canceled.len(),
            aborted = report.aborted.len(),
            "file engine stopped"
        );
        report
    }

    async fn abort_running(&self) -> Vec<OperationId> {
        let (respond_to, rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Abort { respond_to })
            .await
            .is_err()
        {
            return Vec::new();
        }
        let aborted = rx.await.unwrap_or_default();
        if !aborted.is_empty() {
            warn!(aborted = aborted.len(), "aborted file operations after grace period");
        }
        aborted
    }

    async fn stop_dispatcher(&self) {
        let (respond_to, rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Stop { respond_to })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        let handle = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "file dispatcher ended abnormally");
        }
    }

    fn transition(&self, state: LifecycleState) {
        let previous = self.inner.lifecycle.send_replace(state);
        if previous != state {
            debug!(from = previous.as_str(), to = state.as_str(), "file engine lifecycle");
            self.events().publish(FileEvent::LifecycleChanged { state });
        }
    }

    fn stopped(&self, operation: OperationKind, path: &Path) -> FileIoError {
        debug!(lifecycle = self.lifecycle().as_str(), "request dropped without a result");
        FileIoError::EngineStopped {
            operation,
            path: path.to_path_buf(),
        }
    }

    /// Refuse requests once the engine has left `Running`.
    fn prepare(
        &self,
        request: FileIoResult<FileOperationRequest>,
    ) -> FileIoResult<FileOperationRequest> {
        let request = request?;
        if self.lifecycle() == LifecycleState::Running {
            Ok(request)
        } else {
            Err(self.stopped(request.kind(), request.path()))
        }
    }

    fn dispatch(&self, request: FileOperationRequest, work: Work) {
        let guard = match self.inner.worker.admit(&request) {
            Ok(guard) => guard,
            Err(err) => {
                debug!(operation_id = %request.id(), error = %err, "request rejected");
                work.fail(err);
                return;
            }
        };
        let job = Job::new(guard, request, work);
        match self.inner.commands.try_send(Command::Run(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                let commands = self.inner.commands.clone();
                tokio::spawn(async move {
                    if let Err(mpsc::error::SendError(command)) = commands.send(command).await {
                        dispatch::refuse(command);
                    }
                });
            }
            Err(TrySendError::Closed(command)) => dispatch::refuse(command),
        }
    }
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("lifecycle", &self.lifecycle())
            .field("worker", &self.inner.worker)
            .finish_non_exhaustive()
    }
}
