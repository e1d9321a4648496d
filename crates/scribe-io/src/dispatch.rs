#![allow(clippy::redundant_pub_crate)]

//! Background dispatcher: drains the request queue and owns the operation tasks.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{FileIoError, FileIoResult};
use crate::registry::OperationGuard;
use crate::request::{FileOperationRequest, OperationId};
use crate::worker::{FileIoWorker, LoadedText, SaveOutcome, StreamEvent};

type Callback<T> = Box<dyn FnOnce(FileIoResult<T>) + Send>;
type StreamCallback = Box<dyn FnMut(FileIoResult<StreamEvent>) + Send>;
/// Delivers a terminal error; returns whether the caller was still waiting.
type Terminator = Box<dyn FnOnce(FileIoError) -> bool + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take-once completion cell; whoever takes the callback first delivers.
pub(crate) struct Delivery<T> {
    cell: Arc<Mutex<Option<Callback<T>>>>,
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: 'static> Delivery<T> {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: FnOnce(FileIoResult<T>) + Send + 'static,
    {
        Self {
            cell: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    pub(crate) fn deliver(&self, result: FileIoResult<T>) -> bool {
        let taken = lock(&self.cell).take();
        taken.is_some_and(|callback| {
            callback(result);
            true
        })
    }

    fn terminator(&self) -> Terminator {
        let delivery = self.clone();
        Box::new(move |err| delivery.deliver(Err(err)))
    }
}

/// Stream callback cell: chunks are delivered in place, the terminal event
/// (finished or error) takes the callback out.
#[derive(Clone)]
pub(crate) struct StreamDelivery {
    cell: Arc<Mutex<Option<StreamCallback>>>,
}

impl StreamDelivery {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: FnMut(FileIoResult<StreamEvent>) + Send + 'static,
    {
        Self {
            cell: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    fn emit(&self, event: StreamEvent) {
        if event.is_finished() {
            let taken = lock(&self.cell).take();
            if let Some(mut callback) = taken {
                callback(Ok(event));
            }
        } else if let Some(callback) = lock(&self.cell).as_mut() {
            callback(Ok(event));
        }
    }

    pub(crate) fn fail(&self, err: FileIoError) -> bool {
        let taken = lock(&self.cell).take();
        taken.is_some_and(|mut callback| {
            callback(Err(err));
            true
        })
    }

    fn terminator(&self) -> Terminator {
        let delivery = self.clone();
        Box::new(move |err| delivery.fail(err))
    }
}

/// What a queued job does and where its result goes.
pub(crate) enum Work {
    Load {
        delivery: Delivery<LoadedText>,
        streamed: bool,
    },
    Save(Delivery<SaveOutcome>),
    Create(Delivery<()>),
    Stream(StreamDelivery),
}

impl Work {
    /// Deliver `err` without running anything.
    pub(crate) fn fail(self, err: FileIoError) {
        match self {
            Self::Load { delivery, .. } => {
                delivery.deliver(Err(err));
            }
            Self::Save(delivery) => {
                delivery.deliver(Err(err));
            }
            Self::Create(delivery) => {
                delivery.deliver(Err(err));
            }
            Self::Stream(delivery) => {
                delivery.fail(err);
            }
        }
    }

    fn terminator(&self) -> Terminator {
        match self {
            Self::Load { delivery, .. } => delivery.terminator(),
            Self::Save(delivery) => delivery.terminator(),
            Self::Create(delivery) => delivery.terminator(),
            Self::Stream(delivery) => delivery.terminator(),
        }
    }
}

/// An admitted request waiting for, or running on, the dispatcher.
pub(crate) struct Job {
    guard: OperationGuard,
    request: FileOperationRequest,
    work: Work,
}

impl Job {
    pub(crate) const fn new(guard: OperationGuard, request: FileOperationRequest, work: Work) -> Self {
        Self {
            guard,
            request,
            work,
        }
    }

    /// Release the registration and deliver `err`.
    pub(crate) fn reject(self, err: FileIoError) {
        let Self { guard, work, .. } = self;
        drop(guard);
        work.fail(err);
    }

    pub(crate) const fn request(&self) -> &FileOperationRequest {
        &self.request
    }

    fn pending(&self) -> Pending {
        Pending {
            request: self.request.clone(),
            queued_at: Instant::now(),
            terminate: self.work.terminator(),
        }
    }

    async fn run(self, worker: FileIoWorker) {
        let Self {
            guard,
            request,
            work,
        } = self;
        worker.started(&request);
        let started = Instant::now();
        match work {
            Work::Load { delivery, streamed } => {
                let result = if streamed {
                    worker.load_streamed(&guard, &request).await
                } else {
                    worker.load(&guard, &request).await
                };
                delivery.deliver(worker.settle(&request, started, guard, result));
            }
            Work::Save(delivery) => {
                let result = worker.save(&guard, &request).await;
                delivery.deliver(worker.settle(&request, started, guard, result));
            }
            Work::Create(delivery) => {
                let result = worker.create_empty(&guard, &request).await;
                delivery.deliver(worker.settle(&request, started, guard, result));
            }
            Work::Stream(delivery) => {
                let sink = delivery.clone();
                let result = worker
                    .stream_load(&guard, &request, move |event| sink.emit(event))
                    .await;
                if let Err(err) = worker.settle(&request, started, guard, result) {
                    delivery.fail(err);
                }
            }
        }
    }
}

struct Pending {
    request: FileOperationRequest,
    queued_at: Instant,
    terminate: Terminator,
}

/// Messages accepted by the dispatcher.
pub(crate) enum Command {
    Run(Job),
    /// Abort every running task and report the ids that were cut short.
    Abort {
        respond_to: oneshot::Sender<Vec<OperationId>>,
    },
    /// Abort what is left and exit.
    Stop { respond_to: oneshot::Sender<()> },
}

pub(crate) fn spawn(worker: FileIoWorker, commands: mpsc::Receiver<Command>) -> JoinHandle<()> {
    tokio::spawn(run(worker, commands))
}

async fn run(worker: FileIoWorker, mut commands: mpsc::Receiver<Command>) {
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<task::Id, Pending> = HashMap::new();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Run(job)) => {
                    debug!(operation_id = %job.request().id(), "dispatching file operation");
                    let entry = job.pending();
                    let handle = tasks.spawn(job.run(worker.clone()));
                    pending.insert(handle.id(), entry);
                }
                Some(Command::Abort { respond_to }) => {
                    let aborted = abort_all(&worker, &mut tasks, &mut pending).await;
                    let _ = respond_to.send(aborted);
                }
                Some(Command::Stop { respond_to }) => {
                    abort_all(&worker, &mut tasks, &mut pending).await;
                    let _ = respond_to.send(());
                    break;
                }
                None => {
                    abort_all(&worker, &mut tasks, &mut pending).await;
                    break;
                }
            },
            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                settle_joined(&worker, &mut pending, joined);
            }
        }
    }
    commands.close();
    while let Ok(command) = commands.try_recv() {
        refuse(command);
    }
    debug!("file dispatcher exited");
}

/// Answer a command that will never be run.
pub(crate) fn refuse(command: Command) {
    match command {
        Command::Run(job) => {
            let err = FileIoError::EngineStopped {
                operation: job.request().kind(),
                path: job.request().path().to_path_buf(),
            };
            job.reject(err);
        }
        Command::Abort { respond_to } => {
            let _ = respond_to.send(Vec::new());
        }
        Command::Stop { respond_to } => {
            let _ = respond_to.send(());
        }
    }
}

async fn abort_all(
    worker: &FileIoWorker,
    tasks: &mut JoinSet<()>,
    pending: &mut HashMap<task::Id, Pending>,
) -> Vec<OperationId> {
    tasks.abort_all();
    let mut aborted = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        if let Some(id) = settle_joined(worker, pending, joined) {
            aborted.push(id);
        }
    }
    aborted.sort();
    aborted
}

/// Record a finished task. Returns the operation id when the task was cut
/// short (aborted or panicked) before its caller got a result, and the caller
/// was told so here.
fn settle_joined(
    worker: &FileIoWorker,
    pending: &mut HashMap<task::Id, Pending>,
    joined: Result<(task::Id, ()), JoinError>,
) -> Option<OperationId> {
    let err = match joined {
        Ok((id, ())) => {
            pending.remove(&id);
            return None;
        }
        Err(err) => err,
    };
    let entry = pending.remove(&err.id())?;
    let request = &entry.request;
    let panicked = err.is_panic();
    let failure = || {
        if panicked {
            FileIoError::OsFailure {
                operation: request.kind(),
                path: request.path().to_path_buf(),
                source: io::Error::other("operation task panicked"),
            }
        } else {
            FileIoError::canceled(request.kind(), request.path())
        }
    };
    if !(entry.terminate)(failure()) {
        debug!(
            operation_id = %request.id(),
            "file operation stopped after delivering its result"
        );
        return None;
    }
    if panicked {
        error!(operation_id = %request.id(), "file operation task panicked");
    } else {
        warn!(operation_id = %request.id(), "file operation aborted");
    }
    worker.report(request, entry.queued_at, &Err::<(), _>(failure()));
    worker.refresh_active_gauge();
    Some(request.id().clone())
}
