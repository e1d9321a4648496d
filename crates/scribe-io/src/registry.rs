//! Tracks in-flight operations and pending cancellation requests.
//!
//! # Design
//! - One mutex guards both the active and canceled sets so every check-and-set
//!   is atomic.
//! - An id leaves the active set exactly once, through [`OperationGuard`]'s
//!   `Drop`, which also runs when the owning task is aborted.
//! - Waiters for "nothing active" are woken through a [`Notify`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::error::{FileIoError, FileIoResult};
use crate::request::{FileOperationRequest, OperationId};

/// Outcome of [`OperationRegistry::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The id is now active.
    Admitted,
    /// A cancellation was pending for the id; it has been consumed.
    Canceled,
    /// The id is already active.
    InFlight,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: HashSet<OperationId>,
    canceled: HashSet<OperationId>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    state: Mutex<RegistryState>,
    idle: Notify,
}

/// Shared registry of active and canceled operation ids.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    inner: Arc<RegistryInner>,
}

impl OperationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            error!("operation registry mutex poisoned; continuing with recovered guard");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Try to mark `id` active.
    pub fn begin(&self, id: &OperationId) -> Admission {
        let mut state = self.lock();
        if state.canceled.remove(id) {
            return Admission::Canceled;
        }
        if state.active.contains(id) {
            return Admission::InFlight;
        }
        state.active.insert(id.clone());
        Admission::Admitted
    }

    /// Admit `request` and return a guard that ends it on drop.
    ///
    /// # Errors
    ///
    /// [`FileIoError::AlreadyInFlight`] when the id is active, or
    /// [`FileIoError::Canceled`] when a pending cancellation was consumed.
    pub fn try_begin(&self, request: &FileOperationRequest) -> FileIoResult<OperationGuard> {
        match self.begin(request.id()) {
            Admission::Admitted => {
                debug!(operation_id = %request.id(), "operation admitted");
                Ok(OperationGuard {
                    registry: self.clone(),
                    id: request.id().clone(),
                })
            }
            Admission::Canceled => Err(FileIoError::canceled(request.kind(), request.path())),
            Admission::InFlight => Err(FileIoError::AlreadyInFlight {
                operation: request.kind(),
                path: request.path().to_path_buf(),
            }),
        }
    }

    /// Remove `id` from the active set, dropping any cancellation aimed at it.
    pub fn end(&self, id: &OperationId) {
        let mut state = self.lock();
        state.active.remove(id);
        state.canceled.remove(id);
        let idle = state.active.is_empty();
        drop(state);
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Flag `id` for cancellation whether or not it is active.
    pub fn request_cancel(&self, id: &OperationId) {
        self.lock().canceled.insert(id.clone());
    }

    /// Flag `id` for cancellation only if it is active. Returns whether a
    /// flag was set.
    pub fn cancel_if_active(&self, id: &OperationId) -> bool {
        let mut state = self.lock();
        if state.active.contains(id) {
            state.canceled.insert(id.clone());
            true
        } else {
            false
        }
    }

    /// Whether a cancellation is pending for `id`.
    #[must_use]
    pub fn is_canceled(&self, id: &OperationId) -> bool {
        self.lock().canceled.contains(id)
    }

    /// Whether `id` is active.
    #[must_use]
    pub fn is_active(&self, id: &OperationId) -> bool {
        self.lock().active.contains(id)
    }

    /// Whether no operation is active.
    #[must_use]
    pub fn all_active_finished(&self) -> bool {
        self.lock().active.is_empty()
    }

    /// Number of active operations.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Snapshot of the active ids, sorted.
    #[must_use]
    pub fn active_ids(&self) -> Vec<OperationId> {
        let mut ids: Vec<_> = self.lock().active.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve once no operation is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.all_active_finished() {
                return;
            }
            notified.await;
        }
    }
}

/// Proof that an operation id is active. Ends the operation when dropped.
#[derive(Debug)]
pub struct OperationGuard {
    registry: OperationRegistry,
    id: OperationId,
}

impl OperationGuard {
    /// Id held by this guard.
    #[must_use]
    pub const fn id(&self) -> &OperationId {
        &self.id
    }

    /// Whether cancellation was requested for this operation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.registry.is_canceled(&self.id)
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.registry.end(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(path: &str) -> FileIoResult<FileOperationRequest> {
        FileOperationRequest::load(path)
    }

    #[test]
    fn same_id_is_mutually_exclusive() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let req = request("/notes/a.txt")?;
        let guard = registry.try_begin(&req)?;
        assert!(matches!(
            registry.try_begin(&req),
            Err(FileIoError::AlreadyInFlight { .. })
        ));
        assert!(registry.try_begin(&request("/notes/b.txt")?).is_ok());
        drop(guard);
        assert!(!registry.is_active(req.id()));
        assert!(registry.try_begin(&req).is_ok());
        Ok(())
    }

    #[test]
    fn pending_cancel_is_consumed_by_begin() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let req = request("/notes/a.txt")?;
        registry.request_cancel(req.id());
        assert_eq!(registry.begin(req.id()), Admission::Canceled);
        assert!(!registry.is_canceled(req.id()));
        assert_eq!(registry.begin(req.id()), Admission::Admitted);
        Ok(())
    }

    #[test]
    fn cancel_without_active_operation_is_a_no_op() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let req = request("/notes/a.txt")?;
        assert!(!registry.cancel_if_active(req.id()));
        assert!(!registry.is_canceled(req.id()));
        assert!(registry.all_active_finished());
        assert!(registry.try_begin(&req).is_ok());
        Ok(())
    }

    #[test]
    fn guard_observes_cancel_and_end_clears_flag() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let req = request("/notes/a.txt")?;
        let guard = registry.try_begin(&req)?;
        assert!(!guard.is_canceled());
        assert!(registry.cancel_if_active(req.id()));
        assert!(guard.is_canceled());
        drop(guard);
        assert!(!registry.is_canceled(req.id()));
        assert_eq!(registry.active_count(), 0);
        Ok(())
    }

    #[test]
    fn active_ids_are_sorted() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let _b = registry.try_begin(&request("/b.txt")?)?;
        let _a = registry.try_begin(&request("/a.txt")?)?;
        let ids: Vec<String> = registry
            .active_ids()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, ["load:/a.txt", "load:/b.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_guard_drops() -> FileIoResult<()> {
        let registry = OperationRegistry::new();
        let guard = registry.try_begin(&request("/notes/a.txt")?)?;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
        Ok(())
    }
}
