use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::cancel::CancellationSignal;
use crate::clock::{Clock, SystemClock, deadline_after};
use crate::error::GuardError;
use crate::resource::ResourceKind;

/// Short critical section around lease-table mutations for one resource kind.
///
/// A guard protects the metadata operation (one conditional insert or one
/// delete), not the caller's business logic. It serializes callers that
/// share the same guard instance, typically everything that talks to the
/// store through one connection pool, so they do not pile onto the table at
/// once. Mutual exclusion between processes comes from the store's atomic
/// statements, not from the guard.
#[async_trait]
pub trait ResourceGuard: Send + Sync + fmt::Debug {
    /// Wait for exclusive access to `kind`.
    ///
    /// Callers that need several kinds must request them in rank order; this
    /// method does not reorder. Prefer [`ResourceGuard::acquire_many`].
    async fn acquire_one(
        &self,
        kind: ResourceKind,
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<GuardPermit, GuardError>;

    /// Acquire several kinds in rank order, sharing one deadline.
    ///
    /// Duplicates are collapsed. On failure every permit taken so far is
    /// released before the error is returned.
    async fn acquire_many(
        &self,
        kinds: &[ResourceKind],
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<GuardSet, GuardError>;
}

/// Held access to one resource kind. Released on drop.
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct GuardPermit {
    kind: ResourceKind,
    _held: OwnedMutexGuard<()>,
}

impl GuardPermit {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Release explicitly. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl fmt::Debug for GuardPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardPermit").field("kind", &self.kind).finish()
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        trace!(kind = %self.kind, "resource guard released");
    }
}

/// Several permits held together, released in reverse acquisition order.
#[derive(Debug, Default)]
#[must_use = "the guards are released as soon as the set is dropped"]
pub struct GuardSet {
    permits: Vec<GuardPermit>,
}

impl GuardSet {
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.permits.iter().map(GuardPermit::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.permits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permits.is_empty()
    }
}

impl Drop for GuardSet {
    fn drop(&mut self) {
        while let Some(permit) = self.permits.pop() {
            drop(permit);
        }
    }
}

/// In-process guard: one async mutex per resource kind.
#[derive(Clone)]
pub struct LocalResourceGuard {
    slots: Arc<[Arc<Mutex<()>>; ResourceKind::COUNT]>,
    clock: Arc<dyn Clock>,
}

impl LocalResourceGuard {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Guard whose wait bounds are measured with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(std::array::from_fn(|_| Arc::new(Mutex::new(())))),
            clock,
        }
    }

    fn slot(&self, kind: ResourceKind) -> Arc<Mutex<()>> {
        Arc::clone(&self.slots[kind.rank() as usize])
    }
}

impl Default for LocalResourceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held: Vec<ResourceKind> = ResourceKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.slots[kind.rank() as usize].try_lock().is_err())
            .collect();
        f.debug_struct("LocalResourceGuard")
            .field("held", &held)
            .field("clock", &self.clock)
            .finish()
    }
}

#[async_trait]
impl ResourceGuard for LocalResourceGuard {
    async fn acquire_one(
        &self,
        kind: ResourceKind,
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<GuardPermit, GuardError> {
        if cancel.is_cancelled() {
            return Err(GuardError::Cancelled { kind });
        }

        let slot = self.slot(kind);
        if let Ok(held) = Arc::clone(&slot).try_lock_owned() {
            trace!(%kind, "resource guard acquired");
            return Ok(GuardPermit { kind, _held: held });
        }
        if timeout.is_zero() {
            return Err(GuardError::Timeout { kind, timeout });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GuardError::Cancelled { kind }),
            held = slot.lock_owned() => {
                trace!(%kind, "resource guard acquired after wait");
                Ok(GuardPermit { kind, _held: held })
            }
            _ = self.clock.sleep(timeout) => Err(GuardError::Timeout { kind, timeout }),
        }
    }

    async fn acquire_many(
        &self,
        kinds: &[ResourceKind],
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<GuardSet, GuardError> {
        let mut ordered = kinds.to_vec();
        ordered.sort();
        ordered.dedup();

        let deadline = deadline_after(self.clock.now(), timeout);
        let mut set = GuardSet::default();
        for kind in ordered {
            let left = (deadline - self.clock.now()).to_std().unwrap_or_default();
            // `set` is dropped on the error path, releasing in reverse order.
            let permit = self.acquire_one(kind, left, cancel).await?;
            set.permits.push(permit);
        }
        Ok(set)
    }
}
