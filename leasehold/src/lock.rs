use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, trace, warn};

use crate::cancel::CancellationSignal;
use crate::clock::{Clock, SystemClock, deadline_after};
use crate::config::LockConfig;
use crate::error::{ConfigError, LockError};
use crate::guard::{LocalResourceGuard, ResourceGuard};
use crate::resource::{ResourceKey, ResourceKind, acquisition_order, compare_resources};
use crate::store::{LeaseId, LeaseRecord, LeaseStore};
use crate::telemetry;

/// Lifecycle of one lease acquisition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LeaseState {
    Idle,
    Acquiring,
    Held,
    Released,
    Failed,
}

/// Distributed mutual exclusion backed by a lease table.
///
/// Cloning is cheap; clones share the store, guard and clock.
#[derive(Clone)]
pub struct LeaseLock {
    inner: Arc<LockInner>,
}

struct LockInner {
    store: Arc<dyn LeaseStore>,
    guard: Arc<dyn ResourceGuard>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseLock")
            .field("config", &self.inner.config)
            .field("guard", &self.inner.guard)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

/// Builder for [`LeaseLock`].
pub struct LeaseLockBuilder {
    store: Arc<dyn LeaseStore>,
    guard: Option<Arc<dyn ResourceGuard>>,
    clock: Option<Arc<dyn Clock>>,
    config: LockConfig,
}

impl LeaseLockBuilder {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            guard: None,
            clock: None,
            config: LockConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a guard with other locks that use the same store.
    pub fn with_guard(mut self, guard: Arc<dyn ResourceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<LeaseLock, ConfigError> {
        self.config.validate()?;
        let clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()) as Arc<dyn Clock>,
        };
        let guard = match self.guard {
            Some(guard) => guard,
            None => Arc::new(LocalResourceGuard::with_clock(Arc::clone(&clock))) as Arc<dyn ResourceGuard>,
        };
        Ok(LeaseLock {
            inner: Arc::new(LockInner {
                store: self.store,
                guard,
                clock,
                config: self.config,
            }),
        })
    }
}

impl LeaseLock {
    /// Lock over `store` with the tokio clock and a private in-process guard.
    pub fn new(store: Arc<dyn LeaseStore>, config: LockConfig) -> Result<Self, ConfigError> {
        LeaseLockBuilder::new(store).with_config(config).build()
    }

    pub fn builder(store: Arc<dyn LeaseStore>) -> LeaseLockBuilder {
        LeaseLockBuilder::new(store)
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Acquire `resource`, waiting up to `timeout`.
    ///
    /// The lease also expires `timeout` after it is established, so a holder
    /// that crashes blocks others for at most that long.
    pub async fn acquire(
        &self,
        resource: impl Into<String>,
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<LeaseHandle, LockError> {
        self.acquire_inner(resource.into(), timeout, timeout, cancel).await
    }

    /// Acquire `resource`, waiting up to `timeout`, with a lease that expires
    /// `ttl` after it is established.
    ///
    /// A zero `ttl` is rejected with [`LockError::ZeroTtl`] before the store
    /// is touched: such a row would be expired the moment it was written.
    pub async fn acquire_with_ttl(
        &self,
        resource: impl Into<String>,
        timeout: Duration,
        ttl: Duration,
        cancel: &CancellationSignal,
    ) -> Result<LeaseHandle, LockError> {
        let resource = resource.into();
        if ttl.is_zero() {
            telemetry::record_lock_failed(&self.inner.config.table_prefix, &resource, "zero_ttl");
            return Err(LockError::ZeroTtl { resource });
        }
        self.acquire_inner(resource, timeout, ttl, cancel).await
    }

    /// Callers pass a zero `ttl` only together with a zero wait, which never
    /// reaches an insert.
    async fn acquire_inner(
        &self,
        resource: String,
        timeout: Duration,
        ttl: Duration,
        cancel: &CancellationSignal,
    ) -> Result<LeaseHandle, LockError> {
        let span = telemetry::lock_acquire_span(&resource, timeout);
        async move {
            let prefix = &self.inner.config.table_prefix;
            let mut state = LeaseState::Idle;
            transition(&mut state, LeaseState::Acquiring, &resource);

            let started = self.inner.clock.now();
            match self.acquire_loop(&resource, started, timeout, ttl, cancel).await {
                Ok((record, attempts)) => {
                    transition(&mut state, LeaseState::Held, &resource);
                    let waited = (record.created_at - started).to_std().unwrap_or_default();
                    telemetry::record_lock_acquired(prefix, &resource, waited, attempts);
                    Ok(LeaseHandle {
                        resource: record.resource,
                        lease_id: record.lease_id,
                        acquired_at: record.created_at,
                        expires_at: record.expires_at,
                        timeout,
                        state,
                        lock: self.clone(),
                    })
                }
                Err(err) => {
                    transition(&mut state, LeaseState::Failed, &resource);
                    telemetry::record_lock_failed(prefix, &resource, err.reason());
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn acquire_loop(
        &self,
        resource: &str,
        started: DateTime<Utc>,
        timeout: Duration,
        ttl: Duration,
        cancel: &CancellationSignal,
    ) -> Result<(LeaseRecord, u32), LockError> {
        let clock = &self.inner.clock;
        let deadline = deadline_after(started, timeout);
        let poll = self.inner.config.poll_interval();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    resource: resource.to_string(),
                });
            }

            let left = (deadline - clock.now()).to_std().unwrap_or_default();
            if !left.is_zero() {
                attempts += 1;
                if let Some(record) = self.attempt(resource, left, timeout, ttl, cancel).await? {
                    return Ok((record, attempts));
                }
                trace!(resource, attempts, "lease is held elsewhere");
            }

            if clock.now() >= deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    timeout,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LockError::Cancelled {
                        resource: resource.to_string(),
                    });
                }
                _ = clock.sleep(poll) => {}
            }
        }
    }

    /// One guarded conditional insert.
    async fn attempt(
        &self,
        resource: &str,
        guard_wait: Duration,
        timeout: Duration,
        ttl: Duration,
        cancel: &CancellationSignal,
    ) -> Result<Option<LeaseRecord>, LockError> {
        let permit = self
            .inner
            .guard
            .acquire_one(ResourceKind::Lock, guard_wait, cancel)
            .await
            .map_err(|e| e.into_lock_error(resource, timeout))?;

        let now = self.inner.clock.now();
        let record = LeaseRecord {
            resource: resource.to_string(),
            lease_id: LeaseId::new(),
            created_at: now,
            expires_at: deadline_after(now, ttl),
        };
        let inserted = self
            .inner
            .store
            .try_insert(&record)
            .await
            .with_context(|| format!("failed to insert lease row for `{resource}`"));
        permit.release();

        Ok((inserted? > 0).then_some(record))
    }

    /// Release `handle`. Releasing an already released handle is a no-op.
    ///
    /// The delete runs on a spawned task, so it completes even if the caller
    /// stops polling this future.
    pub async fn release(&self, handle: &mut LeaseHandle) -> Result<(), LockError> {
        if handle.state != LeaseState::Held {
            trace!(resource = %handle.resource, state = ?handle.state, "release skipped");
            return Ok(());
        }

        let wait = self.inner.config.release_timeout();
        let lock = self.clone();
        let resource = handle.resource.clone();
        let lease_id = handle.lease_id;
        tokio::spawn(async move { lock.release_row(&resource, lease_id, wait).await })
            .await
            .context("lease release task failed")??;

        transition(&mut handle.state, LeaseState::Released, &handle.resource);
        Ok(())
    }

    async fn release_row(
        &self,
        resource: &str,
        lease_id: LeaseId,
        wait: Duration,
    ) -> Result<(), LockError> {
        let span = telemetry::lock_release_span(resource, lease_id.to_string());
        async move {
            let permit = self
                .inner
                .guard
                .acquire_one(ResourceKind::Lock, wait, &CancellationSignal::never())
                .await
                .map_err(|e| e.into_lock_error(resource, wait))?;
            let deleted = self
                .inner
                .store
                .delete(resource, lease_id)
                .await
                .with_context(|| format!("failed to delete lease row for `{resource}`"));
            permit.release();

            let deleted = deleted? > 0;
            if !deleted {
                debug!(resource, %lease_id, "no lease row to delete; already released or superseded");
            }
            telemetry::record_lock_released(&self.inner.config.table_prefix, resource, deleted);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Acquire several resources against one shared deadline.
    ///
    /// Keys are taken in [`acquisition_order`]; a resource name requested
    /// under more than one kind is taken once, at its lowest-ranked position.
    /// If any acquisition fails, the leases already held are released in
    /// reverse order before the error is returned.
    pub async fn acquire_many(
        &self,
        keys: impl IntoIterator<Item = ResourceKey>,
        timeout: Duration,
        cancel: &CancellationSignal,
    ) -> Result<LeaseSet, LockError> {
        let mut seen = HashSet::new();
        let mut keys = acquisition_order(keys);
        keys.retain(|key| seen.insert(key.resource.clone()));

        let deadline = deadline_after(self.inner.clock.now(), timeout);
        let mut set = LeaseSet::default();
        for key in keys {
            let left = (deadline - self.inner.clock.now()).to_std().unwrap_or_default();
            match self.acquire_inner(key.resource, left, timeout, cancel).await {
                Ok(handle) => set.handles.push(handle),
                Err(err) => {
                    if let Err(release_err) = set.release().await {
                        warn!(error = %release_err, "failed to release partial lease set");
                    }
                    return Err(match err {
                        LockError::Timeout { resource, .. } => LockError::Timeout { resource, timeout },
                        other => other,
                    });
                }
            }
        }
        Ok(set)
    }
}

fn transition(state: &mut LeaseState, next: LeaseState, resource: &str) {
    debug!(resource, from = ?*state, to = ?next, "lease state transition");
    *state = next;
}

/// A held lease. Owned by the caller that acquired it.
///
/// Release it with [`LeaseHandle::release`]. A handle dropped while still
/// held schedules its release on the current tokio runtime.
pub struct LeaseHandle {
    resource: String,
    lease_id: LeaseId,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    timeout: Duration,
    state: LeaseState,
    lock: LeaseLock,
}

impl LeaseHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// The wait bound this lease was acquired with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the row stops blocking other acquirers.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == LeaseState::Held
    }

    /// Release the lease. Calling it again is a no-op.
    pub async fn release(&mut self) -> Result<(), LockError> {
        let lock = self.lock.clone();
        lock.release(self).await
    }
}

impl fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("resource", &self.resource)
            .field("lease_id", &self.lease_id)
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .field("state", &self.state)
            .finish()
    }
}

impl PartialEq for LeaseHandle {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LeaseHandle {}

impl PartialOrd for LeaseHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handles order by resource name, ignoring case.
impl Ord for LeaseHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_resources(&self.resource, &other.resource)
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if self.state != LeaseState::Held {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                let resource = std::mem::take(&mut self.resource);
                let lease_id = self.lease_id;
                let wait = lock.inner.config.release_timeout();
                debug!(%resource, %lease_id, "lease handle dropped while held; releasing");
                runtime.spawn(async move {
                    if let Err(err) = lock.release_row(&resource, lease_id, wait).await {
                        warn!(%resource, error = %err, "background lease release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    resource = %self.resource,
                    expires_at = %self.expires_at,
                    "lease handle dropped outside a runtime; row stays until it expires"
                );
            }
        }
    }
}

/// Leases acquired together by [`LeaseLock::acquire_many`].
#[derive(Debug, Default)]
pub struct LeaseSet {
    handles: Vec<LeaseHandle>,
}

impl LeaseSet {
    /// Resources in acquisition order.
    pub fn resources(&self) -> Vec<&str> {
        self.handles.iter().map(LeaseHandle::resource).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeaseHandle> {
        self.handles.iter()
    }

    /// Release every lease in reverse acquisition order.
    ///
    /// Keeps going after a failure and returns the first error.
    pub async fn release(&mut self) -> Result<(), LockError> {
        let mut first_err = None;
        while let Some(mut handle) = self.handles.pop() {
            if let Err(err) = handle.release().await {
                warn!(resource = %handle.resource(), error = %err, "lease release failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
