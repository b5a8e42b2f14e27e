use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use campus_events::RaisedEvent;

use super::{DrainTransaction, EventSourceKey, OutboxError, PendingEventStore};

type LeaseId = u64;

#[derive(Debug)]
struct PendingBatch {
    key: EventSourceKey,
    events: Vec<RaisedEvent>,
    /// Set while a drain transaction holds this batch.
    lease: Option<LeaseId>,
}

#[derive(Debug, Default)]
struct OutboxState {
    /// First-enqueued source first.
    batches: Vec<PendingBatch>,
}

impl OutboxState {
    /// Hand the lease on `key`'s batches back. Batches enqueued while the lease
    /// was held are folded into the older one so raise order survives.
    fn release(&mut self, lease: LeaseId) {
        let mut released: HashSet<EventSourceKey> = HashSet::new();
        for batch in self.batches.iter_mut().filter(|b| b.lease == Some(lease)) {
            batch.lease = None;
            released.insert(batch.key.clone());
        }

        for key in released {
            let mut positions = self
                .batches
                .iter()
                .enumerate()
                .filter(|(_, b)| b.key == key && b.lease.is_none())
                .map(|(i, _)| i);
            let Some(first) = positions.next() else {
                continue;
            };
            let later: Vec<usize> = positions.collect();
            for i in later.into_iter().rev() {
                let batch = self.batches.remove(i);
                self.batches[first].events.extend(batch.events);
            }
        }
    }
}

/// One-shot failures for exercising worker error paths.
#[derive(Debug, Default)]
struct FaultPlan {
    /// Fail the drain call after this many successful drains (next transaction only).
    drain_after: Mutex<Option<usize>>,
    commit: AtomicBool,
}

/// In-memory outbox.
///
/// Intended for tests/dev and single-process deployments. Drain transactions
/// are serialized: `begin` waits for the previous transaction to finish. The
/// batch table itself is only locked for the duration of each call, so
/// enqueues (including ones made by handlers while a tick dispatches) never
/// wait on a drainer.
///
/// Drained batches are leased to their transaction. Events enqueued for a
/// leased source start a fresh batch, which the lease holder's commit leaves
/// alone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPendingEventStore {
    state: Arc<Mutex<OutboxState>>,
    drainer: Arc<AsyncMutex<()>>,
    next_lease: Arc<AtomicU64>,
    faults: Arc<FaultPlan>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryPendingEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events waiting to be dispatched, leased or not.
    pub fn pending_len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.batches.iter().map(|b| b.events.len()).sum())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Number of committed drain transactions.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next transaction's drain fail once `successful` batches have
    /// been drained in it.
    #[cfg(test)]
    pub(crate) fn fail_next_drain_after(&self, successful: usize) {
        if let Ok(mut plan) = self.faults.drain_after.lock() {
            *plan = Some(successful);
        }
    }

    /// Make the next commit fail.
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.faults.commit.store(true, Ordering::SeqCst);
    }
}

fn lock_state(state: &Mutex<OutboxState>) -> Result<MutexGuard<'_, OutboxState>, OutboxError> {
    state.lock().map_err(|_| OutboxError::backend("lock poisoned"))
}

#[async_trait]
impl PendingEventStore for InMemoryPendingEventStore {
    async fn enqueue(
        &self,
        key: EventSourceKey,
        events: Vec<RaisedEvent>,
    ) -> Result<(), OutboxError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut state = lock_state(&self.state)?;
        match state
            .batches
            .iter_mut()
            .find(|b| b.key == key && b.lease.is_none())
        {
            Some(batch) => batch.events.extend(events),
            None => state.batches.push(PendingBatch {
                key,
                events,
                lease: None,
            }),
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn DrainTransaction>, OutboxError> {
        let turn = self.drainer.clone().lock_owned().await;
        let fail_drain_after = self
            .faults
            .drain_after
            .lock()
            .map_err(|_| OutboxError::backend("lock poisoned"))?
            .take();
        Ok(Box::new(InMemoryDrainTransaction {
            _turn: turn,
            state: self.state.clone(),
            lease: self.next_lease.fetch_add(1, Ordering::SeqCst),
            drained: 0,
            finished: false,
            fail_drain_after,
            faults: self.faults.clone(),
            commits: self.commits.clone(),
        }))
    }
}

struct InMemoryDrainTransaction {
    _turn: OwnedMutexGuard<()>,
    state: Arc<Mutex<OutboxState>>,
    lease: LeaseId,
    drained: usize,
    finished: bool,
    fail_drain_after: Option<usize>,
    faults: Arc<FaultPlan>,
    commits: Arc<AtomicUsize>,
}

#[async_trait]
impl DrainTransaction for InMemoryDrainTransaction {
    async fn pending_sources(&mut self) -> Result<Vec<EventSourceKey>, OutboxError> {
        let state = lock_state(&self.state)?;
        let mut seen = HashSet::new();
        Ok(state
            .batches
            .iter()
            .filter(|b| b.lease.is_none() && !b.events.is_empty())
            .filter(|b| seen.insert(b.key.clone()))
            .map(|b| b.key.clone())
            .collect())
    }

    async fn drain(&mut self, key: &EventSourceKey) -> Result<Vec<RaisedEvent>, OutboxError> {
        if self.fail_drain_after == Some(self.drained) {
            return Err(OutboxError::backend(format!("injected fault draining {key}")));
        }

        let mut state = lock_state(&self.state)?;
        let mut events = Vec::new();
        for batch in state
            .batches
            .iter_mut()
            .filter(|b| &b.key == key && b.lease.is_none())
        {
            batch.lease = Some(self.lease);
            events.extend(batch.events.iter().cloned());
        }
        if events.is_empty() {
            return Err(OutboxError::NothingPending(key.clone()));
        }
        self.drained += 1;
        Ok(events)
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        let mut tx = *self;
        if tx.faults.commit.swap(false, Ordering::SeqCst) {
            return Err(OutboxError::backend("injected commit fault"));
        }

        let lease = tx.lease;
        lock_state(&tx.state)?
            .batches
            .retain(|b| b.lease != Some(lease));
        tx.finished = true;
        tx.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemoryDrainTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.release(self.lease);
        }
    }
}
