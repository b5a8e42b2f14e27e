use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use campus_events::EventDispatcher;

use crate::config::DrainWorkerConfig;
use crate::outbox::{EventSourceKey, OutboxError, PendingEventStore};

/// Lifecycle of the drain loop.
///
/// Success: `Idle → Draining → Dispatching → Idle`.
/// Failure: `Idle → Draining → Dispatching → ErrorBackoff → Idle`.
/// `Stopped` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Draining,
    Dispatching,
    ErrorBackoff,
    Stopped,
}

/// A tick could not finish. Batches dispatched before the failure have been
/// committed as cleared where possible.
#[derive(Debug, Error)]
pub enum DrainTickFailure {
    #[error("failed to open drain transaction: {0}")]
    Begin(#[source] OutboxError),

    #[error("failed to list pending sources: {0}")]
    Scan(#[source] OutboxError),

    #[error("failed to drain {source_key}: {error}")]
    Drain {
        source_key: EventSourceKey,
        #[source]
        error: OutboxError,
    },

    #[error("failed to commit drained batches: {0}")]
    Commit(#[source] OutboxError),
}

/// What a successful tick did.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub sources: usize,
    pub events: usize,
    /// The tick stopped early on cancellation; undispatched sources stay pending.
    pub cancelled: bool,
}

/// Background loop that moves pending events from the outbox to the dispatcher.
///
/// One tick:
/// 1. open a drain transaction
/// 2. per pending source: check cancellation, drain, dispatch the batch
/// 3. commit, clearing every dispatched batch
///
/// The commit in step 3 also runs when step 2 stops early, so a batch that
/// was dispatched is never dispatched again by a later tick.
pub struct EventDrainWorker {
    config: DrainWorkerConfig,
    pending: Arc<dyn PendingEventStore>,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<WorkerState>,
}

impl core::fmt::Debug for EventDrainWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDrainWorker")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl EventDrainWorker {
    pub fn new(
        config: DrainWorkerConfig,
        pending: Arc<dyn PendingEventStore>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            config,
            pending,
            dispatcher,
            state,
        }
    }

    pub fn config(&self) -> &DrainWorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Run one tick. On failure the state is left at `ErrorBackoff`.
    pub async fn run_tick(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TickReport, DrainTickFailure> {
        self.set_state(WorkerState::Draining);
        match self.tick(cancel).await {
            Ok(report) => {
                self.set_state(WorkerState::Idle);
                Ok(report)
            }
            Err(err) => {
                self.set_state(WorkerState::ErrorBackoff);
                Err(err)
            }
        }
    }

    async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport, DrainTickFailure> {
        let mut tx = self.pending.begin().await.map_err(DrainTickFailure::Begin)?;
        let sources = tx.pending_sources().await.map_err(DrainTickFailure::Scan)?;

        let mut report = TickReport::default();
        let mut failure = None;

        for key in sources {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.set_state(WorkerState::Draining);
            let events = match tx.drain(&key).await {
                Ok(events) => events,
                Err(error) => {
                    failure = Some(DrainTickFailure::Drain {
                        source_key: key,
                        error,
                    });
                    break;
                }
            };

            self.set_state(WorkerState::Dispatching);
            debug!(
                worker = %self.config.name,
                source = %key,
                events = events.len(),
                "dispatching batch"
            );
            report.sources += 1;
            report.events += events.len();
            self.dispatcher.dispatch(events).await;
        }

        tx.commit().await.map_err(DrainTickFailure::Commit)?;

        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Loop until `cancel` fires. The first tick runs immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            worker = %self.config.name,
            interval_ms = self.config.interval.as_millis() as u64,
            backoff_ms = self.config.error_backoff.as_millis() as u64,
            "drain worker started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay: Duration = match self.run_tick(&cancel).await {
                Ok(report) => {
                    if report.events > 0 {
                        debug!(
                            worker = %self.config.name,
                            sources = report.sources,
                            events = report.events,
                            "drain tick complete"
                        );
                    }
                    self.config.interval
                }
                Err(err) => {
                    warn!(
                        worker = %self.config.name,
                        error = %err,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        "drain tick failed; backing off"
                    );
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(WorkerState::Idle);
        }

        self.set_state(WorkerState::Stopped);
        info!(worker = %self.config.name, "drain worker stopped");
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> DrainWorkerHandle {
        let cancel = CancellationToken::new();
        let state = self.subscribe();
        let join = tokio::spawn(self.run(cancel.clone()));
        DrainWorkerHandle {
            cancel,
            state,
            join,
        }
    }
}

/// Handle to observe and stop a spawned [`EventDrainWorker`].
#[derive(Debug)]
pub struct DrainWorkerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<()>,
}

impl DrainWorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal shutdown and wait for the current tick to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            warn!(error = %err, "drain worker task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use campus_core::{TenantId, UserId};
    use campus_events::{EventHandler, EventSource, HandlerError};
    use campus_profiles::{ProfileCreated, ProfileUpdated, UserProfile};

    use super::*;
    use crate::commit::{DispatchMode, EventCommitter};
    use crate::outbox::InMemoryPendingEventStore;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl EventHandler<ProfileUpdated> for Recorder {
        async fn handle(&self, event: &ProfileUpdated) -> Result<(), HandlerError> {
            self.0.lock().unwrap().push(event.display_name.clone());
            Ok(())
        }
    }

    async fn enqueue_rename(pending: &InMemoryPendingEventStore, names: &[&str]) {
        let mut profile =
            UserProfile::create(UserId::new(), TenantId::new(), "Ada", Utc::now()).unwrap();
        profile.drain();
        for name in names {
            profile.rename(name, Utc::now()).unwrap();
        }
        let key = EventSourceKey::of(&profile);
        pending.enqueue(key, profile.drain()).await.unwrap();
    }

    fn worker(pending: &InMemoryPendingEventStore) -> (EventDrainWorker, Recorder) {
        let recorder = Recorder::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register::<ProfileUpdated, _>(recorder.clone());
        let worker = EventDrainWorker::new(
            DrainWorkerConfig::default(),
            Arc::new(pending.clone()),
            Arc::new(dispatcher),
        );
        (worker, recorder)
    }

    #[tokio::test]
    async fn tick_dispatches_in_order_and_clears() {
        let pending = InMemoryPendingEventStore::new();
        enqueue_rename(&pending, &["B", "C"]).await;
        let (worker, recorder) = worker(&pending);

        let report = worker.run_tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, TickReport { sources: 1, events: 2, cancelled: false });
        assert_eq!(*recorder.0.lock().unwrap(), vec!["B", "C"]);
        assert!(pending.is_empty());
        assert_eq!(worker.state(), WorkerState::Idle);

        let report = worker.run_tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.events, 0);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_tick_leaves_sources_pending() {
        let pending = InMemoryPendingEventStore::new();
        enqueue_rename(&pending, &["B"]).await;
        let (worker, recorder) = worker(&pending);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = worker.run_tick(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(recorder.0.lock().unwrap().is_empty());
        assert_eq!(pending.pending_len(), 1);
    }

    #[tokio::test]
    async fn drain_fault_commits_progress_and_enters_backoff() {
        let pending = InMemoryPendingEventStore::new();
        enqueue_rename(&pending, &["B"]).await;
        enqueue_rename(&pending, &["C"]).await;
        pending.fail_next_drain_after(1);
        let (worker, recorder) = worker(&pending);

        let err = worker.run_tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DrainTickFailure::Drain { .. }));
        assert_eq!(worker.state(), WorkerState::ErrorBackoff);
        assert_eq!(pending.pending_len(), 1);

        worker.run_tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn commit_fault_is_a_tick_failure() {
        let pending = InMemoryPendingEventStore::new();
        enqueue_rename(&pending, &["B"]).await;
        pending.fail_next_commit();
        let (worker, _recorder) = worker(&pending);

        let err = worker.run_tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DrainTickFailure::Commit(_)));
        assert_eq!(pending.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_worker_stops_on_shutdown() {
        let pending = InMemoryPendingEventStore::new();
        let (worker, _recorder) = worker(&pending);
        let handle = worker.spawn();
        let mut states = handle.subscribe();

        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.shutdown().await;

        assert_eq!(*states.borrow_and_update(), WorkerState::Stopped);
        assert!(pending.commit_count() >= 3);
    }

    /// Opens a follow-up profile for every rename, committed through the outbox.
    struct OpensFollowUp(EventCommitter);

    #[async_trait]
    impl EventHandler<ProfileUpdated> for OpensFollowUp {
        async fn handle(&self, event: &ProfileUpdated) -> Result<(), HandlerError> {
            let mut follow_up = UserProfile::create(
                event.user_id,
                TenantId::new(),
                &event.display_name,
                Utc::now(),
            )?;
            self.0
                .commit(&mut follow_up, |_| Box::pin(async { Ok::<_, anyhow::Error>(()) }))
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_can_queue_events_while_a_tick_dispatches() {
        let pending = InMemoryPendingEventStore::new();
        enqueue_rename(&pending, &["B"]).await;

        let committer = EventCommitter::new(
            Arc::new(EventDispatcher::new()),
            Arc::new(pending.clone()),
            DispatchMode::Deferred,
        );
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register::<ProfileUpdated, _>(OpensFollowUp(committer));
        let worker = EventDrainWorker::new(
            DrainWorkerConfig::default(),
            Arc::new(pending.clone()),
            Arc::new(dispatcher),
        );

        let report = tokio::time::timeout(
            Duration::from_secs(3),
            worker.run_tick(&CancellationToken::new()),
        )
        .await
        .expect("tick finished")
        .unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(pending.pending_len(), 1);

        let mut tx = pending.begin().await.unwrap();
        let key = tx.pending_sources().await.unwrap().remove(0);
        let queued = tx.drain(&key).await.unwrap();
        assert!(queued[0].is::<ProfileCreated>());
    }
}
