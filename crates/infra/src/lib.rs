//! Infrastructure layer: grant storage, the event outbox, the commit path,
//! the drain worker and the request pipeline.

pub mod commit;
pub mod config;
pub mod grant_store;
pub mod outbox;
pub mod pipeline;
pub mod workers;

pub use commit::{CommitError, DispatchMode, EventCommitter};
pub use config::DrainWorkerConfig;
pub use grant_store::{InMemoryGrantStore, PostgresGrantStore};
pub use outbox::{
    DrainTransaction, EventSourceKey, InMemoryPendingEventStore, OutboxError, PendingEventStore,
};
pub use pipeline::{PipelineBehavior, PipelineError, Request, RequestHandler, RequestPipeline};
pub use workers::{DrainTickFailure, DrainWorkerHandle, EventDrainWorker, TickReport, WorkerState};
