//! Long-running background workers.

pub mod drain_worker;

pub use drain_worker::{
    DrainTickFailure, DrainWorkerHandle, EventDrainWorker, TickReport, WorkerState,
};
