pub mod reclaimer;
pub mod worker_pool;

pub use reclaimer::{ReclaimState, Reclaimer};
pub use worker_pool::{JobHandle, PauseGuard, WorkerContext, WorkerPool, join_all};
