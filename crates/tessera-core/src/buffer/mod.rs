pub mod scratch;

pub use scratch::{ScratchBuffer, ScratchCache, ScratchKey, ScratchLease, ScratchMetricsSnapshot};
