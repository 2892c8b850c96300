pub mod buffer;
pub mod codec;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod filter;
pub mod format;
pub mod partition;
pub mod telemetry;
pub mod tile;
pub mod types;

pub use buffer::{ScratchBuffer, ScratchCache, ScratchKey, ScratchLease, ScratchMetricsSnapshot};
pub use codec::{Codec, CodecAdapter, DestinationFull, Geometry, LocoCodec};
pub use config::EngineConfig;
pub use self::core::{
    JobHandle, PauseGuard, ReclaimState, Reclaimer, WorkerContext, WorkerPool, join_all,
};
pub use engine::Engine;
pub use error::TesseraError;
pub use filter::Direction;
pub use format::SubBlockTable;
pub use partition::partition;
pub use tile::{Tile, copy_tile};
pub use types::{BlockParams, CompressedSubBlock, Result, SubBlock};
