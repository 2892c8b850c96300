/// Log target for orchestrator passes.
pub const TARGET_ENGINE: &str = "tessera::engine";
/// Log target for the worker pool.
pub const TARGET_POOL: &str = "tessera::pool";
/// Log target for scratch buffer bookkeeping.
pub const TARGET_SCRATCH: &str = "tessera::scratch";
/// Log target for the idle reclaimer.
pub const TARGET_RECLAIM: &str = "tessera::reclaim";
/// Log target for codec adapter failures.
pub const TARGET_CODEC: &str = "tessera::codec";

pub const METRIC_ENGINE_ENCODE_COUNT: &str = "tessera.engine.encode.count";
pub const METRIC_ENGINE_DECODE_COUNT: &str = "tessera.engine.decode.count";
pub const METRIC_ENGINE_FAILURE_COUNT: &str = "tessera.engine.failure.count";
pub const METRIC_ENGINE_ENCODE_LATENCY_US: &str = "tessera.engine.encode.latency_us";
pub const METRIC_ENGINE_DECODE_LATENCY_US: &str = "tessera.engine.decode.latency_us";
pub const METRIC_ENGINE_RAW_BYTES: &str = "tessera.engine.raw_bytes";
pub const METRIC_ENGINE_PACKED_BYTES: &str = "tessera.engine.packed_bytes";
pub const METRIC_ENGINE_SUBCHUNKS: &str = "tessera.engine.subchunks";

pub const METRIC_POOL_JOB_OK_COUNT: &str = "tessera.pool.job.ok.count";
pub const METRIC_POOL_JOB_FAILED_COUNT: &str = "tessera.pool.job.failed.count";
pub const METRIC_POOL_JOB_PANIC_COUNT: &str = "tessera.pool.job.panic.count";
pub const METRIC_POOL_JOB_LATENCY_US: &str = "tessera.pool.job.latency_us";
pub const METRIC_POOL_REBUILD_COUNT: &str = "tessera.pool.rebuild.count";

pub const METRIC_SCRATCH_ALLOCATED_COUNT: &str = "tessera.scratch.allocated.count";
pub const METRIC_SCRATCH_REUSED_COUNT: &str = "tessera.scratch.reused.count";
pub const METRIC_SCRATCH_CACHED_BYTES: &str = "tessera.scratch.cached_bytes";

pub const METRIC_RECLAIM_SWEEP_COUNT: &str = "tessera.reclaim.sweep.count";
pub const METRIC_RECLAIM_FREED_BYTES: &str = "tessera.reclaim.freed_bytes";
