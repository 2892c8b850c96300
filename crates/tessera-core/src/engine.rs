use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::buffer::{ScratchKey, ScratchLease, ScratchMetricsSnapshot};
use crate::codec::{Codec, CodecAdapter, LocoCodec};
use crate::config::{EngineConfig, resolve_workers};
use crate::core::{JobHandle, WorkerContext, WorkerPool, join_all};
use crate::format::SubBlockTable;
use crate::partition::partition;
use crate::telemetry::{self, tags};
use crate::types::{BlockParams, CompressedSubBlock, SubBlock};
use crate::{Result, TesseraError};

/// Block-parallel encoder/decoder.
///
/// Every call splits the block into row-range sub-blocks, runs the codec on
/// each one in the worker pool, and waits for all of them before touching
/// the caller's buffer again. The packed form is a little-endian `u32`
/// length per sub-block followed by the sub-block payloads in index order.
///
/// An engine can be shared between threads; concurrent calls draw on the
/// same pool and scratch cache.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    codec: CodecAdapter,
    pool: RwLock<Arc<WorkerPool>>,
}

impl Engine {
    /// Engine driving the bundled [`LocoCodec`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_codec(config, Arc::new(LocoCodec::new()))
    }

    /// Engine driving a caller-supplied codec.
    ///
    /// Fails if `config` does not validate or the pool cannot be started.
    pub fn with_codec(config: EngineConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::with_idle_period(config.resolved_workers(), config.idle_period)?;
        tracing::debug!(
            target: tags::TARGET_ENGINE,
            workers = pool.worker_count(),
            codec = codec.name(),
            target_subchunks = config.target_subchunks,
            "engine started"
        );
        Ok(Self {
            config,
            codec: CodecAdapter::new(codec),
            pool: RwLock::new(Arc::new(pool)),
        })
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the codec driving every sub-block.
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Size of the worker pool new calls will run on.
    pub fn worker_count(&self) -> usize {
        self.pool().worker_count()
    }

    /// Resizes the worker pool. `None` or zero picks the default size.
    ///
    /// Returns `true` if a new pool was built. Calls already running keep
    /// the old pool alive until they finish; it is joined when the last of
    /// them lets go.
    pub fn set_workers(&self, workers: Option<usize>) -> Result<bool> {
        let wanted = resolve_workers(workers);
        let retired = {
            let mut slot = match self.pool.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let current = slot.worker_count();
            if current == wanted {
                return Ok(false);
            }
            let pool = WorkerPool::with_idle_period(wanted, self.config.idle_period)?;
            tracing::debug!(
                target: tags::TARGET_ENGINE,
                from = current,
                to = wanted,
                "rebuilding worker pool"
            );
            std::mem::replace(&mut *slot, Arc::new(pool))
        };
        telemetry::increment_counter(tags::METRIC_POOL_REBUILD_COUNT, 1);
        drop(retired);
        Ok(true)
    }

    /// Scratch cache activity of the current pool.
    pub fn scratch_metrics(&self) -> ScratchMetricsSnapshot {
        self.pool().cache().metrics()
    }

    /// Frees every cached scratch buffer now. `None` while a call is running.
    pub fn reclaim_now(&self) -> Option<usize> {
        self.pool().reclaim_now()
    }

    /// Compresses the block held in `buffer` in place.
    ///
    /// The first `params.block_bytes()` bytes of `buffer` are the input; on
    /// success `buffer` holds exactly the packed stream and its length is
    /// returned. Parameter errors leave `buffer` untouched; any later
    /// failure leaves it empty.
    pub fn encode(&self, buffer: &mut BytesMut, params: &BlockParams) -> Result<usize> {
        let started_at = Instant::now();
        let result = self.encode_pass(buffer, params);
        telemetry::record_histogram(
            tags::METRIC_ENGINE_ENCODE_LATENCY_US,
            telemetry::elapsed_us(started_at),
        );
        self.finish_call("encode", params, &result);
        if result.is_ok() {
            telemetry::increment_counter(tags::METRIC_ENGINE_ENCODE_COUNT, 1);
        }
        result
    }

    /// Restores the block packed in `buffer` in place.
    ///
    /// `params` must be the ones the block was encoded with, and the engine
    /// must use the same target sub-block count. On success `buffer` holds
    /// the raw block and its length is returned.
    pub fn decode(&self, buffer: &mut BytesMut, params: &BlockParams) -> Result<usize> {
        let started_at = Instant::now();
        let result = self.decode_pass(buffer, params);
        telemetry::record_histogram(
            tags::METRIC_ENGINE_DECODE_LATENCY_US,
            telemetry::elapsed_us(started_at),
        );
        self.finish_call("decode", params, &result);
        if result.is_ok() {
            telemetry::increment_counter(tags::METRIC_ENGINE_DECODE_COUNT, 1);
        }
        result
    }

    fn pool(&self) -> Arc<WorkerPool> {
        let slot = match self.pool.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&slot)
    }

    fn finish_call(&self, pass: &'static str, params: &BlockParams, result: &Result<usize>) {
        match result {
            Ok(size) => tracing::debug!(
                target: tags::TARGET_ENGINE,
                pass,
                rows = params.rows,
                length = params.length,
                typesize = params.typesize,
                size,
                "pass complete"
            ),
            Err(error) => {
                telemetry::increment_counter(tags::METRIC_ENGINE_FAILURE_COUNT, 1);
                tracing::warn!(
                    target: tags::TARGET_ENGINE,
                    pass,
                    rows = params.rows,
                    sub_block = error.sub_block_index(),
                    %error,
                    "pass failed"
                );
            }
        }
    }

    fn encode_pass(&self, buffer: &mut BytesMut, params: &BlockParams) -> Result<usize> {
        params.validate()?;
        let raw_len = params.block_bytes()?;
        let row_bytes = params.row_bytes()?;
        if buffer.len() < raw_len {
            return Err(TesseraError::Parameter(format!(
                "buffer holds {} bytes but the block needs {raw_len}",
                buffer.len()
            )));
        }
        let blocks = partition(params.rows, self.config.target_subchunks)?;

        let pool = self.pool();
        let _pause = pool.pause();

        buffer.truncate(raw_len);
        let input = buffer.split().freeze();
        let handles = blocks
            .iter()
            .map(|block| {
                let source = input.slice(block.byte_range(row_bytes));
                self.submit_encode(&pool, params, *block, source)
            })
            .collect::<Result<Vec<_>>>()?;
        let compressed = join_all(handles)?;
        drop(input);

        let table = SubBlockTable::from_blocks(&compressed)?;
        let total = table
            .total_size()
            .ok_or_else(|| TesseraError::Allocation("packed size overflows usize".into()))?;

        buffer.clear();
        buffer.reserve(total);
        table.write(buffer);
        for block in &compressed {
            buffer.extend_from_slice(block.payload());
        }

        telemetry::record_histogram(tags::METRIC_ENGINE_SUBCHUNKS, blocks.len() as u64);
        telemetry::record_histogram(tags::METRIC_ENGINE_RAW_BYTES, raw_len as u64);
        telemetry::record_histogram(tags::METRIC_ENGINE_PACKED_BYTES, total as u64);
        Ok(total)
    }

    fn submit_encode(
        &self,
        pool: &WorkerPool,
        params: &BlockParams,
        block: SubBlock,
        source: Bytes,
    ) -> Result<JobHandle<CompressedSubBlock>> {
        let codec = self.codec.clone();
        let geometry = params.geometry(block.row_count);
        let capacity = source.len() + self.config.encode_slack;

        pool.submit(move |context: &WorkerContext| {
            let mut output = context
                .cache()
                .checkout(ScratchKey::SubBlock(block.index), capacity)?;
            let mut workspace = context.workspace(0)?;
            // A reused buffer may be larger than this sub-block's provision.
            let byte_length = codec.encode_block(
                block.index,
                &source,
                &geometry,
                &mut output[..capacity],
                &mut workspace,
            )?;
            Ok(CompressedSubBlock {
                index: block.index,
                byte_length,
                bytes: output,
            })
        })
    }

    fn decode_pass(&self, buffer: &mut BytesMut, params: &BlockParams) -> Result<usize> {
        params.validate()?;
        let raw_len = params.block_bytes()?;
        let row_bytes = params.row_bytes()?;
        let blocks = partition(params.rows, self.config.target_subchunks)?;

        let pool = self.pool();
        let _pause = pool.pause();

        let stream = buffer.split().freeze();
        let table = SubBlockTable::parse(&stream, blocks.len() as u32)?;

        // Copy every compressed span out before the buffer is reused for
        // the decoded block.
        let handles = table
            .spans()
            .into_iter()
            .zip(&blocks)
            .map(|(span, block)| stage(&pool, block.index, stream.slice(span)))
            .collect::<Result<Vec<_>>>()?;
        let staged = join_all(handles)?;
        drop(stream);

        buffer.reserve(raw_len);
        buffer.resize(raw_len, 0);
        let mut parts = Vec::with_capacity(blocks.len());
        for block in &blocks {
            parts.push(buffer.split_to(block.byte_len(row_bytes)));
        }

        let handles = blocks
            .iter()
            .zip(staged)
            .zip(parts)
            .map(|((block, source), part)| self.submit_decode(&pool, params, *block, source, part))
            .collect::<Result<Vec<_>>>()?;
        for part in join_all(handles)? {
            buffer.unsplit(part);
        }

        telemetry::record_histogram(tags::METRIC_ENGINE_SUBCHUNKS, blocks.len() as u64);
        telemetry::record_histogram(tags::METRIC_ENGINE_RAW_BYTES, raw_len as u64);
        Ok(buffer.len())
    }

    fn submit_decode(
        &self,
        pool: &WorkerPool,
        params: &BlockParams,
        block: SubBlock,
        source: Staged,
        mut part: BytesMut,
    ) -> Result<JobHandle<BytesMut>> {
        let codec = self.codec.clone();
        let geometry = params.geometry(block.row_count);

        pool.submit(move |_context: &WorkerContext| {
            codec.decode_block(block.index, source.bytes(), &geometry, &mut part)?;
            Ok(part)
        })
    }
}

/// A compressed sub-block copied into its own scratch buffer.
#[derive(Debug)]
struct Staged {
    lease: ScratchLease,
    len: usize,
}

impl Staged {
    fn bytes(&self) -> &[u8] {
        &self.lease[..self.len]
    }
}

fn stage(pool: &WorkerPool, index: u32, span: Bytes) -> Result<JobHandle<Staged>> {
    pool.submit(move |context: &WorkerContext| {
        let len = span.len();
        let mut lease = context.cache().checkout(ScratchKey::SubBlock(index), len)?;
        lease[..len].copy_from_slice(&span);
        Ok(Staged { lease, len })
    })
}
