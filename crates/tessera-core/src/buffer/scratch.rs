use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::telemetry::{self, tags};
use crate::{Result, TesseraError};

/// Identifies a cached scratch buffer.
///
/// `Worker` buffers belong to one worker slot and hold transient state that
/// never leaves a job. `SubBlock` buffers are addressed by sub-block index and
/// carry data across the fan-out/fan-in boundary of an engine pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScratchKey {
    Worker(usize),
    SubBlock(u32),
}

/// A byte buffer whose size only ever grows.
///
/// Growing frees the old allocation and replaces it with one of exactly the
/// requested size. Contents are not preserved across growth and are not
/// cleared between uses.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    data: Vec<u8>,
}

impl ScratchBuffer {
    /// Allocates a buffer of exactly `size` bytes.
    pub fn with_size(size: usize) -> Result<Self> {
        Ok(Self {
            data: allocate(size)?,
        })
    }

    /// Usable bytes in the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Makes sure at least `min_size` bytes are usable.
    ///
    /// Returns `true` when the buffer had to be reallocated.
    pub fn ensure(&mut self, min_size: usize) -> Result<bool> {
        if self.data.len() >= min_size {
            return Ok(false);
        }
        self.data = Vec::new();
        self.data = allocate(min_size)?;
        Ok(true)
    }
}

impl Deref for ScratchBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

fn allocate(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size).map_err(|err| {
        TesseraError::Allocation(format!("scratch buffer of {size} bytes: {err}"))
    })?;
    data.resize(size, 0);
    Ok(data)
}

/// Snapshot of scratch cache activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScratchMetricsSnapshot {
    /// Buffers created because no cached buffer existed for the key.
    pub allocated: u64,
    /// Cached buffers that were too small and got reallocated.
    pub grown: u64,
    /// Cached buffers handed out unchanged.
    pub reused: u64,
    /// Bytes released by [`ScratchCache::clear_all`].
    pub reclaimed_bytes: u64,
    /// Bytes currently parked in the cache.
    pub cached_bytes: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    buffers: Mutex<HashMap<ScratchKey, ScratchBuffer>>,
    allocated: AtomicU64,
    grown: AtomicU64,
    reused: AtomicU64,
    reclaimed_bytes: AtomicU64,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ScratchKey, ScratchBuffer>> {
        match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn cached_bytes(buffers: &HashMap<ScratchKey, ScratchBuffer>) -> u64 {
    buffers.values().map(|b| b.capacity() as u64).sum()
}

/// Keyed cache of reusable scratch buffers.
///
/// Buffers are checked out as owned [`ScratchLease`]s and go back into the
/// cache when the lease is dropped. A leased buffer is therefore never freed
/// by [`clear_all`](Self::clear_all), and two leases for the same key never
/// share memory: a second checkout while the first is outstanding gets a
/// fresh buffer.
#[derive(Debug, Clone, Default)]
pub struct ScratchCache {
    inner: Arc<CacheInner>,
}

impl ScratchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases the buffer for `key`, grown to at least `min_size` bytes.
    pub fn checkout(&self, key: ScratchKey, min_size: usize) -> Result<ScratchLease> {
        let cached = self.inner.lock().remove(&key);
        let buffer = match cached {
            Some(mut buffer) => {
                if buffer.ensure(min_size)? {
                    self.inner.grown.fetch_add(1, Ordering::Relaxed);
                    telemetry::increment_counter(tags::METRIC_SCRATCH_ALLOCATED_COUNT, 1);
                    tracing::trace!(
                        target: tags::TARGET_SCRATCH,
                        ?key,
                        size = min_size,
                        "scratch buffer grown"
                    );
                } else {
                    self.inner.reused.fetch_add(1, Ordering::Relaxed);
                    telemetry::increment_counter(tags::METRIC_SCRATCH_REUSED_COUNT, 1);
                }
                buffer
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(tags::METRIC_SCRATCH_ALLOCATED_COUNT, 1);
                ScratchBuffer::with_size(min_size)?
            }
        };

        Ok(ScratchLease {
            key,
            buffer,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Frees every cached buffer and returns the number of bytes released.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<ScratchBuffer> = {
            let mut buffers = self.inner.lock();
            buffers.drain().map(|(_, buffer)| buffer).collect()
        };
        let freed: usize = drained.iter().map(ScratchBuffer::capacity).sum();
        drop(drained);

        self.inner
            .reclaimed_bytes
            .fetch_add(freed as u64, Ordering::Relaxed);
        telemetry::set_gauge(tags::METRIC_SCRATCH_CACHED_BYTES, 0);
        freed
    }

    /// Size of the cached buffer for `key`, if one is parked in the cache.
    pub fn capacity_of(&self, key: ScratchKey) -> Option<usize> {
        self.inner.lock().get(&key).map(ScratchBuffer::capacity)
    }

    /// Number of buffers parked in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cached_bytes(&self) -> u64 {
        cached_bytes(&self.inner.lock())
    }

    pub fn metrics(&self) -> ScratchMetricsSnapshot {
        ScratchMetricsSnapshot {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            grown: self.inner.grown.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            reclaimed_bytes: self.inner.reclaimed_bytes.load(Ordering::Relaxed),
            cached_bytes: self.cached_bytes(),
        }
    }
}

/// A scratch buffer checked out of a [`ScratchCache`].
///
/// Dropping the lease parks the buffer back in the cache. If another buffer
/// was parked under the same key in the meantime, the larger one is kept.
#[derive(Debug)]
pub struct ScratchLease {
    key: ScratchKey,
    buffer: ScratchBuffer,
    inner: Arc<CacheInner>,
}

impl ScratchLease {
    /// Cache slot the buffer returns to on drop.
    pub fn key(&self) -> ScratchKey {
        self.key
    }

    /// Length of the leased buffer, which may exceed the size asked for.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Grows the leased buffer to at least `min_size` bytes.
    pub fn ensure(&mut self, min_size: usize) -> Result<()> {
        if self.buffer.ensure(min_size)? {
            self.inner.grown.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// The underlying buffer, for callers that need to grow it.
    pub fn buffer_mut(&mut self) -> &mut ScratchBuffer {
        &mut self.buffer
    }
}

impl Deref for ScratchLease {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for ScratchLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let mut buffers = self.inner.lock();
        match buffers.entry(self.key) {
            Entry::Vacant(slot) => {
                slot.insert(buffer);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().capacity() < buffer.capacity() {
                    slot.insert(buffer);
                }
            }
        }
        telemetry::set_gauge(tags::METRIC_SCRATCH_CACHED_BYTES, cached_bytes(&buffers));
    }
}
