//! Seam between the engine and the lossless codec that does the real work.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::{ScratchBuffer, ScratchLease};
use crate::core::worker_pool::panic_message;
use crate::telemetry::tags;
use crate::{Result, TesseraError};

mod bits;
pub mod loco;

pub use loco::LocoCodec;

/// Frame description handed to the codec for one sub-block.
///
/// `width` counts pixels per row; each pixel carries `component_count`
/// sample-interleaved samples of `bits_per_sample` bits, stored little-endian
/// in `ceil(bits_per_sample / 8)` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    pub component_count: u32,
}

impl Geometry {
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample.div_ceil(8) as usize
    }

    #[inline]
    pub fn samples(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.component_count as usize)
    }

    /// Uncompressed size of the frame in bytes.
    #[inline]
    pub fn raw_len(&self) -> usize {
        self.samples().saturating_mul(self.bytes_per_sample())
    }
}

/// A codec ran out of destination space.
///
/// Codecs return this (wrapped in `anyhow::Error`) instead of a generic
/// failure so the adapter can report it as a provisioning problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("destination holds {available} bytes but {required} are needed")]
pub struct DestinationFull {
    pub required: usize,
    pub available: usize,
}

/// A lossless image codec driven one sub-block at a time.
///
/// Implementations must be stateless across calls: the engine runs many
/// sub-blocks through the same instance concurrently.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compresses `src` into `dst` and returns the bytes written.
    ///
    /// `workspace` is transient scratch private to the calling worker; it may
    /// be grown but its contents are undefined on entry.
    fn encode(
        &self,
        src: &[u8],
        geometry: &Geometry,
        dst: &mut [u8],
        workspace: &mut ScratchBuffer,
    ) -> anyhow::Result<usize>;

    /// Decompresses `src` into `dst` and returns the bytes written.
    fn decode(&self, src: &[u8], geometry: &Geometry, dst: &mut [u8]) -> anyhow::Result<usize>;
}

/// Calls into a [`Codec`] and turns everything it can throw at us into
/// [`TesseraError`] values tagged with the sub-block index.
#[derive(Clone)]
pub struct CodecAdapter {
    codec: Arc<dyn Codec>,
}

impl CodecAdapter {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    pub fn name(&self) -> &'static str {
        self.codec.name()
    }

    /// Encodes `src` into `dst`, which is exactly the provisioned output
    /// space.
    ///
    /// A reported size at or past `dst.len()` is a provisioning error, as is
    /// [`DestinationFull`].
    pub fn encode_block(
        &self,
        index: u32,
        src: &[u8],
        geometry: &Geometry,
        dst: &mut [u8],
        workspace: &mut ScratchLease,
    ) -> Result<usize> {
        let capacity = dst.len();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.codec
                .encode(src, geometry, dst, workspace.buffer_mut())
        }));

        let result = match outcome {
            Ok(Ok(written)) if written >= capacity => Err(TesseraError::Provisioning {
                index,
                required: written,
                capacity,
            }),
            Ok(Ok(written)) => Ok(written),
            Ok(Err(error)) => match error.downcast_ref::<DestinationFull>() {
                Some(full) => Err(TesseraError::Provisioning {
                    index,
                    required: full.required,
                    capacity,
                }),
                None => Err(self.codec_error(index, &error)),
            },
            Err(payload) => Err(TesseraError::Codec {
                index,
                message: format!("codec panicked: {}", panic_message(payload.as_ref())),
            }),
        };

        if let Err(error) = &result {
            tracing::warn!(
                target: tags::TARGET_CODEC,
                index,
                codec = self.name(),
                %error,
                "sub-block encode failed"
            );
        }
        result
    }

    /// Decodes `src` into `dst`, which must be exactly the sub-block's raw
    /// size.
    pub fn decode_block(
        &self,
        index: u32,
        src: &[u8],
        geometry: &Geometry,
        dst: &mut [u8],
    ) -> Result<usize> {
        let expected = dst.len();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.codec.decode(src, geometry, dst)));

        let result = match outcome {
            Ok(Ok(written)) if written == expected => Ok(written),
            Ok(Ok(written)) => Err(TesseraError::Codec {
                index,
                message: format!("decoded {written} bytes, expected {expected}"),
            }),
            Ok(Err(error)) => Err(self.codec_error(index, &error)),
            Err(payload) => Err(TesseraError::Codec {
                index,
                message: format!("codec panicked: {}", panic_message(payload.as_ref())),
            }),
        };

        if let Err(error) = &result {
            tracing::warn!(
                target: tags::TARGET_CODEC,
                index,
                codec = self.name(),
                %error,
                "sub-block decode failed"
            );
        }
        result
    }

    fn codec_error(&self, index: u32, error: &anyhow::Error) -> TesseraError {
        TesseraError::Codec {
            index,
            message: format!("{}: {error:#}", self.name()),
        }
    }
}

impl std::fmt::Debug for CodecAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecAdapter")
            .field("codec", &self.name())
            .finish()
    }
}
