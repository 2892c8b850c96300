//! Host-facing filter contract: parameter vectors, chunk-shape derivation,
//! and a single entry point that dispatches on direction.

use bytes::BytesMut;

use crate::config::worker_setting_from_env;
use crate::engine::Engine;
use crate::types::BlockParams;
use crate::{Result, TesseraError};

/// Host flag bit marking a decompression call.
pub const FLAG_REVERSE: u32 = 0x0100;

/// Which way a filter call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Compress.
    Forward,
    /// Decompress.
    Reverse,
}

impl Direction {
    pub fn from_flags(flags: u32) -> Self {
        if flags & FLAG_REVERSE != 0 {
            Self::Reverse
        } else {
            Self::Forward
        }
    }
}

impl BlockParams {
    /// Reads `[length, rows, typesize, (components)]`.
    ///
    /// A missing or zero component count means one component.
    pub fn from_cd_values(values: &[u32]) -> Result<Self> {
        match values {
            [length, rows, typesize, rest @ ..] if *length > 0 => {
                let components = rest.first().copied().filter(|&c| c > 0).unwrap_or(1);
                Ok(Self::new(*length, *rows, *typesize).with_components(components))
            }
            _ => Err(TesseraError::Parameter(
                "incorrect number of filter parameters".into(),
            )),
        }
    }

    /// Parameter vector for the host; the component count is only emitted
    /// when there is more than one.
    pub fn to_cd_values(&self) -> Vec<u32> {
        let mut values = vec![self.length, self.rows, self.typesize];
        if self.components > 1 {
            values.push(self.components);
        }
        values
    }

    /// Derives block parameters from a chunk shape.
    ///
    /// The fastest-varying dimension becomes the row length and the others
    /// fold into the row count. In byte mode every element is treated as
    /// `element_size` one-byte samples.
    pub fn for_chunk(chunk_dims: &[u64], element_size: u32, byte_mode: bool) -> Result<Self> {
        let Some((&last, leading)) = chunk_dims.split_last() else {
            return Err(TesseraError::Parameter("chunk has no dimensions".into()));
        };
        if element_size == 0 {
            return Err(TesseraError::Parameter("element size must be positive".into()));
        }

        let rows = leading
            .iter()
            .try_fold(1u64, |rows, &dim| rows.checked_mul(dim))
            .and_then(|rows| u32::try_from(rows).ok())
            .ok_or_else(|| TesseraError::Parameter("chunk row count exceeds u32".into()))?;
        let length = u32::try_from(last)
            .map_err(|_| TesseraError::Parameter("chunk row length exceeds u32".into()))?;

        let params = if byte_mode {
            let length = length.checked_mul(element_size).ok_or_else(|| {
                TesseraError::Parameter("byte-mode row length exceeds u32".into())
            })?;
            Self::new(length, rows, 1)
        } else {
            Self::new(length, rows, element_size)
        };
        params.validate()?;
        Ok(params)
    }
}

impl Engine {
    /// Runs one host filter call over `buffer`.
    ///
    /// The worker setting is re-read from the environment first, falling
    /// back to the configured one when the variable is unset, and the pool
    /// is rebuilt if it changed. Returns the number of valid bytes left in
    /// `buffer`.
    pub fn apply_filter(
        &self,
        direction: Direction,
        cd_values: &[u32],
        buffer: &mut BytesMut,
    ) -> Result<usize> {
        self.set_workers(worker_setting_from_env().or(self.config().workers))?;
        let params = BlockParams::from_cd_values(cd_values)?;
        match direction {
            Direction::Forward => self.encode(buffer, &params),
            Direction::Reverse => self.decode(buffer, &params),
        }
    }
}
