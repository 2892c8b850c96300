use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::buffer::ScratchLease;
use crate::codec::Geometry;
use crate::error::TesseraError;

pub type Result<T> = std::result::Result<T, TesseraError>;

/// Shape of one block handed to the engine.
///
/// A block is `rows` rows of `length` elements, each element `typesize`
/// bytes wide. When `components > 1` the elements of a row are
/// sample-interleaved pixels, so `length` must be a multiple of
/// `components`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    pub length: u32,
    pub rows: u32,
    pub typesize: u32,
    pub components: u32,
}

impl BlockParams {
    /// Single-component block parameters.
    pub fn new(length: u32, rows: u32, typesize: u32) -> Self {
        Self {
            length,
            rows,
            typesize,
            components: 1,
        }
    }

    pub fn with_components(mut self, components: u32) -> Self {
        self.components = components;
        self
    }

    /// Rejects parameters no block can have.
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(TesseraError::Parameter("length must be positive".into()));
        }
        if self.rows == 0 {
            return Err(TesseraError::Parameter("rows must be positive".into()));
        }
        if self.typesize == 0 {
            return Err(TesseraError::Parameter("typesize must be positive".into()));
        }
        if self.components == 0 {
            return Err(TesseraError::Parameter(
                "component count must be positive".into(),
            ));
        }
        if self.length % self.components != 0 {
            return Err(TesseraError::Parameter(format!(
                "row length {} is not a multiple of the component count {}",
                self.length, self.components
            )));
        }
        self.block_bytes().map(|_| ())
    }

    /// Bytes in one row of the block.
    pub fn row_bytes(&self) -> Result<usize> {
        (self.length as usize)
            .checked_mul(self.typesize as usize)
            .ok_or_else(|| TesseraError::Parameter("row size overflows usize".into()))
    }

    /// Bytes in the whole uncompressed block.
    pub fn block_bytes(&self) -> Result<usize> {
        self.row_bytes()?
            .checked_mul(self.rows as usize)
            .ok_or_else(|| TesseraError::Parameter("block size overflows usize".into()))
    }

    /// Codec geometry of a sub-block spanning `row_count` rows.
    pub fn geometry(&self, row_count: u32) -> Geometry {
        Geometry {
            width: self.length / self.components.max(1),
            height: row_count,
            bits_per_sample: self.typesize.saturating_mul(8),
            component_count: self.components,
        }
    }
}

/// A contiguous run of rows inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubBlock {
    pub index: u32,
    pub row_offset: u32,
    pub row_count: u32,
}

impl SubBlock {
    /// Byte range of this sub-block inside the uncompressed block.
    pub fn byte_range(&self, row_bytes: usize) -> Range<usize> {
        let start = self.row_offset as usize * row_bytes;
        start..start + self.row_count as usize * row_bytes
    }

    /// Raw size of the sub-block.
    pub fn byte_len(&self, row_bytes: usize) -> usize {
        self.row_count as usize * row_bytes
    }
}

/// Output of one encode job. `byte_length` is authoritative; the lease may
/// be larger.
#[derive(Debug)]
pub struct CompressedSubBlock {
    pub index: u32,
    pub byte_length: usize,
    pub bytes: ScratchLease,
}

impl CompressedSubBlock {
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.byte_length]
    }
}
