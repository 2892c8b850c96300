use std::ops::Range;

use bytes::BufMut;

use super::{HEADER_ENTRY_SIZE, header_size};
use crate::types::CompressedSubBlock;
use crate::{Result, TesseraError};

/// Compressed byte length of every sub-block, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBlockTable {
    lengths: Vec<u32>,
}

impl SubBlockTable {
    pub fn new(lengths: Vec<u32>) -> Self {
        Self { lengths }
    }

    /// Collects the lengths of encoded sub-blocks, which must be in index
    /// order.
    pub fn from_blocks(blocks: &[CompressedSubBlock]) -> Result<Self> {
        let mut lengths = Vec::with_capacity(blocks.len());
        for (position, block) in blocks.iter().enumerate() {
            if block.index as usize != position {
                return Err(TesseraError::InvalidFormat("sub-blocks out of index order"));
            }
            let length = u32::try_from(block.byte_length)
                .map_err(|_| TesseraError::InvalidFormat("sub-block length exceeds u32 range"))?;
            lengths.push(length);
        }
        Ok(Self { lengths })
    }

    /// Reads the table for `subchunks` sub-blocks from the front of `stream`
    /// and checks that the lengths account for the rest of it exactly.
    pub fn parse(stream: &[u8], subchunks: u32) -> Result<Self> {
        let table_len = header_size(subchunks);
        if stream.len() < table_len {
            return Err(TesseraError::InvalidFormat("truncated sub-block header"));
        }

        let lengths: Vec<u32> = stream[..table_len]
            .chunks_exact(HEADER_ENTRY_SIZE)
            .map(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]))
            .collect();

        let table = Self { lengths };
        let payload = stream.len() - table_len;
        match table.payload_size() {
            Some(total) if total == payload => Ok(table),
            Some(total) if total > payload => Err(TesseraError::InvalidFormat(
                "sub-block lengths exceed the compressed payload",
            )),
            Some(_) => Err(TesseraError::InvalidFormat(
                "trailing bytes after the last sub-block",
            )),
            None => Err(TesseraError::InvalidFormat("sub-block lengths overflow")),
        }
    }

    pub fn subchunks(&self) -> u32 {
        self.lengths.len() as u32
    }

    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    pub fn header_size(&self) -> usize {
        self.lengths.len() * HEADER_ENTRY_SIZE
    }

    /// Sum of all sub-block lengths, `None` on overflow.
    pub fn payload_size(&self) -> Option<usize> {
        self.lengths
            .iter()
            .try_fold(0usize, |total, &len| total.checked_add(len as usize))
    }

    /// Header plus payload, `None` on overflow.
    pub fn total_size(&self) -> Option<usize> {
        self.payload_size()?.checked_add(self.header_size())
    }

    /// Absolute byte range of each sub-block's payload within the stream.
    pub fn spans(&self) -> Vec<Range<usize>> {
        let mut start = self.header_size();
        self.lengths
            .iter()
            .map(|&len| {
                let span = start..start + len as usize;
                start = span.end;
                span
            })
            .collect()
    }

    pub fn write<B: BufMut>(&self, out: &mut B) {
        for &length in &self.lengths {
            out.put_u32_le(length);
        }
    }
}
