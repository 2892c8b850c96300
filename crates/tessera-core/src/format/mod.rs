//! Packed stream layout: a table of sub-block lengths followed by the
//! concatenated sub-block payloads.

mod header;

pub use header::SubBlockTable;

/// Bytes per entry in the sub-block length table.
pub const HEADER_ENTRY_SIZE: usize = 4;

/// Size of the length table for `subchunks` sub-blocks.
#[inline]
pub const fn header_size(subchunks: u32) -> usize {
    subchunks as usize * HEADER_ENTRY_SIZE
}
