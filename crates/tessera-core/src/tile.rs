use crate::codec::Geometry;
use crate::{Result, TesseraError};

/// A rectangle copied out of a larger image, packed row after row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub row: u32,
    pub col: u32,
    /// `height` rows of `width` pixels each.
    pub data: Vec<u8>,
}

/// Copies the `geometry.width` x `geometry.height` rectangle whose top-left
/// pixel sits at (`row`, `col`) out of a row-major image `image_cols`
/// pixels wide.
///
/// Pixels carry `geometry.component_count` interleaved samples of
/// `geometry.bytes_per_sample()` bytes each. An empty rectangle on the image
/// edge yields an empty tile.
pub fn copy_tile(
    buffer: &[u8],
    image_cols: usize,
    row: u32,
    col: u32,
    geometry: &Geometry,
) -> Result<Tile> {
    let pixel_bytes = geometry.component_count as usize * geometry.bytes_per_sample();
    let src_stride = image_cols * pixel_bytes;
    let dst_stride = geometry.width as usize * pixel_bytes;
    let height = geometry.height as usize;
    if src_stride == 0 {
        return Err(TesseraError::Parameter("image rows hold no bytes".into()));
    }

    if col as usize + geometry.width as usize > image_cols {
        return Err(TesseraError::Parameter(format!(
            "tile columns {col}..{} exceed image width {image_cols}",
            col as usize + geometry.width as usize
        )));
    }
    let image_rows = buffer.len() / src_stride;
    if row as usize + height > image_rows {
        return Err(TesseraError::Parameter(format!(
            "tile rows {row}..{} exceed image height {image_rows}",
            row as usize + height
        )));
    }

    if height == 0 || dst_stride == 0 {
        return Ok(Tile { row, col, data: Vec::new() });
    }

    let origin = row as usize * src_stride + col as usize * pixel_bytes;
    let mut data = Vec::with_capacity(height * dst_stride);
    for line in buffer[origin..].chunks(src_stride).take(height) {
        data.extend_from_slice(&line[..dst_stride]);
    }

    Ok(Tile { row, col, data })
}
