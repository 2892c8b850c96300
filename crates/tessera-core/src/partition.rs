use crate::types::SubBlock;
use crate::{Result, TesseraError};

/// Splits `rows` into at most `target_subchunks` contiguous sub-blocks.
///
/// Never splits finer than one row per sub-block. When the rows do not
/// divide evenly, the first `rows % subchunks` sub-blocks take one extra
/// row each.
pub fn partition(rows: u32, target_subchunks: u32) -> Result<Vec<SubBlock>> {
    if target_subchunks == 0 {
        return Err(TesseraError::Parameter(
            "target sub-chunk count must be positive".into(),
        ));
    }
    if rows == 0 {
        return Err(TesseraError::Parameter("rows must be positive".into()));
    }

    let subchunks = target_subchunks.min(rows);
    let lblocks = rows / subchunks;
    let remainder = rows - lblocks * subchunks;

    let mut blocks = Vec::with_capacity(subchunks as usize);
    let mut row_offset = 0u32;
    for index in 0..subchunks {
        let row_count = if index < remainder { lblocks + 1 } else { lblocks };
        blocks.push(SubBlock {
            index,
            row_offset,
            row_count,
        });
        row_offset += row_count;
    }

    Ok(blocks)
}

/// Number of sub-blocks [`partition`] produces for the same inputs.
#[inline]
pub fn subchunk_count(rows: u32, target_subchunks: u32) -> u32 {
    target_subchunks.min(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_rows_go_to_leading_blocks() {
        let blocks = partition(100, 24).unwrap();
        assert_eq!(blocks.len(), 24);
        assert!(blocks[..4].iter().all(|b| b.row_count == 5));
        assert!(blocks[4..].iter().all(|b| b.row_count == 4));
        assert_eq!(blocks[4].row_offset, 20);
    }

    #[test]
    fn zero_target_is_rejected() {
        assert!(matches!(partition(10, 0), Err(TesseraError::Parameter(_))));
    }

    #[test]
    fn count_matches_partition_len() {
        for rows in 1..40 {
            for target in 1..30 {
                let blocks = partition(rows, target).unwrap();
                assert_eq!(blocks.len() as u32, subchunk_count(rows, target));
            }
        }
    }
}
