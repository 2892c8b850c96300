use tessera_core::partition::{partition, subchunk_count};
use tessera_core::{SubBlock, TesseraError};

fn assert_covers(rows: u32, target: u32, blocks: &[SubBlock]) {
    assert_eq!(blocks.len() as u32, target.min(rows));
    let mut next_row = 0;
    for (position, block) in blocks.iter().enumerate() {
        assert_eq!(block.index as usize, position);
        assert_eq!(block.row_offset, next_row, "gap or overlap at {position}");
        assert!(block.row_count >= 1);
        next_row += block.row_count;
    }
    assert_eq!(next_row, rows);
}

#[test]
fn every_row_is_covered_exactly_once() {
    for rows in 1..=200 {
        for target in 1..=40 {
            let blocks = partition(rows, target).unwrap();
            assert_covers(rows, target, &blocks);
        }
    }
}

#[test]
fn hundred_rows_into_twenty_four() {
    let blocks = partition(100, 24).unwrap();
    assert_eq!(blocks.len(), 24);
    let counts: Vec<u32> = blocks.iter().map(|b| b.row_count).collect();
    assert_eq!(&counts[..4], &[5, 5, 5, 5]);
    assert!(counts[4..].iter().all(|&c| c == 4));
    assert_eq!(counts.iter().sum::<u32>(), 100);
}

#[test]
fn fewer_rows_than_target_gives_single_row_blocks() {
    let blocks = partition(3, 24).unwrap();
    assert_eq!(
        blocks,
        vec![
            SubBlock { index: 0, row_offset: 0, row_count: 1 },
            SubBlock { index: 1, row_offset: 1, row_count: 1 },
            SubBlock { index: 2, row_offset: 2, row_count: 1 },
        ]
    );
    assert_eq!(subchunk_count(3, 24), 3);
}

#[test]
fn byte_ranges_follow_row_offsets() {
    let blocks = partition(10, 4).unwrap();
    let row_bytes = 6;
    let ranges: Vec<_> = blocks.iter().map(|b| b.byte_range(row_bytes)).collect();
    assert_eq!(ranges, vec![0..18, 18..36, 36..48, 48..60]);
}

#[test]
fn degenerate_inputs_are_parameter_errors() {
    assert!(matches!(partition(0, 24), Err(TesseraError::Parameter(_))));
    assert!(matches!(partition(24, 0), Err(TesseraError::Parameter(_))));
}
