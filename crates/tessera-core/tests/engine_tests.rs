use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use bytes::BytesMut;
use tessera_core::format::header_size;
use tessera_core::partition::subchunk_count;
use tessera_core::{
    BlockParams, Codec, Engine, EngineConfig, Geometry, LocoCodec, ScratchBuffer, SubBlockTable,
    TesseraError,
};

fn lcg_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

fn smooth_bytes(params: &BlockParams) -> Vec<u8> {
    let typesize = params.typesize as usize;
    let mut out = Vec::with_capacity(params.block_bytes().unwrap());
    for y in 0..params.rows as usize {
        for x in 0..params.length as usize {
            let value = (x / 7 + y / 3) as u64;
            out.extend_from_slice(&value.to_le_bytes()[..typesize]);
        }
    }
    out
}

fn engine(workers: usize) -> Engine {
    Engine::new(EngineConfig::default().with_workers(workers)).unwrap()
}

fn round_trip(engine: &Engine, params: &BlockParams, raw: &[u8]) -> usize {
    let mut buffer = BytesMut::from(raw);
    let packed = engine.encode(&mut buffer, params).unwrap();
    assert_eq!(buffer.len(), packed);

    let restored = engine.decode(&mut buffer, params).unwrap();
    assert_eq!(restored, raw.len());
    assert!(&buffer[..] == raw, "round trip changed {params:?}");
    packed
}

#[test]
fn random_blocks_round_trip() {
    let engine = engine(4);
    let mut seed = 1;
    for rows in [1u32, 5, 100, 943] {
        for length in [1u32, 721] {
            for typesize in [1u32, 2] {
                let params = BlockParams::new(length, rows, typesize);
                let raw = lcg_bytes(params.block_bytes().unwrap(), seed);
                seed += 1;
                round_trip(&engine, &params, &raw);
            }
        }
    }
}

#[test]
fn smooth_blocks_shrink() {
    let engine = engine(3);
    for typesize in [1u32, 2] {
        let params = BlockParams::new(721, 100, typesize);
        let raw = smooth_bytes(&params);
        let packed = round_trip(&engine, &params, &raw);
        assert!(packed < raw.len() / 2, "{packed} of {} bytes", raw.len());
    }
}

#[test]
fn interleaved_components_round_trip() {
    let engine = engine(2);
    let params = BlockParams::new(30, 40, 1).with_components(3);
    let raw = smooth_bytes(&params);
    round_trip(&engine, &params, &raw);
}

#[test]
fn header_lists_every_sub_block_length() {
    let engine = engine(4);
    for rows in [1u32, 3, 24, 100] {
        let params = BlockParams::new(64, rows, 2);
        let raw = lcg_bytes(params.block_bytes().unwrap(), u64::from(rows));
        let mut buffer = BytesMut::from(&raw[..]);
        let total = engine.encode(&mut buffer, &params).unwrap();

        let subchunks = subchunk_count(rows, 24);
        let table = SubBlockTable::parse(&buffer, subchunks).unwrap();
        assert_eq!(table.header_size(), header_size(subchunks));
        assert_eq!(table.header_size(), subchunks as usize * 4);
        let payload: usize = table.lengths().iter().map(|&len| len as usize).sum();
        assert_eq!(total, table.header_size() + payload);
    }
}

#[test]
fn trailing_input_bytes_are_ignored() {
    let engine = engine(2);
    let params = BlockParams::new(16, 4, 1);
    let raw = smooth_bytes(&params);
    let mut buffer = BytesMut::from(&raw[..]);
    buffer.extend_from_slice(&[0xFF; 9]);

    engine.encode(&mut buffer, &params).unwrap();
    engine.decode(&mut buffer, &params).unwrap();
    assert_eq!(&buffer[..], &raw[..]);
}

/// Refuses any sub-block whose first byte is `0xEE`.
struct Poisoned;

impl Codec for Poisoned {
    fn name(&self) -> &'static str {
        "poisoned"
    }

    fn encode(
        &self,
        src: &[u8],
        geometry: &Geometry,
        dst: &mut [u8],
        workspace: &mut ScratchBuffer,
    ) -> anyhow::Result<usize> {
        if src.first() == Some(&0xEE) {
            bail!("poisoned sub-block");
        }
        LocoCodec.encode(src, geometry, dst, workspace)
    }

    fn decode(&self, src: &[u8], geometry: &Geometry, dst: &mut [u8]) -> anyhow::Result<usize> {
        LocoCodec.decode(src, geometry, dst)
    }
}

#[test]
fn failing_sub_block_fails_the_whole_encode() {
    let engine =
        Engine::with_codec(EngineConfig::default().with_workers(4), Arc::new(Poisoned)).unwrap();
    let params = BlockParams::new(8, 5, 1);
    let mut raw = vec![1u8; 40];
    raw[16] = 0xEE;

    let mut buffer = BytesMut::from(&raw[..]);
    let err = engine.encode(&mut buffer, &params).unwrap_err();
    match &err {
        TesseraError::Codec { index, message } => {
            assert_eq!(*index, 2);
            assert!(message.contains("poisoned sub-block"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(buffer.is_empty());

    // The engine stays usable.
    raw[16] = 1;
    let mut buffer = BytesMut::from(&raw[..]);
    engine.encode(&mut buffer, &params).unwrap();
}

#[test]
fn corrupted_sub_block_fails_the_whole_decode() {
    let engine = engine(4);
    let params = BlockParams::new(8, 5, 1);
    let raw = lcg_bytes(40, 99);
    let mut buffer = BytesMut::from(&raw[..]);
    engine.encode(&mut buffer, &params).unwrap();

    let table = SubBlockTable::parse(&buffer, 5).unwrap();
    let target = table.spans()[3].start;
    buffer[target] ^= 0xFF;

    let err = engine.decode(&mut buffer, &params).unwrap_err();
    assert_eq!(err.sub_block_index(), Some(3));
    assert!(buffer.is_empty());
}

#[test]
fn inconsistent_streams_are_invalid_format() {
    let engine = engine(2);
    let params = BlockParams::new(8, 5, 1);

    let mut buffer = BytesMut::from(&[0u8; 7][..]);
    assert!(matches!(
        engine.decode(&mut buffer, &params),
        Err(TesseraError::InvalidFormat(_))
    ));

    let mut encoded = BytesMut::from(&lcg_bytes(40, 5)[..]);
    engine.encode(&mut encoded, &params).unwrap();
    encoded.truncate(encoded.len() - 1);
    assert!(matches!(
        engine.decode(&mut encoded, &params),
        Err(TesseraError::InvalidFormat(_))
    ));
}

#[test]
fn parameter_errors_leave_the_buffer_alone() {
    let engine = engine(1);
    let raw = lcg_bytes(32, 3);

    for params in [
        BlockParams::new(0, 4, 1),
        BlockParams::new(8, 0, 1),
        BlockParams::new(8, 4, 0),
        BlockParams::new(9, 4, 1).with_components(2),
        BlockParams::new(8, 8, 1),
    ] {
        let mut buffer = BytesMut::from(&raw[..]);
        let err = engine.encode(&mut buffer, &params).unwrap_err();
        assert!(matches!(err, TesseraError::Parameter(_)), "{params:?}: {err}");
        assert_eq!(&buffer[..], &raw[..]);
    }
}

/// Claims 16 bytes more than its input, capped at the space it was given.
struct Padded;

impl Codec for Padded {
    fn name(&self) -> &'static str {
        "padded"
    }

    fn encode(
        &self,
        src: &[u8],
        _geometry: &Geometry,
        dst: &mut [u8],
        _workspace: &mut ScratchBuffer,
    ) -> anyhow::Result<usize> {
        Ok((src.len() + 16).min(dst.len()))
    }

    fn decode(&self, _src: &[u8], _geometry: &Geometry, _dst: &mut [u8]) -> anyhow::Result<usize> {
        bail!("not used")
    }
}

#[test]
fn undersized_encode_slack_is_a_provisioning_error() {
    let config = EngineConfig {
        encode_slack: 4,
        ..EngineConfig::default().with_workers(2)
    };
    let engine = Engine::with_codec(config, Arc::new(Padded)).unwrap();
    let params = BlockParams::new(8, 2, 1);
    let mut buffer = BytesMut::from(&[0u8; 16][..]);
    let err = engine.encode(&mut buffer, &params).unwrap_err();
    assert!(matches!(err, TesseraError::Provisioning { .. }), "{err}");
}

#[test]
fn provisioning_ignores_larger_cached_buffers() {
    let config = EngineConfig {
        encode_slack: 4,
        ..EngineConfig::default()
            .with_workers(1)
            .with_target_subchunks(1)
            .with_idle_period(Duration::from_secs(600))
    };
    let engine = Engine::with_codec(config, Arc::new(Padded)).unwrap();

    // Leaves a 1028-byte buffer cached under sub-block 0.
    let large = BlockParams::new(64, 16, 1);
    let mut buffer = BytesMut::from(&[0u8; 1024][..]);
    assert!(matches!(
        engine.encode(&mut buffer, &large),
        Err(TesseraError::Provisioning { .. })
    ));

    let small = BlockParams::new(8, 2, 1);
    let mut buffer = BytesMut::from(&[0u8; 16][..]);
    match engine.encode(&mut buffer, &small) {
        Err(TesseraError::Provisioning { index, capacity, .. }) => {
            assert_eq!(index, 0);
            assert_eq!(capacity, 20);
        }
        other => panic!("expected a provisioning error, got {other:?}"),
    }
    assert!(buffer.is_empty());
}

#[test]
fn concurrent_calls_stay_isolated() {
    let engine = Arc::new(engine(4));
    let handles: Vec<_> = (0..6u64)
        .map(|call| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let params = BlockParams::new(97 + call as u32, 50, 1 + (call % 2) as u32);
                for round in 0..5 {
                    let raw = lcg_bytes(params.block_bytes().unwrap(), call * 100 + round);
                    round_trip(&engine, &params, &raw);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn resizing_the_pool_only_rebuilds_on_change() {
    let engine = engine(2);
    assert_eq!(engine.worker_count(), 2);
    assert!(!engine.set_workers(Some(2)).unwrap());
    assert!(engine.set_workers(Some(5)).unwrap());
    assert_eq!(engine.worker_count(), 5);

    let params = BlockParams::new(40, 30, 2);
    round_trip(&engine, &params, &smooth_bytes(&params));

    engine.set_workers(None).unwrap();
    assert_eq!(
        engine.worker_count(),
        tessera_core::config::default_workers()
    );
}

#[test]
fn scratch_buffers_are_cached_between_calls_and_reclaimable() {
    let engine = Engine::new(
        EngineConfig::default()
            .with_workers(2)
            .with_idle_period(Duration::from_secs(60)),
    )
    .unwrap();
    let params = BlockParams::new(64, 48, 1);
    let raw = smooth_bytes(&params);

    round_trip(&engine, &params, &raw);
    let first = engine.scratch_metrics();
    assert!(first.allocated > 0);
    assert!(first.cached_bytes > 0);

    round_trip(&engine, &params, &raw);
    let second = engine.scratch_metrics();
    assert!(second.reused > first.reused);

    let freed = engine.reclaim_now().unwrap();
    assert_eq!(freed as u64, second.cached_bytes);
    assert_eq!(engine.scratch_metrics().cached_bytes, 0);
}

#[test]
fn zero_target_subchunks_is_rejected_at_construction() {
    let config = EngineConfig::default().with_target_subchunks(0);
    assert!(matches!(Engine::new(config), Err(TesseraError::Parameter(_))));
}

#[cfg(feature = "telemetry")]
#[test]
fn passes_are_counted() {
    use tessera_core::telemetry::{self, tags};

    let engine = engine(2);
    let params = BlockParams::new(16, 16, 1);
    round_trip(&engine, &params, &smooth_bytes(&params));

    let snapshot = telemetry::snapshot();
    assert!(snapshot.counter(tags::METRIC_ENGINE_ENCODE_COUNT).unwrap_or(0) >= 1);
    assert!(snapshot.counter(tags::METRIC_ENGINE_DECODE_COUNT).unwrap_or(0) >= 1);
    assert!(snapshot.histogram(tags::METRIC_ENGINE_SUBCHUNKS).is_some());
}
