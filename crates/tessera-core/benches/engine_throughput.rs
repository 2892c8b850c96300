use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_core::{BlockParams, Engine, EngineConfig};

fn build_gradient(params: &BlockParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.block_bytes().unwrap_or(0));
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    for y in 0..params.rows as u64 {
        for x in 0..params.length as u64 {
            // xorshift64* noise in the low bits
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let noise = state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 61;
            let value = (x * 3 + y * 5) / 4 + noise;
            out.extend_from_slice(&value.to_le_bytes()[..params.typesize as usize]);
        }
    }
    out
}

fn bench_engine(c: &mut Criterion) {
    let params = BlockParams::new(721, 943, 2);
    let raw = build_gradient(&params);

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.sample_size(20);

    for workers in [1usize, 2, 4, 8] {
        let engine = Engine::new(EngineConfig::default().with_workers(workers))
            .expect("engine construction");

        group.bench_with_input(BenchmarkId::new("encode", workers), &raw, |b, raw| {
            b.iter(|| {
                let mut buffer = BytesMut::from(&raw[..]);
                let size = engine.encode(&mut buffer, &params).expect("encode");
                black_box(size)
            })
        });

        let mut packed = BytesMut::from(&raw[..]);
        engine.encode(&mut packed, &params).expect("encode");
        let packed = packed.freeze();

        group.bench_with_input(BenchmarkId::new("decode", workers), &packed, |b, packed| {
            b.iter(|| {
                let mut buffer = BytesMut::from(&packed[..]);
                let size = engine.decode(&mut buffer, &params).expect("decode");
                black_box(size)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
