//! Бенчмарки восстановления CRC и дополнения посылок.
//!
//! Запуск: cargo bench -p hablink-benchmark

use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hablink_core::{
    bpsk_map, frame_bits, run_until_idle, AnnotatedStream, BitPacker, Budget, BurstFramer,
    CrcRecoveryDecoder, FixedBurstPadder, PostBurstPadder, RecoveryConfig, ZeroFiller,
};
use hablink_types::{Message, Sample, PACKET_LEN_KEY};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn payload(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(len as u64);
    (0..len).map(|_| rng.gen()).collect()
}

// ============================================================================
// CrcRecoveryDecoder
// ============================================================================

fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc_recovery");

    for len in [23usize, 100, 255] {
        let mut bits = frame_bits(&payload(len));
        bits.truncate(bits.len() - 3);

        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("three_bits_missing", len), &bits, |b, bits| {
            let mut decoder = CrcRecoveryDecoder::new(RecoveryConfig::default()).unwrap();
            b.iter(|| decoder.decode(Message::bits(black_box(bits.clone()))).unwrap())
        });
    }

    // Худший случай: перебор всех 2^7 шаблонов без совпадения
    let mut corrupted = frame_bits(&payload(200));
    corrupted[5] ^= 1;
    corrupted.truncate(corrupted.len() - 7);
    group.bench_function("failed_search_7_bits", |b| {
        let mut decoder = CrcRecoveryDecoder::new(RecoveryConfig::default()).unwrap();
        b.iter(|| decoder.decode(Message::bits(black_box(corrupted.clone()))).unwrap())
    });

    group.finish();
}

fn bench_packing(c: &mut Criterion) {
    let bits = frame_bits(&payload(255));
    let packer = BitPacker::new();

    c.bench_function("bit_packer_255_bytes", |b| {
        b.iter(|| packer.pack(black_box(&bits)).unwrap())
    });
}

// ============================================================================
// Дополнение посылок
// ============================================================================

fn bursts(count: usize) -> AnnotatedStream<Sample> {
    let mut stream = AnnotatedStream::new();
    let mut framer = BurstFramer::new(PACKET_LEN_KEY);

    for i in 0..count {
        let samples = bpsk_map(&frame_bits(&payload(20 + i % 180)), 1);
        framer.push_burst(&mut stream, &samples);
    }
    stream
}

fn bench_padding(c: &mut Criterion) {
    let mut group = c.benchmark_group("padding");
    group.measurement_time(Duration::from_secs(5));

    let input = bursts(32);
    group.throughput(Throughput::Elements(32));

    group.bench_function("fixed_burst_padder_32", |b| {
        b.iter(|| {
            let mut input = input.clone();
            let mut output = AnnotatedStream::new();
            let mut padder =
                FixedBurstPadder::new(10_000, PACKET_LEN_KEY, Box::new(ZeroFiller)).unwrap();
            run_until_idle(
                &mut padder,
                &mut [&mut input],
                &mut output,
                Budget::default(),
                usize::MAX,
            )
            .unwrap();
            black_box(output.available())
        })
    });

    group.bench_function("post_burst_padder_32", |b| {
        b.iter(|| {
            let mut input = input.clone();
            let mut output = AnnotatedStream::new();
            let mut padder = PostBurstPadder::new(10_000, PACKET_LEN_KEY);
            run_until_idle(
                &mut padder,
                &mut [&mut input],
                &mut output,
                Budget::default(),
                usize::MAX,
            )
            .unwrap();
            black_box(output.available())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_recovery, bench_packing, bench_padding);
criterion_main!(benches);
