//! Benchmark: deflate across backends.
//!
//!   cargo bench -p h5chunk-filters                          # miniz_oxide
//!   cargo bench -p h5chunk-filters --features fast-deflate  # zlib-ng

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i as f64 * 0.01).sin() * 127.0 + 128.0) as u8).collect()
}

fn bench_compress(c: &mut Criterion) {
    let data = generate_test_data(1_000_000);

    c.bench_function(&format!("deflate_compress ({})", h5chunk_filters::deflate_backend()), |b| {
        b.iter(|| h5chunk_filters::deflate_compress(black_box(&data), 6).unwrap())
    });

    c.bench_function("deflate_compress_miniz", |b| {
        b.iter(|| h5chunk_filters::deflate_compress_miniz(black_box(&data), 6).unwrap())
    });
}

fn bench_decompress(c: &mut Criterion) {
    let data = generate_test_data(1_000_000);
    let compressed = h5chunk_filters::deflate_compress_miniz(&data, 6).unwrap();

    c.bench_function(
        &format!("deflate_decompress ({})", h5chunk_filters::deflate_backend()),
        |b| {
            b.iter(|| {
                h5chunk_filters::deflate_decompress(black_box(&compressed), data.len()).unwrap()
            })
        },
    );

    c.bench_function("deflate_decompress_streaming", |b| {
        b.iter(|| h5chunk_filters::deflate_decompress(black_box(&compressed), 0).unwrap())
    });
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
