//! Benchmark: chunked dataset reads through a fixed array index.
//!
//!   cargo bench -p h5chunk-format

use std::hint::black_box;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, Criterion};
use h5chunk_format::filter_pipeline::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};
use h5chunk_format::{
    ChunkAppender, ChunkIndexParams, ChunkedDataset, ChunkedLayout, DataLayout, DatasetAccessProps,
    DatasetShape, FileContext, FilterDescription, FilterPipeline, FixedArrayBuilder, Hyperslab,
    ScaledGeometry, SliceSource,
};

const DIM: u64 = 1024;
const CHUNK: u64 = 128;

fn pipeline() -> FilterPipeline {
    FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SHUFFLE, vec![4]),
        FilterDescription::new(FILTER_FLETCHER32, vec![]),
        FilterDescription::new(FILTER_DEFLATE, vec![4]),
    ])
}

/// A `DIM x DIM` f32 grid of smooth values, `CHUNK x CHUNK` chunks.
fn build() -> (Vec<u8>, DataLayout) {
    let ctx = FileContext::default();
    let geometry = ScaledGeometry::new(&[DIM, DIM], &[DIM, DIM], &[CHUNK, CHUNK], 4).unwrap();
    let mut builder = FixedArrayBuilder::for_geometry(ctx, &geometry, true, 10).unwrap();
    let mut appender = ChunkAppender::new(Cursor::new(Vec::new()), pipeline(), 4);

    let per_side = DIM / CHUNK;
    for cr in 0..per_side {
        for cc in 0..per_side {
            let chunk: Vec<u8> = (0..CHUNK * CHUNK)
                .flat_map(|i| {
                    let (r, c) = (cr * CHUNK + i / CHUNK, cc * CHUNK + i % CHUNK);
                    ((r as f32 * 0.01).sin() + (c as f32 * 0.02).cos()).to_le_bytes()
                })
                .collect();
            let d = appender.append(&chunk).unwrap();
            builder.set_chunk(&geometry, &[cr, cc], d);
        }
    }
    let header = appender.end_position().unwrap();
    appender.append_raw(&builder.build(header).unwrap()).unwrap();
    let layout = DataLayout::Chunked(ChunkedLayout {
        version: 4,
        flags: 0,
        chunk_dims: vec![CHUNK, CHUNK],
        element_size: 4,
        index: ChunkIndexParams::FixedArray { page_bits: 10 },
        address: header,
    });
    (appender.into_inner().unwrap().into_inner(), layout)
}

fn open(image: &[u8], layout: &DataLayout, props: DatasetAccessProps) -> ChunkedDataset<SliceSource<&[u8]>> {
    ChunkedDataset::open(
        SliceSource::new(image),
        FileContext::default(),
        layout,
        DatasetShape::fixed(vec![DIM, DIM], vec![CHUNK, CHUNK], 4),
        pipeline(),
        props,
    )
    .unwrap()
}

fn bench_read_all(c: &mut Criterion) {
    let (image, layout) = build();
    c.bench_function("read_all 1024x1024 f32 (cold cache)", |b| {
        let mut ds = open(&image, &layout, DatasetAccessProps::default());
        b.iter(|| {
            ds.clear_cache();
            black_box(ds.read_all().unwrap())
        })
    });
}

fn bench_hyperslab(c: &mut Criterion) {
    let (image, layout) = build();
    let sel = Hyperslab::from_ranges(&[100..356, 300..556]);

    c.bench_function("hyperslab 256x256 (warm cache)", |b| {
        let props = DatasetAccessProps::new().chunk_cache(16 << 20, 521);
        let mut ds = open(&image, &layout, props);
        ds.read_hyperslab(&sel).unwrap();
        b.iter(|| black_box(ds.read_hyperslab(black_box(&sel)).unwrap()))
    });

    c.bench_function("hyperslab 256x256 (no cache)", |b| {
        let props = DatasetAccessProps::new().chunk_cache(0, 0);
        let mut ds = open(&image, &layout, props);
        b.iter(|| black_box(ds.read_hyperslab(black_box(&sel)).unwrap()))
    });
}

fn bench_lookup(c: &mut Criterion) {
    let (image, layout) = build();
    let mut ds = open(&image, &layout, DatasetAccessProps::default());
    c.bench_function("fixed array lookup", |b| {
        b.iter(|| {
            for r in 0..DIM / CHUNK {
                black_box(ds.lookup(black_box(&[r, 7 - r])).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_read_all, bench_hyperslab, bench_lookup);
criterion_main!(benches);
