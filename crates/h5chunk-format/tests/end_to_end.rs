//! End-to-end tests: chunks written with the append primitive, published
//! through an index and a layout message, then read back.

#![cfg(feature = "deflate")]

use std::io::{Cursor, Write};

use h5chunk_format::data_layout::encode_layout_v4;
use h5chunk_format::filter_pipeline::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};
use h5chunk_format::{
    ByteSource, ChunkAppender, ChunkIndexParams, ChunkedDataset, DataLayout, DatasetAccessProps,
    DatasetShape, FileContext, FilterCodec, FilterContext, FilterDescription, FilterPipeline,
    FilterRegistry, FixedArrayBuilder, FormatError, Hyperslab, ReaderSource, ScaledGeometry,
    SliceSource,
};

const ROWS: u64 = 1000;
const COLS: u64 = 4;

fn values() -> Vec<i32> {
    (0..(ROWS * COLS) as i32).map(|i| i * 7 - 3000).collect()
}

fn as_bytes(v: &[i32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn from_bytes(b: &[u8]) -> Vec<i32> {
    b.chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn pipeline() -> FilterPipeline {
    FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SHUFFLE, vec![4]),
        FilterDescription::new(FILTER_FLETCHER32, vec![]),
        FilterDescription::new(FILTER_DEFLATE, vec![6]),
    ])
}

/// Write `ROWS x COLS` int32 values in row chunks of `chunk_rows` behind a
/// fixed array index. Returns the sink, the layout message bytes and the
/// serialised pipeline message.
fn write_dataset<W: Write + std::io::Seek>(sink: W, chunk_rows: u64) -> (W, Vec<u8>, Vec<u8>) {
    write_with(sink, chunk_rows, pipeline())
}

fn write_with<W: Write + std::io::Seek>(
    sink: W,
    chunk_rows: u64,
    pipeline: FilterPipeline,
) -> (W, Vec<u8>, Vec<u8>) {
    let ctx = FileContext::default();
    let data = as_bytes(&values());
    let geometry = ScaledGeometry::new(&[ROWS, COLS], &[ROWS, COLS], &[chunk_rows, COLS], 4).unwrap();
    let mut builder = FixedArrayBuilder::for_geometry(ctx, &geometry, true, 10).unwrap();
    let mut appender = ChunkAppender::new(sink, pipeline.clone(), 4);

    let chunk_len = (chunk_rows * COLS * 4) as usize;
    for (i, chunk) in data.chunks(chunk_len).enumerate() {
        let descriptor = appender.append(chunk).unwrap();
        builder.set_chunk(&geometry, &[i as u64, 0], descriptor);
    }
    let header = appender.end_position().unwrap();
    appender.append_raw(&builder.build(header).unwrap()).unwrap();

    let layout = encode_layout_v4(&[chunk_rows, COLS], 4, ChunkIndexParams::FixedArray { page_bits: 10 }, header, &ctx);
    (appender.into_inner().unwrap(), layout, pipeline.serialize())
}

fn open<S: ByteSource>(source: S, layout: &[u8], pipeline: &[u8]) -> ChunkedDataset<S> {
    let ctx = FileContext::default();
    let layout = DataLayout::parse(layout, &ctx).unwrap();
    let pipeline = FilterPipeline::parse(pipeline).unwrap();
    let shape = DatasetShape::from_layout(vec![ROWS, COLS], vec![ROWS, COLS], layout.as_chunked().unwrap());
    ChunkedDataset::open(source, ctx, &layout, shape, pipeline, DatasetAccessProps::default()).unwrap()
}

#[test]
fn int32_single_chunk_round_trip() {
    let (sink, layout, pipe) = write_dataset(Cursor::new(vec![0u8; 64]), ROWS);
    let mut ds = open(SliceSource::new(sink.into_inner()), &layout, &pipe);
    assert_eq!(ds.geometry().total_chunks, 1);
    assert_eq!(from_bytes(&ds.read_all().unwrap()), values());
}

#[test]
fn int32_two_chunks_round_trip() {
    let (sink, layout, pipe) = write_dataset(Cursor::new(vec![0u8; 64]), 500);
    let mut ds = open(SliceSource::new(sink.into_inner()), &layout, &pipe);
    assert_eq!(ds.chunk_shape(), &[500, 4]);
    assert_eq!(ds.index_kind(), "fixed array");
    assert!(ds.lookup(&[1, 0]).unwrap().stored_size < 500 * COLS * 4);
    assert_eq!(from_bytes(&ds.read_all().unwrap()), values());
}

#[test]
fn hyperslab_spanning_two_chunks() {
    let (sink, layout, pipe) = write_dataset(Cursor::new(vec![0u8; 64]), 500);
    let mut ds = open(SliceSource::new(sink.into_inner()), &layout, &pipe);

    let sel = Hyperslab::from_ranges(&[495..505, 1..3]);
    let got = from_bytes(&ds.read_hyperslab(&sel).unwrap());
    let all = values();
    let want: Vec<i32> = (495..505)
        .flat_map(|r| (1..3).map(move |c| (r * COLS + c) as usize))
        .map(|i| all[i])
        .collect();
    assert_eq!(got, want);
    assert_eq!(ds.cache_stats().misses, 2);

    // The second read is served from the cache.
    ds.read_hyperslab(&sel).unwrap();
    assert_eq!(ds.cache_stats().hits, 2);
}

#[test]
fn file_backed_round_trip() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&[0u8; 512]).unwrap();
    let (file, layout, pipe) = write_dataset(file, 500);
    let mut ds = open(ReaderSource::new(file).unwrap(), &layout, &pipe);
    let row = ds.read_hyperslab(&Hyperslab::from_ranges(&[999..1000, 0..4])).unwrap();
    assert_eq!(from_bytes(&row), values()[3996..].to_vec());
}

#[test]
fn corrupted_chunk_fails_fletcher32() {
    let pipeline = FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SHUFFLE, vec![4]),
        FilterDescription::new(FILTER_FLETCHER32, vec![]),
    ]);
    let (sink, layout, pipe) = write_with(Cursor::new(vec![0u8; 64]), 500, pipeline);
    let mut bytes = sink.into_inner();
    // First chunk starts right after the 64-byte preamble.
    bytes[80] ^= 0x5A;
    let mut ds = open(SliceSource::new(bytes), &layout, &pipe);
    let err = ds.get_decoded_chunk(&[0, 0]).unwrap_err();
    assert!(matches!(err, FormatError::Fletcher32Mismatch { .. }));
    // The other chunk is unaffected.
    assert!(ds.get_decoded_chunk(&[1, 0]).is_ok());
}

/// Adds a constant to every byte.
struct ByteOffset;

impl FilterCodec for ByteOffset {
    fn id(&self) -> u16 {
        32100
    }

    fn name(&self) -> &'static str {
        "byte offset"
    }

    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let k = ctx.description.client_data.first().copied().unwrap_or(0) as u8;
        Ok(input.into_iter().map(|b| b.wrapping_sub(k)).collect())
    }

    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let k = ctx.description.client_data.first().copied().unwrap_or(0) as u8;
        Ok(input.into_iter().map(|b| b.wrapping_add(k)).collect())
    }
}

#[test]
fn custom_codec_through_registry() {
    let ctx = FileContext::default();
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(32100, vec![3])]);
    let registry = || {
        let mut r = FilterRegistry::new();
        r.register(Box::new(ByteOffset));
        r
    };

    let mut appender = ChunkAppender::with_registry(Cursor::new(Vec::new()), pipeline.clone(), registry(), 1);
    let d = appender.append(&[10, 20, 30, 40]).unwrap();
    let bytes = appender.into_inner().unwrap().into_inner();
    assert_eq!(bytes, vec![13, 23, 33, 43]);

    let layout = DataLayout::parse(
        &encode_layout_v4(&[4], 1, ChunkIndexParams::SingleChunk { filtered: Some((d.stored_size, 0)) }, d.address, &ctx),
        &ctx,
    )
    .unwrap();
    let shape = DatasetShape::fixed(vec![4], vec![4], 1);

    let mut ds = ChunkedDataset::open_with_registry(
        SliceSource::new(bytes.clone()),
        ctx,
        &layout,
        shape.clone(),
        pipeline.clone(),
        DatasetAccessProps::default(),
        registry(),
    )
    .unwrap();
    assert_eq!(ds.read_all().unwrap(), vec![10, 20, 30, 40]);

    // Without the codec the filter is unknown.
    let mut ds = ChunkedDataset::open(
        SliceSource::new(bytes),
        ctx,
        &layout,
        shape,
        pipeline,
        DatasetAccessProps::default(),
    )
    .unwrap();
    assert!(matches!(ds.read_all(), Err(FormatError::UnsupportedFilter { id: 32100, .. })));
}
