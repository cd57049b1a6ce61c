//! Robustness tests: malformed layouts, pipelines, index structures and
//! chunks produce errors, never panics.

use std::io::Cursor;

use h5chunk_format::filter_pipeline::{FILTER_FLETCHER32, FILTER_SCALEOFFSET};
use h5chunk_format::{
    ChunkAppender, ChunkIndex, ChunkIndexParams, ChunkedDataset, ChunkedLayout, DataLayout,
    DatasetAccessProps, DatasetShape, ErrorKind, FileContext, FilterDescription, FilterPipeline,
    FixedArrayBuilder, FormatError, Hyperslab, ScaledGeometry, SliceSource, UNLIMITED,
};

/// Deterministic byte noise.
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn all_index_params() -> Vec<ChunkIndexParams> {
    vec![
        ChunkIndexParams::FixedArray { page_bits: 10 },
        ChunkIndexParams::ExtensibleArray {
            max_bits: 32,
            index_elements: 4,
            min_pointers: 4,
            min_elements: 16,
            page_bits: 10,
        },
        ChunkIndexParams::BTreeV1,
        ChunkIndexParams::BTreeV2 {
            node_size: 512,
            split_percent: 100,
            merge_percent: 40,
        },
    ]
}

// ---- Layout and pipeline messages ----

#[test]
fn empty_layout_message() {
    assert!(DataLayout::parse(&[], &FileContext::default()).is_err());
}

#[test]
fn truncated_layout_messages() {
    let ctx = FileContext::default();
    for params in all_index_params() {
        let layout = ChunkedLayout {
            version: 4,
            flags: 0,
            chunk_dims: vec![10, 10],
            element_size: 8,
            index: params,
            address: 0x400,
        };
        let bytes = layout.encode(&ctx);
        for cut in 0..bytes.len() {
            assert!(DataLayout::parse(&bytes[..cut], &ctx).is_err(), "{params:?} cut at {cut}");
        }
    }
}

#[test]
fn unknown_layout_version_and_index_type() {
    let ctx = FileContext::default();
    assert!(matches!(
        DataLayout::parse(&[9, 2, 0, 0], &ctx),
        Err(FormatError::InvalidLayoutVersion(9))
    ));
    // v4 chunked, rank 2, 1-byte dims, index type 7.
    assert!(matches!(
        DataLayout::parse(&[4, 2, 0, 2, 1, 10, 4, 7], &ctx),
        Err(FormatError::UnsupportedChunkIndex(7))
    ));
}

#[test]
fn noisy_messages_never_panic() {
    let ctx = FileContext::default();
    for seed in 0..500 {
        let bytes = noise(seed, (seed % 64) as usize);
        let _ = DataLayout::parse(&bytes, &ctx);
        let _ = FilterPipeline::parse(&bytes);
    }
}

#[test]
fn truncated_pipeline_message() {
    let pipeline = FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SCALEOFFSET, vec![0, 4, 0, 0, 0, 0, 0, 0, 0]).named("scaleoffset"),
        FilterDescription::new(FILTER_FLETCHER32, vec![]),
    ]);
    let bytes = pipeline.serialize();
    for cut in 0..bytes.len() {
        assert!(FilterPipeline::parse(&bytes[..cut]).is_err(), "cut at {cut}");
    }
}

// ---- Chunk indexes over garbage ----

#[test]
fn index_lookups_over_noise_return_errors() {
    let geometry = ScaledGeometry::new(&[100, 100], &[100, UNLIMITED], &[10, 10], 4).unwrap();
    for params in all_index_params() {
        for seed in 0..64 {
            let layout = ChunkedLayout {
                version: 4,
                flags: 0,
                chunk_dims: vec![10, 10],
                element_size: 4,
                index: params,
                address: 0,
            };
            let Ok(mut index) =
                ChunkIndex::from_layout(&layout, geometry.clone(), FileContext::default(), seed % 2 == 0, true)
            else {
                continue;
            };
            let source = SliceSource::new(noise(seed, 4096));
            for coord in [[0u64, 0], [3, 7], [9, 9]] {
                // Noise never carries a valid signature and checksum.
                assert!(index.lookup(&source, &coord).is_err(), "{} seed {seed}", index.kind_name());
            }
        }
    }
}

#[test]
fn index_lookups_without_checksums_never_panic() {
    let geometry = ScaledGeometry::new(&[64, 64], &[64, UNLIMITED], &[8, 8], 2).unwrap();
    for params in all_index_params() {
        for seed in 0..64 {
            let layout = ChunkedLayout {
                version: 4,
                flags: 0,
                chunk_dims: vec![8, 8],
                element_size: 2,
                index: params,
                address: 16,
            };
            let Ok(mut index) =
                ChunkIndex::from_layout(&layout, geometry.clone(), FileContext::default(), false, false)
            else {
                continue;
            };
            let mut image = noise(seed, 2048);
            // Give each structure a plausible signature so parsing goes deeper.
            let sig: &[u8; 4] = match params {
                ChunkIndexParams::FixedArray { .. } => b"FAHD",
                ChunkIndexParams::ExtensibleArray { .. } => b"EAHD",
                ChunkIndexParams::BTreeV1 => b"TREE",
                _ => b"BTHD",
            };
            image[16..20].copy_from_slice(sig);
            image[20] = 0;
            let source = SliceSource::new(image);
            for row in 0..8 {
                let _ = index.lookup(&source, &[row, row]);
            }
        }
    }
}

#[test]
fn index_rank_mismatch() {
    let geometry = ScaledGeometry::new(&[10, 10], &[10, 10], &[5, 5], 1).unwrap();
    let layout = ChunkedLayout {
        version: 4,
        flags: 0,
        chunk_dims: vec![5, 5],
        element_size: 1,
        index: ChunkIndexParams::FixedArray { page_bits: 10 },
        address: 0,
    };
    let mut index = ChunkIndex::from_layout(&layout, geometry, FileContext::default(), false, true).unwrap();
    let err = index.lookup(&SliceSource::new(Vec::new()), &[0]).unwrap_err();
    assert!(matches!(err, FormatError::RankMismatch { expected: 2, actual: 1 }));
}

// ---- Chunks ----

fn single_chunk_dataset(
    image: Vec<u8>,
    stored_size: u64,
    pipeline: FilterPipeline,
) -> ChunkedDataset<SliceSource<Vec<u8>>> {
    let layout = DataLayout::Chunked(ChunkedLayout {
        version: 4,
        flags: 0,
        chunk_dims: vec![16],
        element_size: 4,
        index: ChunkIndexParams::SingleChunk {
            filtered: Some((stored_size, 0)),
        },
        address: 0,
    });
    ChunkedDataset::open(
        SliceSource::new(image),
        FileContext::default(),
        &layout,
        DatasetShape::fixed(vec![16], vec![16], 4),
        pipeline,
        DatasetAccessProps::default(),
    )
    .unwrap()
}

#[test]
fn stored_size_past_end_of_file() {
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(FILTER_FLETCHER32, vec![])]);
    let mut ds = single_chunk_dataset(vec![0; 32], 1 << 40, pipeline);
    let err = ds.read_all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn decoded_size_mismatch_is_reported() {
    // A valid Fletcher-32 chunk that is one element short.
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(FILTER_FLETCHER32, vec![])]);
    let mut appender = ChunkAppender::new(Cursor::new(Vec::new()), pipeline.clone(), 4);
    let d = appender.append(&[1u8; 60]).unwrap();
    let image = appender.into_inner().unwrap().into_inner();
    let mut ds = single_chunk_dataset(image, d.stored_size, pipeline);
    assert!(matches!(ds.read_all(), Err(FormatError::CorruptStructure { .. })));
}

#[test]
fn short_fletcher_chunk() {
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(FILTER_FLETCHER32, vec![])]);
    let mut ds = single_chunk_dataset(vec![0; 3], 3, pipeline);
    assert!(ds.read_all().is_err());
}

#[test]
fn garbage_scale_offset_chunks_never_panic() {
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(
        FILTER_SCALEOFFSET,
        vec![2, 0, 16, 1, 4, 0, 0, 0],
    )]);
    for seed in 0..200 {
        let len = (seed % 40) as usize;
        let mut ds = single_chunk_dataset(noise(seed, len), len as u64, pipeline.clone());
        let _ = ds.read_all();
    }
}

#[test]
fn fixed_array_pointing_past_end() {
    let ctx = FileContext::default();
    let mut builder = FixedArrayBuilder::new(ctx, 4, 10, None);
    builder.set(
        2,
        h5chunk_format::ChunkDescriptor {
            address: 1 << 32,
            stored_size: 16,
            filter_mask: 0,
        },
    );
    let layout = DataLayout::Chunked(ChunkedLayout {
        version: 4,
        flags: 0,
        chunk_dims: vec![4],
        element_size: 4,
        index: ChunkIndexParams::FixedArray { page_bits: 10 },
        address: 0,
    });
    let mut ds = ChunkedDataset::open(
        SliceSource::new(builder.build(0).unwrap()),
        ctx,
        &layout,
        DatasetShape::fixed(vec![16], vec![4], 4),
        FilterPipeline::default(),
        DatasetAccessProps::default(),
    )
    .unwrap();
    // Chunks 0 and 1 are unallocated and read as zeros.
    assert_eq!(
        ds.read_hyperslab(&Hyperslab::from_ranges(&[0..8])).unwrap(),
        vec![0; 32]
    );
    assert!(matches!(
        ds.read_hyperslab(&Hyperslab::from_ranges(&[8..9])),
        Err(FormatError::UnexpectedEof { .. })
    ));
}
