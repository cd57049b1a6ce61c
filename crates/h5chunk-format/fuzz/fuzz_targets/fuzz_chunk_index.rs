#![no_main]
use h5chunk_format::{
    ChunkIndex, ChunkIndexParams, ChunkedLayout, FileContext, ScaledGeometry, SliceSource, UNLIMITED,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(geometry) = ScaledGeometry::new(&[64, 64], &[64, UNLIMITED], &[8, 8], 4) else {
        return;
    };
    let params = [
        ChunkIndexParams::FixedArray { page_bits: 4 },
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
    ];
    let source = SliceSource::new(data);
    for index in params {
        let layout = ChunkedLayout {
            version: 4,
            flags: 0,
            chunk_dims: vec![8, 8],
            element_size: 4,
            index,
            address: 0,
        };
        // Checksums off so parsing reaches past the prefix.
        let Ok(mut index) = ChunkIndex::from_layout(&layout, geometry.clone(), FileContext::default(), true, false) else {
            continue;
        };
        for row in 0..8 {
            let _ = index.lookup(&source, &[row, 7 - row]);
        }
    }
});
