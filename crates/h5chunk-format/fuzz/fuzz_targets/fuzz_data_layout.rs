#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for (offset_size, length_size) in [(4u8, 4u8), (8, 8)] {
        if let Ok(ctx) = h5chunk_format::FileContext::new(offset_size, length_size) {
            let _ = h5chunk_format::DataLayout::parse(data, &ctx);
        }
    }
});
