#![no_main]
use h5chunk_format::scale_offset::{decode, ScaleOffsetParams};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let params = ScaleOffsetParams::integer(4, true, 64);
    let _ = decode(data, &params);
    let params = ScaleOffsetParams::float_dscale(8, 3, 32);
    let _ = decode(data, &params);
});
