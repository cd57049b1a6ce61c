//! Scale-offset filter (HDF5 filter 6).
//!
//! Stored chunk layout: a 21-byte header (`minbits` as u32 LE, the byte count
//! of `minval`, then `minval` little-endian in an 8-byte slot) followed by
//! each element's offset from `minval` packed into `minbits` bits, MSB first,
//! continuing across byte boundaries.
//!
//! Integers are stored as `value - minval`. Floats use decimal scaling
//! (D-scale): `round((value - min) * 10^scale_factor)`. When a fill value is
//! defined, the all-ones code `(1 << minbits) - 1` stands for it.
//!
//! Values are reconstructed little-endian and converted to the dataset byte
//! order afterwards.

use crate::error::FormatError;
use crate::filter_pipeline::FILTER_SCALEOFFSET;
use crate::filters::{FilterCodec, FilterContext};

const HEADER_LEN: usize = 21;
const PARAM_COUNT: usize = 8;
const FILL_WORDS: usize = 12;

const SCALE_FLOAT_DSCALE: u32 = 0;
const SCALE_FLOAT_ESCALE: u32 = 1;
const SCALE_INT: u32 = 2;

/// Element class stored in the filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOffsetClass {
    /// Integer elements.
    Integer,
    /// IEEE float elements.
    Float,
}

/// Decoded scale-offset client data.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleOffsetParams {
    /// 0 = float D-scale, 1 = float E-scale, 2 = integer.
    pub scale_type: u32,
    /// Decimal digits kept (D-scale) or minimum bits (integer, unused on read).
    pub scale_factor: i32,
    /// Elements per chunk.
    pub element_count: u32,
    /// Element class.
    pub class: ScaleOffsetClass,
    /// Element size in bytes.
    pub size: u32,
    /// Signed integers.
    pub signed: bool,
    /// Dataset stored big-endian.
    pub big_endian: bool,
    /// Fill value bytes, little-endian, when defined.
    pub fill: Option<Vec<u8>>,
}

impl ScaleOffsetParams {
    /// Integer parameters for `element_count` little-endian elements.
    pub fn integer(size: u32, signed: bool, element_count: u32) -> Self {
        Self {
            scale_type: SCALE_INT,
            scale_factor: 0,
            element_count,
            class: ScaleOffsetClass::Integer,
            size,
            signed,
            big_endian: false,
            fill: None,
        }
    }

    /// Float D-scale parameters keeping `digits` decimal digits.
    pub fn float_dscale(size: u32, digits: i32, element_count: u32) -> Self {
        Self {
            scale_type: SCALE_FLOAT_DSCALE,
            scale_factor: digits,
            element_count,
            class: ScaleOffsetClass::Float,
            size,
            signed: true,
            big_endian: false,
            fill: None,
        }
    }

    /// Set the fill value (little-endian bytes).
    pub fn with_fill(mut self, fill: Vec<u8>) -> Self {
        self.fill = Some(fill);
        self
    }

    /// Mark the dataset big-endian.
    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// Parse the filter's client data words.
    pub fn from_client_data(cd: &[u32]) -> Result<Self, FormatError> {
        if cd.len() < PARAM_COUNT {
            return Err(FormatError::corrupt(
                "scale-offset parameters",
                format!("{} client data values, need {PARAM_COUNT}", cd.len()),
            ));
        }
        let class = match cd[3] {
            0 => ScaleOffsetClass::Integer,
            1 => ScaleOffsetClass::Float,
            other => {
                return Err(FormatError::corrupt(
                    "scale-offset parameters",
                    format!("element class {other}"),
                ));
            }
        };
        let size = cd[4];
        let fill = (cd[7] == 1).then(|| {
            let bytes: Vec<u8> = cd[PARAM_COUNT..].iter().flat_map(|w| w.to_le_bytes()).collect();
            let mut fill = bytes[..bytes.len().min(size as usize)].to_vec();
            fill.resize(size as usize, 0);
            fill
        });
        Ok(Self {
            scale_type: cd[0],
            scale_factor: cd[1] as i32,
            element_count: cd[2],
            class,
            size,
            signed: cd[5] == 1,
            big_endian: cd[6] == 1,
            fill,
        })
    }

    /// Client data words for a pipeline entry.
    pub fn to_client_data(&self) -> Vec<u32> {
        let mut cd = vec![
            self.scale_type,
            self.scale_factor as u32,
            self.element_count,
            match self.class {
                ScaleOffsetClass::Integer => 0,
                ScaleOffsetClass::Float => 1,
            },
            self.size,
            self.signed as u32,
            self.big_endian as u32,
            self.fill.is_some() as u32,
        ];
        let mut words = [0u32; FILL_WORDS];
        if let Some(fill) = &self.fill {
            for (i, chunk) in fill.chunks(4).take(FILL_WORDS).enumerate() {
                let mut w = [0u8; 4];
                w[..chunk.len()].copy_from_slice(chunk);
                words[i] = u32::from_le_bytes(w);
            }
        }
        cd.extend_from_slice(&words);
        cd
    }

    fn bits(&self) -> u32 {
        self.size * 8
    }

    fn validate(&self) -> Result<(), FormatError> {
        if self.class == ScaleOffsetClass::Float && self.scale_type == SCALE_FLOAT_ESCALE {
            return Err(FormatError::UnsupportedFeature(
                "scale-offset floating-point E-scale mode".into(),
            ));
        }
        let ok = match self.class {
            ScaleOffsetClass::Integer => matches!(self.size, 1 | 2 | 4 | 8),
            ScaleOffsetClass::Float => matches!(self.size, 4 | 8),
        };
        if !ok {
            return Err(FormatError::corrupt(
                "scale-offset parameters",
                format!("{}-byte {:?} elements", self.size, self.class),
            ));
        }
        Ok(())
    }

    fn fill_value(&self) -> Option<u64> {
        self.fill.as_ref().map(|f| {
            let mut w = [0u8; 8];
            let n = f.len().min(8);
            w[..n].copy_from_slice(&f[..n]);
            u64::from_le_bytes(w)
        })
    }

    fn dataset_swap(&self) -> bool {
        self.size > 1 && self.big_endian
    }
}

/// Sign-extend the low `bits` of `v`.
fn sign_extend(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        v as i64
    } else {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    }
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Reads `minbits`-wide values MSB first.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl BitReader<'_> {
    fn read(&mut self, width: u32) -> u64 {
        let mut v = 0u64;
        let mut remaining = width as usize;
        while remaining > 0 {
            let byte = self.data[self.bit / 8];
            let offset = self.bit % 8;
            let take = (8 - offset).min(remaining);
            let bits = (byte >> (8 - offset - take)) & (low_mask(take as u32) as u8);
            v = (v << take) | bits as u64;
            self.bit += take;
            remaining -= take;
        }
        v
    }
}

struct BitWriter {
    out: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    fn write(&mut self, value: u64, width: u32) {
        let mut remaining = width as usize;
        while remaining > 0 {
            if self.bit % 8 == 0 {
                self.out.push(0);
            }
            let offset = self.bit % 8;
            let take = (8 - offset).min(remaining);
            let bits = ((value >> (remaining - take)) & low_mask(take as u32)) as u8;
            if let Some(last) = self.out.last_mut() {
                *last |= bits << (8 - offset - take);
            }
            self.bit += take;
            remaining -= take;
        }
    }
}

fn le_words(bytes: &[u8], size: usize) -> impl Iterator<Item = u64> + '_ {
    bytes.chunks_exact(size).map(move |e| {
        let mut w = [0u8; 8];
        w[..size].copy_from_slice(e);
        u64::from_le_bytes(w)
    })
}

/// Decode one stored scale-offset chunk.
pub fn decode(input: &[u8], params: &ScaleOffsetParams) -> Result<Vec<u8>, FormatError> {
    params.validate()?;
    if input.len() < HEADER_LEN {
        return Err(FormatError::UnexpectedEof {
            expected: HEADER_LEN,
            available: input.len(),
        });
    }
    let minbits = u32::from_le_bytes([input[0], input[1], input[2], input[3]]);
    let minval_len = (input[4] as usize).min(8);
    let minval = input[5..5 + minval_len]
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let size = params.size as usize;
    let bits = params.bits();
    let n = params.element_count as usize;
    let out_len = n * size;
    if minbits > bits {
        return Err(FormatError::corrupt(
            "scale-offset chunk",
            format!("minbits {minbits} exceeds {bits}-bit elements"),
        ));
    }

    let payload = &input[HEADER_LEN..];
    let out = if minbits == bits {
        if payload.len() < out_len {
            return Err(FormatError::UnexpectedEof {
                expected: HEADER_LEN + out_len,
                available: input.len(),
            });
        }
        native_to_le(&payload[..out_len], size)?
    } else {
        let needed = (n * minbits as usize).div_ceil(8);
        if payload.len() < needed {
            return Err(FormatError::UnexpectedEof {
                expected: HEADER_LEN + needed,
                available: input.len(),
            });
        }
        let mut reader = BitReader { data: payload, bit: 0 };
        let sentinel = low_mask(minbits);
        let fill = params.fill_value();
        let mut out = Vec::with_capacity(out_len);
        for _ in 0..n {
            let code = if minbits == 0 { 0 } else { reader.read(minbits) };
            let value = match fill {
                Some(f) if code == sentinel => f,
                _ => reconstruct(code, minval, params),
            };
            out.extend_from_slice(&value.to_le_bytes()[..size]);
        }
        out
    };

    if params.dataset_swap() {
        Ok(h5chunk_accel::swap_endianness(&out, size)?)
    } else {
        Ok(out)
    }
}

/// Full-width payloads are stored in the writer's native order.
fn native_to_le(bytes: &[u8], size: usize) -> Result<Vec<u8>, FormatError> {
    if cfg!(target_endian = "big") && size > 1 {
        Ok(h5chunk_accel::swap_endianness(bytes, size)?)
    } else {
        Ok(bytes.to_vec())
    }
}

fn reconstruct(code: u64, minval: u64, params: &ScaleOffsetParams) -> u64 {
    match params.class {
        ScaleOffsetClass::Integer => code.wrapping_add(minval) & low_mask(params.bits()),
        ScaleOffsetClass::Float => {
            let scale = 10f64.powi(params.scale_factor);
            let offset = code as i64 as f64 / scale;
            if params.size == 4 {
                let min = f32::from_bits(minval as u32) as f64;
                ((offset + min) as f32).to_bits() as u64
            } else {
                (offset + f64::from_bits(minval)).to_bits()
            }
        }
    }
}

/// Encode one chunk (dataset byte order) into the scale-offset form.
pub fn encode(input: &[u8], params: &ScaleOffsetParams) -> Result<Vec<u8>, FormatError> {
    params.validate()?;
    let size = params.size as usize;
    let bits = params.bits();
    let n = params.element_count as usize;
    if input.len() != n * size {
        return Err(FormatError::corrupt(
            "scale-offset chunk",
            format!("{} bytes for {n} elements of {size} bytes", input.len()),
        ));
    }
    let le = if params.dataset_swap() {
        h5chunk_accel::swap_endianness(input, size)?
    } else {
        input.to_vec()
    };
    let raw: Vec<u64> = le_words(&le, size).collect();
    let fill = params.fill_value();
    let is_fill = |v: u64| fill == Some(v);

    let (codes, minval) = match params.class {
        ScaleOffsetClass::Integer => {
            let key = |v: u64| if params.signed { sign_extend(v, bits) as i128 } else { v as i128 };
            let live = raw.iter().copied().filter(|&v| !is_fill(v));
            let min = live.clone().min_by_key(|&v| key(v));
            let max = live.max_by_key(|&v| key(v));
            match (min, max) {
                (Some(min), Some(max)) => {
                    let span = (key(max) - key(min)) as u64;
                    let codes: Vec<Option<u64>> = raw
                        .iter()
                        .map(|&v| (!is_fill(v)).then(|| (key(v) - key(min)) as u64))
                        .collect();
                    let stored_min = if params.signed { sign_extend(min, bits) as u64 } else { min };
                    (Some((codes, span)), stored_min)
                }
                _ => (None, 0),
            }
        }
        ScaleOffsetClass::Float => {
            let to_f64 = |v: u64| {
                if size == 4 { f32::from_bits(v as u32) as f64 } else { f64::from_bits(v) }
            };
            let scale = 10f64.powi(params.scale_factor);
            let min = raw
                .iter()
                .copied()
                .filter(|&v| !is_fill(v))
                .map(to_f64)
                .fold(None, |m: Option<f64>, x| Some(m.map_or(x, |m| m.min(x))));
            match min {
                Some(min) => {
                    let codes: Vec<Option<u64>> = raw
                        .iter()
                        .map(|&v| (!is_fill(v)).then(|| ((to_f64(v) - min) * scale).round() as i64 as u64))
                        .collect();
                    let span = codes.iter().flatten().copied().max().unwrap_or(0);
                    let stored_min = if size == 4 { (min as f32).to_bits() as u64 } else { min.to_bits() };
                    (Some((codes, span)), stored_min)
                }
                None => (None, 0),
            }
        }
    };

    let mut out = Vec::with_capacity(HEADER_LEN + input.len());
    let (codes, span) = match codes {
        Some(c) => c,
        None => {
            // Every element is the fill value.
            write_header(&mut out, 0, 0);
            return Ok(out);
        }
    };

    let needed = if fill.is_some() { span.checked_add(1) } else { Some(span) };
    let minbits = match needed {
        Some(v) => 64 - v.leading_zeros(),
        None => 64,
    };
    if minbits >= bits {
        write_header(&mut out, bits, 0);
        out.extend_from_slice(&native_to_le(&le, size)?);
        return Ok(out);
    }

    write_header(&mut out, minbits, minval);
    if minbits > 0 {
        let sentinel = low_mask(minbits);
        let mut writer = BitWriter { out, bit: 0 };
        for code in codes {
            writer.write(code.unwrap_or(sentinel), minbits);
        }
        out = writer.out;
    }
    Ok(out)
}

fn write_header(out: &mut Vec<u8>, minbits: u32, minval: u64) {
    out.extend_from_slice(&minbits.to_le_bytes());
    out.push(8);
    out.extend_from_slice(&minval.to_le_bytes());
    out.resize(HEADER_LEN, 0);
}

/// Scale-offset codec for the filter registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleOffsetCodec;

impl FilterCodec for ScaleOffsetCodec {
    fn id(&self) -> u16 {
        FILTER_SCALEOFFSET
    }

    fn name(&self) -> &'static str {
        "scaleoffset"
    }

    fn decode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let params = ScaleOffsetParams::from_client_data(&ctx.description.client_data)?;
        let decoded_len = (params.element_count as u64).saturating_mul(params.size as u64);
        if decoded_len > ctx.chunk_bytes as u64 {
            return Err(FormatError::corrupt(
                "scale-offset parameters",
                format!(
                    "{} elements of {} bytes exceed a {}-byte chunk",
                    params.element_count, params.size, ctx.chunk_bytes
                ),
            ));
        }
        decode(&input, &params)
    }

    fn encode(&self, input: Vec<u8>, ctx: &FilterContext<'_>) -> Result<Vec<u8>, FormatError> {
        let params = ScaleOffsetParams::from_client_data(&ctx.description.client_data)?;
        encode(&input, &params)
    }
}
