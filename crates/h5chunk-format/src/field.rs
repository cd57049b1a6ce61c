//! Little-endian field decoding and encoding shared by the structure parsers.

use crate::checksum::jenkins_lookup3;
use crate::error::FormatError;
use crate::io::FileContext;

/// Sentinel for an address that was never allocated.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Sequential reader over an in-memory structure image.
#[derive(Debug, Clone)]
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::UnexpectedEof {
                expected: self.pos.saturating_add(n),
                available: self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(self.uint(2)? as u16)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(self.uint(4)? as u32)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, FormatError> {
        self.uint(8)
    }

    /// Unsigned little-endian integer of `size` bytes (0..=8).
    pub(crate) fn uint(&mut self, size: usize) -> Result<u64, FormatError> {
        if size > 8 {
            return Err(FormatError::corrupt(
                "field",
                format!("{size}-byte integer field"),
            ));
        }
        Ok(decode_uint(self.take(size)?))
    }

    /// File address; all-ones becomes [`UNDEFINED_ADDRESS`].
    pub(crate) fn address(&mut self, ctx: &FileContext) -> Result<u64, FormatError> {
        let size = ctx.offset_size() as usize;
        let raw = self.take(size)?;
        if raw.iter().all(|&b| b == 0xFF) {
            Ok(UNDEFINED_ADDRESS)
        } else {
            Ok(decode_uint(raw))
        }
    }

    pub(crate) fn length(&mut self, ctx: &FileContext) -> Result<u64, FormatError> {
        self.uint(ctx.length_size() as usize)
    }

    pub(crate) fn signature(
        &mut self,
        expected: &[u8; 4],
        structure: &'static str,
    ) -> Result<(), FormatError> {
        let raw = self.take(4)?;
        if raw != expected {
            return Err(FormatError::BadSignature {
                structure,
                found: [raw[0], raw[1], raw[2], raw[3]],
            });
        }
        Ok(())
    }

    pub(crate) fn version(&mut self, expected: u8, structure: &'static str) -> Result<(), FormatError> {
        let version = self.u8()?;
        if version != expected {
            return Err(FormatError::UnsupportedVersion { structure, version });
        }
        Ok(())
    }
}

pub(crate) fn decode_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

pub(crate) fn put_uint(buf: &mut Vec<u8>, value: u64, size: usize) {
    buf.extend_from_slice(&value.to_le_bytes()[..size]);
}

pub(crate) fn put_address(buf: &mut Vec<u8>, address: u64, ctx: &FileContext) {
    put_uint(buf, address, ctx.offset_size() as usize);
}

/// Append the lookup3 checksum of everything currently in `buf`.
pub(crate) fn put_checksum(buf: &mut Vec<u8>) {
    let sum = jenkins_lookup3(buf);
    buf.extend_from_slice(&sum.to_le_bytes());
}

/// Verify that the four bytes after `image[..covered]` hold its lookup3 checksum.
pub(crate) fn verify_checksum(
    image: &[u8],
    covered: usize,
    structure: &'static str,
    address: u64,
) -> Result<(), FormatError> {
    let stored = image
        .get(covered..covered + 4)
        .map(decode_uint)
        .ok_or(FormatError::UnexpectedEof {
            expected: covered + 4,
            available: image.len(),
        })? as u32;
    let computed = jenkins_lookup3(&image[..covered]);
    if stored != computed {
        return Err(FormatError::MetadataChecksumMismatch {
            structure,
            address,
            stored,
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_order() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xAA];
        let mut r = FieldReader::new(&data);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert_eq!(r.u32().unwrap(), 0x12345678);
        assert_eq!(r.position(), 7);
        assert_eq!(r.uint(1).unwrap(), 0xAA);
        assert!(r.u8().is_err());
    }

    #[test]
    fn undefined_address() {
        let ctx = FileContext::new(4, 4).unwrap();
        let mut r = FieldReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x10, 0, 0, 0]);
        assert_eq!(r.address(&ctx).unwrap(), UNDEFINED_ADDRESS);
        assert_eq!(r.address(&ctx).unwrap(), 0x10);
    }

    #[test]
    fn odd_width_uint() {
        let mut r = FieldReader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(r.uint(3).unwrap(), 0x030201);
        let mut r = FieldReader::new(&[0u8; 16]);
        assert!(r.uint(9).is_err());
    }

    #[test]
    fn signature_mismatch() {
        let mut r = FieldReader::new(b"FAHX");
        assert_eq!(
            r.signature(b"FAHD", "fixed array header"),
            Err(FormatError::BadSignature {
                structure: "fixed array header",
                found: *b"FAHX"
            })
        );
    }

    #[test]
    fn checksum_roundtrip() {
        let mut buf = b"EAHD\0payload".to_vec();
        let covered = buf.len();
        put_checksum(&mut buf);
        verify_checksum(&buf, covered, "test", 0).unwrap();
        buf[5] ^= 1;
        assert!(matches!(
            verify_checksum(&buf, covered, "test", 0x40),
            Err(FormatError::MetadataChecksumMismatch { address: 0x40, .. })
        ));
    }

    #[test]
    fn put_uint_truncates_to_width() {
        let mut buf = Vec::new();
        put_uint(&mut buf, 0x0102_0304_0506, 3);
        assert_eq!(buf, vec![0x06, 0x05, 0x04]);
    }
}
