//! Byte-addressable sources the chunk engine reads from.
//!
//! The engine never owns file-opening logic; callers hand it something that
//! can serve `len` bytes at an absolute offset, plus the per-file address and
//! length widths from the superblock.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};

use crate::error::FormatError;

/// Per-file integer widths from the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContext {
    offset_size: u8,
    length_size: u8,
}

impl FileContext {
    /// Create a context, validating both widths (2, 4 or 8 bytes).
    pub fn new(offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        if !matches!(offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        Ok(Self {
            offset_size,
            length_size,
        })
    }

    /// Width of a file address in bytes.
    pub fn offset_size(&self) -> u8 {
        self.offset_size
    }

    /// Width of a file length in bytes.
    pub fn length_size(&self) -> u8 {
        self.length_size
    }
}

impl Default for FileContext {
    fn default() -> Self {
        Self {
            offset_size: 8,
            length_size: 8,
        }
    }
}

/// Positioned, read-only access to file bytes.
pub trait ByteSource {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError>;

    /// Total number of bytes available.
    fn len(&self) -> u64;

    /// Whether the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes at `offset` into a new buffer.
    ///
    /// Ranges past the end fail before anything is allocated.
    fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>, FormatError> {
        let available = self.len();
        if offset.checked_add(len as u64).is_none_or(|end| end > available) {
            return Err(FormatError::UnexpectedEof {
                expected: (offset as usize).saturating_add(len),
                available: available as usize,
            });
        }
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        (**self).read_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

fn copy_range(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
    let eof = || FormatError::UnexpectedEof {
        expected: (offset as usize).saturating_add(buf.len()),
        available: data.len(),
    };
    let start = usize::try_from(offset).map_err(|_| eof())?;
    let end = start.checked_add(buf.len()).ok_or_else(eof)?;
    if end > data.len() {
        return Err(eof());
    }
    buf.copy_from_slice(&data[start..end]);
    Ok(())
}

/// In-memory file image.
#[derive(Debug, Clone)]
pub struct SliceSource<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> SliceSource<B> {
    /// Wrap a byte buffer.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }

    /// The wrapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// Unwrap the buffer.
    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B: AsRef<[u8]>> ByteSource for SliceSource<B> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        copy_range(self.bytes.as_ref(), offset, buf)
    }

    fn len(&self) -> u64 {
        self.bytes.as_ref().len() as u64
    }
}

/// Any `Read + Seek` (a `File`, a `Cursor`) used through seek-then-read.
///
/// The reader's position is shared state, so the source is single-threaded.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: RefCell<R>,
    len: u64,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// Wrap a reader; its length is taken from seeking to the end.
    pub fn new(mut reader: R) -> Result<Self, FormatError> {
        let len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader: RefCell::new(reader),
            len,
        })
    }

    /// Unwrap the reader.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.len) {
            return Err(FormatError::UnexpectedEof {
                expected: (offset as usize).saturating_add(buf.len()),
                available: self.len as usize,
            });
        }
        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Memory-mapped file.
#[cfg(feature = "mmap")]
#[derive(Debug)]
pub struct MmapSource {
    map: memmap2::Mmap,
}

#[cfg(feature = "mmap")]
impl MmapSource {
    /// Map `file` read-only.
    ///
    /// The mapping assumes no other process truncates the file while it is
    /// open.
    pub fn open(file: &std::fs::File) -> Result<Self, FormatError> {
        // SAFETY: read-only mapping; callers keep the file unmodified while mapped.
        let map = unsafe { memmap2::Mmap::map(file)? };
        Ok(Self { map })
    }
}

#[cfg(feature = "mmap")]
impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        copy_range(&self.map, offset, buf)
    }

    fn len(&self) -> u64 {
        self.map.len() as u64
    }
}
