//! HDF5 Filter Pipeline message parsing (message type 0x000B).

use crate::error::FormatError;
use crate::field::FieldReader;

/// Well-known filter IDs.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;
pub const FILTER_BZIP2: u16 = 307;

/// Filter flag bit 0: the filter may be skipped if it fails on write.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// Description of a single filter in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    /// Filter identification value.
    pub id: u16,
    /// Optional filter name.
    pub name: Option<String>,
    /// Filter flags (bit 0 = optional).
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    /// A mandatory filter without a name.
    pub fn new(id: u16, client_data: Vec<u32>) -> Self {
        Self {
            id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    /// Mark the filter optional.
    pub fn optional(mut self) -> Self {
        self.flags |= FLAG_OPTIONAL;
        self
    }

    /// Attach a name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the filter may be skipped when it fails on write.
    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// A filter pipeline consisting of one or more filters, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    /// Pipeline version (1 or 2).
    pub version: u8,
    /// Ordered list of filters.
    pub filters: Vec<FilterDescription>,
}

fn parse_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FilterPipeline {
    /// A version 2 pipeline of the given filters.
    pub fn new(filters: Vec<FilterDescription>) -> Self {
        Self { version: 2, filters }
    }

    /// Whether the pipeline has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Parse a filter pipeline message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<FilterPipeline, FormatError> {
        let mut r = FieldReader::new(data);
        let version = r.u8()?;
        let count = r.u8()? as usize;
        if !matches!(version, 1 | 2) {
            return Err(FormatError::InvalidFilterPipelineVersion(version));
        }
        if version == 1 {
            r.skip(6)?;
        }

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.u16()?;
            // Version 2 omits the name length for the predefined filters.
            let name_length = if version == 1 || id >= 256 {
                r.u16()? as usize
            } else {
                0
            };
            let flags = r.u16()?;
            let n_client = r.u16()? as usize;

            let name = if name_length > 0 {
                // Version 1 pads the name to a multiple of eight bytes.
                let stored = if version == 1 {
                    name_length.next_multiple_of(8)
                } else {
                    name_length
                };
                let raw = r.take(stored)?;
                Some(parse_name(&raw[..name_length]))
            } else {
                None
            };

            let client_data = (0..n_client)
                .map(|_| r.u32())
                .collect::<Result<Vec<_>, _>>()?;
            if version == 1 && n_client % 2 == 1 {
                r.skip(4)?;
            }

            filters.push(FilterDescription {
                id,
                name,
                flags,
                client_data,
            });
        }

        Ok(FilterPipeline { version, filters })
    }

    /// Serialize the pipeline in its version's encoding.
    pub fn serialize(&self) -> Vec<u8> {
        let v1 = self.version == 1;
        let mut buf = vec![if v1 { 1 } else { 2 }, self.filters.len() as u8];
        if v1 {
            buf.extend_from_slice(&[0u8; 6]);
        }

        for f in &self.filters {
            buf.extend_from_slice(&f.id.to_le_bytes());

            let mut name = f.name.as_deref().map(|n| n.as_bytes().to_vec()).unwrap_or_default();
            if !name.is_empty() {
                name.push(0);
            }
            let write_name = v1 || f.id >= 256;
            if write_name {
                if v1 {
                    name.resize(name.len().next_multiple_of(8), 0);
                }
                buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
            }
            buf.extend_from_slice(&f.flags.to_le_bytes());
            buf.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
            if write_name {
                buf.extend_from_slice(&name);
            }
            for v in &f.client_data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            if v1 && f.client_data.len() % 2 == 1 {
                buf.extend_from_slice(&[0u8; 4]);
            }
        }
        buf
    }
}
