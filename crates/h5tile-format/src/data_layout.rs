//! Data layout message parsing (message type 0x0008), versions 1-4.

use crate::error::FormatError;
use crate::source::Cursor;

/// How a chunked variable locates its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree keyed by chunk coordinates (layouts v1-v3).
    BTreeV1,
    /// Exactly one chunk covering the whole variable.
    SingleChunk {
        /// Stored size when the chunk is filtered.
        filtered_size: Option<u64>,
        filter_mask: u32,
    },
    /// Unfiltered chunks laid out back to back in tile order.
    Implicit,
    FixedArray,
    ExtensibleArray,
    BTreeV2,
}

/// Parsed data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw data stored inside the message.
    Compact { data: Vec<u8> },
    /// Raw data stored in one block. `size` is absent for v1/v2 messages.
    Contiguous {
        address: Option<u64>,
        size: Option<u64>,
    },
    /// Raw data split into chunks.
    Chunked {
        version: u8,
        /// Chunk extent per dimension, without the element-size entry.
        chunk_shape: Vec<u64>,
        /// Trailing element-size entry of the stored chunk dimensions.
        element_size: u32,
        /// Index (or single chunk / first implicit chunk) address.
        address: Option<u64>,
        index: ChunkIndex,
    },
    /// Virtual dataset mapping.
    Virtual,
}

fn split_element_size(mut dims: Vec<u64>, at: u64) -> Result<(Vec<u64>, u32), FormatError> {
    let element_size = dims.pop().ok_or(FormatError::InvalidValue {
        what: "chunk dimensionality",
        value: 0,
        offset: at,
    })?;
    if dims.iter().any(|&d| d == 0) {
        return Err(FormatError::InvalidValue {
            what: "chunk dimension",
            value: 0,
            offset: at,
        });
    }
    Ok((dims, element_size as u32))
}

impl DataLayout {
    /// Parse a layout message payload.
    pub fn parse(c: &mut Cursor<'_>) -> Result<DataLayout, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        match version {
            1 | 2 => Self::parse_v1v2(c, version, at),
            3 | 4 => Self::parse_v3v4(c, version, at),
            v => Err(FormatError::UnsupportedVersion {
                what: "data layout",
                version: v,
                offset: at,
            }),
        }
    }

    fn parse_v1v2(c: &mut Cursor<'_>, version: u8, at: u64) -> Result<DataLayout, FormatError> {
        let ndims = c.u8()? as usize;
        let class = c.u8()?;
        c.skip(5)?;
        let address = if class != 0 { c.offset()? } else { None };
        let mut dims = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            dims.push(u64::from(c.u32()?));
        }
        match class {
            0 => {
                let size = c.u32()? as usize;
                Ok(DataLayout::Compact {
                    data: c.bytes(size)?.to_vec(),
                })
            }
            1 => Ok(DataLayout::Contiguous {
                address,
                size: None,
            }),
            2 => {
                let (chunk_shape, element_size) = split_element_size(dims, at)?;
                Ok(DataLayout::Chunked {
                    version,
                    chunk_shape,
                    element_size,
                    address,
                    index: ChunkIndex::BTreeV1,
                })
            }
            other => Err(FormatError::InvalidValue {
                what: "layout class",
                value: u64::from(other),
                offset: at + 2,
            }),
        }
    }

    fn parse_v3v4(c: &mut Cursor<'_>, version: u8, at: u64) -> Result<DataLayout, FormatError> {
        let class = c.u8()?;
        match class {
            0 => {
                let size = c.u16()? as usize;
                Ok(DataLayout::Compact {
                    data: c.bytes(size)?.to_vec(),
                })
            }
            1 => {
                let address = c.offset()?;
                let size = c.length()?;
                Ok(DataLayout::Contiguous {
                    address,
                    size: Some(size),
                })
            }
            2 if version == 3 => {
                let ndims = c.u8()? as usize;
                let address = c.offset()?;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(u64::from(c.u32()?));
                }
                let (chunk_shape, element_size) = split_element_size(dims, at)?;
                Ok(DataLayout::Chunked {
                    version,
                    chunk_shape,
                    element_size,
                    address,
                    index: ChunkIndex::BTreeV1,
                })
            }
            2 => {
                let flags = c.u8()?;
                let ndims = c.u8()? as usize;
                let width = c.u8()? as usize;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(c.uint(width)?);
                }
                let index_at = c.file_offset();
                let index = match c.u8()? {
                    1 => {
                        if flags & 0x02 != 0 {
                            let size = c.length()?;
                            let mask = c.u32()?;
                            ChunkIndex::SingleChunk {
                                filtered_size: Some(size),
                                filter_mask: mask,
                            }
                        } else {
                            ChunkIndex::SingleChunk {
                                filtered_size: None,
                                filter_mask: 0,
                            }
                        }
                    }
                    2 => ChunkIndex::Implicit,
                    3 => {
                        c.skip(1)?;
                        ChunkIndex::FixedArray
                    }
                    4 => {
                        c.skip(5)?;
                        ChunkIndex::ExtensibleArray
                    }
                    5 => {
                        c.skip(6)?;
                        ChunkIndex::BTreeV2
                    }
                    other => {
                        return Err(FormatError::InvalidValue {
                            what: "chunk index type",
                            value: u64::from(other),
                            offset: index_at,
                        })
                    }
                };
                let address = c.offset()?;
                let (chunk_shape, element_size) = split_element_size(dims, at)?;
                Ok(DataLayout::Chunked {
                    version,
                    chunk_shape,
                    element_size,
                    address,
                    index,
                })
            }
            3 if version == 4 => Ok(DataLayout::Virtual),
            other => Err(FormatError::InvalidValue {
                what: "layout class",
                value: u64::from(other),
                offset: at + 1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Sizes;

    fn parse(bytes: &[u8]) -> Result<DataLayout, FormatError> {
        let mut c = Cursor::new(bytes, 0, Sizes::default());
        DataLayout::parse(&mut c)
    }

    #[test]
    fn v3_compact() {
        let mut buf = vec![3, 0];
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(
            parse(&buf).unwrap(),
            DataLayout::Compact {
                data: vec![1, 2, 3, 4]
            }
        );
    }

    #[test]
    fn v3_contiguous_undefined_address() {
        let mut buf = vec![3, 1];
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&800u64.to_le_bytes());
        assert_eq!(
            parse(&buf).unwrap(),
            DataLayout::Contiguous {
                address: None,
                size: Some(800)
            }
        );
    }

    #[test]
    fn v3_chunked_strips_element_size() {
        let mut buf = vec![3, 2, 4];
        buf.extend_from_slice(&0x400u64.to_le_bytes());
        for d in [2u32, 5, 3, 4] {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        let DataLayout::Chunked {
            chunk_shape,
            element_size,
            address,
            index,
            ..
        } = parse(&buf).unwrap()
        else {
            panic!("not chunked")
        };
        assert_eq!(chunk_shape, vec![2, 5, 3]);
        assert_eq!(element_size, 4);
        assert_eq!(address, Some(0x400));
        assert_eq!(index, ChunkIndex::BTreeV1);
    }

    #[test]
    fn v1_chunked() {
        let mut buf = vec![1, 3, 2, 0, 0, 0, 0, 0];
        buf.extend_from_slice(&0x800u64.to_le_bytes());
        for d in [10u32, 10, 8] {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        assert!(matches!(
            parse(&buf).unwrap(),
            DataLayout::Chunked { version: 1, element_size: 8, address: Some(0x800), .. }
        ));
    }

    #[test]
    fn v4_single_filtered_chunk() {
        let mut buf = vec![4, 2, 0x02, 3, 2];
        for d in [100u16, 50, 8] {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf.push(1);
        buf.extend_from_slice(&1234u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0x2000u64.to_le_bytes());
        let DataLayout::Chunked { chunk_shape, index, address, .. } = parse(&buf).unwrap() else {
            panic!("not chunked")
        };
        assert_eq!(chunk_shape, vec![100, 50]);
        assert_eq!(address, Some(0x2000));
        assert_eq!(
            index,
            ChunkIndex::SingleChunk {
                filtered_size: Some(1234),
                filter_mask: 0
            }
        );
    }

    #[test]
    fn v4_virtual() {
        assert_eq!(parse(&[4, 3]).unwrap(), DataLayout::Virtual);
    }

    #[test]
    fn zero_chunk_dim_rejected() {
        let mut buf = vec![3, 2, 2];
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            parse(&buf),
            Err(FormatError::InvalidValue { what: "chunk dimension", .. })
        ));
    }

    #[test]
    fn unknown_version() {
        assert!(matches!(
            parse(&[9, 0]),
            Err(FormatError::UnsupportedVersion { what: "data layout", .. })
        ));
    }
}
