//! Group membership messages: Link (0x0006), Link Info (0x0002) and
//! Group Info (0x000A).

use crate::datatype::CharacterSet;
use crate::error::FormatError;
use crate::source::Cursor;

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Object header address in this file.
    Hard { address: u64 },
    /// Path to another object in this file.
    Soft { path: String },
    /// Object in another file.
    External { filename: String, path: String },
}

/// A named link from a group to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
    pub charset: CharacterSet,
}

impl Link {
    pub fn parse(c: &mut Cursor<'_>) -> Result<Link, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "link",
                version,
                offset: at,
            });
        }
        let flags = c.u8()?;
        let link_type = if flags & 0x08 != 0 { c.u8()? } else { 0 };
        let creation_order = if flags & 0x04 != 0 {
            Some(c.u64()?)
        } else {
            None
        };
        let charset = if flags & 0x10 != 0 {
            match c.u8()? {
                1 => CharacterSet::Utf8,
                _ => CharacterSet::Ascii,
            }
        } else {
            CharacterSet::Ascii
        };
        let name_len = c.uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(c.bytes(name_len)?).into_owned();

        let target_at = c.file_offset();
        let target = match link_type {
            0 => LinkTarget::Hard {
                address: c.address("hard link target")?,
            },
            1 => {
                let len = c.u16()? as usize;
                LinkTarget::Soft {
                    path: String::from_utf8_lossy(c.bytes(len)?).into_owned(),
                }
            }
            64 => {
                let len = c.u16()? as usize;
                let mut info = c.sub(len)?;
                // Version/flags byte precedes the two strings.
                info.skip(1)?;
                let filename = info.cstring()?;
                let path = info.cstring()?;
                LinkTarget::External { filename, path }
            }
            other => {
                return Err(FormatError::InvalidValue {
                    what: "link type",
                    value: u64::from(other),
                    offset: target_at,
                })
            }
        };
        Ok(Link {
            name,
            target,
            creation_order,
            charset,
        })
    }
}

/// Where a new-style group keeps its links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub max_creation_order: Option<u64>,
    /// Fractal heap for dense storage; `None` when links are compact.
    pub heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl LinkInfo {
    pub fn parse(c: &mut Cursor<'_>) -> Result<LinkInfo, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "link info",
                version,
                offset: at,
            });
        }
        let flags = c.u8()?;
        let max_creation_order = if flags & 0x01 != 0 {
            Some(c.u64()?)
        } else {
            None
        };
        let heap_address = c.offset()?;
        let name_index_address = c.offset()?;
        let creation_order_index_address = if flags & 0x02 != 0 {
            c.offset()?
        } else {
            None
        };
        Ok(LinkInfo {
            max_creation_order,
            heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    pub fn is_dense(&self) -> bool {
        self.heap_address.is_some()
    }
}

/// Storage thresholds of a new-style group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupInfo {
    pub max_compact: Option<u16>,
    pub min_dense: Option<u16>,
    pub estimated_entries: Option<u16>,
    pub estimated_name_len: Option<u16>,
}

impl GroupInfo {
    pub fn parse(c: &mut Cursor<'_>) -> Result<GroupInfo, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "group info",
                version,
                offset: at,
            });
        }
        let flags = c.u8()?;
        let mut info = GroupInfo::default();
        if flags & 0x01 != 0 {
            info.max_compact = Some(c.u16()?);
            info.min_dense = Some(c.u16()?);
        }
        if flags & 0x02 != 0 {
            info.estimated_entries = Some(c.u16()?);
            info.estimated_name_len = Some(c.u16()?);
        }
        Ok(info)
    }
}
