//! Attribute message parsing (message type 0x000C), versions 1-3.
//!
//! An attribute carries its own datatype and dataspace followed by the raw
//! value bytes. Values are materialised by the assembler, the same path
//! variable data takes, so variable-length strings and references decode
//! the same way in both places.

use crate::datatype::{CharacterSet, Datatype};
use crate::dataspace::Dataspace;
use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::object_header::HeaderMessage;
use crate::shared::{ResolveShared, SharedRef};
use crate::source::Cursor;

const FLAG_SHARED_DATATYPE: u8 = 0x01;
const FLAG_SHARED_DATASPACE: u8 = 0x02;

/// A decoded attribute with undecoded value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub charset: CharacterSet,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    /// `num_elements * datatype.size()` bytes.
    pub raw: Vec<u8>,
}

fn padded(len: usize, pad: bool) -> usize {
    if pad {
        len.div_ceil(8) * 8
    } else {
        len
    }
}

impl Attribute {
    /// Parse an attribute message. Shared datatypes and dataspaces are
    /// resolved through `shared`.
    pub fn parse(c: &mut Cursor<'_>, shared: &dyn ResolveShared) -> Result<Attribute, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                what: "attribute",
                version,
                offset: at,
            });
        }
        let flags = if version == 1 {
            c.skip(1)?;
            0
        } else {
            c.u8()?
        };
        let name_size = c.u16()? as usize;
        let datatype_size = c.u16()? as usize;
        let dataspace_size = c.u16()? as usize;
        let charset = if version == 3 {
            match c.u8()? {
                1 => CharacterSet::Utf8,
                _ => CharacterSet::Ascii,
            }
        } else {
            CharacterSet::Ascii
        };
        let pad = version == 1;

        let name = c.sub(padded(name_size, pad))?.fixed_string(name_size)?;

        let mut dt = c.sub(padded(datatype_size, pad))?;
        let datatype = if flags & FLAG_SHARED_DATATYPE != 0 {
            let r = SharedRef::parse(&mut dt)?;
            match shared.resolve_shared(&r, MessageType::Datatype)? {
                HeaderMessage::Datatype(d) => d,
                other => return Err(unexpected(&other, at)),
            }
        } else {
            Datatype::parse(&mut dt)?
        };

        let mut ds = c.sub(padded(dataspace_size, pad))?;
        let dataspace = if flags & FLAG_SHARED_DATASPACE != 0 {
            let r = SharedRef::parse(&mut ds)?;
            match shared.resolve_shared(&r, MessageType::Dataspace)? {
                HeaderMessage::Dataspace(d) => d,
                other => return Err(unexpected(&other, at)),
            }
        } else {
            Dataspace::parse(&mut ds)?
        };

        let len = usize::try_from(dataspace.num_elements())
            .ok()
            .and_then(|n| n.checked_mul(datatype.size() as usize))
            .ok_or(FormatError::InvalidValue {
                what: "attribute size",
                value: dataspace.num_elements(),
                offset: at,
            })?;
        let raw = c.bytes(len)?.to_vec();

        Ok(Attribute {
            name,
            charset,
            datatype,
            dataspace,
            raw,
        })
    }
}

fn unexpected(msg: &HeaderMessage, at: u64) -> FormatError {
    FormatError::InvalidValue {
        what: "shared attribute component type",
        value: u64::from(msg.message_type().to_u16()),
        offset: at,
    }
}
