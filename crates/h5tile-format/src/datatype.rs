//! Datatype message parsing (message type 0x0003).
//!
//! Decodes the recursive on-disk descriptor for every class 0-10. The
//! semantic view used to interpret element bytes lives in
//! [`crate::element_type`].

use crate::error::FormatError;
use crate::source::{Cursor, Endian};

/// Nesting limit for compound/array/vlen/enum descriptors.
pub const MAX_NESTING: usize = 32;

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// Reference kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Object,
    Region,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    /// Byte offset within the compound element.
    pub offset: u32,
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value bytes, `base.size()` long.
    pub value: Vec<u8>,
}

/// Parsed datatype descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0.
    FixedPoint {
        size: u32,
        order: Endian,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1. `vax` marks the VAX mixed byte order.
    FloatingPoint {
        size: u32,
        order: Endian,
        vax: bool,
        bit_precision: u16,
        exponent_bias: u32,
    },
    /// Class 2.
    Time {
        size: u32,
        order: Endian,
        bit_precision: u16,
    },
    /// Class 3: fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4.
    BitField {
        size: u32,
        order: Endian,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5.
    Opaque { size: u32, tag: String },
    /// Class 6.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7.
    Reference { size: u32, kind: ReferenceKind },
    /// Class 8.
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9. `size` is the stored heap-id slot size.
    VariableLength {
        size: u32,
        is_string: bool,
        padding: StringPadding,
        charset: CharacterSet,
        base: Box<Datatype>,
    },
    /// Class 10.
    Array {
        size: u32,
        dims: Vec<u32>,
        base: Box<Datatype>,
    },
}

fn padding_from(v: u8, offset: u64) -> Result<StringPadding, FormatError> {
    match v {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(FormatError::InvalidValue {
            what: "string padding",
            value: u64::from(v),
            offset,
        }),
    }
}

fn charset_from(v: u8, offset: u64) -> Result<CharacterSet, FormatError> {
    match v {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(FormatError::InvalidValue {
            what: "character set",
            value: u64::from(v),
            offset,
        }),
    }
}

fn order_from(bits: u8) -> Endian {
    if bits & 0x01 == 0 {
        Endian::Little
    } else {
        Endian::Big
    }
}

/// Width of a v3 compound member offset, from the compound's size.
fn member_offset_width(size: u32) -> usize {
    match size {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

impl Datatype {
    /// Decode one descriptor, leaving the cursor just past it.
    pub fn parse(c: &mut Cursor<'_>) -> Result<Datatype, FormatError> {
        Self::parse_nested(c, 0)
    }

    fn parse_nested(c: &mut Cursor<'_>, depth: usize) -> Result<Datatype, FormatError> {
        let start = c.file_offset();
        if depth > MAX_NESTING {
            return Err(FormatError::InvalidValue {
                what: "datatype nesting depth",
                value: depth as u64,
                offset: start,
            });
        }
        let class_and_version = c.u8()?;
        let class = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        let bits = c.bytes(3)?;
        let (bf0, bf1) = (bits[0], bits[1]);
        let size = c.u32()?;

        let dt = match class {
            0 => {
                let bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                Datatype::FixedPoint {
                    size,
                    order: order_from(bf0),
                    signed: bf0 & 0x08 != 0,
                    bit_offset,
                    bit_precision,
                }
            }
            1 => {
                let _bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                // exponent location/size, mantissa location/size
                c.skip(4)?;
                let exponent_bias = c.u32()?;
                Datatype::FloatingPoint {
                    size,
                    order: order_from(bf0),
                    vax: bf0 & 0x40 != 0,
                    bit_precision,
                    exponent_bias,
                }
            }
            2 => Datatype::Time {
                size,
                order: order_from(bf0),
                bit_precision: c.u16()?,
            },
            3 => Datatype::String {
                size,
                padding: padding_from(bf0 & 0x0F, start)?,
                charset: charset_from(bf0 >> 4, start)?,
            },
            4 => {
                let bit_offset = c.u16()?;
                let bit_precision = c.u16()?;
                Datatype::BitField {
                    size,
                    order: order_from(bf0),
                    bit_offset,
                    bit_precision,
                }
            }
            5 => {
                let tag_len = bf0 as usize;
                let tag = c.fixed_string(tag_len)?;
                c.skip(tag_len.div_ceil(8) * 8 - tag_len)?;
                Datatype::Opaque { size, tag }
            }
            6 => {
                let count = u16::from(bf0) | u16::from(bf1) << 8;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(Self::parse_member(c, version, size, depth)?);
                }
                Datatype::Compound { size, members }
            }
            7 => {
                let kind = match bf0 & 0x0F {
                    0 => ReferenceKind::Object,
                    1 => ReferenceKind::Region,
                    v => {
                        return Err(FormatError::InvalidValue {
                            what: "reference kind",
                            value: u64::from(v),
                            offset: start,
                        })
                    }
                };
                Datatype::Reference { size, kind }
            }
            8 => {
                let count = u16::from(bf0) | u16::from(bf1) << 8;
                let base = Self::parse_nested(c, depth + 1)?;
                let mut names = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    names.push(if version >= 3 {
                        c.cstring()?
                    } else {
                        c.padded_cstring(8)?
                    });
                }
                let width = base.size() as usize;
                let mut members = Vec::with_capacity(names.len());
                for name in names {
                    members.push(EnumMember {
                        name,
                        value: c.bytes(width)?.to_vec(),
                    });
                }
                Datatype::Enumeration {
                    size,
                    base: Box::new(base),
                    members,
                }
            }
            9 => {
                let is_string = bf0 & 0x0F == 1;
                let padding = padding_from((bf0 >> 4) & 0x0F, start)?;
                let charset = charset_from(bf1 & 0x0F, start)?;
                let base = Self::parse_nested(c, depth + 1)?;
                Datatype::VariableLength {
                    size,
                    is_string,
                    padding,
                    charset,
                    base: Box::new(base),
                }
            }
            10 => {
                let rank = c.u8()? as usize;
                if version < 3 {
                    c.skip(3)?;
                }
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dims.push(c.u32()?);
                }
                if version < 3 {
                    // permutation indices
                    c.skip(4 * rank)?;
                }
                let base = Self::parse_nested(c, depth + 1)?;
                Datatype::Array {
                    size,
                    dims,
                    base: Box::new(base),
                }
            }
            other => {
                return Err(FormatError::UnsupportedDatatype(format!(
                    "class {other} at offset {start:#x}"
                )))
            }
        };
        Ok(dt)
    }

    fn parse_member(
        c: &mut Cursor<'_>,
        version: u8,
        compound_size: u32,
        depth: usize,
    ) -> Result<CompoundMember, FormatError> {
        match version {
            1 | 2 => {
                let name = c.padded_cstring(8)?;
                let offset = c.u32()?;
                if version == 1 {
                    // rank, reserved(3), permutation(4), reserved(4), dims(4x4)
                    c.skip(28)?;
                }
                let datatype = Self::parse_nested(c, depth + 1)?;
                Ok(CompoundMember {
                    name,
                    offset,
                    datatype,
                })
            }
            3 => {
                let name = c.cstring()?;
                let offset = c.uint(member_offset_width(compound_size))? as u32;
                let datatype = Self::parse_nested(c, depth + 1)?;
                Ok(CompoundMember {
                    name,
                    offset,
                    datatype,
                })
            }
            v => Err(FormatError::UnsupportedVersion {
                what: "compound datatype",
                version: v,
                offset: c.file_offset(),
            }),
        }
    }

    /// Element size in bytes as declared by the descriptor.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }
}
