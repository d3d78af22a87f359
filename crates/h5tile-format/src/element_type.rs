//! Semantic element types resolved from datatype descriptors.
//!
//! An [`ElementType`] is what the assembler and the value accessors work
//! with: every fixed-size kind has a concrete byte size, and the
//! variable-length kinds say how their heap-resident payload is decoded.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::datatype::{CharacterSet, Datatype, ReferenceKind, StringPadding};
use crate::error::FormatError;
use crate::source::Endian;

/// A compound member after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub offset: usize,
    pub ty: ElementType,
}

/// Resolved element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    /// Fixed-point, bitfield and time classes.
    Int { size: u8, signed: bool, order: Endian },
    Float { size: u8, order: Endian },
    FixedString {
        size: usize,
        padding: StringPadding,
        charset: CharacterSet,
    },
    Opaque { size: usize, tag: String },
    Compound { size: usize, members: Vec<Member> },
    /// Stored as an opaque handle; resolving the target is a separate step.
    Reference { size: usize, kind: ReferenceKind },
    /// Storage is the base integer; names are for presentation.
    Enum {
        base: Box<ElementType>,
        names: Vec<(String, i64)>,
    },
    /// Variable-length string decoded through the global heap.
    VlenString {
        size: usize,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Variable-length sequence of `base`.
    Vlen { size: usize, base: Box<ElementType> },
    /// Fixed-count repetition of `base`; `size` covers the whole array.
    Array {
        size: usize,
        dims: Vec<u32>,
        base: Box<ElementType>,
    },
}

fn int_size(size: u32, class: &str) -> Result<u8, FormatError> {
    match size {
        1 | 2 | 4 | 8 => Ok(size as u8),
        other => Err(FormatError::UnsupportedDatatype(format!(
            "{class} of {other} bytes"
        ))),
    }
}

/// Decode a signed or unsigned integer of 1-8 bytes as `i64`.
pub(crate) fn decode_int(bytes: &[u8], signed: bool, order: Endian) -> i64 {
    let n = bytes.len();
    if n == 0 || n > 8 {
        return 0;
    }
    let raw = match order {
        Endian::Little => LittleEndian::read_uint(bytes, n),
        Endian::Big => BigEndian::read_uint(bytes, n),
    };
    if signed && n < 8 {
        let shift = 64 - 8 * n as u32;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

impl ElementType {
    /// Resolve a descriptor. Fails for integer sizes other than 1/2/4/8,
    /// float sizes other than 4/8, and VAX floats.
    pub fn resolve(dt: &Datatype) -> Result<ElementType, FormatError> {
        Ok(match dt {
            Datatype::FixedPoint {
                size, signed, order, ..
            } => ElementType::Int {
                size: int_size(*size, "integer")?,
                signed: *signed,
                order: *order,
            },
            Datatype::BitField { size, order, .. } => ElementType::Int {
                size: int_size(*size, "bitfield")?,
                signed: false,
                order: *order,
            },
            Datatype::Time { size, order, .. } => ElementType::Int {
                size: int_size(*size, "time")?,
                signed: true,
                order: *order,
            },
            Datatype::FloatingPoint {
                size, order, vax, ..
            } => {
                if *vax {
                    return Err(FormatError::UnsupportedDatatype("VAX float".into()));
                }
                match size {
                    4 | 8 => ElementType::Float {
                        size: *size as u8,
                        order: *order,
                    },
                    other => {
                        return Err(FormatError::UnsupportedDatatype(format!(
                            "float of {other} bytes"
                        )))
                    }
                }
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => ElementType::FixedString {
                size: *size as usize,
                padding: *padding,
                charset: *charset,
            },
            Datatype::Opaque { size, tag } => ElementType::Opaque {
                size: *size as usize,
                tag: tag.clone(),
            },
            Datatype::Compound { size, members } => {
                let members = members
                    .iter()
                    .map(|m| {
                        Ok(Member {
                            name: m.name.clone(),
                            offset: m.offset as usize,
                            ty: ElementType::resolve(&m.datatype)?,
                        })
                    })
                    .collect::<Result<Vec<_>, FormatError>>()?;
                ElementType::Compound {
                    size: *size as usize,
                    members,
                }
            }
            Datatype::Reference { size, kind } => ElementType::Reference {
                size: *size as usize,
                kind: *kind,
            },
            Datatype::Enumeration { base, members, .. } => {
                let base = ElementType::resolve(base)?;
                let (signed, order) = match base {
                    ElementType::Int { signed, order, .. } => (signed, order),
                    ref other => {
                        return Err(FormatError::UnsupportedDatatype(format!(
                            "enum over {other}"
                        )))
                    }
                };
                let names = members
                    .iter()
                    .map(|m| (m.name.clone(), decode_int(&m.value, signed, order)))
                    .collect();
                ElementType::Enum {
                    base: Box::new(base),
                    names,
                }
            }
            Datatype::VariableLength {
                size,
                is_string,
                padding,
                charset,
                base,
            } => {
                let char_base = matches!(**base, Datatype::String { size: 1, .. });
                if *is_string || char_base {
                    ElementType::VlenString {
                        size: *size as usize,
                        padding: *padding,
                        charset: *charset,
                    }
                } else {
                    ElementType::Vlen {
                        size: *size as usize,
                        base: Box::new(ElementType::resolve(base)?),
                    }
                }
            }
            Datatype::Array { dims, base, .. } => {
                let base = ElementType::resolve(base)?;
                let size = dims
                    .iter()
                    .try_fold(base.size(), |acc, &d| acc.checked_mul(d as usize))
                    .ok_or_else(|| {
                        FormatError::UnsupportedDatatype(format!(
                            "array {dims:?} of {base} overflows the element size"
                        ))
                    })?;
                ElementType::Array {
                    size,
                    dims: dims.clone(),
                    base: Box::new(base),
                }
            }
        })
    }

    /// Bytes one element occupies in a raw buffer.
    pub fn size(&self) -> usize {
        match self {
            ElementType::Int { size, .. } | ElementType::Float { size, .. } => *size as usize,
            ElementType::FixedString { size, .. }
            | ElementType::Opaque { size, .. }
            | ElementType::Compound { size, .. }
            | ElementType::Reference { size, .. }
            | ElementType::VlenString { size, .. }
            | ElementType::Vlen { size, .. }
            | ElementType::Array { size, .. } => *size,
            ElementType::Enum { base, .. } => base.size(),
        }
    }

    /// True for kinds whose payload lives in the global heap.
    pub fn is_variable_length(&self) -> bool {
        matches!(self, ElementType::VlenString { .. } | ElementType::Vlen { .. })
    }

    /// Byte order of numeric kinds.
    pub fn order(&self) -> Option<Endian> {
        match self {
            ElementType::Int { order, .. } | ElementType::Float { order, .. } => Some(*order),
            ElementType::Enum { base, .. } => base.order(),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Int { size, signed, .. } => {
                write!(f, "{}int{}", if *signed { "" } else { "u" }, *size as u32 * 8)
            }
            ElementType::Float { size, .. } => write!(f, "float{}", *size as u32 * 8),
            ElementType::FixedString { size, .. } => write!(f, "char[{size}]"),
            ElementType::Opaque { size, .. } => write!(f, "opaque[{size}]"),
            ElementType::Compound { members, .. } => {
                f.write_str("compound {")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {} {}", m.ty, m.name)?;
                }
                f.write_str(" }")
            }
            ElementType::Reference { kind, .. } => match kind {
                ReferenceKind::Object => f.write_str("reference"),
                ReferenceKind::Region => f.write_str("region reference"),
            },
            ElementType::Enum { base, .. } => write!(f, "enum {base}"),
            ElementType::VlenString { .. } => f.write_str("string"),
            ElementType::Vlen { base, .. } => write!(f, "vlen<{base}>"),
            ElementType::Array { dims, base, .. } => {
                write!(f, "{base}")?;
                for d in dims {
                    write!(f, "[{d}]")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{CompoundMember, EnumMember};

    fn int(size: u32, signed: bool) -> Datatype {
        Datatype::FixedPoint {
            size,
            order: Endian::Little,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    #[test]
    fn integer_sizes() {
        for size in [1, 2, 4, 8] {
            let t = ElementType::resolve(&int(size, true)).unwrap();
            assert_eq!(t.size(), size as usize);
        }
        assert!(matches!(
            ElementType::resolve(&int(3, true)),
            Err(FormatError::UnsupportedDatatype(_))
        ));
    }

    #[test]
    fn bitfield_is_unsigned() {
        let dt = Datatype::BitField {
            size: 2,
            order: Endian::Big,
            bit_offset: 0,
            bit_precision: 16,
        };
        assert_eq!(
            ElementType::resolve(&dt).unwrap(),
            ElementType::Int { size: 2, signed: false, order: Endian::Big }
        );
    }

    #[test]
    fn float_sizes() {
        let f16 = Datatype::FloatingPoint {
            size: 2,
            order: Endian::Little,
            vax: false,
            bit_precision: 16,
            exponent_bias: 15,
        };
        assert!(ElementType::resolve(&f16).is_err());
    }

    #[test]
    fn vlen_of_chars_is_string() {
        let dt = Datatype::VariableLength {
            size: 16,
            is_string: false,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
            base: Box::new(Datatype::String {
                size: 1,
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Ascii,
            }),
        };
        assert!(matches!(ElementType::resolve(&dt).unwrap(), ElementType::VlenString { size: 16, .. }));
    }

    #[test]
    fn vlen_of_ints_is_sequence() {
        let dt = Datatype::VariableLength {
            size: 16,
            is_string: false,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
            base: Box::new(int(4, true)),
        };
        let t = ElementType::resolve(&dt).unwrap();
        assert_eq!(t.to_string(), "vlen<int32>");
        assert!(t.is_variable_length());
    }

    #[test]
    fn enum_takes_base_storage() {
        let dt = Datatype::Enumeration {
            size: 1,
            base: Box::new(int(1, true)),
            members: vec![
                EnumMember { name: "LOW".into(), value: vec![0xFF] },
                EnumMember { name: "HIGH".into(), value: vec![1] },
            ],
        };
        let t = ElementType::resolve(&dt).unwrap();
        assert_eq!(t.size(), 1);
        let ElementType::Enum { names, .. } = t else { panic!() };
        assert_eq!(names[0], ("LOW".to_string(), -1));
    }

    #[test]
    fn array_of_vlen_string_stays_string_array() {
        let dt = Datatype::Array {
            size: 32,
            dims: vec![2],
            base: Box::new(Datatype::VariableLength {
                size: 16,
                is_string: true,
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Utf8,
                base: Box::new(Datatype::String {
                    size: 1,
                    padding: StringPadding::NullTerminate,
                    charset: CharacterSet::Utf8,
                }),
            }),
        };
        let t = ElementType::resolve(&dt).unwrap();
        assert_eq!(t.size(), 32);
        assert_eq!(t.to_string(), "string[2]");
    }

    #[test]
    fn oversized_array_is_rejected() {
        let dt = Datatype::Array {
            size: 0,
            dims: vec![u32::MAX; 3],
            base: Box::new(Datatype::FloatingPoint {
                size: 8,
                order: Endian::Little,
                vax: false,
                bit_precision: 64,
                exponent_bias: 1023,
            }),
        };
        assert!(matches!(
            ElementType::resolve(&dt),
            Err(FormatError::UnsupportedDatatype(_))
        ));
    }

    #[test]
    fn array_size_is_count_times_base() {
        let dt = Datatype::Array {
            size: 24,
            dims: vec![2, 3],
            base: Box::new(int(4, true)),
        };
        let t = ElementType::resolve(&dt).unwrap();
        assert_eq!(t.size(), 24);
        assert_eq!(t.to_string(), "int32[2][3]");
    }

    #[test]
    fn compound_display() {
        let dt = Datatype::Compound {
            size: 12,
            members: vec![
                CompoundMember { name: "id".into(), offset: 0, datatype: int(4, true) },
                CompoundMember {
                    name: "v".into(),
                    offset: 4,
                    datatype: Datatype::FloatingPoint {
                        size: 8,
                        order: Endian::Little,
                        vax: false,
                        bit_precision: 64,
                        exponent_bias: 1023,
                    },
                },
            ],
        };
        assert_eq!(
            ElementType::resolve(&dt).unwrap().to_string(),
            "compound { int32 id, float64 v }"
        );
    }

    #[test]
    fn sign_extension() {
        assert_eq!(decode_int(&[0xFE, 0xFF], true, Endian::Little), -2);
        assert_eq!(decode_int(&[0xFF, 0xFE], true, Endian::Big), -2);
        assert_eq!(decode_int(&[0xFE, 0xFF], false, Endian::Little), 0xFFFE);
    }
}
