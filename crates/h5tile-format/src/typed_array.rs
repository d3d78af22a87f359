//! The caller-owned result of a read.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::datatype::{ReferenceKind, StringPadding};
use crate::element_type::{decode_int, ElementType};
use crate::error::FormatError;
use crate::source::Endian;

/// Element storage of a [`TypedArray`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// Fixed-size elements back to back, row-major.
    Fixed(Vec<u8>),
    /// One string per element (variable-length strings, and arrays of
    /// them flattened element by element).
    Strings(Vec<String>),
    /// One independently sized sequence per element: the raw bytes of its
    /// base elements.
    Sequences(Vec<Vec<u8>>),
}

/// A decoded region of a variable or an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    shape: Vec<u64>,
    element_type: ElementType,
    data: ArrayData,
}

/// Trim a stored string according to its padding.
pub(crate) fn trim_string(raw: &[u8], padding: StringPadding) -> String {
    let end = match padding {
        StringPadding::SpacePad => raw
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1),
        _ => raw.iter().position(|&b| b == 0).unwrap_or(raw.len()),
    };
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn read_float(bytes: &[u8], order: Endian) -> f64 {
    match (bytes.len(), order) {
        (4, Endian::Little) => f64::from(LittleEndian::read_f32(bytes)),
        (4, Endian::Big) => f64::from(BigEndian::read_f32(bytes)),
        (8, Endian::Little) => LittleEndian::read_f64(bytes),
        (8, Endian::Big) => BigEndian::read_f64(bytes),
        _ => f64::NAN,
    }
}

impl TypedArray {
    pub fn new(shape: Vec<u64>, element_type: ElementType, data: ArrayData) -> TypedArray {
        TypedArray {
            shape,
            element_type,
            data,
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.data {
            ArrayData::Fixed(bytes) => match self.element_type.size() {
                0 => 0,
                size => bytes.len() / size,
            },
            ArrayData::Strings(s) => s.len(),
            ArrayData::Sequences(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of fixed-size element `i`.
    pub fn element_bytes(&self, i: usize) -> Option<&[u8]> {
        match &self.data {
            ArrayData::Fixed(bytes) => {
                let size = self.element_type.size();
                bytes.get(i * size..(i + 1) * size)
            }
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> FormatError {
        FormatError::TypeMismatch {
            expected,
            actual: self.element_type.to_string(),
        }
    }

    fn fixed(&self, expected: &'static str) -> Result<&[u8], FormatError> {
        match &self.data {
            ArrayData::Fixed(bytes) => Ok(bytes),
            _ => Err(self.mismatch(expected)),
        }
    }

    /// Numeric elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, FormatError> {
        let bytes = self.fixed("numeric")?;
        match &self.element_type {
            ElementType::Float { size, order } => Ok(bytes
                .chunks_exact(*size as usize)
                .map(|b| read_float(b, *order))
                .collect()),
            ElementType::Int {
                size,
                signed,
                order,
            } => Ok(bytes
                .chunks_exact(*size as usize)
                .map(|b| {
                    let v = decode_int(b, *signed, *order);
                    if *signed {
                        v as f64
                    } else {
                        v as u64 as f64
                    }
                })
                .collect()),
            ElementType::Enum { base, .. } => {
                TypedArray::new(self.shape.clone(), (**base).clone(), self.data.clone())
                    .to_f64_vec()
            }
            _ => Err(self.mismatch("numeric")),
        }
    }

    /// Integer elements as `i64`. Unsigned 64-bit values above `i64::MAX`
    /// are an error.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>, FormatError> {
        let bytes = self.fixed("integer")?;
        match &self.element_type {
            ElementType::Int {
                size,
                signed,
                order,
            } => bytes
                .chunks_exact(*size as usize)
                .map(|b| {
                    let v = decode_int(b, *signed, *order);
                    if !*signed && *size == 8 && v < 0 {
                        Err(self.mismatch("integer within i64 range"))
                    } else {
                        Ok(v)
                    }
                })
                .collect(),
            ElementType::Enum { base, .. } => {
                TypedArray::new(self.shape.clone(), (**base).clone(), self.data.clone())
                    .to_i64_vec()
            }
            _ => Err(self.mismatch("integer")),
        }
    }

    /// Integer elements as `u64`. Negative values are an error.
    pub fn to_u64_vec(&self) -> Result<Vec<u64>, FormatError> {
        let bytes = self.fixed("unsigned integer")?;
        match &self.element_type {
            ElementType::Int {
                size,
                signed,
                order,
            } => bytes
                .chunks_exact(*size as usize)
                .map(|b| {
                    let v = decode_int(b, *signed, *order);
                    if *signed && v < 0 {
                        Err(self.mismatch("non-negative integer"))
                    } else {
                        Ok(v as u64)
                    }
                })
                .collect(),
            ElementType::Enum { base, .. } => {
                TypedArray::new(self.shape.clone(), (**base).clone(), self.data.clone())
                    .to_u64_vec()
            }
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    /// String elements, fixed or variable length.
    pub fn to_strings(&self) -> Result<Vec<String>, FormatError> {
        match (&self.data, &self.element_type) {
            (ArrayData::Strings(s), _) => Ok(s.clone()),
            (ArrayData::Fixed(bytes), ElementType::FixedString { size, padding, .. }) => {
                if *size == 0 {
                    return Ok(vec![String::new(); self.shape.iter().product::<u64>() as usize]);
                }
                Ok(bytes
                    .chunks_exact(*size)
                    .map(|b| trim_string(b, *padding))
                    .collect())
            }
            (ArrayData::Fixed(bytes), ElementType::Array { base, .. }) => match **base {
                ElementType::FixedString { size, padding, .. } => Ok(bytes
                    .chunks_exact(size.max(1))
                    .map(|b| trim_string(b, padding))
                    .collect()),
                _ => Err(self.mismatch("string")),
            },
            _ => Err(self.mismatch("string")),
        }
    }

    /// Variable-length sequences, each as a one-dimensional array of the
    /// base type.
    pub fn sequences(&self) -> Result<Vec<TypedArray>, FormatError> {
        match (&self.data, &self.element_type) {
            (ArrayData::Sequences(seqs), ElementType::Vlen { base, .. }) => {
                let size = base.size().max(1);
                Ok(seqs
                    .iter()
                    .map(|bytes| {
                        TypedArray::new(
                            vec![(bytes.len() / size) as u64],
                            (**base).clone(),
                            ArrayData::Fixed(bytes.clone()),
                        )
                    })
                    .collect())
            }
            _ => Err(self.mismatch("variable-length sequence")),
        }
    }

    /// Object reference targets; `None` for null references.
    pub fn references(&self) -> Result<Vec<Option<u64>>, FormatError> {
        let bytes = self.fixed("object reference")?;
        match &self.element_type {
            ElementType::Reference {
                size,
                kind: ReferenceKind::Object,
            } if (1..=8).contains(size) => Ok(bytes
                .chunks_exact(*size)
                .map(|b| {
                    let v = LittleEndian::read_uint(b, b.len());
                    let undefined = if b.len() == 8 {
                        u64::MAX
                    } else {
                        (1u64 << (8 * b.len())) - 1
                    };
                    (v != 0 && v != undefined).then_some(v)
                })
                .collect()),
            _ => Err(self.mismatch("object reference")),
        }
    }
}
