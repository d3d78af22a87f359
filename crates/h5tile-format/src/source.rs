//! Positioned byte access and variable-width field decoding.
//!
//! Two layers live here. [`ByteSource`] is the positioned-read primitive a
//! container is opened over; it carries no cursor state, so concurrent reads
//! never interfere. [`Cursor`] walks an in-memory block that was fetched
//! from a source and decodes the file's variable-width offset and length
//! fields, reporting every failure at its absolute file offset.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Window used when scanning for a string terminator.
const STRING_WINDOW: usize = 64;

/// Positioned, self-contained reads over a container's bytes.
///
/// Implementations must report a short read as an error rather than
/// returning fewer bytes.
pub trait ByteSource: Send + Sync {
    /// Total number of readable bytes.
    fn len(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes at `offset`.
    fn read_bytes(&self, offset: u64, length: usize) -> Result<Vec<u8>, FormatError> {
        let mut buf = vec![0u8; length];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read an unsigned integer `width` bytes wide (1..=8).
    fn read_fixed_width_int(
        &self,
        offset: u64,
        width: usize,
        order: Endian,
    ) -> Result<u64, FormatError> {
        if width == 0 || width > 8 {
            return Err(FormatError::InvalidValue {
                what: "integer width",
                value: width as u64,
                offset,
            });
        }
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf[..width])?;
        Ok(match order {
            Endian::Little => LittleEndian::read_uint(&buf[..width], width),
            Endian::Big => BigEndian::read_uint(&buf[..width], width),
        })
    }

    /// Read bytes at `offset` up to (not including) the first NUL.
    fn read_null_terminated_string(&self, offset: u64) -> Result<String, FormatError> {
        let mut out = Vec::new();
        let mut pos = offset;
        loop {
            let available = self.len().saturating_sub(pos);
            if available == 0 {
                return Err(FormatError::UnexpectedEof {
                    offset: pos,
                    needed: 1,
                    available: 0,
                });
            }
            let n = STRING_WINDOW.min(available as usize);
            let window = self.read_bytes(pos, n)?;
            if let Some(end) = window.iter().position(|&b| b == 0) {
                out.extend_from_slice(&window[..end]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.extend_from_slice(&window);
            pos += n as u64;
        }
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        let total = <[u8]>::len(self);
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        match start.checked_add(buf.len()) {
            Some(end) if end <= total => {
                buf.copy_from_slice(&self[start..end]);
                Ok(())
            }
            _ => Err(FormatError::UnexpectedEof {
                offset,
                needed: buf.len(),
                available: total.saturating_sub(start),
            }),
        }
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        self.as_slice().read_at(offset, buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        (**self).read_at(offset, buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        (**self).read_at(offset, buf)
    }
}

// ---------------------------------------------------------------------------
// File-global field widths
// ---------------------------------------------------------------------------

/// Widths of offset and length fields, fixed by the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sizes {
    pub offset_size: u8,
    pub length_size: u8,
}

impl Sizes {
    /// Validate and build; both widths must be 2, 4 or 8.
    pub fn new(offset_size: u8, length_size: u8) -> Result<Sizes, FormatError> {
        if !matches!(offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        Ok(Sizes {
            offset_size,
            length_size,
        })
    }

    /// The all-ones "undefined address" sentinel for this offset width.
    pub fn undefined_address(&self) -> u64 {
        if self.offset_size >= 8 {
            u64::MAX
        } else {
            (1u64 << (8 * u32::from(self.offset_size))) - 1
        }
    }

    pub fn os(&self) -> usize {
        self.offset_size as usize
    }

    pub fn ls(&self) -> usize {
        self.length_size as usize
    }
}

impl Default for Sizes {
    fn default() -> Self {
        Sizes {
            offset_size: 8,
            length_size: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Little-endian reader over a fetched block.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
    sizes: Sizes,
}

impl<'a> Cursor<'a> {
    /// `base` is the absolute file offset of `data[0]`.
    pub fn new(data: &'a [u8], base: u64, sizes: Sizes) -> Cursor<'a> {
        Cursor {
            data,
            pos: 0,
            base,
            sizes,
        }
    }

    pub fn sizes(&self) -> Sizes {
        self.sizes
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute file offset of the next byte.
    pub fn file_offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Move to an absolute position within the block.
    pub fn seek(&mut self, pos: usize) -> Result<(), FormatError> {
        if pos > self.data.len() {
            return Err(self.eof(pos - self.pos));
        }
        self.pos = pos;
        Ok(())
    }

    fn eof(&self, needed: usize) -> FormatError {
        FormatError::UnexpectedEof {
            offset: self.file_offset(),
            needed,
            available: self.remaining(),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.bytes(n).map(|_| ())
    }

    /// Borrow the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(self.eof(n));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Split off the next `n` bytes as an independent cursor.
    pub fn sub(&mut self, n: usize) -> Result<Cursor<'a>, FormatError> {
        let base = self.file_offset();
        let data = self.bytes(n)?;
        Ok(Cursor::new(data, base, self.sizes))
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// Little-endian unsigned integer of `width` bytes; width 0 reads nothing.
    pub fn uint(&mut self, width: usize) -> Result<u64, FormatError> {
        match width {
            0 => Ok(0),
            1..=8 => Ok(LittleEndian::read_uint(self.bytes(width)?, width)),
            _ => Err(FormatError::InvalidValue {
                what: "field width",
                value: width as u64,
                offset: self.file_offset(),
            }),
        }
    }

    /// An offset field; `None` when it holds the undefined sentinel.
    pub fn offset(&mut self) -> Result<Option<u64>, FormatError> {
        let v = self.uint(self.sizes.os())?;
        Ok((v != self.sizes.undefined_address()).then_some(v))
    }

    /// An offset field that must be defined.
    pub fn address(&mut self, what: &'static str) -> Result<u64, FormatError> {
        self.offset()?
            .ok_or(FormatError::UndefinedAddress { what })
    }

    /// A length field.
    pub fn length(&mut self) -> Result<u64, FormatError> {
        self.uint(self.sizes.ls())
    }

    /// Consume a 4-byte signature.
    pub fn signature(&mut self, expected: &[u8; 4], what: &'static str) -> Result<(), FormatError> {
        let offset = self.file_offset();
        if self.bytes(4)? != expected {
            return Err(FormatError::InvalidSignature { what, offset });
        }
        Ok(())
    }

    /// NUL-terminated string; the terminator is consumed.
    pub fn cstring(&mut self) -> Result<String, FormatError> {
        let data = self.data;
        let rest = &data[self.pos.min(data.len())..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.eof(rest.len() + 1))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// NUL-terminated string whose storage is padded to a multiple of `align`.
    pub fn padded_cstring(&mut self, align: usize) -> Result<String, FormatError> {
        let start = self.pos;
        let s = self.cstring()?;
        let used = self.pos - start;
        let padded = used.div_ceil(align) * align;
        self.skip(padded - used)?;
        Ok(s)
    }

    /// Exactly `n` bytes decoded as a string, trailing NULs dropped.
    pub fn fixed_string(&mut self, n: usize) -> Result<String, FormatError> {
        let raw = self.bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_ints_both_orders() {
        let data = vec![0x01u8, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(data.read_fixed_width_int(0, 2, Endian::Little).unwrap(), 0x0201);
        assert_eq!(data.read_fixed_width_int(0, 2, Endian::Big).unwrap(), 0x0102);
        assert_eq!(data.read_fixed_width_int(1, 3, Endian::Big).unwrap(), 0x020304);
        assert!(data.read_fixed_width_int(0, 9, Endian::Little).is_err());
    }

    #[test]
    fn short_read_is_an_error() {
        let data = vec![0u8; 10];
        let err = data.read_bytes(8, 4).unwrap_err();
        assert!(matches!(
            err,
            FormatError::UnexpectedEof {
                offset: 8,
                needed: 4,
                available: 2
            }
        ));
        assert!(data.read_bytes(u64::MAX, 1).is_err());
    }

    #[test]
    fn null_terminated_string_spans_windows() {
        let mut data = vec![b'x'; 150];
        data.push(0);
        data.extend_from_slice(b"tail");
        let s = data.read_null_terminated_string(0).unwrap();
        assert_eq!(s.len(), 150);
        assert!(vec![b'a', b'b'].read_null_terminated_string(0).is_err());
    }

    #[test]
    fn undefined_sentinel_per_width() {
        assert_eq!(Sizes::new(4, 8).unwrap().undefined_address(), 0xFFFF_FFFF);
        assert_eq!(Sizes::new(8, 8).unwrap().undefined_address(), u64::MAX);
        assert!(Sizes::new(3, 8).is_err());
        assert!(Sizes::new(8, 5).is_err());
    }

    #[test]
    fn cursor_offsets_and_lengths() {
        let sizes = Sizes::new(4, 2).unwrap();
        let data = [0x10, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0x34, 0x12];
        let mut c = Cursor::new(&data, 100, sizes);
        assert_eq!(c.offset().unwrap(), Some(0x10));
        assert_eq!(c.offset().unwrap(), None);
        assert_eq!(c.length().unwrap(), 0x1234);
        match c.u8().unwrap_err() {
            FormatError::UnexpectedEof { offset, .. } => assert_eq!(offset, 110),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn padded_names() {
        let data = b"abc\0\0\0\0\0next\0";
        let mut c = Cursor::new(data, 0, Sizes::default());
        assert_eq!(c.padded_cstring(8).unwrap(), "abc");
        assert_eq!(c.position(), 8);
        assert_eq!(c.cstring().unwrap(), "next");
    }

    #[test]
    fn signature_mismatch_reports_offset() {
        let mut c = Cursor::new(b"OHDX", 0x40, Sizes::default());
        assert!(matches!(
            c.signature(b"OHDR", "object header"),
            Err(FormatError::InvalidSignature { offset: 0x40, .. })
        ));
    }
}
