//! Fill value messages: the old form (type 0x0004) and the current one
//! (type 0x0005, versions 1-3).

use crate::error::FormatError;
use crate::source::Cursor;

/// A decoded fill value declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillValue {
    /// Space allocation time (early / late / incremental).
    pub alloc_time: u8,
    /// When the fill value is written.
    pub write_time: u8,
    /// Whether a fill value is defined at all.
    pub defined: bool,
    /// Explicit fill bytes, one element wide.
    pub value: Option<Vec<u8>>,
}

impl FillValue {
    /// Parse the old-style message: a size followed by the value.
    pub fn parse_old(c: &mut Cursor<'_>) -> Result<FillValue, FormatError> {
        let size = c.u32()? as usize;
        let value = if size > 0 {
            Some(c.bytes(size)?.to_vec())
        } else {
            None
        };
        Ok(FillValue {
            alloc_time: 0,
            write_time: 0,
            defined: value.is_some(),
            value,
        })
    }

    /// Parse the current message, versions 1-3.
    pub fn parse(c: &mut Cursor<'_>) -> Result<FillValue, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        match version {
            1 | 2 => {
                let alloc_time = c.u8()?;
                let write_time = c.u8()?;
                let defined = c.u8()? != 0;
                let value = if defined { Self::sized_value(c)? } else { None };
                Ok(FillValue {
                    alloc_time,
                    write_time,
                    defined,
                    value,
                })
            }
            3 => {
                let flags = c.u8()?;
                let undefined = flags & 0x10 != 0;
                let value = if !undefined && flags & 0x20 != 0 {
                    Self::sized_value(c)?
                } else {
                    None
                };
                Ok(FillValue {
                    alloc_time: flags & 0x03,
                    write_time: (flags >> 2) & 0x03,
                    defined: !undefined,
                    value,
                })
            }
            v => Err(FormatError::UnsupportedVersion {
                what: "fill value",
                version: v,
                offset: at,
            }),
        }
    }

    fn sized_value(c: &mut Cursor<'_>) -> Result<Option<Vec<u8>>, FormatError> {
        let size = c.u32()? as usize;
        if size == 0 {
            return Ok(None);
        }
        Ok(Some(c.bytes(size)?.to_vec()))
    }

    /// The byte pattern for one element: the declared value when it is
    /// exactly one element wide, zeros otherwise.
    pub fn pattern(&self, element_size: usize) -> Vec<u8> {
        match &self.value {
            Some(v) if v.len() == element_size => v.clone(),
            _ => vec![0u8; element_size],
        }
    }
}
