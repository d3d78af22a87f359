//! Dataspace message parsing (message type 0x0001).

use crate::error::FormatError;
use crate::source::Cursor;

/// Kind of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Single element.
    Scalar,
    /// N-dimensional array.
    Simple,
    /// No elements.
    Null,
}

/// Parsed dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current dimension sizes (empty for scalar and null).
    pub dims: Vec<u64>,
    /// Maximum sizes when stored. `u64::MAX` means unlimited.
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    /// Parse a dataspace message payload.
    pub fn parse(c: &mut Cursor<'_>) -> Result<Dataspace, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        let rank = c.u8()? as usize;
        let flags = c.u8()?;
        let space_type = match version {
            1 => {
                c.skip(5)?;
                if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                }
            }
            2 => match c.u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                t => {
                    return Err(FormatError::InvalidValue {
                        what: "dataspace type",
                        value: u64::from(t),
                        offset: at + 3,
                    })
                }
            },
            v => {
                return Err(FormatError::UnsupportedVersion {
                    what: "dataspace",
                    version: v,
                    offset: at,
                })
            }
        };

        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(c.length()?);
        }
        let max_dims = if flags & 0x01 != 0 {
            let mut max = Vec::with_capacity(rank);
            for _ in 0..rank {
                max.push(c.length()?);
            }
            Some(max)
        } else {
            None
        };
        if space_type != DataspaceType::Simple {
            dims.clear();
        }
        Ok(Dataspace {
            space_type,
            dims,
            max_dims,
        })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count: 1 for scalar, 0 for null.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dims.iter().product(),
        }
    }
}
