//! Filter pipeline message (type 0x000B) and per-chunk decoding.

use crate::codec::{CodecParams, CodecRegistry};
use crate::error::FormatError;
use crate::source::Cursor;
use crate::warnings::{Warning, WarningSink};

/// Filter flag bit: the filter may be skipped when unavailable.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// Headroom a decode stage gets beyond the final chunk size.
const STAGE_SLACK: usize = 64 * 1024;

/// Output bound for one decode stage of a chunk that decodes to
/// `expected_len` bytes. Stages that run before a shrinking stage (a
/// checksum, a second compressor) legitimately produce more than the
/// final size.
pub fn stage_limit(expected_len: usize) -> usize {
    expected_len.saturating_mul(2).saturating_add(STAGE_SLACK)
}

/// One configured filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub filter_id: u16,
    pub name: Option<String>,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }

    /// Display name: the stored one, or a well-known name for the id.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        match self.filter_id {
            1 => "deflate",
            2 => "shuffle",
            3 => "fletcher32",
            4 => "szip",
            5 => "nbit",
            6 => "scaleoffset",
            32015 => "zstd",
            _ => "unnamed",
        }
        .to_string()
    }
}

/// Ordered filter list in encode order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipeline {
    pub version: u8,
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    pub fn parse(c: &mut Cursor<'_>) -> Result<FilterPipeline, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        let count = c.u8()? as usize;
        let filters = match version {
            1 => {
                c.skip(6)?;
                (0..count)
                    .map(|_| Self::parse_v1_filter(c))
                    .collect::<Result<Vec<_>, _>>()?
            }
            2 => (0..count)
                .map(|_| Self::parse_v2_filter(c))
                .collect::<Result<Vec<_>, _>>()?,
            v => {
                return Err(FormatError::UnsupportedVersion {
                    what: "filter pipeline",
                    version: v,
                    offset: at,
                })
            }
        };
        Ok(FilterPipeline { version, filters })
    }

    fn parse_v1_filter(c: &mut Cursor<'_>) -> Result<FilterDescription, FormatError> {
        let filter_id = c.u16()?;
        let name_len = c.u16()? as usize;
        let flags = c.u16()?;
        let ncd = c.u16()? as usize;
        let name = if name_len > 0 {
            let padded = name_len.div_ceil(8) * 8;
            Some(c.fixed_string(padded)?)
        } else {
            None
        };
        let client_data = (0..ncd).map(|_| c.u32()).collect::<Result<Vec<_>, _>>()?;
        if ncd % 2 == 1 {
            c.skip(4)?;
        }
        Ok(FilterDescription {
            filter_id,
            name,
            flags,
            client_data,
        })
    }

    fn parse_v2_filter(c: &mut Cursor<'_>) -> Result<FilterDescription, FormatError> {
        let filter_id = c.u16()?;
        let name_len = if filter_id >= 256 {
            c.u16()? as usize
        } else {
            0
        };
        let flags = c.u16()?;
        let ncd = c.u16()? as usize;
        let name = if name_len > 0 {
            Some(c.fixed_string(name_len)?)
        } else {
            None
        };
        let client_data = (0..ncd).map(|_| c.u32()).collect::<Result<Vec<_>, _>>()?;
        Ok(FilterDescription {
            filter_id,
            name,
            flags,
            client_data,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Undo the pipeline for one stored chunk.
    ///
    /// Stages run in reverse order. Bit `i` of `filter_mask` set means
    /// filter `i` was not applied to this chunk. Each stage is bounded by
    /// [`stage_limit`]; only the final result must be exactly
    /// `expected_len` bytes long.
    #[allow(clippy::too_many_arguments)]
    pub fn decode_chunk(
        &self,
        stored: Vec<u8>,
        filter_mask: u32,
        element_size: usize,
        expected_len: usize,
        registry: &CodecRegistry,
        warnings: &dyn WarningSink,
        variable: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let mut data = stored;
        for (i, filter) in self.filters.iter().enumerate().rev() {
            if i < 32 && (filter_mask >> i) & 1 == 1 {
                log::trace!("filter {} masked out for chunk of {variable}", filter.filter_id);
                continue;
            }
            let Some(codec) = registry.get(filter.filter_id) else {
                if filter.is_optional() {
                    warnings.warn(Warning::OptionalFilterSkipped {
                        filter_id: filter.filter_id,
                        variable: variable.to_string(),
                    });
                    continue;
                }
                return Err(FormatError::UnsupportedFilter {
                    filter_id: filter.filter_id,
                    name: filter.display_name(),
                    variable: variable.to_string(),
                });
            };
            let params = CodecParams {
                client_data: &filter.client_data,
                element_size,
                expected_len,
                max_output: stage_limit(expected_len),
            };
            data = codec.decode(data, &params)?;
        }
        if data.len() != expected_len {
            return Err(FormatError::ChunkSizeMismatch {
                expected: expected_len,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Apply the pipeline in encode order. Used to build test fixtures and
    /// to check that stages invert.
    pub fn encode_chunk(
        &self,
        raw: Vec<u8>,
        element_size: usize,
        registry: &CodecRegistry,
    ) -> Result<Vec<u8>, FormatError> {
        let expected_len = raw.len();
        let mut data = raw;
        for filter in &self.filters {
            let codec = registry
                .get(filter.filter_id)
                .ok_or_else(|| FormatError::UnsupportedFilter {
                    filter_id: filter.filter_id,
                    name: filter.display_name(),
                    variable: String::from("<encode>"),
                })?;
            let params = CodecParams {
                client_data: &filter.client_data,
                element_size,
                expected_len,
                max_output: stage_limit(expected_len),
            };
            data = codec.encode(data, &params)?;
        }
        Ok(data)
    }
}
