//! Pluggable codec stages keyed by filter id.
//!
//! A [`Codec`] is one reversible `bytes -> bytes` stage. The filter pipeline
//! looks stages up in a [`CodecRegistry`] by the id stored in the file; ids
//! without a registered codec are either skipped (optional filters) or
//! rejected (mandatory filters).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use h5tile_filters::FilterError;

use crate::error::FormatError;

/// Well-known filter ids.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;
pub const FILTER_ZSTD: u16 = 32015;

/// Per-call parameters handed to a codec stage.
#[derive(Debug, Clone, Copy)]
pub struct CodecParams<'a> {
    /// Client data values stored with the filter.
    pub client_data: &'a [u32],
    /// Size in bytes of one element of the variable.
    pub element_size: usize,
    /// Fully decoded size of the chunk.
    pub expected_len: usize,
    /// Largest output any single decode stage may produce. Intermediate
    /// stages can exceed `expected_len` (a checksum stage still attached,
    /// for instance), so this is looser than the final length.
    pub max_output: usize,
}

/// One reversible stage of a filter pipeline.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Filter id this codec implements.
    fn id(&self) -> u16;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &'static str;

    /// Undo this stage.
    fn decode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError>;

    /// Apply this stage.
    fn encode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError>;
}

fn filter_failed(filter_id: u16) -> impl FnOnce(FilterError) -> FormatError {
    move |source| FormatError::FilterFailed { filter_id, source }
}

/// Zlib deflate, client data 0 is the compression level.
#[cfg(feature = "deflate")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

#[cfg(feature = "deflate")]
impl Codec for DeflateCodec {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        h5tile_filters::deflate_decompress(&data, params.max_output)
            .map_err(filter_failed(FILTER_DEFLATE))
    }

    fn encode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        let level = params.client_data.first().copied().unwrap_or(6).min(9);
        h5tile_filters::deflate_compress(&data, level).map_err(filter_failed(FILTER_DEFLATE))
    }
}

/// Byte shuffle; client data 0 overrides the element size when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleCodec;

impl ShuffleCodec {
    fn element_size(params: &CodecParams<'_>) -> usize {
        match params.client_data.first() {
            Some(&n) if n > 0 => n as usize,
            _ => params.element_size,
        }
    }
}

impl Codec for ShuffleCodec {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn decode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        Ok(h5tile_filters::unshuffle(&data, Self::element_size(params)))
    }

    fn encode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        Ok(h5tile_filters::shuffle(&data, Self::element_size(params)))
    }
}

/// Fletcher-32 checksum, verified and stripped on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fletcher32Codec;

impl Codec for Fletcher32Codec {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn decode(&self, data: Vec<u8>, _params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        h5tile_filters::fletcher32_strip(data).map_err(filter_failed(FILTER_FLETCHER32))
    }

    fn encode(&self, data: Vec<u8>, _params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        Ok(h5tile_filters::fletcher32_append(&data))
    }
}

/// Zstandard, client data 0 is the compression level.
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn id(&self) -> u16 {
        FILTER_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn decode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        h5tile_filters::zstd_decompress(&data, params.max_output)
            .map_err(filter_failed(FILTER_ZSTD))
    }

    fn encode(&self, data: Vec<u8>, params: &CodecParams<'_>) -> Result<Vec<u8>, FormatError> {
        let level = params.client_data.first().map_or(3, |&l| l as i32);
        h5tile_filters::zstd_compress(&data, level).map_err(filter_failed(FILTER_ZSTD))
    }
}

/// Codecs available to the filter pipeline, keyed by filter id.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: BTreeMap<u16, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every codec compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "deflate")]
        registry.register(Arc::new(DeflateCodec));
        registry.register(Arc::new(ShuffleCodec));
        registry.register(Arc::new(Fletcher32Codec));
        #[cfg(feature = "zstd")]
        registry.register(Arc::new(ZstdCodec));
        registry
    }

    /// Add or replace the codec for its filter id.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.id(), codec);
    }

    pub fn get(&self, id: u16) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.codecs.contains_key(&id)
    }

    /// Registered filter ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.codecs.keys().copied()
    }
}
