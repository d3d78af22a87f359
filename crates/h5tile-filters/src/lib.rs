//! Codec kernels used by the h5tile filter pipeline.
//!
//! Each kernel is a pure `bytes -> bytes` transform with an encode and a
//! decode direction. The pipeline in `h5tile-format` decides which kernels
//! run for a chunk and in which order; this crate knows nothing about
//! chunks, masks or file layout.

#[cfg(feature = "deflate")]
mod deflate;
mod fletcher32;
mod shuffle;
#[cfg(feature = "zstd")]
mod zstd_codec;

#[cfg(feature = "deflate")]
pub use deflate::{deflate_compress, deflate_decompress};
pub use fletcher32::{fletcher32, fletcher32_append, fletcher32_strip};
pub use shuffle::{shuffle, unshuffle};
#[cfg(feature = "zstd")]
pub use zstd_codec::{zstd_compress, zstd_decompress};

/// Errors produced by a codec kernel.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The compressed stream could not be decoded.
    #[error("{codec} decode failed: {source}")]
    Decode {
        codec: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// The encoder rejected the input.
    #[error("{codec} encode failed: {source}")]
    Encode {
        codec: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// Decoded output would exceed the caller's bound.
    #[error("{codec} output exceeds {limit} bytes")]
    OutputTooLarge { codec: &'static str, limit: usize },
    /// Input too short to carry a trailing checksum.
    #[error("buffer of {len} bytes too short for a fletcher32 checksum")]
    MissingChecksum { len: usize },
    /// Stored and computed Fletcher-32 disagree.
    #[error("fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}
