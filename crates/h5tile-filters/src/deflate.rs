use std::io::{Read, Write};

use crate::FilterError;

/// Inflate a zlib stream, refusing to produce more than `max_output` bytes.
pub fn deflate_decompress(data: &[u8], max_output: usize) -> Result<Vec<u8>, FilterError> {
    let decoder = flate2::read::ZlibDecoder::new(data);
    // One byte of slack lets an oversized stream be detected.
    let mut limited = decoder.take(max_output as u64 + 1);
    let mut out = Vec::with_capacity(max_output.min(data.len().saturating_mul(4)));
    limited
        .read_to_end(&mut out)
        .map_err(|source| FilterError::Decode {
            codec: "deflate",
            source,
        })?;
    if out.len() > max_output {
        return Err(FilterError::OutputTooLarge {
            codec: "deflate",
            limit: max_output,
        });
    }
    Ok(out)
}

/// Compress with zlib at `level` (0-9).
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, FilterError> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|source| FilterError::Encode {
            codec: "deflate",
            source,
        })
}
