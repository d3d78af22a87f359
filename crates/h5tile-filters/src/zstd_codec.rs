use crate::FilterError;

/// Decode a zstd frame, bounded by `max_output` bytes.
pub fn zstd_decompress(data: &[u8], max_output: usize) -> Result<Vec<u8>, FilterError> {
    let out = zstd::bulk::decompress(data, max_output).map_err(|source| FilterError::Decode {
        codec: "zstd",
        source,
    })?;
    Ok(out)
}

/// Encode a zstd frame at `level`.
pub fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, FilterError> {
    zstd::bulk::compress(data, level).map_err(|source| FilterError::Encode {
        codec: "zstd",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|v| v.to_le_bytes()).collect();
        let packed = zstd_compress(&data, 3).unwrap();
        assert_eq!(zstd_decompress(&packed, data.len()).unwrap(), data);
    }
}
