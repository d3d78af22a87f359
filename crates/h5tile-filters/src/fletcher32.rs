use crate::FilterError;

/// HDF5 Fletcher-32 over big-endian 16-bit words; an odd trailing byte is
/// treated as the high half of a final word.
pub fn fletcher32(data: &[u8]) -> u32 {
    // 360 words is the largest block whose sums cannot overflow u32.
    const BLOCK: usize = 360 * 2;
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let mut words = data.chunks_exact(2);
    let mut blocks = 0usize;
    for w in words.by_ref() {
        sum1 += u32::from(w[0]) << 8 | u32::from(w[1]);
        sum2 += sum1;
        blocks += 2;
        if blocks == BLOCK {
            sum1 %= 65535;
            sum2 %= 65535;
            blocks = 0;
        }
    }
    if let [last] = words.remainder() {
        sum1 += u32::from(*last) << 8;
        sum2 += sum1;
    }
    sum1 %= 65535;
    sum2 %= 65535;
    (sum2 << 16) | sum1
}

/// Append the checksum (little-endian) to `data`.
pub fn fletcher32_append(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(data);
    out.extend_from_slice(&fletcher32(data).to_le_bytes());
    out
}

/// Verify and remove the trailing checksum.
///
/// Files written by old library versions store the checksum byte-swapped;
/// both forms are accepted.
pub fn fletcher32_strip(mut data: Vec<u8>) -> Result<Vec<u8>, FilterError> {
    if data.len() < 4 {
        return Err(FilterError::MissingChecksum { len: data.len() });
    }
    let split = data.len() - 4;
    let stored = u32::from_le_bytes([data[split], data[split + 1], data[split + 2], data[split + 3]]);
    data.truncate(split);
    let computed = fletcher32(&data);
    if stored != computed && stored.swap_bytes() != computed {
        return Err(FilterError::ChecksumMismatch { stored, computed });
    }
    Ok(data)
}
