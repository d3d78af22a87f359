/// Byte-shuffle: gather byte `j` of every element into plane `j`.
///
/// Trailing bytes that do not form a whole element are copied through
/// unchanged, as the reference shuffle filter does.
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let body = n * element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..n {
        for j in 0..element_size {
            out[j * n + i] = data[i * element_size + j];
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let body = n * element_size;
    let mut out = vec![0u8; data.len()];
    for j in 0..element_size {
        let plane = &data[j * n..(j + 1) * n];
        for (i, &b) in plane.iter().enumerate() {
            out[i * element_size + j] = b;
        }
    }
    out[body..].copy_from_slice(&data[body..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pattern() {
        let data = [0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1, 0xB2, 0xB3];
        assert_eq!(
            shuffle(&data, 4),
            vec![0xA0, 0xB0, 0xA1, 0xB1, 0xA2, 0xB2, 0xA3, 0xB3]
        );
    }

    #[test]
    fn inverse_for_f64_elements() {
        let data: Vec<u8> = (0..64).collect();
        assert_eq!(unshuffle(&shuffle(&data, 8), 8), data);
    }

    #[test]
    fn ragged_tail_passes_through() {
        let data: Vec<u8> = (0..11).collect();
        let s = shuffle(&data, 4);
        assert_eq!(&s[8..], &[8, 9, 10]);
        assert_eq!(unshuffle(&s, 4), data);
    }

    #[test]
    fn single_byte_elements_untouched() {
        let data = vec![3u8, 1, 4, 1, 5];
        assert_eq!(shuffle(&data, 1), data);
    }
}
