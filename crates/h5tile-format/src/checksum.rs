//! Metadata checksums (Bob Jenkins' lookup3 `hashlittle`).
//!
//! Superblocks v2+, v2 object headers, continuation blocks, heap and
//! B-tree v2 structures end in a 4-byte lookup3 checksum over everything
//! before it. Verification only runs in strict mode.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

fn finish(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// lookup3 hash of `data` with a zero seed.
pub fn lookup3(data: &[u8]) -> u32 {
    let init = 0xdead_beef_u32.wrapping_add(data.len() as u32);
    let (mut a, mut b, mut c) = (init, init, init);

    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }
    if rest.is_empty() {
        return c;
    }
    // The final partial block behaves as if zero-padded to 12 bytes.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    finish(&mut a, &mut b, &mut c);
    c
}

/// Check a block whose last four bytes are its stored checksum.
///
/// `offset` is the block's file offset, used only for diagnostics.
pub fn verify_block(block: &[u8], what: &'static str, offset: u64) -> Result<(), FormatError> {
    if block.len() < 4 {
        return Err(FormatError::UnexpectedEof {
            offset,
            needed: 4,
            available: block.len(),
        });
    }
    let split = block.len() - 4;
    let stored = LittleEndian::read_u32(&block[split..]);
    let computed = lookup3(&block[..split]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            what,
            offset,
            stored,
            computed,
        });
    }
    Ok(())
}
