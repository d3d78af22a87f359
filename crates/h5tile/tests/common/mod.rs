//! Byte-level writer for test containers: superblock v2, v2 object headers
//! and the messages, indexes and heaps the reader needs.
#![allow(dead_code)]

use std::io::Write;

use h5tile_format::checksum::lookup3;

pub const LINK_INFO: u8 = 0x02;
pub const DATASPACE: u8 = 0x01;
pub const DATATYPE: u8 = 0x03;
pub const FILL_VALUE: u8 = 0x05;
pub const LINK: u8 = 0x06;
pub const LAYOUT: u8 = 0x08;
pub const FILTERS: u8 = 0x0B;
pub const ATTRIBUTE: u8 = 0x0C;

const SUPERBLOCK_LEN: usize = 48;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Appends structures to a growing file and returns their addresses.
pub struct Fixture {
    buf: Vec<u8>,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            buf: vec![0; SUPERBLOCK_LEN],
        }
    }

    /// Append `bytes` at the next 8-aligned address.
    pub fn put(&mut self, bytes: &[u8]) -> u64 {
        let at = self.buf.len().div_ceil(8) * 8;
        self.buf.resize(at, 0);
        self.buf.extend_from_slice(bytes);
        at as u64
    }

    pub fn header(&mut self, messages: &[(u8, Vec<u8>)]) -> u64 {
        self.put(&object_header(messages))
    }

    /// A group header holding `links` as compact link messages.
    pub fn group(&mut self, links: &[(&str, u64)], attributes: Vec<Vec<u8>>) -> u64 {
        let mut messages = vec![(LINK_INFO, link_info())];
        messages.extend(links.iter().map(|(name, addr)| (LINK, hard_link(name, *addr))));
        messages.extend(attributes.into_iter().map(|a| (ATTRIBUTE, a)));
        self.header(&messages)
    }

    pub fn finish(mut self, root: u64) -> Vec<u8> {
        let eof = self.buf.len() as u64;
        let mut sb = b"\x89HDF\r\n\x1a\n".to_vec();
        sb.extend_from_slice(&[2, 8, 8, 0]);
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&u64::MAX.to_le_bytes());
        sb.extend_from_slice(&eof.to_le_bytes());
        sb.extend_from_slice(&root.to_le_bytes());
        let sum = lookup3(&sb);
        sb.extend_from_slice(&sum.to_le_bytes());
        self.buf[..SUPERBLOCK_LEN].copy_from_slice(&sb);
        self.buf
    }
}

pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

// ---------------------------------------------------------------------------
// Object headers and messages
// ---------------------------------------------------------------------------

pub fn object_header(messages: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (ty, payload) in messages {
        body.push(*ty);
        body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        body.push(0);
        body.extend_from_slice(payload);
    }
    let mut b = b"OHDR".to_vec();
    b.extend_from_slice(&[2, 0x03]);
    b.extend_from_slice(&(body.len() as u64).to_le_bytes());
    b.extend_from_slice(&body);
    let sum = lookup3(&b);
    b.extend_from_slice(&sum.to_le_bytes());
    b
}

pub fn link_info() -> Vec<u8> {
    let mut b = vec![0, 0];
    b.extend_from_slice(&u64::MAX.to_le_bytes());
    b.extend_from_slice(&u64::MAX.to_le_bytes());
    b
}

pub fn hard_link(name: &str, address: u64) -> Vec<u8> {
    let mut b = vec![1, 0x00, name.len() as u8];
    b.extend_from_slice(name.as_bytes());
    b.extend_from_slice(&address.to_le_bytes());
    b
}

pub fn soft_link(name: &str, target: &str) -> Vec<u8> {
    let mut b = vec![1, 0x08, 1, name.len() as u8];
    b.extend_from_slice(name.as_bytes());
    b.extend_from_slice(&(target.len() as u16).to_le_bytes());
    b.extend_from_slice(target.as_bytes());
    b
}

pub fn dataspace(dims: &[u64]) -> Vec<u8> {
    let space_type = if dims.is_empty() { 0 } else { 1 };
    let mut b = vec![2, dims.len() as u8, 0, space_type];
    for d in dims {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

fn type_header(class: u8, bf: [u8; 3], size: u32) -> Vec<u8> {
    let mut b = vec![0x10 | class, bf[0], bf[1], bf[2]];
    b.extend_from_slice(&size.to_le_bytes());
    b
}

pub fn int_type(size: u32, signed: bool) -> Vec<u8> {
    let mut b = type_header(0, [if signed { 0x08 } else { 0 }, 0, 0], size);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&((size * 8) as u16).to_le_bytes());
    b
}

pub fn f64_type() -> Vec<u8> {
    let mut b = type_header(1, [0x20, 0x3F, 0], 8);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&64u16.to_le_bytes());
    b.extend_from_slice(&[52, 11, 0, 52]);
    b.extend_from_slice(&1023u32.to_le_bytes());
    b
}

/// Null-terminated ASCII string of `size` bytes.
pub fn fixed_string_type(size: u32) -> Vec<u8> {
    type_header(3, [0, 0, 0], size)
}

pub fn vlen_string_type() -> Vec<u8> {
    let mut b = type_header(9, [0x01, 0, 0], 16);
    b.extend_from_slice(&type_header(3, [0, 0, 0], 1));
    b
}

pub fn object_reference_type() -> Vec<u8> {
    type_header(7, [0, 0, 0], 8)
}

pub fn vlen_sequence_type(base: &[u8]) -> Vec<u8> {
    let mut b = type_header(9, [0, 0, 0], 16);
    b.extend_from_slice(base);
    b
}

pub fn contiguous_layout(address: u64, size: u64) -> Vec<u8> {
    let mut b = vec![3, 1];
    b.extend_from_slice(&address.to_le_bytes());
    b.extend_from_slice(&size.to_le_bytes());
    b
}

pub fn compact_layout(data: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0];
    b.extend_from_slice(&(data.len() as u16).to_le_bytes());
    b.extend_from_slice(data);
    b
}

pub fn chunked_layout(btree: u64, chunk: &[u32], element_size: u32) -> Vec<u8> {
    let mut b = vec![3, 2, chunk.len() as u8 + 1];
    b.extend_from_slice(&btree.to_le_bytes());
    for c in chunk {
        b.extend_from_slice(&c.to_le_bytes());
    }
    b.extend_from_slice(&element_size.to_le_bytes());
    b
}

/// Fill value message v3 with an explicit value.
pub fn fill_value(value: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0x20 | 0x02];
    b.extend_from_slice(&(value.len() as u32).to_le_bytes());
    b.extend_from_slice(value);
    b
}

/// Filter pipeline v2: shuffle then deflate.
pub fn shuffle_deflate_pipeline(element_size: u32, level: u32) -> Vec<u8> {
    let mut b = vec![2, 2];
    for (id, cd) in [(2u16, element_size), (1, level)] {
        b.extend_from_slice(&id.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&1u16.to_le_bytes());
        b.extend_from_slice(&cd.to_le_bytes());
    }
    b
}

pub fn attribute(name: &str, datatype: &[u8], space: &[u8], raw: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0];
    b.extend_from_slice(&(name.len() as u16 + 1).to_le_bytes());
    b.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
    b.extend_from_slice(&(space.len() as u16).to_le_bytes());
    b.push(0);
    b.extend_from_slice(name.as_bytes());
    b.push(0);
    b.extend_from_slice(datatype);
    b.extend_from_slice(space);
    b.extend_from_slice(raw);
    b
}

pub fn string_attribute(name: &str, value: &str) -> Vec<u8> {
    let mut raw = value.as_bytes().to_vec();
    raw.push(0);
    attribute(name, &fixed_string_type(raw.len() as u32), &dataspace(&[]), &raw)
}

pub fn i32_attribute(name: &str, values: &[i32]) -> Vec<u8> {
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    attribute(name, &int_type(4, true), &dataspace(&[values.len() as u64]), &raw)
}

// ---------------------------------------------------------------------------
// Chunk index and heaps
// ---------------------------------------------------------------------------

/// A level-0 chunk B-tree node. Each entry is (stored size, chunk origin,
/// chunk address); `last` is the origin bound after the final chunk.
pub fn chunk_leaf(entries: &[(u32, Vec<u64>, u64)], last: &[u64]) -> Vec<u8> {
    let mut b = b"TREE".to_vec();
    b.extend_from_slice(&[1, 0]);
    b.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    b.extend_from_slice(&u64::MAX.to_le_bytes());
    b.extend_from_slice(&u64::MAX.to_le_bytes());
    let key = |b: &mut Vec<u8>, size: u32, origin: &[u64]| {
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        for o in origin {
            b.extend_from_slice(&o.to_le_bytes());
        }
        b.extend_from_slice(&0u64.to_le_bytes());
    };
    for (size, origin, child) in entries {
        key(&mut b, *size, origin);
        b.extend_from_slice(&child.to_le_bytes());
    }
    key(&mut b, 0, last);
    b
}

/// A global heap collection holding `objects` at indices 1, 2, ...
pub fn global_heap(objects: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, obj) in objects.iter().enumerate() {
        body.extend_from_slice(&(i as u16 + 1).to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(&(obj.len() as u64).to_le_bytes());
        body.extend_from_slice(obj);
        body.resize(body.len() + obj.len().div_ceil(8) * 8 - obj.len(), 0);
    }
    body.extend_from_slice(&[0; 16]);
    let mut b = b"GCOL".to_vec();
    b.extend_from_slice(&[1, 0, 0, 0]);
    b.extend_from_slice(&((16 + body.len()) as u64).to_le_bytes());
    b.extend_from_slice(&body);
    b
}

/// A variable-length slot: element count, collection address, index.
pub fn vlen_slot(length: u32, collection: u64, index: u32) -> Vec<u8> {
    let mut b = length.to_le_bytes().to_vec();
    b.extend_from_slice(&collection.to_le_bytes());
    b.extend_from_slice(&index.to_le_bytes());
    b
}

// ---------------------------------------------------------------------------
// Ready-made containers
// ---------------------------------------------------------------------------

/// `/grid`: int32 of shape (4,5,6) holding 0..120 in chunks of (2,5,3).
/// Chunks listed in `missing` are left out of the index; the fill value
/// is -1.
pub fn chunked_grid(missing: &[[u64; 3]]) -> Vec<u8> {
    let mut f = Fixture::new();
    let mut entries = Vec::new();
    for i0 in [0u64, 2] {
        for k0 in [0u64, 3] {
            if missing.contains(&[i0, 0, k0]) {
                continue;
            }
            let mut chunk = Vec::new();
            for i in i0..i0 + 2 {
                for j in 0..5u64 {
                    for k in k0..k0 + 3 {
                        chunk.extend_from_slice(&((i * 30 + j * 6 + k) as i32).to_le_bytes());
                    }
                }
            }
            let at = f.put(&chunk);
            entries.push((chunk.len() as u32, vec![i0, 0, k0], at));
        }
    }
    let tree = f.put(&chunk_leaf(&entries, &[4, 0, 0]));
    let grid = f.header(&[
        (DATASPACE, dataspace(&[4, 5, 6])),
        (DATATYPE, int_type(4, true)),
        (FILL_VALUE, fill_value(&(-1i32).to_le_bytes())),
        (LAYOUT, chunked_layout(tree, &[2, 5, 3], 4)),
    ]);
    let root = f.group(&[("grid", grid)], vec![]);
    f.finish(root)
}

/// The value at (i, j, k) of [`chunked_grid`].
pub fn grid_value(i: u64, j: u64, k: u64) -> i64 {
    (i * 30 + j * 6 + k) as i64
}
