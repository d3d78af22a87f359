//! Region reads end to end: chunk assembly, fill, filters, heaps, bounds
//! and the file-backed sources.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use h5tile::{ErrorKind, File, FileAccessProps, FormatError, Region};
use h5tile_format::ByteSource;

fn expected(region: &Region) -> Vec<i64> {
    let mut out = Vec::new();
    for i in region.start[0]..region.start[0] + region.count[0] {
        for j in region.start[1]..region.start[1] + region.count[1] {
            for k in region.start[2]..region.start[2] + region.count[2] {
                out.push(grid_value(i, j, k));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Chunked reads
// ---------------------------------------------------------------------------

#[test]
fn chunked_region_is_row_major_slice() {
    init_logging();
    let file = File::from_bytes(chunked_grid(&[])).unwrap();
    // Columns 2..5 straddle the k chunk boundary and rows 1..3 the i one.
    let region = Region::new(vec![1, 0, 2], vec![2, 5, 3]);
    let array = file.read_region("/grid", Some(&region)).unwrap();
    assert_eq!(array.shape(), &[2, 5, 3]);
    assert_eq!(array.to_i64_vec().unwrap(), expected(&region));
}

#[test]
fn region_within_one_chunk() {
    let file = File::from_bytes(chunked_grid(&[])).unwrap();
    let region = Region::new(vec![2, 1, 3], vec![2, 3, 3]);
    let values = file.read_region("grid", Some(&region)).unwrap();
    assert_eq!(values.to_i64_vec().unwrap(), expected(&region));
}

#[test]
fn result_shape_matches_requested_counts() {
    let file = File::from_bytes(chunked_grid(&[])).unwrap();
    let var = file.variable("/grid").unwrap();
    for (start, count) in [
        ([0, 0, 0], [1, 1, 1]),
        ([3, 4, 5], [1, 1, 1]),
        ([0, 2, 1], [4, 2, 5]),
        ([1, 0, 0], [3, 5, 6]),
    ] {
        let region = Region::new(start.to_vec(), count.to_vec());
        let array = var.read_region(&region).unwrap();
        assert_eq!(array.shape(), &count);
        assert_eq!(array.len() as u64, region.num_elements());
    }
}

#[test]
fn partitioned_reads_reassemble_full_read() {
    let file = File::from_bytes(chunked_grid(&[])).unwrap();
    let var = file.variable("/grid").unwrap();
    let full = var.read().unwrap().to_i64_vec().unwrap();
    assert_eq!(full, (0..120).collect::<Vec<i64>>());

    // Split along the last axis at a point that is not a chunk boundary.
    let left = var
        .read_region(&Region::new(vec![0, 0, 0], vec![4, 5, 4]))
        .unwrap()
        .to_i64_vec()
        .unwrap();
    let right = var
        .read_region(&Region::new(vec![0, 0, 4], vec![4, 5, 2]))
        .unwrap()
        .to_i64_vec()
        .unwrap();
    let mut stitched = Vec::new();
    for row in 0..20 {
        stitched.extend_from_slice(&left[row * 4..row * 4 + 4]);
        stitched.extend_from_slice(&right[row * 2..row * 2 + 2]);
    }
    assert_eq!(stitched, full);
}

#[test]
fn missing_chunk_is_fill_value() {
    let file = File::from_bytes(chunked_grid(&[[2, 0, 3]])).unwrap();
    let values = file.read_region("/grid", None).unwrap().to_i64_vec().unwrap();
    for i in 0..4u64 {
        for j in 0..5u64 {
            for k in 0..6u64 {
                let v = values[(i * 30 + j * 6 + k) as usize];
                if i >= 2 && k >= 3 {
                    assert_eq!(v, -1, "({i},{j},{k})");
                } else {
                    assert_eq!(v, grid_value(i, j, k));
                }
            }
        }
    }
}

#[test]
fn shuffled_deflated_chunks() {
    let mut f = Fixture::new();
    let values: Vec<f64> = (0..64).map(|i| i as f64 * 0.5).collect();
    let mut entries = Vec::new();
    for (n, part) in values.chunks(16).enumerate() {
        let raw: Vec<u8> = part.iter().flat_map(|v| v.to_le_bytes()).collect();
        let packed = h5tile_filters::deflate_compress(&h5tile_filters::shuffle(&raw, 8), 6).unwrap();
        let at = f.put(&packed);
        entries.push((packed.len() as u32, vec![n as u64 * 16], at));
    }
    let tree = f.put(&chunk_leaf(&entries, &[64]));
    let var = f.header(&[
        (DATASPACE, dataspace(&[64])),
        (DATATYPE, f64_type()),
        (FILTERS, shuffle_deflate_pipeline(8, 6)),
        (LAYOUT, chunked_layout(tree, &[16], 8)),
    ]);
    let root = f.group(&[("signal", var)], vec![]);
    let file = File::from_bytes(f.finish(root)).unwrap();

    let all = file.read_region("/signal", None).unwrap().to_f64_vec().unwrap();
    assert_eq!(all, values);
    let mid = file
        .read_region("/signal", Some(&Region::new(vec![14], vec![5])))
        .unwrap()
        .to_f64_vec()
        .unwrap();
    assert_eq!(mid, values[14..19].to_vec());
}

// ---------------------------------------------------------------------------
// Other layouts and element types
// ---------------------------------------------------------------------------

#[test]
fn contiguous_two_dimensional() {
    let mut f = Fixture::new();
    let raw: Vec<u8> = (0..12).flat_map(|v| (v as f64).to_le_bytes()).collect();
    let data = f.put(&raw);
    let var = f.header(&[
        (DATASPACE, dataspace(&[3, 4])),
        (DATATYPE, f64_type()),
        (LAYOUT, contiguous_layout(data, raw.len() as u64)),
    ]);
    let root = f.group(&[("m", var)], vec![]);
    let file = File::from_bytes(f.finish(root)).unwrap();
    let col = file
        .read_region("/m", Some(&Region::new(vec![0, 2], vec![3, 1])))
        .unwrap();
    assert_eq!(col.shape(), &[3, 1]);
    assert_eq!(col.to_f64_vec().unwrap(), vec![2.0, 6.0, 10.0]);
}

#[test]
fn compact_scalar() {
    let mut f = Fixture::new();
    let var = f.header(&[
        (DATASPACE, dataspace(&[])),
        (DATATYPE, int_type(2, false)),
        (LAYOUT, compact_layout(&513u16.to_le_bytes())),
    ]);
    let root = f.group(&[("n", var)], vec![]);
    let file = File::from_bytes(f.finish(root)).unwrap();
    let n = file.read_region("/n", None).unwrap();
    assert!(n.shape().is_empty());
    assert_eq!(n.to_u64_vec().unwrap(), vec![513]);
}

#[test]
fn vlen_strings_including_empty() {
    let mut f = Fixture::new();
    let heap = f.put(&global_heap(&[b"", b"hello", b"twelve chars"]));
    let mut slots = Vec::new();
    for (len, index) in [(0u32, 1u32), (5, 2), (12, 3)] {
        slots.extend_from_slice(&vlen_slot(len, heap, index));
    }
    let data = f.put(&slots);
    let var = f.header(&[
        (DATASPACE, dataspace(&[3])),
        (DATATYPE, vlen_string_type()),
        (LAYOUT, contiguous_layout(data, slots.len() as u64)),
    ]);
    let root = f.group(&[("names", var)], vec![]);
    let file = File::from_bytes(f.finish(root)).unwrap();

    let names = file.read_region("/names", None).unwrap().to_strings().unwrap();
    assert_eq!(names, vec!["", "hello", "twelve chars"]);
    assert_eq!(names.iter().map(String::len).collect::<Vec<_>>(), vec![0, 5, 12]);
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Counts every read that reaches the underlying bytes.
struct CountingSource {
    bytes: Vec<u8>,
    reads: Arc<AtomicUsize>,
}

impl ByteSource for CountingSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.bytes.read_at(offset, buf)
    }
}

#[test]
fn out_of_bounds_fails_without_io() {
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        bytes: chunked_grid(&[]),
        reads: reads.clone(),
    };
    let file = File::from_source(Arc::new(source), FileAccessProps::default()).unwrap();
    let var = file.variable("/grid").unwrap();
    let before = reads.load(Ordering::SeqCst);

    for region in [
        Region::new(vec![4, 0, 0], vec![1, 1, 1]),
        Region::new(vec![3, 0, 0], vec![2, 5, 6]),
        Region::new(vec![0, 0], vec![1, 1]),
        Region::new(vec![0, 0, u64::MAX], vec![1, 1, 2]),
    ] {
        let err = var.read_region(&region).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bounds, "{region:?}: {err}");
    }
    assert_eq!(reads.load(Ordering::SeqCst), before);
}

#[test]
fn read_limit_is_a_bounds_error() {
    let bytes = chunked_grid(&[]);
    let file = File::from_source(
        Arc::new(bytes),
        FileAccessProps::default().max_read_bytes(256),
    )
    .unwrap();
    let err = file.read_region("/grid", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bounds);
    // 48 elements of 4 bytes fit.
    let ok = file
        .read_region("/grid", Some(&Region::new(vec![0, 0, 0], vec![2, 4, 6])))
        .unwrap();
    assert_eq!(ok.len(), 48);
}

#[test]
fn empty_region() {
    let file = File::from_bytes(chunked_grid(&[])).unwrap();
    let array = file
        .read_region("/grid", Some(&Region::new(vec![1, 2, 3], vec![0, 2, 2])))
        .unwrap();
    assert_eq!(array.shape(), &[0, 2, 2]);
    assert!(array.is_empty());
}

// ---------------------------------------------------------------------------
// Sources and concurrency
// ---------------------------------------------------------------------------

#[test]
fn file_and_mmap_sources_agree() {
    let bytes = chunked_grid(&[[0, 0, 3]]);
    let tmp = write_temp(&bytes);
    let region = Region::new(vec![0, 1, 1], vec![3, 3, 4]);

    let in_memory = File::from_bytes(bytes).unwrap();
    let positioned = File::open(tmp.path()).unwrap();
    let mapped = File::open_with(tmp.path(), FileAccessProps::default().mmap(true)).unwrap();

    let want = in_memory.read_region("/grid", Some(&region)).unwrap();
    assert_eq!(positioned.read_region("/grid", Some(&region)).unwrap(), want);
    assert_eq!(mapped.read_region("/grid", Some(&region)).unwrap(), want);
    positioned.close();
}

#[test]
fn concurrent_reads_share_one_handle() {
    let tmp = write_temp(&chunked_grid(&[]));
    let file = File::open(tmp.path()).unwrap();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let file = &file;
                s.spawn(move || {
                    let region = Region::new(vec![i, 0, 0], vec![1, 5, 6]);
                    file.read_region("/grid", Some(&region))
                        .unwrap()
                        .to_i64_vec()
                        .unwrap()
                })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            let got = h.join().unwrap();
            let first = i as i64 * 30;
            assert_eq!(got, (first..first + 30).collect::<Vec<_>>());
        }
    });
}

#[test]
fn strict_mode_accepts_valid_checksums() {
    let bytes = chunked_grid(&[]);
    let file = File::from_source(
        Arc::new(bytes),
        FileAccessProps::default().verify_checksums(true),
    )
    .unwrap();
    assert_eq!(file.read_region("/grid", None).unwrap().len(), 120);
}

#[test]
fn strict_mode_rejects_corrupt_header() {
    let mut bytes = chunked_grid(&[]);
    // Flip a byte inside the root group's link message; the root header is
    // the last object written.
    let n = bytes.len();
    bytes[n - 10] ^= 0xFF;
    let strict = File::from_source(
        Arc::new(bytes),
        FileAccessProps::default().verify_checksums(true),
    )
    .unwrap();
    let err = strict.variable("/grid").unwrap_err();
    assert!(matches!(
        err,
        h5tile::Error::Format(ref e) if matches!(e.root(), FormatError::ChecksumMismatch { .. })
    ));
}
