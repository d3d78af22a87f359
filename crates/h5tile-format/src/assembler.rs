//! Region reads: from a variable's decoded metadata and a requested
//! region to a [`TypedArray`].
//!
//! The destination buffer is sized and checked against the configured
//! limit before any I/O. Each present chunk is read, run through the
//! filter pipeline and copied run by run; tiles the index never yields
//! are written with the fill pattern. Variable-length elements are then
//! replaced by their heap payloads.

use std::collections::HashSet;

use log::debug;

use crate::btree_v1::ChunkBTree;
use crate::context::DecodeContext;
use crate::data_layout::{ChunkIndex, DataLayout};
use crate::dataspace::{Dataspace, DataspaceType};
use crate::datatype::Datatype;
use crate::element_type::ElementType;
use crate::error::{FormatError, ResultExt};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::global_heap::{GlobalHeapReader, VlenSlot};
use crate::hyperslab::{transfers, Region, Transfer};
use crate::object_header::ObjectHeader;
use crate::source::Cursor;
use crate::tiling::Tiling;
use crate::typed_array::{trim_string, ArrayData, TypedArray};
use crate::warnings::{Warning, WarningSink};

/// Everything needed to read a variable, decoded once from its header.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMeta {
    /// Path used in diagnostics.
    pub path: String,
    pub dataspace: Dataspace,
    pub datatype: Datatype,
    pub element_type: ElementType,
    pub layout: DataLayout,
    pub filters: Option<FilterPipeline>,
    pub fill_value: Option<FillValue>,
}

impl VariableMeta {
    pub fn from_header(path: &str, header: &ObjectHeader) -> Result<VariableMeta, FormatError> {
        let missing = |what: &str| {
            FormatError::Unsupported(format!("{path} has no {what} message"))
        };
        let dataspace = header.dataspace().ok_or_else(|| missing("dataspace"))?.clone();
        let datatype = header.datatype().ok_or_else(|| missing("datatype"))?.clone();
        let layout = header.layout().ok_or_else(|| missing("data layout"))?.clone();
        let element_type =
            ElementType::resolve(&datatype).context(|| format!("datatype of {path}"))?;
        Ok(VariableMeta {
            path: path.to_string(),
            dataspace,
            datatype,
            element_type,
            layout,
            filters: header.filter_pipeline().cloned(),
            fill_value: header.fill_value().cloned(),
        })
    }

    pub fn shape(&self) -> &[u64] {
        &self.dataspace.dims
    }

    /// One element of fill. A declared value of the wrong width is
    /// reported and replaced by zeros.
    fn fill_pattern(&self, warnings: &dyn WarningSink) -> Vec<u8> {
        let size = self.element_type.size();
        let Some(fill) = &self.fill_value else {
            return vec![0; size];
        };
        if let Some(value) = fill.value.as_ref().filter(|v| v.len() != size) {
            warnings.warn(Warning::FillValueIgnored {
                variable: self.path.clone(),
                expected: size,
                actual: value.len(),
            });
        }
        fill.pattern(size)
    }
}

/// Read `region` of a variable, or all of it when `region` is `None`.
pub fn read_region(
    ctx: &DecodeContext<'_>,
    meta: &VariableMeta,
    region: Option<&Region>,
) -> Result<TypedArray, FormatError> {
    read_region_inner(ctx, meta, region).context(|| format!("variable {}", meta.path))
}

fn read_region_inner(
    ctx: &DecodeContext<'_>,
    meta: &VariableMeta,
    region: Option<&Region>,
) -> Result<TypedArray, FormatError> {
    let shape = meta.shape();
    let region = match region {
        Some(r) => {
            r.validate(shape)?;
            r.clone()
        }
        None => Region::full(shape),
    };
    let element_size = meta.element_type.size();
    let requested = region.num_elements().saturating_mul(element_size as u64);
    if requested > ctx.props.max_read_bytes {
        return Err(FormatError::ReadTooLarge {
            requested,
            limit: ctx.props.max_read_bytes,
        });
    }
    if meta.dataspace.space_type == DataspaceType::Null || region.is_empty() {
        return materialize(ctx, &meta.element_type, region.count, Vec::new());
    }

    let mut dst = vec![0u8; requested as usize];
    match &meta.layout {
        DataLayout::Compact { data } => {
            let runs = transfers(&vec![0; shape.len()], shape, shape, &region, element_size);
            copy_runs(&mut dst, data, &runs)?;
        }
        DataLayout::Contiguous { address, .. } => match address {
            None => fill_runs(
                &mut dst,
                &meta.fill_pattern(ctx.warnings),
                &transfers(&vec![0; shape.len()], shape, shape, &region, element_size),
            ),
            Some(address) => {
                let runs = transfers(&vec![0; shape.len()], shape, shape, &region, element_size);
                for run in runs {
                    let bytes = ctx.read(address + run.src as u64, run.len)?;
                    dst[run.dst..run.dst + run.len].copy_from_slice(&bytes);
                }
            }
        },
        DataLayout::Chunked {
            chunk_shape,
            address,
            index,
            ..
        } => read_chunked(ctx, meta, chunk_shape, *address, index, &region, &mut dst)?,
        DataLayout::Virtual => {
            return Err(FormatError::Unsupported("virtual dataset layout".into()))
        }
    }
    debug!(
        "read {} of {}: {} bytes",
        meta.path,
        region
            .count
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("x"),
        dst.len()
    );
    materialize(ctx, &meta.element_type, region.count, dst)
}

fn copy_runs(dst: &mut [u8], src: &[u8], runs: &[Transfer]) -> Result<(), FormatError> {
    for run in runs {
        let from = src
            .get(run.src..run.src + run.len)
            .ok_or(FormatError::ChunkSizeMismatch {
                expected: run.src + run.len,
                actual: src.len(),
            })?;
        dst[run.dst..run.dst + run.len].copy_from_slice(from);
    }
    Ok(())
}

fn fill_runs(dst: &mut [u8], pattern: &[u8], runs: &[Transfer]) {
    if pattern.iter().all(|&b| b == 0) {
        for run in runs {
            dst[run.dst..run.dst + run.len].fill(0);
        }
        return;
    }
    for run in runs {
        for (d, p) in dst[run.dst..run.dst + run.len]
            .iter_mut()
            .zip(pattern.iter().cycle())
        {
            *d = *p;
        }
    }
}

fn chunk_context(origin: &[u64]) -> String {
    format!("chunk {origin:?}")
}

fn decode_chunk(
    ctx: &DecodeContext<'_>,
    meta: &VariableMeta,
    address: u64,
    stored_size: u64,
    filter_mask: u32,
    chunk_bytes: usize,
) -> Result<Vec<u8>, FormatError> {
    let stored = ctx.read(address, stored_size as usize)?;
    match meta.filters.as_ref().filter(|p| !p.is_empty()) {
        Some(pipeline) => pipeline.decode_chunk(
            stored,
            filter_mask,
            meta.element_type.size(),
            chunk_bytes,
            ctx.codecs,
            ctx.warnings,
            &meta.path,
        ),
        None if stored.len() == chunk_bytes => Ok(stored),
        None => Err(FormatError::ChunkSizeMismatch {
            expected: chunk_bytes,
            actual: stored.len(),
        }),
    }
}

fn read_chunked(
    ctx: &DecodeContext<'_>,
    meta: &VariableMeta,
    chunk_shape: &[u64],
    address: Option<u64>,
    index: &ChunkIndex,
    region: &Region,
    dst: &mut [u8],
) -> Result<(), FormatError> {
    let shape = meta.shape();
    let element_size = meta.element_type.size();
    let tiling = Tiling::new(shape, chunk_shape)?;
    let chunk_bytes = (tiling.chunk_elements() as usize).saturating_mul(element_size);
    let mut present: HashSet<u64> = HashSet::new();

    let mut apply = |origin: &[u64], data: &[u8]| -> Result<(), FormatError> {
        let runs = transfers(origin, chunk_shape, shape, region, element_size);
        copy_runs(dst, data, &runs)
    };

    match (index, address) {
        (_, None) => {}
        (ChunkIndex::BTreeV1, Some(root)) => {
            let last: Vec<u64> = region
                .start
                .iter()
                .zip(&region.count)
                .map(|(s, n)| s + n - 1)
                .collect();
            let tree = ChunkBTree::new(ctx, root, &tiling);
            let mut iter = tree.first(&region.start)?;
            while let Some(chunk) = iter.next_chunk()? {
                if tiling.compare(&chunk.origin, &last) == std::cmp::Ordering::Greater {
                    break;
                }
                if transfers(&chunk.origin, chunk_shape, shape, region, element_size).is_empty() {
                    continue;
                }
                let data = decode_chunk(
                    ctx,
                    meta,
                    chunk.address,
                    u64::from(chunk.stored_size),
                    chunk.filter_mask,
                    chunk_bytes,
                )
                .context(|| chunk_context(&chunk.origin))?;
                apply(&chunk.origin, &data).context(|| chunk_context(&chunk.origin))?;
                present.insert(tiling.tile_number(&tiling.tile_of(&chunk.origin)));
            }
        }
        (
            ChunkIndex::SingleChunk {
                filtered_size,
                filter_mask,
            },
            Some(address),
        ) => {
            let origin = vec![0; shape.len()];
            let stored = filtered_size.unwrap_or(chunk_bytes as u64);
            let data = decode_chunk(ctx, meta, address, stored, *filter_mask, chunk_bytes)
                .context(|| chunk_context(&origin))?;
            apply(&origin, &data)?;
            present.insert(0);
        }
        (ChunkIndex::Implicit, Some(address)) => {
            for tile in tiling.tiles_overlapping(&region.start, &region.count) {
                let n = tiling.tile_number(&tile);
                let origin = tiling.tile_origin(&tile);
                let at = address + n * chunk_bytes as u64;
                let data = ctx.read(at, chunk_bytes).context(|| chunk_context(&origin))?;
                apply(&origin, &data)?;
                present.insert(n);
            }
        }
        (other, Some(_)) => {
            return Err(FormatError::Unsupported(format!("{other:?} chunk index")))
        }
    }

    let pattern = meta.fill_pattern(ctx.warnings);
    for tile in tiling.tiles_overlapping(&region.start, &region.count) {
        if present.contains(&tiling.tile_number(&tile)) {
            continue;
        }
        let origin = tiling.tile_origin(&tile);
        let runs = transfers(&origin, chunk_shape, shape, region, element_size);
        fill_runs(dst, &pattern, &runs);
    }
    Ok(())
}

/// Turn fixed-size element bytes into a [`TypedArray`], dereferencing
/// variable-length slots through the global heap.
pub fn materialize(
    ctx: &DecodeContext<'_>,
    element_type: &ElementType,
    shape: Vec<u64>,
    bytes: Vec<u8>,
) -> Result<TypedArray, FormatError> {
    let data = match element_type {
        ElementType::VlenString { size, padding, .. } => {
            let mut heap = GlobalHeapReader::new();
            let strings = slots(ctx, &bytes, *size)?
                .iter()
                .map(|s| heap.slot(ctx, s).map(|raw| trim_string(&raw, *padding)))
                .collect::<Result<Vec<_>, _>>()?;
            ArrayData::Strings(strings)
        }
        ElementType::Vlen { size, base } => {
            let mut heap = GlobalHeapReader::new();
            let base_size = base.size();
            let seqs = slots(ctx, &bytes, *size)?
                .iter()
                .map(|s| -> Result<Vec<u8>, FormatError> {
                    let mut raw = heap.slot(ctx, s)?;
                    let needed = (s.length as usize).saturating_mul(base_size);
                    if raw.len() < needed {
                        return Err(FormatError::HeapObjectTooShort {
                            collection: s.id.collection,
                            index: s.id.index,
                            needed,
                            available: raw.len(),
                        });
                    }
                    raw.truncate(needed);
                    Ok(raw)
                })
                .collect::<Result<Vec<_>, _>>()?;
            ArrayData::Sequences(seqs)
        }
        ElementType::Array { base, .. } if matches!(**base, ElementType::VlenString { .. }) => {
            let inner = materialize(ctx, base, vec![], bytes)?;
            inner.into_data()
        }
        _ => ArrayData::Fixed(bytes),
    };
    Ok(TypedArray::new(shape, element_type.clone(), data))
}

fn slots(ctx: &DecodeContext<'_>, bytes: &[u8], size: usize) -> Result<Vec<VlenSlot>, FormatError> {
    if size == 0 {
        return Ok(Vec::new());
    }
    bytes
        .chunks_exact(size)
        .map(|slot| VlenSlot::parse(&mut Cursor::new(slot, 0, ctx.sizes)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree_v1::tests::build_chunk_node;
    use crate::codec::CodecRegistry;
    use crate::context::MetadataCache;
    use crate::datatype::{CharacterSet, StringPadding};
    use crate::fractal_heap::tests::superblock;
    use crate::global_heap::tests::{build_gcol, slot_bytes};
    use crate::props::FileAccessProps;
    use crate::source::Endian;
    use crate::warnings::{CollectingWarnings, LogWarnings};

    fn int32_meta(shape: &[u64], layout: DataLayout) -> VariableMeta {
        VariableMeta {
            path: "/v".into(),
            dataspace: Dataspace {
                space_type: DataspaceType::Simple,
                dims: shape.to_vec(),
                max_dims: None,
            },
            datatype: Datatype::FixedPoint {
                size: 4,
                order: Endian::Little,
                signed: true,
                bit_offset: 0,
                bit_precision: 32,
            },
            element_type: ElementType::Int {
                size: 4,
                signed: true,
                order: Endian::Little,
            },
            layout,
            filters: None,
            fill_value: Some(FillValue {
                alloc_time: 2,
                write_time: 0,
                defined: true,
                value: Some((-1i32).to_le_bytes().to_vec()),
            }),
        }
    }

    fn run<R>(file: Vec<u8>, props: FileAccessProps, f: impl FnOnce(&DecodeContext<'_>) -> R) -> R {
        let sb = superblock();
        let codecs = CodecRegistry::with_defaults();
        let cache = MetadataCache::new();
        let ctx = DecodeContext::new(&file, &sb, &props, &LogWarnings, &codecs, &cache);
        f(&ctx)
    }

    fn place(file: &mut Vec<u8>, at: usize, bytes: &[u8]) {
        if file.len() < at + bytes.len() {
            file.resize(at + bytes.len(), 0);
        }
        file[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Shape (4,5,6) of 0..120, chunks (2,5,3), every chunk in one leaf.
    fn chunked_0_to_119(skip_tile: Option<u64>) -> (Vec<u8>, VariableMeta) {
        let tiling = Tiling::new(&[4, 5, 6], &[2, 5, 3]).unwrap();
        let mut file = Vec::new();
        let mut entries = Vec::new();
        let mut next = 0x1000usize;
        for n in 0..tiling.num_tiles() {
            if Some(n) == skip_tile {
                continue;
            }
            let origin = tiling.tile_origin(&tiling.tile_coords(n));
            let mut chunk = Vec::new();
            for i in 0..2 {
                for j in 0..5 {
                    for k in 0..3 {
                        let v = ((origin[0] + i) * 30 + (origin[1] + j) * 6 + origin[2] + k) as i32;
                        chunk.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            place(&mut file, next, &chunk);
            entries.push((chunk.len() as u32, origin, next as u64));
            next += chunk.len();
        }
        place(&mut file, 0, &build_chunk_node(0, &entries, &[4, 0, 0]));
        let meta = int32_meta(
            &[4, 5, 6],
            DataLayout::Chunked {
                version: 3,
                chunk_shape: vec![2, 5, 3],
                element_size: 4,
                address: Some(0),
                index: ChunkIndex::BTreeV1,
            },
        );
        (file, meta)
    }

    fn expected(region: &Region) -> Vec<i64> {
        let mut out = Vec::new();
        for i in region.start[0]..region.start[0] + region.count[0] {
            for j in region.start[1]..region.start[1] + region.count[1] {
                for k in region.start[2]..region.start[2] + region.count[2] {
                    out.push((i * 30 + j * 6 + k) as i64);
                }
            }
        }
        out
    }

    #[test]
    fn chunked_subregion_matches_row_major_values() {
        let (file, meta) = chunked_0_to_119(None);
        let region = Region::new(vec![1, 0, 2], vec![2, 5, 3]);
        let array = run(file, FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, Some(&region)).unwrap()
        });
        assert_eq!(array.shape(), &[2, 5, 3]);
        assert_eq!(array.to_i64_vec().unwrap(), expected(&region));
    }

    #[test]
    fn partitioned_reads_reassemble_full_read() {
        let (file, meta) = chunked_0_to_119(None);
        run(file, FileAccessProps::default(), |ctx| {
            let full = read_region(ctx, &meta, None).unwrap().to_i64_vec().unwrap();
            assert_eq!(full, (0..120).collect::<Vec<i64>>());
            let mut pieces = Vec::new();
            for i in 0..4 {
                let r = Region::new(vec![i, 0, 0], vec![1, 5, 6]);
                pieces.extend(read_region(ctx, &meta, Some(&r)).unwrap().to_i64_vec().unwrap());
            }
            assert_eq!(pieces, full);
        });
    }

    #[test]
    fn missing_chunk_reads_as_fill_value() {
        // Tile 1 is chunk (0,0,1): rows 0..2, cols 3..6.
        let (file, meta) = chunked_0_to_119(Some(1));
        let values = run(file, FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, None).unwrap().to_i64_vec().unwrap()
        });
        for (n, v) in values.iter().enumerate() {
            let (i, k) = (n / 30, n % 6);
            if i < 2 && k >= 3 {
                assert_eq!(*v, -1);
            } else {
                assert_eq!(*v, n as i64);
            }
        }
    }

    #[test]
    fn out_of_bounds_fails_before_io() {
        // An empty source: any read attempt would fail with an EOF error.
        let (_, meta) = chunked_0_to_119(None);
        let err = run(Vec::new(), FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, Some(&Region::new(vec![3, 0, 0], vec![2, 5, 6]))).unwrap_err()
        });
        assert!(matches!(err.root(), FormatError::RegionOutOfBounds { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn read_limit_checked_before_io() {
        let (_, meta) = chunked_0_to_119(None);
        let err = run(Vec::new(), FileAccessProps::default().max_read_bytes(100), |ctx| {
            read_region(ctx, &meta, None).unwrap_err()
        });
        assert!(matches!(
            err.root(),
            FormatError::ReadTooLarge {
                requested: 480,
                limit: 100
            }
        ));
    }

    #[test]
    fn zero_length_region_is_empty() {
        let (_, meta) = chunked_0_to_119(None);
        let array = run(Vec::new(), FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, Some(&Region::new(vec![0, 0, 0], vec![2, 0, 3]))).unwrap()
        });
        assert_eq!(array.shape(), &[2, 0, 3]);
        assert!(array.is_empty());
    }

    #[test]
    fn contiguous_reads_only_needed_runs() {
        let mut file = vec![0u8; 0x20];
        for v in 0..12i32 {
            file.extend_from_slice(&v.to_le_bytes());
        }
        let meta = int32_meta(
            &[3, 4],
            DataLayout::Contiguous {
                address: Some(0x20),
                size: Some(48),
            },
        );
        let values = run(file, FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, Some(&Region::new(vec![1, 1], vec![2, 2])))
                .unwrap()
                .to_i64_vec()
                .unwrap()
        });
        assert_eq!(values, vec![5, 6, 9, 10]);
    }

    #[test]
    fn unallocated_contiguous_is_fill() {
        let meta = int32_meta(
            &[3],
            DataLayout::Contiguous {
                address: None,
                size: None,
            },
        );
        let values = run(Vec::new(), FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, None).unwrap().to_i64_vec().unwrap()
        });
        assert_eq!(values, vec![-1, -1, -1]);
    }

    #[test]
    fn wrong_width_fill_value_warns_and_reads_zeros() {
        let mut meta = int32_meta(
            &[2],
            DataLayout::Contiguous {
                address: None,
                size: None,
            },
        );
        meta.fill_value = Some(FillValue {
            alloc_time: 2,
            write_time: 0,
            defined: true,
            value: Some(vec![0xFF; 2]),
        });
        let file: Vec<u8> = Vec::new();
        let sb = superblock();
        let props = FileAccessProps::default();
        let codecs = CodecRegistry::with_defaults();
        let cache = MetadataCache::new();
        let warnings = CollectingWarnings::new();
        let ctx = DecodeContext::new(&file, &sb, &props, &warnings, &codecs, &cache);
        let values = read_region(&ctx, &meta, None).unwrap().to_i64_vec().unwrap();
        assert_eq!(values, vec![0, 0]);
        assert_eq!(
            warnings.drain(),
            vec![Warning::FillValueIgnored {
                variable: meta.path.clone(),
                expected: 4,
                actual: 2
            }]
        );
    }

    #[test]
    fn vlen_strings_with_empty_entry() {
        let text = b"hello";
        let long = b"twelve chars";
        let mut file = build_gcol(&[b"", text, long]);
        let data_at = file.len();
        for (len, index) in [(0u32, 1u32), (5, 2), (12, 3)] {
            file.extend_from_slice(&slot_bytes(len, 0, index));
        }
        let mut meta = int32_meta(
            &[3],
            DataLayout::Contiguous {
                address: Some(data_at as u64),
                size: Some(48),
            },
        );
        meta.element_type = ElementType::VlenString {
            size: 16,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Utf8,
        };
        meta.fill_value = None;
        let strings = run(file, FileAccessProps::default(), |ctx| {
            read_region(ctx, &meta, None).unwrap().to_strings().unwrap()
        });
        assert_eq!(strings, vec!["", "hello", "twelve chars"]);
    }

    fn int16_sequences(file: Vec<u8>, data_at: usize, count: u64) -> Result<TypedArray, FormatError> {
        let mut meta = int32_meta(
            &[count],
            DataLayout::Contiguous {
                address: Some(data_at as u64),
                size: Some(16 * count),
            },
        );
        meta.element_type = ElementType::Vlen {
            size: 16,
            base: Box::new(ElementType::Int {
                size: 2,
                signed: true,
                order: Endian::Little,
            }),
        };
        meta.fill_value = None;
        run(file, FileAccessProps::default(), |ctx| read_region(ctx, &meta, None))
    }

    #[test]
    fn vlen_sequences_take_declared_count() {
        // Heap objects are padded; only `length` elements belong to the slot.
        let mut file = build_gcol(&[&[1, 0, 2, 0, 3, 0, 0, 0], &[9, 0]]);
        let data_at = file.len();
        file.extend_from_slice(&slot_bytes(3, 0, 1));
        file.extend_from_slice(&slot_bytes(1, 0, 2));
        let array = int16_sequences(file, data_at, 2).unwrap();
        let values: Vec<Vec<i64>> = array
            .sequences()
            .unwrap()
            .iter()
            .map(|seq| seq.to_i64_vec().unwrap())
            .collect();
        assert_eq!(values, vec![vec![1, 2, 3], vec![9]]);
    }

    #[test]
    fn vlen_heap_object_shorter_than_slot_fails() {
        let mut file = build_gcol(&[&[1, 0, 2, 0]]);
        let data_at = file.len();
        file.extend_from_slice(&slot_bytes(3, 0, 1));
        let err = int16_sequences(file, data_at, 1).unwrap_err();
        assert!(matches!(
            err.root(),
            FormatError::HeapObjectTooShort {
                collection: Some(0),
                index: 1,
                needed: 6,
                available: 4
            }
        ));
    }
}
