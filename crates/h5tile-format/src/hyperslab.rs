//! Requested regions and the byte runs that copy a chunk into them.

use crate::error::FormatError;

/// A rectangular selection: `count[d]` elements from `start[d]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
}

impl Region {
    pub fn new(start: Vec<u64>, count: Vec<u64>) -> Region {
        Region { start, count }
    }

    /// The whole of `shape`.
    pub fn full(shape: &[u64]) -> Region {
        Region {
            start: vec![0; shape.len()],
            count: shape.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.count.contains(&0)
    }

    /// Check the region against a variable's shape.
    pub fn validate(&self, shape: &[u64]) -> Result<(), FormatError> {
        if self.start.len() != self.count.len() || self.start.len() != shape.len() {
            return Err(FormatError::RankMismatch {
                expected: shape.len(),
                actual: if self.start.len() != shape.len() {
                    self.start.len()
                } else {
                    self.count.len()
                },
            });
        }
        let inside = self
            .start
            .iter()
            .zip(&self.count)
            .zip(shape)
            .all(|((s, n), dim)| s.checked_add(*n).is_some_and(|end| end <= *dim));
        if !inside {
            return Err(FormatError::RegionOutOfBounds {
                start: self.start.clone(),
                count: self.count.clone(),
                shape: shape.to_vec(),
            });
        }
        Ok(())
    }
}

/// One contiguous copy, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Offset into the decoded chunk.
    pub src: usize,
    /// Offset into the destination buffer.
    pub dst: usize,
    pub len: usize,
}

fn row_major_strides(extent: &[u64], element_size: usize) -> Vec<usize> {
    let mut strides = vec![element_size; extent.len()];
    for d in (0..extent.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * extent[d + 1] as usize;
    }
    strides
}

/// Runs copying the part of a chunk that lies inside `region`.
///
/// `origin` is the chunk's first element and `chunk` its full stored
/// extent. Runs come out in destination order; the fastest dimension of
/// each overlap is one run, and neighbouring runs that are contiguous on
/// both sides are merged.
pub fn transfers(
    origin: &[u64],
    chunk: &[u64],
    shape: &[u64],
    region: &Region,
    element_size: usize,
) -> Vec<Transfer> {
    let rank = region.rank();
    if rank == 0 {
        return vec![Transfer {
            src: 0,
            dst: 0,
            len: element_size,
        }];
    }
    let mut lo = Vec::with_capacity(rank);
    let mut hi = Vec::with_capacity(rank);
    for d in 0..rank {
        let chunk_end = (origin[d] + chunk[d]).min(shape[d]);
        let a = origin[d].max(region.start[d]);
        let b = chunk_end.min(region.start[d] + region.count[d]);
        if a >= b {
            return Vec::new();
        }
        lo.push(a);
        hi.push(b);
    }

    let src_strides = row_major_strides(chunk, element_size);
    let dst_strides = row_major_strides(&region.count, element_size);
    let inner = rank - 1;
    let run = (hi[inner] - lo[inner]) as usize * element_size;

    let mut out: Vec<Transfer> = Vec::new();
    let mut pos = lo.clone();
    loop {
        let mut src = 0;
        let mut dst = 0;
        for d in 0..rank {
            src += (pos[d] - origin[d]) as usize * src_strides[d];
            dst += (pos[d] - region.start[d]) as usize * dst_strides[d];
        }
        match out.last_mut() {
            Some(prev) if prev.src + prev.len == src && prev.dst + prev.len == dst => {
                prev.len += run;
            }
            _ => out.push(Transfer { src, dst, len: run }),
        }

        // Odometer over every dimension but the fastest.
        let mut d = inner;
        loop {
            if d == 0 {
                return out;
            }
            d -= 1;
            pos[d] += 1;
            if pos[d] < hi[d] {
                break;
            }
            pos[d] = lo[d];
        }
    }
}
