//! Chunk grid geometry of a variable.
//!
//! Chunk origins are ordered lexicographically by chunk index, slowest
//! dimension first. That is the order chunk B-tree children are stored
//! in and the order implicit indexes lay chunks out in.

use std::cmp::Ordering;

use crate::error::FormatError;

/// Grid of chunks covering a variable of a given shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tiling {
    shape: Vec<u64>,
    chunk: Vec<u64>,
    /// Tiles per dimension.
    grid: Vec<u64>,
}

impl Tiling {
    pub fn new(shape: &[u64], chunk: &[u64]) -> Result<Tiling, FormatError> {
        if shape.len() != chunk.len() {
            return Err(FormatError::RankMismatch {
                expected: shape.len(),
                actual: chunk.len(),
            });
        }
        if chunk.iter().any(|&c| c == 0) {
            return Err(FormatError::InvalidValue {
                what: "chunk dimension",
                value: 0,
                offset: 0,
            });
        }
        let grid = shape.iter().zip(chunk).map(|(s, c)| s.div_ceil(*c)).collect();
        Ok(Tiling {
            shape: shape.to_vec(),
            chunk: chunk.to_vec(),
            grid,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk
    }

    /// Tiles per dimension.
    pub fn grid(&self) -> &[u64] {
        &self.grid
    }

    pub fn num_tiles(&self) -> u64 {
        self.grid.iter().product()
    }

    /// Elements in one full chunk.
    pub fn chunk_elements(&self) -> u64 {
        self.chunk.iter().product()
    }

    /// Chunk index containing an element coordinate.
    pub fn tile_of(&self, coord: &[u64]) -> Vec<u64> {
        coord.iter().zip(&self.chunk).map(|(x, c)| x / c).collect()
    }

    /// Element coordinate of a tile's first element.
    pub fn tile_origin(&self, tile: &[u64]) -> Vec<u64> {
        tile.iter().zip(&self.chunk).map(|(t, c)| t * c).collect()
    }

    /// Order two element coordinates by the tiles containing them.
    pub fn compare(&self, a: &[u64], b: &[u64]) -> Ordering {
        for ((x, y), c) in a.iter().zip(b).zip(&self.chunk) {
            match (x / c).cmp(&(y / c)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Row-major tile number of a chunk index.
    pub fn tile_number(&self, tile: &[u64]) -> u64 {
        tile.iter()
            .zip(&self.grid)
            .fold(0u64, |n, (t, g)| n.saturating_mul(*g).saturating_add(*t))
    }

    /// Chunk index of a row-major tile number.
    pub fn tile_coords(&self, mut number: u64) -> Vec<u64> {
        let mut tile = vec![0; self.rank()];
        for (t, g) in tile.iter_mut().zip(&self.grid).rev() {
            if *g > 0 {
                *t = number % g;
                number /= g;
            }
        }
        tile
    }

    /// Extent of the chunk at `origin` clipped to the variable's shape.
    pub fn clipped_extent(&self, origin: &[u64]) -> Vec<u64> {
        origin
            .iter()
            .zip(&self.chunk)
            .zip(&self.shape)
            .map(|((o, c), s)| (*c).min(s.saturating_sub(*o)))
            .collect()
    }

    /// Every tile intersecting `[start, start + count)`, in tile order.
    pub fn tiles_overlapping(&self, start: &[u64], count: &[u64]) -> Vec<Vec<u64>> {
        if count.contains(&0) || self.rank() == 0 {
            return if self.rank() == 0 { vec![Vec::new()] } else { Vec::new() };
        }
        let first = self.tile_of(start);
        let last: Vec<u64> = start
            .iter()
            .zip(count)
            .zip(&self.chunk)
            .map(|((s, n), c)| (s + n - 1) / c)
            .collect();
        let mut out = Vec::new();
        let mut tile = first.clone();
        loop {
            out.push(tile.clone());
            let mut d = self.rank();
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                if tile[d] < last[d] {
                    tile[d] += 1;
                    break;
                }
                tile[d] = first[d];
            }
        }
    }
}
