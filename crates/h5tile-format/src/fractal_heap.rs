//! Fractal heap (`FRHP` / `FHDB` / `FHIB`) used for dense links, dense
//! attributes and shared messages.
//!
//! Objects are addressed by heap ids. Managed ids encode an offset into
//! the heap's linear address space, which the doubling table maps onto
//! direct blocks reached through a tree of indirect blocks. Tiny ids carry
//! the object inline.

use log::trace;

use crate::checksum::verify_block;
use crate::context::{Block, DecodeContext};
use crate::error::FormatError;
use crate::source::Cursor;

/// Header fields that locate managed objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeap {
    /// Absolute file offset of the header, for diagnostics.
    pub offset: u64,
    pub heap_id_len: u16,
    pub io_filter_len: u16,
    pub flags: u8,
    pub max_managed_size: u32,
    pub managed_objects: u64,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// Heap address-space width in bits.
    pub max_heap_size: u16,
    pub starting_rows: u16,
    pub root_block_address: Option<u64>,
    /// Rows in the root indirect block; 0 when the root is a direct block.
    pub root_rows: u16,
}

fn log2(v: u64) -> u32 {
    63 - v.max(1).leading_zeros()
}

impl FractalHeap {
    pub fn read(ctx: &DecodeContext<'_>, address: u64) -> Result<FractalHeap, FormatError> {
        let os = ctx.sizes.os();
        let ls = ctx.sizes.ls();
        let fixed = 4 + 1 + 2 + 2 + 1 + 4 + 12 * ls + 3 * os + 2 + 2 + 2 + 2;
        // Room for the filtered-root fields and the checksum.
        let block = ctx.block_up_to(address, fixed + ls + 4 + 4 + 256)?;
        let mut c = block.cursor();
        c.signature(b"FRHP", "fractal heap")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "fractal heap",
                version,
                offset: block.offset,
            });
        }
        let heap_id_len = c.u16()?;
        let io_filter_len = c.u16()?;
        let flags = c.u8()?;
        let max_managed_size = c.u32()?;
        c.length()?; // next huge id
        c.offset()?; // huge object B-tree
        c.length()?; // free space
        c.offset()?; // free space manager
        c.length()?; // managed space
        c.length()?; // allocated managed space
        c.length()?; // direct block iterator offset
        let managed_objects = c.length()?;
        for _ in 0..4 {
            c.length()?; // huge/tiny sizes and counts
        }
        let table_width = c.u16()?;
        let starting_block_size = c.length()?;
        let max_direct_block_size = c.length()?;
        let max_heap_size = c.u16()?;
        let starting_rows = c.u16()?;
        let root_block_address = c.offset()?;
        let root_rows = c.u16()?;
        if io_filter_len > 0 {
            c.length()?;
            c.u32()?;
            c.skip(io_filter_len as usize)?;
        }
        let header_len = c.position() + 4;
        if ctx.verify_checksums() {
            let data = block.data.get(..header_len).ok_or(FormatError::UnexpectedEof {
                offset: block.offset,
                needed: header_len,
                available: block.len(),
            })?;
            verify_block(data, "fractal heap header", block.offset)?;
        }
        if table_width == 0 || starting_block_size == 0 {
            return Err(FormatError::InvalidValue {
                what: "fractal heap doubling table",
                value: u64::from(table_width),
                offset: block.offset,
            });
        }
        trace!(
            "fractal heap at {:#x}: width {table_width}, start {starting_block_size}, root rows {root_rows}",
            block.offset
        );
        Ok(FractalHeap {
            offset: block.offset,
            heap_id_len,
            io_filter_len,
            flags,
            max_managed_size,
            managed_objects,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size,
            starting_rows,
            root_block_address,
            root_rows,
        })
    }

    /// Bytes of a block offset field.
    fn block_offset_len(&self) -> usize {
        (self.max_heap_size as usize).div_ceil(8)
    }

    /// Bytes of the length field in a managed heap id.
    fn id_length_len(&self) -> usize {
        let dblock = (log2(self.max_direct_block_size) as usize).div_ceil(8);
        let managed = log2(u64::from(self.max_managed_size)) as usize / 8 + 1;
        dblock.min(managed)
    }

    /// Block size of doubling-table row `row`.
    fn row_size(&self, row: usize) -> u64 {
        if row <= 1 {
            self.starting_block_size
        } else {
            self.starting_block_size
                .saturating_mul(1u64 << (row - 1).min(62))
        }
    }

    /// Number of rows that hold direct blocks.
    fn max_direct_rows(&self) -> usize {
        (log2(self.max_direct_block_size) - log2(self.starting_block_size)) as usize + 2
    }

    /// Rows of an indirect block spanning `size` bytes of heap space.
    fn rows_for_size(&self, size: u64) -> usize {
        let span = self
            .starting_block_size
            .saturating_mul(u64::from(self.table_width));
        (log2(size).saturating_sub(log2(span))) as usize + 1
    }

    /// Fetch the object named by `id`.
    pub fn get(&self, ctx: &DecodeContext<'_>, id: &[u8]) -> Result<Block, FormatError> {
        let first = *id.first().ok_or(FormatError::UnexpectedEof {
            offset: self.offset,
            needed: 1,
            available: 0,
        })?;
        let version = first >> 6;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "heap id",
                version,
                offset: self.offset,
            });
        }
        match (first >> 4) & 0x03 {
            0 => self.get_managed(ctx, id),
            1 => Err(FormatError::Unsupported(
                "huge fractal heap objects".into(),
            )),
            2 => {
                let len = (first & 0x0F) as usize + 1;
                let data = id
                    .get(1..1 + len)
                    .ok_or(FormatError::UnexpectedEof {
                        offset: self.offset,
                        needed: len,
                        available: id.len().saturating_sub(1),
                    })?
                    .to_vec();
                Ok(Block {
                    data,
                    offset: self.offset,
                    sizes: ctx.sizes,
                })
            }
            t => Err(FormatError::InvalidValue {
                what: "heap id type",
                value: u64::from(t),
                offset: self.offset,
            }),
        }
    }

    fn get_managed(&self, ctx: &DecodeContext<'_>, id: &[u8]) -> Result<Block, FormatError> {
        let mut c = Cursor::new(id, self.offset, ctx.sizes);
        c.skip(1)?;
        let heap_offset = c.uint(self.block_offset_len())?;
        let len = c.uint(self.id_length_len())? as usize;
        let root = self.root_block_address.ok_or(FormatError::UndefinedAddress {
            what: "fractal heap root block",
        })?;
        let (block_address, block_start) = if self.root_rows == 0 {
            (root, 0)
        } else {
            self.locate(ctx, root, self.root_rows as usize, 0, heap_offset, 0)?
        };
        let within = heap_offset - block_start;
        trace!("heap object at heap offset {heap_offset} ({len} bytes) in block {block_address:#x}");
        ctx.block(block_address + within, len)
    }

    /// Walk indirect blocks to the direct block holding `target`.
    /// Returns the direct block address and its starting heap offset.
    fn locate(
        &self,
        ctx: &DecodeContext<'_>,
        address: u64,
        rows: usize,
        start: u64,
        target: u64,
        depth: usize,
    ) -> Result<(u64, u64), FormatError> {
        if depth > 32 {
            return Err(FormatError::ContinuationLoop {
                offset: ctx.absolute(address),
                limit: 32,
            });
        }
        let os = ctx.sizes.os();
        let width = self.table_width as usize;
        let direct_rows = rows.min(self.max_direct_rows());
        let indirect_rows = rows - direct_rows;
        let filtered_extra = if self.io_filter_len > 0 {
            ctx.sizes.ls() + 4
        } else {
            0
        };
        let len = 4
            + 1
            + os
            + self.block_offset_len()
            + direct_rows * width * (os + filtered_extra)
            + indirect_rows * width * os
            + 4;
        let block = ctx.block(address, len)?;
        if ctx.verify_checksums() {
            verify_block(&block.data, "fractal heap indirect block", block.offset)?;
        }
        let mut c = block.cursor();
        c.signature(b"FHIB", "fractal heap indirect block")?;
        c.skip(1 + os + self.block_offset_len())?;

        let mut heap_pos = start;
        for row in 0..rows {
            let size = self.row_size(row);
            for _ in 0..width {
                let child = c.offset()?;
                if row < direct_rows {
                    c.skip(filtered_extra)?;
                }
                if let Some(child) = child {
                    if target >= heap_pos && target < heap_pos.saturating_add(size) {
                        if row < direct_rows {
                            return Ok((child, heap_pos));
                        }
                        let child_rows = self.rows_for_size(size);
                        return self.locate(ctx, child, child_rows, heap_pos, target, depth + 1);
                    }
                }
                heap_pos = heap_pos.saturating_add(size);
            }
        }
        Err(FormatError::InvalidValue {
            what: "fractal heap offset",
            value: target,
            offset: block.offset,
        })
    }
}
