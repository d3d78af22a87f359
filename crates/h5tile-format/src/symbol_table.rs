//! Old-style groups: the Symbol Table message (0x0011), local heaps
//! (`HEAP`) and symbol table nodes (`SNOD`).

use log::trace;

use crate::btree_v1::group_leaves;
use crate::context::DecodeContext;
use crate::error::{FormatError, ResultExt};
use crate::source::Cursor;

/// Symbol Table message: where an old-style group keeps its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(c: &mut Cursor<'_>) -> Result<SymbolTableMessage, FormatError> {
        Ok(SymbolTableMessage {
            btree_address: c.address("symbol table B-tree")?,
            local_heap_address: c.address("symbol table local heap")?,
        })
    }
}

/// A local heap: the name strings of an old-style group.
#[derive(Debug, Clone)]
pub struct LocalHeap {
    pub data_address: u64,
    data: Vec<u8>,
}

impl LocalHeap {
    pub fn read(ctx: &DecodeContext<'_>, address: u64) -> Result<LocalHeap, FormatError> {
        let ls = ctx.sizes.ls();
        let block = ctx.block(address, 8 + 2 * ls + ctx.sizes.os())?;
        let mut c = block.cursor();
        c.signature(b"HEAP", "local heap")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "local heap",
                version,
                offset: block.offset,
            });
        }
        c.skip(3)?;
        let size = c.length()?;
        let _free_list = c.length()?;
        let data_address = c.address("local heap data")?;
        let size = usize::try_from(size).map_err(|_| FormatError::InvalidValue {
            what: "local heap size",
            value: size,
            offset: block.offset + 8,
        })?;
        let data = ctx.read(data_address, size)?;
        Ok(LocalHeap { data_address, data })
    }

    /// NUL-terminated string at `offset` within the heap.
    pub fn string_at(&self, offset: u64) -> Result<String, FormatError> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|s| *s < self.data.len())
            .ok_or(FormatError::InvalidValue {
                what: "local heap offset",
                value: offset,
                offset: self.data_address,
            })?;
        let mut c = Cursor::new(
            &self.data[start..],
            self.data_address + offset,
            Default::default(),
        );
        c.cstring()
    }
}

/// One member of an old-style group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableEntry {
    pub name_offset: u64,
    pub header_address: u64,
    pub cache_type: u32,
}

impl SymbolTableEntry {
    /// Bytes per entry: two addresses-worth, cache type, reserved, scratch.
    pub fn encoded_len(os: usize, ls: usize) -> usize {
        ls + os + 4 + 4 + 16
    }

    pub fn parse(c: &mut Cursor<'_>) -> Result<SymbolTableEntry, FormatError> {
        let name_offset = c.length()?;
        let header_address = c.address("symbol table entry")?;
        let cache_type = c.u32()?;
        c.skip(4 + 16)?;
        Ok(SymbolTableEntry {
            name_offset,
            header_address,
            cache_type,
        })
    }
}

fn read_snod(ctx: &DecodeContext<'_>, address: u64) -> Result<Vec<SymbolTableEntry>, FormatError> {
    let head = ctx.block(address, 8)?;
    let mut c = head.cursor();
    c.signature(b"SNOD", "symbol table node")?;
    let version = c.u8()?;
    if version != 1 {
        return Err(FormatError::UnsupportedVersion {
            what: "symbol table node",
            version,
            offset: head.offset,
        });
    }
    c.skip(1)?;
    let count = c.u16()? as usize;
    let entry_len = SymbolTableEntry::encoded_len(ctx.sizes.os(), ctx.sizes.ls());
    let block = ctx.block(address + 8, count * entry_len)?;
    let mut c = block.cursor();
    (0..count).map(|_| SymbolTableEntry::parse(&mut c)).collect()
}

/// `(name, object header address)` of every member, in name order.
pub fn members(
    ctx: &DecodeContext<'_>,
    table: &SymbolTableMessage,
) -> Result<Vec<(String, u64)>, FormatError> {
    let heap = LocalHeap::read(ctx, table.local_heap_address).context(|| "group name heap")?;
    let mut out = Vec::new();
    for node in group_leaves(ctx, table.btree_address)? {
        for entry in read_snod(ctx, node)? {
            out.push((heap.string_at(entry.name_offset)?, entry.header_address));
        }
    }
    trace!("symbol table group: {} members", out.len());
    Ok(out)
}
