//! Attribute Info message (0x0015) and dense attribute storage.

use log::debug;

use crate::attribute::Attribute;
use crate::btree_v2::{BTreeV2, TYPE_ATTRIBUTE_NAME};
use crate::context::DecodeContext;
use crate::error::{FormatError, ResultExt};
use crate::fractal_heap::FractalHeap;
use crate::source::Cursor;

const FLAG_TRACK_ORDER: u8 = 0x01;
const FLAG_INDEX_ORDER: u8 = 0x02;

/// Where an object's attributes live once there are too many for the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub max_creation_index: Option<u16>,
    pub heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl AttributeInfo {
    pub fn parse(c: &mut Cursor<'_>) -> Result<AttributeInfo, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "attribute info",
                version,
                offset: at,
            });
        }
        let flags = c.u8()?;
        let max_creation_index = if flags & FLAG_TRACK_ORDER != 0 {
            Some(c.u16()?)
        } else {
            None
        };
        let heap_address = c.offset()?;
        let name_index_address = c.offset()?;
        let creation_order_index_address = if flags & FLAG_INDEX_ORDER != 0 {
            c.offset()?
        } else {
            None
        };
        Ok(AttributeInfo {
            max_creation_index,
            heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    pub fn is_dense(&self) -> bool {
        self.heap_address.is_some() && self.name_index_address.is_some()
    }

    /// Attributes kept in the fractal heap, in creation order when it is
    /// tracked and by name otherwise.
    pub fn dense_attributes(&self, ctx: &DecodeContext<'_>) -> Result<Vec<Attribute>, FormatError> {
        let (Some(heap_address), Some(index_address)) = (self.heap_address, self.name_index_address)
        else {
            return Ok(Vec::new());
        };
        let heap = FractalHeap::read(ctx, heap_address).context(|| "dense attribute heap")?;
        let tree = BTreeV2::read(ctx, index_address).context(|| "dense attribute index")?;
        if tree.tree_type != TYPE_ATTRIBUTE_NAME {
            return Err(FormatError::InvalidValue {
                what: "attribute index type",
                value: u64::from(tree.tree_type),
                offset: ctx.absolute(index_address),
            });
        }
        let mut out = Vec::new();
        for record in tree.records(ctx)? {
            // Heap id, message flags (1), creation order (4), name hash (4).
            let id_len = record.len().saturating_sub(9);
            let mut c = Cursor::new(&record, 0, ctx.sizes);
            let id = c.bytes(id_len)?;
            c.skip(1)?;
            let order = c.u32()?;
            let object = heap.get(ctx, id)?;
            let attr = Attribute::parse(&mut object.cursor(), ctx)
                .context(|| format!("dense attribute at {:#x}", object.offset))?;
            out.push((order, attr));
        }
        if self.max_creation_index.is_some() {
            out.sort_by_key(|(order, _)| *order);
        } else {
            out.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        }
        debug!("{} dense attributes", out.len());
        Ok(out.into_iter().map(|(_, a)| a).collect())
    }
}
