//! Group membership across the three storage styles: symbol tables,
//! compact link messages and dense link storage.

use log::debug;

use crate::btree_v2::{BTreeV2, TYPE_LINK_NAME};
use crate::context::DecodeContext;
use crate::datatype::CharacterSet;
use crate::error::{FormatError, ResultExt};
use crate::fractal_heap::FractalHeap;
use crate::link::{Link, LinkInfo, LinkTarget};
use crate::object_header::ObjectHeader;
use crate::symbol_table;

/// Every link of the group described by `header`.
///
/// Symbol table members come back as hard links in name order; compact
/// links in storage order; dense links in creation order when tracked,
/// by name otherwise.
pub fn links(ctx: &DecodeContext<'_>, header: &ObjectHeader) -> Result<Vec<Link>, FormatError> {
    if let Some(table) = header.symbol_table() {
        return Ok(symbol_table::members(ctx, table)?
            .into_iter()
            .map(|(name, address)| Link {
                name,
                target: LinkTarget::Hard { address },
                creation_order: None,
                charset: CharacterSet::Ascii,
            })
            .collect());
    }
    let mut links: Vec<Link> = header.links().cloned().collect();
    if let Some(info) = header.link_info().filter(|i| i.is_dense()) {
        links.extend(dense_links(ctx, info).context(|| {
            format!("dense links of group at {:#x}", ctx.absolute(header.address))
        })?);
    }
    Ok(links)
}

fn dense_links(ctx: &DecodeContext<'_>, info: &LinkInfo) -> Result<Vec<Link>, FormatError> {
    let (Some(heap_address), Some(index_address)) = (info.heap_address, info.name_index_address)
    else {
        return Ok(Vec::new());
    };
    let heap = FractalHeap::read(ctx, heap_address)?;
    let tree = BTreeV2::read(ctx, index_address)?;
    if tree.tree_type != TYPE_LINK_NAME {
        return Err(FormatError::InvalidValue {
            what: "link index type",
            value: u64::from(tree.tree_type),
            offset: ctx.absolute(index_address),
        });
    }
    let mut links = Vec::new();
    for record in tree.records(ctx)? {
        // Name hash (4) then heap id.
        let id = record.get(4..).unwrap_or_default();
        let object = heap.get(ctx, id)?;
        links.push(Link::parse(&mut object.cursor())?);
    }
    if info.max_creation_order.is_some() && links.iter().all(|l| l.creation_order.is_some()) {
        links.sort_by_key(|l| l.creation_order);
    } else {
        links.sort_by(|a, b| a.name.cmp(&b.name));
    }
    debug!("{} dense links", links.len());
    Ok(links)
}
