//! Version 2 B-trees (`BTHD` / `BTIN` / `BTLF`).
//!
//! Only full traversal is needed: dense link and attribute storage list
//! every record and then look objects up in the companion fractal heap.

use log::trace;

use crate::checksum::verify_block;
use crate::context::DecodeContext;
use crate::error::FormatError;

/// Signature, version, type and checksum bytes of every node.
const NODE_PREFIX: usize = 10;

/// Record type: link name index.
pub const TYPE_LINK_NAME: u8 = 5;
/// Record type: link creation-order index.
pub const TYPE_LINK_ORDER: u8 = 6;
/// Record type: attribute name index.
pub const TYPE_ATTRIBUTE_NAME: u8 = 8;
/// Record type: attribute creation-order index.
pub const TYPE_ATTRIBUTE_ORDER: u8 = 9;

/// Parsed `BTHD` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2 {
    pub tree_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    pub depth: u16,
    pub root_address: Option<u64>,
    pub root_records: u16,
    pub total_records: u64,
}

/// Per-depth limits derived from the node size.
#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    max_records: u64,
    cumulative_max: u64,
    cumulative_width: usize,
}

/// Bytes needed to store values up to `v`.
fn limit_width(v: u64) -> usize {
    (63 - v.max(1).leading_zeros()) as usize / 8 + 1
}

impl BTreeV2 {
    pub fn read(ctx: &DecodeContext<'_>, address: u64) -> Result<BTreeV2, FormatError> {
        let len = 4 + 1 + 1 + 4 + 2 + 2 + 1 + 1 + ctx.sizes.os() + 2 + ctx.sizes.ls() + 4;
        let block = ctx.block(address, len)?;
        if ctx.verify_checksums() {
            verify_block(&block.data, "B-tree v2 header", block.offset)?;
        }
        let mut c = block.cursor();
        c.signature(b"BTHD", "B-tree v2 header")?;
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "B-tree v2 header",
                version,
                offset: block.offset,
            });
        }
        let tree_type = c.u8()?;
        let node_size = c.u32()?;
        let record_size = c.u16()?;
        let depth = c.u16()?;
        c.skip(2)?; // split and merge percentages
        let root_address = c.offset()?;
        let root_records = c.u16()?;
        let total_records = c.length()?;
        if record_size == 0 || (node_size as usize) <= NODE_PREFIX {
            return Err(FormatError::InvalidValue {
                what: "B-tree v2 node size",
                value: u64::from(node_size),
                offset: block.offset,
            });
        }
        Ok(BTreeV2 {
            tree_type,
            node_size,
            record_size,
            depth,
            root_address,
            root_records,
            total_records,
        })
    }

    fn node_info(&self, os: usize) -> Vec<NodeInfo> {
        let payload = (self.node_size as usize).saturating_sub(NODE_PREFIX) as u64;
        let rs = u64::from(self.record_size);
        let leaf_max = payload / rs;
        let mut info = vec![NodeInfo {
            max_records: leaf_max,
            cumulative_max: leaf_max,
            cumulative_width: limit_width(leaf_max),
        }];
        let nrec_width = limit_width(leaf_max);
        for d in 1..=self.depth as usize {
            let prev = info[d - 1];
            let pointer = os + nrec_width + if d > 1 { prev.cumulative_width } else { 0 };
            let max_records = payload.saturating_sub(pointer as u64) / (rs + pointer as u64);
            let cumulative_max = max_records
                .saturating_add(1)
                .saturating_mul(prev.cumulative_max)
                .saturating_add(max_records);
            info.push(NodeInfo {
                max_records,
                cumulative_max,
                cumulative_width: limit_width(cumulative_max),
            });
        }
        info
    }

    /// Every record in key order.
    pub fn records(&self, ctx: &DecodeContext<'_>) -> Result<Vec<Vec<u8>>, FormatError> {
        let mut out = Vec::with_capacity(self.total_records.min(1 << 16) as usize);
        let Some(root) = self.root_address else {
            return Ok(out);
        };
        if self.root_records == 0 {
            return Ok(out);
        }
        let info = self.node_info(ctx.sizes.os());
        self.collect(ctx, &info, root, self.depth, self.root_records, &mut out)?;
        Ok(out)
    }

    fn collect(
        &self,
        ctx: &DecodeContext<'_>,
        info: &[NodeInfo],
        address: u64,
        depth: u16,
        nrec: u16,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<(), FormatError> {
        let os = ctx.sizes.os();
        let rs = self.record_size as usize;
        let nrec = nrec as usize;
        let (signature, what, pointer) = if depth == 0 {
            (b"BTLF", "B-tree v2 leaf", 0)
        } else {
            let nrec_width = limit_width(info[0].max_records);
            let total_width = if depth > 1 {
                info[depth as usize - 1].cumulative_width
            } else {
                0
            };
            (b"BTIN", "B-tree v2 internal node", os + nrec_width + total_width)
        };
        let children = if depth == 0 { 0 } else { nrec + 1 };
        let len = 6 + nrec * rs + children * pointer + 4;
        let block = ctx.block(address, len)?;
        trace!("{what} at {:#x}: {nrec} records", block.offset);
        if ctx.verify_checksums() {
            verify_block(&block.data, what, block.offset)?;
        }
        let mut c = block.cursor();
        c.signature(signature, what)?;
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what,
                version,
                offset: block.offset,
            });
        }
        let tree_type = c.u8()?;
        if tree_type != self.tree_type {
            return Err(FormatError::InvalidValue {
                what: "B-tree v2 node type",
                value: u64::from(tree_type),
                offset: block.offset + 5,
            });
        }
        let records = (0..nrec)
            .map(|_| c.bytes(rs).map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;
        if depth == 0 {
            out.extend(records);
            return Ok(());
        }

        let nrec_width = limit_width(info[0].max_records);
        let total_width = pointer - os - nrec_width;
        let mut pointers = Vec::with_capacity(children);
        for _ in 0..children {
            let child = c.address("B-tree v2 child")?;
            let child_nrec = c.uint(nrec_width)?;
            c.uint(total_width)?;
            pointers.push((child, child_nrec as u16));
        }
        for (i, (child, child_nrec)) in pointers.into_iter().enumerate() {
            self.collect(ctx, info, child, depth - 1, child_nrec, out)?;
            if let Some(r) = records.get(i) {
                out.push(r.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::lookup3;
    use crate::codec::CodecRegistry;
    use crate::context::MetadataCache;
    use crate::fractal_heap::tests::superblock;
    use crate::props::FileAccessProps;
    use crate::warnings::LogWarnings;

    pub(crate) fn header(tree_type: u8, record_size: u16, depth: u16, root: u64, root_records: u16, total: u64) -> Vec<u8> {
        let mut b = b"BTHD".to_vec();
        b.push(0);
        b.push(tree_type);
        b.extend_from_slice(&512u32.to_le_bytes());
        b.extend_from_slice(&record_size.to_le_bytes());
        b.extend_from_slice(&depth.to_le_bytes());
        b.extend_from_slice(&[100, 40]);
        b.extend_from_slice(&root.to_le_bytes());
        b.extend_from_slice(&root_records.to_le_bytes());
        b.extend_from_slice(&total.to_le_bytes());
        let sum = lookup3(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    pub(crate) fn leaf(tree_type: u8, records: &[Vec<u8>]) -> Vec<u8> {
        let mut b = b"BTLF".to_vec();
        b.push(0);
        b.push(tree_type);
        for r in records {
            b.extend_from_slice(r);
        }
        let sum = lookup3(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    fn with_ctx<R>(file: Vec<u8>, f: impl FnOnce(&DecodeContext<'_>) -> R) -> R {
        let sb = superblock();
        let props = FileAccessProps::default().verify_checksums(true);
        let codecs = CodecRegistry::empty();
        let cache = MetadataCache::new();
        let ctx = DecodeContext::new(&file, &sb, &props, &LogWarnings, &codecs, &cache);
        f(&ctx)
    }

    fn rec(i: u8) -> Vec<u8> {
        vec![i; 4]
    }

    #[test]
    fn leaf_root() {
        let mut file = header(5, 4, 0, 0x100, 3, 3);
        file.resize(0x100, 0);
        file.extend_from_slice(&leaf(5, &[rec(1), rec(2), rec(3)]));
        let records = with_ctx(file, |ctx| {
            BTreeV2::read(ctx, 0).unwrap().records(ctx).unwrap()
        });
        assert_eq!(records, vec![rec(1), rec(2), rec(3)]);
    }

    #[test]
    fn internal_root_interleaves_children() {
        // node 512, record 4: leaf max = 125 -> 1-byte counts.
        let mut file = header(5, 4, 1, 0x100, 1, 3);
        file.resize(0x100, 0);
        let mut node = b"BTIN".to_vec();
        node.push(0);
        node.push(5);
        node.extend_from_slice(&rec(2));
        node.extend_from_slice(&0x200u64.to_le_bytes());
        node.push(1);
        node.extend_from_slice(&0x300u64.to_le_bytes());
        node.push(1);
        let sum = lookup3(&node);
        node.extend_from_slice(&sum.to_le_bytes());
        file.extend_from_slice(&node);
        file.resize(0x200, 0);
        file.extend_from_slice(&leaf(5, &[rec(1)]));
        file.resize(0x300, 0);
        file.extend_from_slice(&leaf(5, &[rec(3)]));
        let records = with_ctx(file, |ctx| {
            BTreeV2::read(ctx, 0).unwrap().records(ctx).unwrap()
        });
        assert_eq!(records, vec![rec(1), rec(2), rec(3)]);
    }

    #[test]
    fn empty_tree() {
        let file = header(8, 17, 0, u64::MAX, 0, 0);
        let records = with_ctx(file, |ctx| {
            BTreeV2::read(ctx, 0).unwrap().records(ctx).unwrap()
        });
        assert!(records.is_empty());
    }

    #[test]
    fn wrong_node_type() {
        let mut file = header(5, 4, 0, 0x100, 1, 1);
        file.resize(0x100, 0);
        file.extend_from_slice(&leaf(8, &[rec(1)]));
        let err = with_ctx(file, |ctx| BTreeV2::read(ctx, 0).unwrap().records(ctx).unwrap_err());
        assert!(matches!(
            err,
            FormatError::InvalidValue {
                what: "B-tree v2 node type",
                ..
            }
        ));
    }
}
