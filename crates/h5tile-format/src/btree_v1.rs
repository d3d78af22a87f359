//! Version 1 B-trees (`TREE` nodes).
//!
//! Type 1 trees index raw data chunks by their origin coordinate and are
//! walked with [`ChunkBTree::first`] and [`ChunkIter`]. Type 0 trees index
//! the symbol table nodes of old-style groups.

use std::cmp::Ordering;

use log::trace;

use crate::context::DecodeContext;
use crate::error::FormatError;
use crate::tiling::Tiling;

/// Node type of group trees.
pub const NODE_TYPE_GROUP: u8 = 0;
/// Node type of chunk trees.
pub const NODE_TYPE_CHUNK: u8 = 1;

/// Deepest tree accepted; also bounds descent on corrupt level fields.
const MAX_LEVEL: u8 = 64;

/// One chunk as recorded in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Element coordinate of the chunk's first element.
    pub origin: Vec<u64>,
    pub address: u64,
    /// Bytes stored on disk, after filtering.
    pub stored_size: u32,
    /// Bit `i` set: filter `i` of the pipeline was not applied.
    pub filter_mask: u32,
}

/// Key of a chunk tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkKey {
    size: u32,
    filter_mask: u32,
    offsets: Vec<u64>,
}

/// A decoded chunk tree node: `children.len() + 1` keys, the last being the
/// closing bound.
#[derive(Debug, Clone)]
struct ChunkNode {
    address: u64,
    level: u8,
    keys: Vec<ChunkKey>,
    children: Vec<u64>,
}

impl ChunkNode {
    fn entries(&self) -> usize {
        self.children.len()
    }

    fn descriptor(&self, i: usize) -> ChunkDescriptor {
        ChunkDescriptor {
            origin: self.keys[i].offsets.clone(),
            address: self.children[i],
            stored_size: self.keys[i].size,
            filter_mask: self.keys[i].filter_mask,
        }
    }
}

struct NodeHeader {
    node_type: u8,
    level: u8,
    entries: usize,
}

fn read_node_header(
    ctx: &DecodeContext<'_>,
    address: u64,
) -> Result<NodeHeader, FormatError> {
    let block = ctx.block(address, 8)?;
    let mut c = block.cursor();
    c.signature(b"TREE", "B-tree node")?;
    Ok(NodeHeader {
        node_type: c.u8()?,
        level: c.u8()?,
        entries: c.u16()? as usize,
    })
}

fn check_node(
    header: &NodeHeader,
    node_type: u8,
    expected_level: Option<u8>,
    offset: u64,
) -> Result<(), FormatError> {
    if header.node_type != node_type {
        return Err(FormatError::InvalidValue {
            what: "B-tree node type",
            value: u64::from(header.node_type),
            offset: offset + 4,
        });
    }
    let bad_level = match expected_level {
        Some(expected) => header.level != expected,
        None => header.level > MAX_LEVEL,
    };
    if bad_level {
        return Err(FormatError::BTreeLevel {
            offset,
            level: header.level,
            expected: expected_level.unwrap_or(MAX_LEVEL),
        });
    }
    Ok(())
}

/// A chunk index rooted at a type 1 tree.
#[derive(Clone, Copy)]
pub struct ChunkBTree<'c, 'a> {
    ctx: &'c DecodeContext<'a>,
    root: u64,
    tiling: &'c Tiling,
}

impl<'c, 'a> ChunkBTree<'c, 'a> {
    pub fn new(ctx: &'c DecodeContext<'a>, root: u64, tiling: &'c Tiling) -> Self {
        ChunkBTree { ctx, root, tiling }
    }

    fn read_node(&self, address: u64, expected_level: Option<u8>) -> Result<ChunkNode, FormatError> {
        let offset = self.ctx.absolute(address);
        let header = read_node_header(self.ctx, address)?;
        check_node(&header, NODE_TYPE_CHUNK, expected_level, offset)?;

        let os = self.ctx.sizes.os();
        // Stored keys carry one extra offset for the element-size dimension.
        let dims = self.tiling.rank() + 1;
        let key_len = 8 + 8 * dims;
        let n = header.entries;
        let len = 8 + 2 * os + (n + 1) * key_len + n * os;
        let block = self.ctx.block(address, len)?;
        let mut c = block.cursor();
        c.skip(8 + 2 * os)?;

        let mut keys = Vec::with_capacity(n + 1);
        let mut children = Vec::with_capacity(n);
        for i in 0..=n {
            let size = c.u32()?;
            let filter_mask = c.u32()?;
            let mut offsets = (0..dims).map(|_| c.u64()).collect::<Result<Vec<_>, _>>()?;
            offsets.truncate(dims - 1);
            keys.push(ChunkKey {
                size,
                filter_mask,
                offsets,
            });
            if i < n {
                children.push(c.address("B-tree child")?);
            }
        }
        trace!(
            "chunk B-tree node at {offset:#x}: level {}, {n} entries",
            header.level
        );
        Ok(ChunkNode {
            address,
            level: header.level,
            keys,
            children,
        })
    }

    /// Position an iterator at the chunk containing `wanted`, or the first
    /// chunk after it in tile order.
    pub fn first(&self, wanted: &[u64]) -> Result<ChunkIter<'c, 'a>, FormatError> {
        let mut stack = Vec::new();
        let mut node = self.read_node(self.root, None)?;
        loop {
            let n = node.entries();
            if n == 0 {
                stack.push(Frame { node, cursor: 0 });
                break;
            }
            let mut cursor = 0;
            if node.level == 0 {
                while cursor + 1 < n
                    && self.tiling.compare(&node.keys[cursor + 1].offsets, wanted) != Ordering::Greater
                {
                    cursor += 1;
                }
                stack.push(Frame { node, cursor });
                break;
            }
            cursor = (0..n)
                .find(|&i| {
                    self.tiling.compare(&node.keys[i + 1].offsets, wanted) == Ordering::Greater
                })
                .unwrap_or(n - 1);
            let child = node.children[cursor];
            let level = node.level - 1;
            stack.push(Frame { node, cursor });
            node = self.read_node(child, Some(level))?;
        }
        Ok(ChunkIter { tree: *self, stack })
    }

    /// Iterate every chunk from the start.
    pub fn iter(&self) -> Result<ChunkIter<'c, 'a>, FormatError> {
        self.first(&vec![0; self.tiling.rank()])
    }
}

struct Frame {
    node: ChunkNode,
    cursor: usize,
}

/// Chunks in tile order from the position chosen by [`ChunkBTree::first`].
pub struct ChunkIter<'c, 'a> {
    tree: ChunkBTree<'c, 'a>,
    /// Root first. Every frame except the top points at the child being walked.
    stack: Vec<Frame>,
}

impl ChunkIter<'_, '_> {
    /// The next chunk, or `None` once the tree is exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<ChunkDescriptor>, FormatError> {
        while let Some(top) = self.stack.last_mut() {
            if top.cursor < top.node.entries() {
                if top.node.level == 0 {
                    let d = top.node.descriptor(top.cursor);
                    top.cursor += 1;
                    return Ok(Some(d));
                }
                // Fresh child: descend from its beginning.
                let child = top.node.children[top.cursor];
                let level = top.node.level - 1;
                let parent = top.node.address;
                let node = self.tree.read_node(child, Some(level)).map_err(|e| {
                    e.context(format!(
                        "child of B-tree node at {:#x}",
                        self.tree.ctx.absolute(parent)
                    ))
                })?;
                self.stack.push(Frame { node, cursor: 0 });
                continue;
            }
            self.stack.pop();
            if let Some(parent) = self.stack.last_mut() {
                parent.cursor += 1;
            }
        }
        Ok(None)
    }
}

impl Iterator for ChunkIter<'_, '_> {
    type Item = Result<ChunkDescriptor, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Addresses of every symbol table node under a type 0 tree, in key order.
pub fn group_leaves(ctx: &DecodeContext<'_>, root: u64) -> Result<Vec<u64>, FormatError> {
    let mut out = Vec::new();
    collect_group(ctx, root, None, &mut out)?;
    Ok(out)
}

fn collect_group(
    ctx: &DecodeContext<'_>,
    address: u64,
    expected_level: Option<u8>,
    out: &mut Vec<u64>,
) -> Result<(), FormatError> {
    let offset = ctx.absolute(address);
    let header = read_node_header(ctx, address)?;
    check_node(&header, NODE_TYPE_GROUP, expected_level, offset)?;
    let os = ctx.sizes.os();
    let ls = ctx.sizes.ls();
    let n = header.entries;
    let block = ctx.block(address, 8 + 2 * os + (n + 1) * ls + n * os)?;
    let mut c = block.cursor();
    c.skip(8 + 2 * os)?;
    let mut children = Vec::with_capacity(n);
    for _ in 0..n {
        c.length()?;
        children.push(c.address("B-tree child")?);
    }
    trace!(
        "group B-tree node at {offset:#x}: level {}, {n} entries",
        header.level
    );
    if header.level == 0 {
        out.extend(children);
        return Ok(());
    }
    for child in children {
        collect_group(ctx, child, Some(header.level - 1), out)?;
    }
    Ok(())
}
