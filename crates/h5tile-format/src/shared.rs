//! Shared object header messages.
//!
//! A message with the shared flag carries a reference instead of its
//! payload. The reference names either another object header holding the
//! real message or an object in a shared-message heap located through the
//! superblock extension's Shared Message Table.

use log::{debug, trace};

use crate::checksum::verify_block;
use crate::context::DecodeContext;
use crate::error::{FormatError, ResultExt};
use crate::fractal_heap::FractalHeap;
use crate::message_type::MessageType;
use crate::object_header::{HeaderMessage, ObjectHeader};
use crate::source::Cursor;

/// Length of a shared-message heap id.
pub const HEAP_ID_LEN: usize = 8;

/// Where the real payload of a shared message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedRef {
    /// First message of the right type in this object header.
    ObjectHeader { address: u64 },
    /// Object in the shared-message heap for this message type.
    Heap { id: [u8; HEAP_ID_LEN] },
}

impl SharedRef {
    pub fn parse(c: &mut Cursor<'_>) -> Result<SharedRef, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        let ref_type = c.u8()?;
        match version {
            1 => {
                c.skip(6)?;
                Ok(SharedRef::ObjectHeader {
                    address: c.address("shared message")?,
                })
            }
            2 => Ok(SharedRef::ObjectHeader {
                address: c.address("shared message")?,
            }),
            3 if ref_type == 1 => {
                let mut id = [0u8; HEAP_ID_LEN];
                id.copy_from_slice(c.bytes(HEAP_ID_LEN)?);
                Ok(SharedRef::Heap { id })
            }
            3 => Ok(SharedRef::ObjectHeader {
                address: c.address("shared message")?,
            }),
            v => Err(FormatError::UnsupportedVersion {
                what: "shared message",
                version: v,
                offset: at,
            }),
        }
    }

    fn cache_key(&self, msg_type: MessageType) -> (u64, u16) {
        let key = match self {
            SharedRef::ObjectHeader { address } => *address,
            // Top bit tags heap ids so they never share a key with an address.
            SharedRef::Heap { id } => u64::from_le_bytes(*id) | (1 << 63),
        };
        (key, msg_type.to_u16())
    }
}

/// Resolves a [`SharedRef`] to the decoded message it stands for.
pub trait ResolveShared {
    fn resolve_shared(
        &self,
        shared: &SharedRef,
        msg_type: MessageType,
    ) -> Result<HeaderMessage, FormatError>;
}

/// Shared Message Table message (0x000F) found in the superblock extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMessageTableMessage {
    pub table_address: u64,
    pub num_indexes: u8,
}

impl SharedMessageTableMessage {
    pub fn parse(c: &mut Cursor<'_>) -> Result<SharedMessageTableMessage, FormatError> {
        let at = c.file_offset();
        let version = c.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "shared message table",
                version,
                offset: at,
            });
        }
        Ok(SharedMessageTableMessage {
            table_address: c.address("shared message table")?,
            num_indexes: c.u8()?,
        })
    }
}

/// One index of the `SMTB` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SohmIndex {
    /// 0 = list, 1 = B-tree.
    pub index_type: u8,
    /// Bit `1 << type` for every message type this index holds.
    pub message_types: u16,
    pub min_message_size: u32,
    pub list_cutoff: u16,
    pub btree_cutoff: u16,
    pub num_messages: u16,
    pub index_address: Option<u64>,
    pub heap_address: Option<u64>,
}

/// Decoded `SMTB` structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SohmTable {
    pub indexes: Vec<SohmIndex>,
}

impl SohmTable {
    pub fn read(
        ctx: &DecodeContext<'_>,
        msg: &SharedMessageTableMessage,
    ) -> Result<SohmTable, FormatError> {
        let os = ctx.sizes.os();
        let entry = 1 + 1 + 2 + 4 + 2 + 2 + 2 + 2 * os;
        let len = 4 + entry * msg.num_indexes as usize + 4;
        let block = ctx.block(msg.table_address, len)?;
        if ctx.verify_checksums() {
            verify_block(&block.data, "shared message table", block.offset)?;
        }
        let mut c = block.cursor();
        c.signature(b"SMTB", "shared message table")?;
        let mut indexes = Vec::with_capacity(msg.num_indexes as usize);
        for _ in 0..msg.num_indexes {
            let at = c.file_offset();
            let version = c.u8()?;
            if version != 0 {
                return Err(FormatError::UnsupportedVersion {
                    what: "shared message index",
                    version,
                    offset: at,
                });
            }
            indexes.push(SohmIndex {
                index_type: c.u8()?,
                message_types: c.u16()?,
                min_message_size: c.u32()?,
                list_cutoff: c.u16()?,
                btree_cutoff: c.u16()?,
                num_messages: c.u16()?,
                index_address: c.offset()?,
                heap_address: c.offset()?,
            });
        }
        Ok(SohmTable { indexes })
    }

    /// The index holding messages of `msg_type`.
    pub fn index_for(&self, msg_type: MessageType) -> Option<&SohmIndex> {
        let bit = msg_type.shared_flag();
        self.indexes
            .iter()
            .find(|idx| bit != 0 && idx.message_types & bit != 0)
    }
}

fn load_sohm_table<'c>(ctx: &DecodeContext<'c>) -> Result<&'c Option<SohmTable>, FormatError> {
    if let Some(table) = ctx.cache.sohm_table() {
        return Ok(table);
    }
    let table = match ctx.extension_address {
        Some(ext) => {
            let header = ObjectHeader::read(ctx, ext).context(|| "superblock extension")?;
            match header.messages.iter().find_map(|m| match m {
                HeaderMessage::SharedMessageTable(t) => Some(*t),
                _ => None,
            }) {
                Some(msg) => Some(SohmTable::read(ctx, &msg)?),
                None => None,
            }
        }
        None => None,
    };
    debug!(
        "shared message table: {} indexes",
        table.as_ref().map_or(0, |t| t.indexes.len())
    );
    Ok(ctx.cache.set_sohm_table(table))
}

impl ResolveShared for DecodeContext<'_> {
    fn resolve_shared(
        &self,
        shared: &SharedRef,
        msg_type: MessageType,
    ) -> Result<HeaderMessage, FormatError> {
        let key = shared.cache_key(msg_type);
        if let Some(msg) = self.cache.shared_message(key) {
            return Ok(msg);
        }
        trace!("resolving shared {msg_type:?} via {shared:?}");
        let msg = match shared {
            SharedRef::ObjectHeader { address } => {
                let header = ObjectHeader::read(self, *address)
                    .context(|| format!("shared message header at {address:#x}"))?;
                header
                    .messages
                    .into_iter()
                    .find(|m| m.message_type() == msg_type)
                    .ok_or(FormatError::InvalidValue {
                        what: "shared message type",
                        value: u64::from(msg_type.to_u16()),
                        offset: self.absolute(*address),
                    })?
            }
            SharedRef::Heap { id } => {
                let missing = || {
                    FormatError::Unsupported(format!(
                        "shared {msg_type:?} message without a shared message heap"
                    ))
                };
                let table = load_sohm_table(self)?.as_ref().ok_or_else(missing)?;
                let heap_address = table
                    .index_for(msg_type)
                    .and_then(|idx| idx.heap_address)
                    .ok_or_else(missing)?;
                let heap = FractalHeap::read(self, heap_address)?;
                let object = heap.get(self, id)?;
                let mut c = object.cursor();
                HeaderMessage::decode(msg_type, &mut c, self)?
            }
        };
        self.cache.insert_shared_message(key, msg.clone());
        Ok(msg)
    }
}
