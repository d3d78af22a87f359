//! Object header parsing (versions 1 and 2) and the decoded message set.
//!
//! Messages are decoded as they are read. Continuation messages are
//! followed in place, so a header split across several blocks yields the
//! same list as one stored inline. Shared messages are replaced by the
//! payload they point at.

use std::collections::HashSet;

use log::{debug, trace};

use crate::attribute::Attribute;
use crate::attribute_info::AttributeInfo;
use crate::checksum::verify_block;
use crate::context::DecodeContext;
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FormatError, ResultExt};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::link::{GroupInfo, Link, LinkInfo};
use crate::message_type::MessageType;
use crate::shared::{ResolveShared, SharedMessageTableMessage, SharedRef};
use crate::source::Cursor;
use crate::symbol_table::SymbolTableMessage;
use crate::warnings::Warning;

const OHDR: &[u8; 4] = b"OHDR";
const OCHK: &[u8; 4] = b"OCHK";

/// Message flag: payload is a shared-message reference.
const MSG_FLAG_SHARED: u8 = 0x02;
/// Message flag: fail to open the object if the type is not understood.
const MSG_FLAG_FAIL_IF_UNKNOWN: u8 = 0x80;

/// v2 header flags.
const HDR_CHUNK0_SIZE_MASK: u8 = 0x03;
const HDR_TRACK_ORDER: u8 = 0x04;
const HDR_STORE_PHASE_CHANGE: u8 = 0x10;
const HDR_STORE_TIMES: u8 = 0x20;

/// v1 prefix: version, reserved, count, refcount, size, alignment padding.
const V1_PREFIX: usize = 16;
/// Longest possible v2 prefix.
const V2_MAX_PREFIX: usize = 4 + 1 + 1 + 16 + 4 + 8;

/// One decoded header message.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderMessage {
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValueOld(FillValue),
    FillValue(FillValue),
    Link(Link),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(FilterPipeline),
    Attribute(Attribute),
    Comment(String),
    /// `YYYYMMDDhhmmss` as stored.
    ModificationTimeOld(String),
    /// Seconds since the epoch.
    ModificationTime(u32),
    SharedMessageTable(SharedMessageTableMessage),
    SymbolTable(SymbolTableMessage),
    AttributeInfo(AttributeInfo),
    ReferenceCount(u32),
    /// Known type this reader does not interpret.
    Raw { msg_type: MessageType, data: Vec<u8> },
    /// Type id this reader does not know.
    Unknown { msg_type: u16, data: Vec<u8> },
}

impl HeaderMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            HeaderMessage::Dataspace(_) => MessageType::Dataspace,
            HeaderMessage::LinkInfo(_) => MessageType::LinkInfo,
            HeaderMessage::Datatype(_) => MessageType::Datatype,
            HeaderMessage::FillValueOld(_) => MessageType::FillValueOld,
            HeaderMessage::FillValue(_) => MessageType::FillValue,
            HeaderMessage::Link(_) => MessageType::Link,
            HeaderMessage::DataLayout(_) => MessageType::DataLayout,
            HeaderMessage::GroupInfo(_) => MessageType::GroupInfo,
            HeaderMessage::FilterPipeline(_) => MessageType::FilterPipeline,
            HeaderMessage::Attribute(_) => MessageType::Attribute,
            HeaderMessage::Comment(_) => MessageType::Comment,
            HeaderMessage::ModificationTimeOld(_) => MessageType::ModificationTimeOld,
            HeaderMessage::ModificationTime(_) => MessageType::ModificationTime,
            HeaderMessage::SharedMessageTable(_) => MessageType::SharedMessageTable,
            HeaderMessage::SymbolTable(_) => MessageType::SymbolTable,
            HeaderMessage::AttributeInfo(_) => MessageType::AttributeInfo,
            HeaderMessage::ReferenceCount(_) => MessageType::ReferenceCount,
            HeaderMessage::Raw { msg_type, .. } => *msg_type,
            HeaderMessage::Unknown { msg_type, .. } => MessageType::Unknown(*msg_type),
        }
    }

    /// Decode a message payload of a given type.
    ///
    /// `resolver` is used by messages that embed shared components
    /// (attributes with shared datatypes or dataspaces).
    pub fn decode(
        msg_type: MessageType,
        c: &mut Cursor<'_>,
        resolver: &dyn ResolveShared,
    ) -> Result<HeaderMessage, FormatError> {
        Ok(match msg_type {
            MessageType::Dataspace => HeaderMessage::Dataspace(Dataspace::parse(c)?),
            MessageType::LinkInfo => HeaderMessage::LinkInfo(LinkInfo::parse(c)?),
            MessageType::Datatype => HeaderMessage::Datatype(Datatype::parse(c)?),
            MessageType::FillValueOld => HeaderMessage::FillValueOld(FillValue::parse_old(c)?),
            MessageType::FillValue => HeaderMessage::FillValue(FillValue::parse(c)?),
            MessageType::Link => HeaderMessage::Link(Link::parse(c)?),
            MessageType::DataLayout => HeaderMessage::DataLayout(DataLayout::parse(c)?),
            MessageType::GroupInfo => HeaderMessage::GroupInfo(GroupInfo::parse(c)?),
            MessageType::FilterPipeline => {
                HeaderMessage::FilterPipeline(FilterPipeline::parse(c)?)
            }
            MessageType::Attribute => HeaderMessage::Attribute(Attribute::parse(c, resolver)?),
            MessageType::Comment => HeaderMessage::Comment(c.cstring()?),
            MessageType::ModificationTimeOld => {
                HeaderMessage::ModificationTimeOld(c.fixed_string(14)?)
            }
            MessageType::ModificationTime => {
                let at = c.file_offset();
                let version = c.u8()?;
                if version != 1 {
                    return Err(FormatError::UnsupportedVersion {
                        what: "modification time",
                        version,
                        offset: at,
                    });
                }
                c.skip(3)?;
                HeaderMessage::ModificationTime(c.u32()?)
            }
            MessageType::SharedMessageTable => {
                HeaderMessage::SharedMessageTable(SharedMessageTableMessage::parse(c)?)
            }
            MessageType::SymbolTable => {
                HeaderMessage::SymbolTable(SymbolTableMessage::parse(c)?)
            }
            MessageType::AttributeInfo => {
                HeaderMessage::AttributeInfo(AttributeInfo::parse(c)?)
            }
            MessageType::ReferenceCount => {
                let at = c.file_offset();
                let version = c.u8()?;
                if version != 0 {
                    return Err(FormatError::UnsupportedVersion {
                        what: "reference count",
                        version,
                        offset: at,
                    });
                }
                HeaderMessage::ReferenceCount(c.u32()?)
            }
            MessageType::Unknown(id) => HeaderMessage::Unknown {
                msg_type: id,
                data: c.bytes(c.remaining())?.to_vec(),
            },
            other => HeaderMessage::Raw {
                msg_type: other,
                data: c.bytes(c.remaining())?.to_vec(),
            },
        })
    }
}

/// A decoded object header: every message from the header and its
/// continuation blocks, in storage order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    /// Address the header was read from.
    pub address: u64,
    /// Header layout version (1 or 2).
    pub version: u8,
    pub messages: Vec<HeaderMessage>,
}

/// Per-header walk state shared by the inline block and its continuations.
struct Walk<'c, 'a> {
    ctx: &'c DecodeContext<'a>,
    version: u8,
    track_order: bool,
    /// Messages still allowed (v1 declares a total count).
    budget: Option<usize>,
    visited: HashSet<u64>,
    messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Read and decode the object header at `address`.
    pub fn read(ctx: &DecodeContext<'_>, address: u64) -> Result<ObjectHeader, FormatError> {
        let prefix = ctx.block_up_to(address, V2_MAX_PREFIX)?;
        let header = if prefix.data.starts_with(OHDR) {
            Self::read_v2(ctx, address, &prefix.data)
        } else {
            Self::read_v1(ctx, address, &prefix.data)
        }
        .context(|| format!("object header at {:#x}", ctx.absolute(address)))?;
        debug!(
            "object header v{} at {address:#x}: {} messages",
            header.version,
            header.messages.len()
        );
        Ok(header)
    }

    fn read_v1(
        ctx: &DecodeContext<'_>,
        address: u64,
        prefix: &[u8],
    ) -> Result<ObjectHeader, FormatError> {
        let mut c = Cursor::new(prefix, ctx.absolute(address), ctx.sizes);
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "object header",
                version,
                offset: ctx.absolute(address),
            });
        }
        c.skip(1)?;
        let count = c.u16()? as usize;
        let _refcount = c.u32()?;
        let size = c.u32()? as usize;

        let mut walk = Walk {
            ctx,
            version: 1,
            track_order: false,
            budget: Some(count),
            visited: HashSet::from([address]),
            messages: Vec::with_capacity(count),
        };
        let block = ctx.block(address + V1_PREFIX as u64, size)?;
        walk.messages_in(block.cursor(), 0)?;
        Ok(ObjectHeader {
            address,
            version: 1,
            messages: walk.messages,
        })
    }

    fn read_v2(
        ctx: &DecodeContext<'_>,
        address: u64,
        prefix: &[u8],
    ) -> Result<ObjectHeader, FormatError> {
        let mut c = Cursor::new(prefix, ctx.absolute(address), ctx.sizes);
        c.signature(OHDR, "object header")?;
        let version = c.u8()?;
        if version != 2 {
            return Err(FormatError::UnsupportedVersion {
                what: "object header",
                version,
                offset: ctx.absolute(address),
            });
        }
        let flags = c.u8()?;
        if flags & HDR_STORE_TIMES != 0 {
            c.skip(16)?;
        }
        if flags & HDR_STORE_PHASE_CHANGE != 0 {
            c.skip(4)?;
        }
        let size = c.uint(1 << (flags & HDR_CHUNK0_SIZE_MASK))? as usize;
        let prefix_len = c.position();

        let block = ctx.block(address, prefix_len + size + 4)?;
        if ctx.verify_checksums() {
            verify_block(&block.data, "object header", block.offset)?;
        }
        let mut walk = Walk {
            ctx,
            version: 2,
            track_order: flags & HDR_TRACK_ORDER != 0,
            budget: None,
            visited: HashSet::from([address]),
            messages: Vec::new(),
        };
        let mut c = block.cursor();
        c.skip(prefix_len)?;
        walk.messages_in(c.sub(size)?, 0)?;
        Ok(ObjectHeader {
            address,
            version: 2,
            messages: walk.messages,
        })
    }

    /// First message of a given type.
    pub fn find(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.message_type() == msg_type)
    }

    pub fn dataspace(&self) -> Option<&Dataspace> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::Dataspace(d) => Some(d),
            _ => None,
        })
    }

    pub fn datatype(&self) -> Option<&Datatype> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::Datatype(d) => Some(d),
            _ => None,
        })
    }

    pub fn layout(&self) -> Option<&DataLayout> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::DataLayout(l) => Some(l),
            _ => None,
        })
    }

    pub fn filter_pipeline(&self) -> Option<&FilterPipeline> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::FilterPipeline(p) => Some(p),
            _ => None,
        })
    }

    /// The fill value, preferring the current message over the old form.
    pub fn fill_value(&self) -> Option<&FillValue> {
        let new = self.messages.iter().find_map(|m| match m {
            HeaderMessage::FillValue(f) => Some(f),
            _ => None,
        });
        new.or_else(|| {
            self.messages.iter().find_map(|m| match m {
                HeaderMessage::FillValueOld(f) => Some(f),
                _ => None,
            })
        })
    }

    /// Attribute messages stored in the header itself.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.messages.iter().filter_map(|m| match m {
            HeaderMessage::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn attribute_info(&self) -> Option<&AttributeInfo> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::AttributeInfo(a) => Some(a),
            _ => None,
        })
    }

    /// Link messages stored in the header itself.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.messages.iter().filter_map(|m| match m {
            HeaderMessage::Link(l) => Some(l),
            _ => None,
        })
    }

    pub fn link_info(&self) -> Option<&LinkInfo> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::LinkInfo(l) => Some(l),
            _ => None,
        })
    }

    pub fn symbol_table(&self) -> Option<&SymbolTableMessage> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::SymbolTable(s) => Some(s),
            _ => None,
        })
    }

    pub fn comment(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            HeaderMessage::Comment(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Whether this header describes a group rather than a variable.
    pub fn is_group(&self) -> bool {
        self.symbol_table().is_some()
            || self.link_info().is_some()
            || (self.layout().is_none() && self.links().next().is_some())
    }
}

impl Walk<'_, '_> {
    fn message_header_len(&self) -> usize {
        match self.version {
            1 => 8,
            _ => 4 + if self.track_order { 2 } else { 0 },
        }
    }

    /// Decode every message in `c`, following continuations as met.
    fn messages_in(&mut self, mut c: Cursor<'_>, depth: u32) -> Result<(), FormatError> {
        let hdr_len = self.message_header_len();
        while c.remaining() >= hdr_len {
            if self.budget == Some(0) {
                break;
            }
            let start = c.position();
            let at = c.file_offset();
            let (type_id, size, flags) = if self.version == 1 {
                let t = c.u16()?;
                let s = c.u16()? as usize;
                let f = c.u8()?;
                c.skip(3)?;
                (t, s, f)
            } else {
                let t = u16::from(c.u8()?);
                let s = c.u16()? as usize;
                let f = c.u8()?;
                if self.track_order {
                    c.skip(2)?;
                }
                (t, s, f)
            };
            if let Some(n) = self.budget.as_mut() {
                *n -= 1;
            }
            let mut body = c.sub(size)?;
            let msg_type = MessageType::from_u16(type_id);
            trace!("message {msg_type:?} ({size} bytes, flags {flags:#04x}) at {at:#x}");

            match msg_type {
                MessageType::Nil => {}
                MessageType::Continuation => {
                    let address = body.address("continuation block")?;
                    let length = body.length()? as usize;
                    self.follow(address, length, depth + 1)?;
                }
                MessageType::Unknown(id) => {
                    if flags & MSG_FLAG_FAIL_IF_UNKNOWN != 0 {
                        return Err(FormatError::UnsupportedMessage {
                            msg_type: id,
                            offset: at,
                        });
                    }
                    self.ctx.warnings.warn(Warning::UnknownMessage {
                        msg_type: id,
                        offset: at,
                    });
                    self.messages.push(HeaderMessage::Unknown {
                        msg_type: id,
                        data: body.data().to_vec(),
                    });
                }
                _ if flags & MSG_FLAG_SHARED != 0 => {
                    let shared = SharedRef::parse(&mut body)?;
                    let msg = self
                        .ctx
                        .resolve_shared(&shared, msg_type)
                        .context(|| format!("shared {msg_type:?} message at {at:#x}"))?;
                    self.messages.push(msg);
                }
                _ => {
                    let msg = HeaderMessage::decode(msg_type, &mut body, self.ctx)
                        .context(|| format!("{msg_type:?} message at {at:#x}"))?;
                    self.messages.push(msg);
                }
            }
            c.seek(start + hdr_len + size)?;
        }
        Ok(())
    }

    fn follow(&mut self, address: u64, length: usize, depth: u32) -> Result<(), FormatError> {
        let offset = self.ctx.absolute(address);
        let limit = self.ctx.props.max_continuation_depth;
        if depth > limit || !self.visited.insert(address) {
            return Err(FormatError::ContinuationLoop { offset, limit });
        }
        trace!("continuation block at {offset:#x} ({length} bytes)");
        let block = self.ctx.block(address, length)?;
        if self.version == 1 {
            return self.messages_in(block.cursor(), depth);
        }
        if self.ctx.verify_checksums() {
            verify_block(&block.data, "continuation block", block.offset)?;
        }
        let mut c = block.cursor();
        c.signature(OCHK, "continuation block")?;
        let body = c.sub(length.saturating_sub(8))?;
        self.messages_in(body, depth)
    }
}
