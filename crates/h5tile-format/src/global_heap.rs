//! Global heap collections (`GCOL`) and the variable-length slots that
//! point into them.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use crate::context::DecodeContext;
use crate::error::FormatError;
use crate::source::Cursor;

/// A heap object reference as stored in a variable-length element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHeapId {
    /// Collection address; `None` for the undefined address.
    pub collection: Option<u64>,
    pub index: u32,
}

/// A variable-length element slot: count, then heap id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlenSlot {
    /// Elements (or bytes, for strings) in the sequence.
    pub length: u32,
    pub id: GlobalHeapId,
}

impl VlenSlot {
    /// Bytes one slot occupies for the file's offset width.
    pub fn encoded_len(os: usize) -> usize {
        4 + os + 4
    }

    pub fn parse(c: &mut Cursor<'_>) -> Result<VlenSlot, FormatError> {
        let length = c.u32()?;
        let collection = c.offset()?;
        let index = c.u32()?;
        Ok(VlenSlot {
            length,
            id: GlobalHeapId { collection, index },
        })
    }

    /// Object references in attributes and data: heap id without a count.
    pub fn parse_id(c: &mut Cursor<'_>) -> Result<GlobalHeapId, FormatError> {
        Ok(GlobalHeapId {
            collection: c.offset()?,
            index: c.u32()?,
        })
    }
}

/// A decoded collection: object index to payload.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeapCollection {
    pub address: u64,
    objects: HashMap<u16, Vec<u8>>,
}

impl GlobalHeapCollection {
    pub fn read(ctx: &DecodeContext<'_>, address: u64) -> Result<GlobalHeapCollection, FormatError> {
        let ls = ctx.sizes.ls();
        let head = ctx.block(address, 8 + ls)?;
        let mut c = head.cursor();
        c.signature(b"GCOL", "global heap collection")?;
        let version = c.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "global heap collection",
                version,
                offset: head.offset,
            });
        }
        c.skip(3)?;
        let size = c.length()?;
        let size = usize::try_from(size)
            .ok()
            .filter(|s| *s >= 8 + ls)
            .ok_or(FormatError::InvalidValue {
                what: "global heap collection size",
                value: size,
                offset: head.offset + 8,
            })?;
        // The last collection in a file may be shorter than declared.
        let block = ctx.block_up_to(address, size)?;
        let mut c = block.cursor();
        c.skip(8 + ls)?;

        let mut objects = HashMap::new();
        while c.remaining() >= 8 + ls {
            let index = c.u16()?;
            if index == 0 {
                break;
            }
            c.skip(2 + 4)?;
            let len = c.length()? as usize;
            let data = c.bytes(len)?.to_vec();
            let pad = len.div_ceil(8) * 8 - len;
            c.skip(pad.min(c.remaining()))?;
            objects.insert(index, data);
        }
        trace!(
            "global heap collection at {:#x}: {} objects",
            block.offset,
            objects.len()
        );
        Ok(GlobalHeapCollection { address, objects })
    }

    pub fn object(&self, index: u32) -> Result<&[u8], FormatError> {
        u16::try_from(index)
            .ok()
            .and_then(|i| self.objects.get(&i))
            .map(Vec::as_slice)
            .ok_or(FormatError::HeapObjectNotFound {
                collection: self.address,
                index,
            })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Collections read during one materialisation, each read at most once.
#[derive(Default)]
pub struct GlobalHeapReader {
    collections: HashMap<u64, Arc<GlobalHeapCollection>>,
}

impl GlobalHeapReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload of a heap object. An undefined collection reads as empty.
    pub fn get(&mut self, ctx: &DecodeContext<'_>, id: &GlobalHeapId) -> Result<Vec<u8>, FormatError> {
        let Some(address) = id.collection else {
            return Ok(Vec::new());
        };
        let collection = match self.collections.get(&address) {
            Some(c) => Arc::clone(c),
            None => {
                let c = Arc::new(GlobalHeapCollection::read(ctx, address)?);
                self.collections.insert(address, Arc::clone(&c));
                c
            }
        };
        collection.object(id.index).map(<[u8]>::to_vec)
    }

    /// Payload of a variable-length slot; zero-length slots never touch
    /// the heap.
    pub fn slot(&mut self, ctx: &DecodeContext<'_>, slot: &VlenSlot) -> Result<Vec<u8>, FormatError> {
        if slot.length == 0 {
            return Ok(Vec::new());
        }
        self.get(ctx, &slot.id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::CodecRegistry;
    use crate::context::MetadataCache;
    use crate::fractal_heap::tests::superblock;
    use crate::props::FileAccessProps;
    use crate::source::Sizes;
    use crate::warnings::LogWarnings;

    /// Encode a collection holding `objects` as indexes 1, 2, ...
    pub(crate) fn build_gcol(objects: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        for (i, obj) in objects.iter().enumerate() {
            body.extend_from_slice(&(i as u16 + 1).to_le_bytes());
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&[0; 4]);
            body.extend_from_slice(&(obj.len() as u64).to_le_bytes());
            body.extend_from_slice(obj);
            body.resize(body.len() + obj.len().div_ceil(8) * 8 - obj.len(), 0);
        }
        // Free-space object closes the collection.
        body.extend_from_slice(&[0; 16]);
        let mut b = b"GCOL".to_vec();
        b.extend_from_slice(&[1, 0, 0, 0]);
        b.extend_from_slice(&((16 + body.len()) as u64).to_le_bytes());
        b.extend_from_slice(&body);
        b
    }

    pub(crate) fn slot_bytes(length: u32, collection: u64, index: u32) -> Vec<u8> {
        let mut b = length.to_le_bytes().to_vec();
        b.extend_from_slice(&collection.to_le_bytes());
        b.extend_from_slice(&index.to_le_bytes());
        b
    }

    fn with_ctx<R>(file: Vec<u8>, f: impl FnOnce(&DecodeContext<'_>) -> R) -> R {
        let sb = superblock();
        let props = FileAccessProps::default();
        let codecs = CodecRegistry::empty();
        let cache = MetadataCache::new();
        let ctx = DecodeContext::new(&file, &sb, &props, &LogWarnings, &codecs, &cache);
        f(&ctx)
    }

    #[test]
    fn objects_by_index() {
        let file = build_gcol(&[b"hello", b"", b"twelve bytes"]);
        with_ctx(file, |ctx| {
            let col = GlobalHeapCollection::read(ctx, 0).unwrap();
            assert_eq!(col.len(), 3);
            assert_eq!(col.object(1).unwrap(), b"hello");
            assert_eq!(col.object(2).unwrap(), b"");
            assert_eq!(col.object(3).unwrap(), b"twelve bytes");
            assert!(matches!(
                col.object(9),
                Err(FormatError::HeapObjectNotFound { index: 9, .. })
            ));
        });
    }

    #[test]
    fn zero_length_slot_skips_heap() {
        with_ctx(vec![0; 8], |ctx| {
            let mut reader = GlobalHeapReader::new();
            let slot = VlenSlot::parse(&mut Cursor::new(
                &slot_bytes(0, 0, 0),
                0,
                Sizes::default(),
            ))
            .unwrap();
            assert_eq!(reader.slot(ctx, &slot).unwrap(), Vec::<u8>::new());
        });
    }

    #[test]
    fn reader_caches_collections() {
        let file = build_gcol(&[b"abc"]);
        with_ctx(file, |ctx| {
            let mut reader = GlobalHeapReader::new();
            let id = GlobalHeapId {
                collection: Some(0),
                index: 1,
            };
            assert_eq!(reader.get(ctx, &id).unwrap(), b"abc");
            assert_eq!(reader.get(ctx, &id).unwrap(), b"abc");
            assert_eq!(reader.collections.len(), 1);
        });
    }

    #[test]
    fn bad_signature() {
        with_ctx(vec![0; 32], |ctx| {
            assert!(matches!(
                GlobalHeapCollection::read(ctx, 0),
                Err(FormatError::InvalidSignature { .. })
            ));
        });
    }
}
