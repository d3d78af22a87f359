//! Per-file decoding context threaded through every structure reader.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::codec::CodecRegistry;
use crate::error::FormatError;
use crate::object_header::HeaderMessage;
use crate::props::FileAccessProps;
use crate::shared::SohmTable;
use crate::source::{ByteSource, Cursor, Sizes};
use crate::superblock::Superblock;
use crate::warnings::WarningSink;

/// A block fetched from the source, remembering where it came from.
#[derive(Debug, Clone)]
pub struct Block {
    pub data: Vec<u8>,
    /// Absolute file offset of `data[0]`.
    pub offset: u64,
    pub sizes: Sizes,
}

impl Block {
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.data, self.offset, self.sizes)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Metadata resolved once per file and shared by all readers.
#[derive(Debug, Default)]
pub struct MetadataCache {
    shared: Mutex<HashMap<(u64, u16), HeaderMessage>>,
    sohm: OnceLock<Option<SohmTable>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shared_message(&self, key: (u64, u16)) -> Option<HeaderMessage> {
        match self.shared.lock() {
            Ok(map) => map.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }

    pub(crate) fn insert_shared_message(&self, key: (u64, u16), msg: HeaderMessage) {
        match self.shared.lock() {
            Ok(mut map) => map.insert(key, msg),
            Err(poisoned) => poisoned.into_inner().insert(key, msg),
        };
    }

    pub(crate) fn sohm_table(&self) -> Option<&Option<SohmTable>> {
        self.sohm.get()
    }

    pub(crate) fn set_sohm_table(&self, table: Option<SohmTable>) -> &Option<SohmTable> {
        self.sohm.get_or_init(|| table)
    }
}

/// Everything a structure reader needs besides its own address.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub source: &'a dyn ByteSource,
    pub sizes: Sizes,
    /// Added to every stored address before reading.
    pub base_address: u64,
    /// Superblock extension object header, when present.
    pub extension_address: Option<u64>,
    pub props: &'a FileAccessProps,
    pub warnings: &'a dyn WarningSink,
    pub codecs: &'a CodecRegistry,
    pub cache: &'a MetadataCache,
}

impl<'a> DecodeContext<'a> {
    pub fn new(
        source: &'a dyn ByteSource,
        superblock: &Superblock,
        props: &'a FileAccessProps,
        warnings: &'a dyn WarningSink,
        codecs: &'a CodecRegistry,
        cache: &'a MetadataCache,
    ) -> DecodeContext<'a> {
        DecodeContext {
            source,
            sizes: superblock.sizes,
            base_address: superblock.base_address,
            extension_address: superblock.extension_address,
            props,
            warnings,
            codecs,
            cache,
        }
    }

    /// Absolute file offset of a stored address.
    pub fn absolute(&self, address: u64) -> u64 {
        self.base_address.saturating_add(address)
    }

    /// Read exactly `len` bytes at a stored address.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, FormatError> {
        self.source.read_bytes(self.absolute(address), len)
    }

    /// Read exactly `len` bytes at a stored address as a [`Block`].
    pub fn block(&self, address: u64, len: usize) -> Result<Block, FormatError> {
        Ok(Block {
            data: self.read(address, len)?,
            offset: self.absolute(address),
            sizes: self.sizes,
        })
    }

    /// Like [`block`](Self::block) but clipped at end of file.
    pub fn block_up_to(&self, address: u64, len: usize) -> Result<Block, FormatError> {
        let abs = self.absolute(address);
        let available = self.source.len().saturating_sub(abs);
        let n = (len as u64).min(available) as usize;
        if n == 0 {
            return Err(FormatError::UnexpectedEof {
                offset: abs,
                needed: len,
                available: 0,
            });
        }
        self.block(address, n)
    }

    pub fn verify_checksums(&self) -> bool {
        self.props.verify_checksums
    }
}
