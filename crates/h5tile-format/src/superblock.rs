//! Superblock location and parsing for versions 0, 1, 2 and 3.

use log::debug;

use crate::checksum::verify_block;
use crate::error::FormatError;
use crate::source::{ByteSource, Cursor, Sizes};

/// The 8-byte container signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Large enough for every superblock version with 8-byte fields.
const SUPERBLOCK_PROBE: usize = 128;

/// Parsed superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Version (0-3).
    pub version: u8,
    /// Byte offset at which the signature was found.
    pub signature_offset: u64,
    /// Offset and length field widths.
    pub sizes: Sizes,
    /// Absolute offset that every stored address is relative to.
    pub base_address: u64,
    /// End-of-file address.
    pub eof_address: u64,
    /// Root group object header address.
    pub root_group_address: u64,
    /// Group leaf node K (v0/v1).
    pub group_leaf_node_k: Option<u16>,
    /// Group internal node K (v0/v1).
    pub group_internal_node_k: Option<u16>,
    /// Indexed storage internal node K (v1).
    pub indexed_storage_k: Option<u16>,
    /// Superblock extension object header (v2/v3), when present.
    pub extension_address: Option<u64>,
    /// File consistency flags.
    pub consistency_flags: u32,
}

/// Locate the signature at offset 0 or at 512, 1024, 2048, ...
pub fn find_signature<S: ByteSource + ?Sized>(src: &S) -> Result<u64, FormatError> {
    let len = src.len();
    let mut offset = 0u64;
    while offset + SIGNATURE.len() as u64 <= len {
        if src.read_bytes(offset, SIGNATURE.len())? == SIGNATURE {
            return Ok(offset);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(FormatError::SignatureNotFound)
}

impl Superblock {
    /// Find and decode the superblock of `src`.
    ///
    /// With `verify` set, the v2/v3 checksum is checked.
    pub fn read<S: ByteSource + ?Sized>(src: &S, verify: bool) -> Result<Superblock, FormatError> {
        let at = find_signature(src)?;
        let n = SUPERBLOCK_PROBE.min((src.len() - at) as usize);
        let block = src.read_bytes(at, n)?;
        let sb = Self::parse(&block, at, verify)?;
        debug!(
            "superblock v{} at {:#x}: offsets {} bytes, lengths {} bytes, root at {:#x}",
            sb.version, at, sb.sizes.offset_size, sb.sizes.length_size, sb.root_group_address
        );
        Ok(sb)
    }

    /// Decode a superblock from `block`, which starts at the signature.
    pub fn parse(block: &[u8], signature_offset: u64, verify: bool) -> Result<Superblock, FormatError> {
        // Sizes are unknown until the version-specific prefix is read.
        let mut c = Cursor::new(block, signature_offset, Sizes::default());
        if c.bytes(8)? != SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }
        let version = c.u8()?;
        match version {
            0 | 1 => Self::parse_v0v1(block, signature_offset, version),
            2 | 3 => Self::parse_v2v3(block, signature_offset, version, verify),
            v => Err(FormatError::UnsupportedVersion {
                what: "superblock",
                version: v,
                offset: signature_offset + 8,
            }),
        }
    }

    fn parse_v0v1(block: &[u8], at: u64, version: u8) -> Result<Superblock, FormatError> {
        let mut c = Cursor::new(block, at, Sizes::default());
        // signature, version, free-space version, root group version,
        // reserved, shared header version
        c.skip(13)?;
        let sizes = Sizes::new(c.u8()?, c.u8()?)?;
        c.skip(1)?;
        let group_leaf_node_k = c.u16()?;
        let group_internal_node_k = c.u16()?;
        let indexed_storage_k = if version == 1 {
            let k = c.u16()?;
            c.skip(2)?;
            Some(k)
        } else {
            None
        };
        let consistency_flags = c.u32()?;

        let mut c = Cursor::new(&block[c.position()..], at + c.position() as u64, sizes);
        let base_address = c.offset()?.unwrap_or(0);
        let _free_space = c.offset()?;
        let eof_address = c.offset()?.unwrap_or(u64::MAX);
        let _driver_info = c.offset()?;
        // Root group symbol table entry: link name offset, then header address.
        let _link_name = c.offset()?;
        let root_group_address = c.address("root group object header")?;

        Ok(Superblock {
            version,
            signature_offset: at,
            sizes,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: Some(group_leaf_node_k),
            group_internal_node_k: Some(group_internal_node_k),
            indexed_storage_k,
            extension_address: None,
            consistency_flags,
        })
    }

    fn parse_v2v3(block: &[u8], at: u64, version: u8, verify: bool) -> Result<Superblock, FormatError> {
        let mut c = Cursor::new(block, at, Sizes::default());
        c.skip(9)?;
        let sizes = Sizes::new(c.u8()?, c.u8()?)?;
        let consistency_flags = u32::from(c.u8()?);

        let mut c = Cursor::new(block, at, sizes);
        c.skip(12)?;
        let base_address = c.offset()?.unwrap_or(0);
        let extension_address = c.offset()?;
        let eof_address = c.offset()?.unwrap_or(u64::MAX);
        let root_group_address = c.address("root group object header")?;
        let end = c.position() + 4;
        c.skip(4)?;
        if verify {
            verify_block(&block[..end], "superblock", at)?;
        }

        Ok(Superblock {
            version,
            signature_offset: at,
            sizes,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: None,
            group_internal_node_k: None,
            indexed_storage_k: None,
            extension_address,
            consistency_flags,
        })
    }
}
