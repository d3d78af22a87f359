//! Error types for decoding container structures.

use std::fmt;

/// Broad classification of a [`FormatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Corrupt or malformed file content. Always fatal.
    Structural,
    /// Recognised but unimplemented feature that the file marks mandatory.
    Unsupported,
    /// Request outside the declared shape or over a configured limit.
    Bounds,
    /// Failure of the underlying byte source.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Structural => "structural",
            ErrorKind::Unsupported => "unsupported feature",
            ErrorKind::Bounds => "bounds",
            ErrorKind::Io => "i/o",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while decoding a container.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The magic signature was not found at any candidate offset.
    #[error("container signature not found at offset 0 or any power of two from 512")]
    SignatureNotFound,
    /// A structure's 4-byte signature did not match.
    #[error("bad {what} signature at offset {offset:#x}")]
    InvalidSignature { what: &'static str, offset: u64 },
    /// A structure carries a version this decoder does not know.
    #[error("unsupported {what} version {version} at offset {offset:#x}")]
    UnsupportedVersion {
        what: &'static str,
        version: u8,
        offset: u64,
    },
    /// Fewer bytes were available than a structure requires.
    #[error("unexpected end of data at offset {offset:#x}: need {needed} bytes, have {available}")]
    UnexpectedEof {
        offset: u64,
        needed: usize,
        available: usize,
    },
    /// Offset width from the superblock is not 2, 4 or 8.
    #[error("invalid offset size {0} (must be 2, 4 or 8)")]
    InvalidOffsetSize(u8),
    /// Length width from the superblock is not 2, 4 or 8.
    #[error("invalid length size {0} (must be 2, 4 or 8)")]
    InvalidLengthSize(u8),
    /// An address decoded as the undefined sentinel where a value was required.
    #[error("undefined address for {what}")]
    UndefinedAddress { what: &'static str },
    /// A field holds a value outside its legal range.
    #[error("invalid {what} value {value} at offset {offset:#x}")]
    InvalidValue {
        what: &'static str,
        value: u64,
        offset: u64,
    },
    /// A B-tree child reported an impossible level.
    #[error("B-tree node at {offset:#x} has level {level}, expected {expected}")]
    BTreeLevel { offset: u64, level: u8, expected: u8 },
    /// Metadata checksum mismatch in strict mode.
    #[error("checksum mismatch in {what} at offset {offset:#x}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        offset: u64,
        stored: u32,
        computed: u32,
    },
    /// Object header continuations loop or nest too deeply.
    #[error("continuation chain at {offset:#x} exceeds depth {limit} or revisits a block")]
    ContinuationLoop { offset: u64, limit: u32 },
    /// Unknown message flagged must-understand.
    #[error("unsupported message type {msg_type:#06x} marked must-understand at offset {offset:#x}")]
    UnsupportedMessage { msg_type: u16, offset: u64 },
    /// Required filter that no registered codec implements.
    #[error("unsupported filter {filter_id} ({name}) required by {variable}")]
    UnsupportedFilter {
        filter_id: u16,
        name: String,
        variable: String,
    },
    /// Datatype class or size this decoder cannot represent.
    #[error("unsupported datatype: {0}")]
    UnsupportedDatatype(String),
    /// Any other recognised but unimplemented feature.
    #[error("unsupported feature: {0}")]
    Unsupported(String),
    /// A codec stage failed.
    #[error("filter {filter_id} failed: {source}")]
    FilterFailed {
        filter_id: u16,
        #[source]
        source: h5tile_filters::FilterError,
    },
    /// Decoded chunk does not have exactly the expected size.
    #[error("decoded chunk has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch { expected: usize, actual: usize },
    /// Requested region lies outside the variable's shape.
    #[error("region start {start:?} count {count:?} outside shape {shape:?}")]
    RegionOutOfBounds {
        start: Vec<u64>,
        count: Vec<u64>,
        shape: Vec<u64>,
    },
    /// Region rank differs from variable rank.
    #[error("region has rank {actual}, variable has rank {expected}")]
    RankMismatch { expected: usize, actual: usize },
    /// Requested buffer larger than the configured limit.
    #[error("read of {requested} bytes exceeds limit of {limit} bytes")]
    ReadTooLarge { requested: u64, limit: u64 },
    /// A global heap collection lacks the referenced object.
    #[error("global heap collection at {collection:#x} has no object {index}")]
    HeapObjectNotFound { collection: u64, index: u32 },
    /// A heap object holds fewer bytes than its variable-length slot declares.
    #[error("global heap object {index} in collection {collection:?} has {available} bytes, slot needs {needed}")]
    HeapObjectTooShort {
        collection: Option<u64>,
        index: u32,
        needed: usize,
        available: usize,
    },
    /// Conversion requested for an incompatible element type.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
    /// Byte source failure, propagated verbatim.
    #[error("i/o error reading {length} bytes at offset {offset:#x}")]
    Io {
        offset: u64,
        length: usize,
        #[source]
        source: std::io::Error,
    },
    /// An error annotated with the logical object being decoded.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<FormatError>,
    },
}

impl FormatError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatError::Context { source, .. } => source.kind(),
            FormatError::Io { .. } => ErrorKind::Io,
            FormatError::RegionOutOfBounds { .. }
            | FormatError::RankMismatch { .. }
            | FormatError::ReadTooLarge { .. } => ErrorKind::Bounds,
            FormatError::UnsupportedMessage { .. }
            | FormatError::UnsupportedFilter { .. }
            | FormatError::UnsupportedDatatype(_)
            | FormatError::Unsupported(_)
            | FormatError::TypeMismatch { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Structural,
        }
    }

    /// Wrap this error with the logical object it occurred in.
    pub fn context(self, context: impl Into<String>) -> FormatError {
        FormatError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root(&self) -> &FormatError {
        match self {
            FormatError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach context to a `Result<_, FormatError>`.
pub trait ResultExt<T> {
    /// Wrap an error with a lazily built context string.
    fn context<C, F>(self, f: F) -> Result<T, FormatError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T, FormatError> {
    fn context<C, F>(self, f: F) -> Result<T, FormatError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}
