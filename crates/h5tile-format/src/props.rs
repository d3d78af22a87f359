//! File access properties.
//!
//! Groups the caller-controlled knobs for decoding a container into one
//! value that is fixed when the container is opened.

/// Default upper bound on a single region read (2 GiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default limit on nested object-header continuation blocks.
pub const DEFAULT_MAX_CONTINUATION_DEPTH: u32 = 64;

/// File access properties.
///
/// Controls resource limits, metadata verification and the I/O backend
/// used when opening a container.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FileAccessProps {
    /// Largest destination buffer one read may allocate.
    pub max_read_bytes: u64,
    /// Verify metadata checksums and reject mismatches.
    pub verify_checksums: bool,
    /// Maximum number of continuation blocks one header may chain through.
    pub max_continuation_depth: u32,
    /// Memory-map the file instead of issuing positioned reads.
    pub use_mmap: bool,
}

impl Default for FileAccessProps {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            verify_checksums: false,
            max_continuation_depth: DEFAULT_MAX_CONTINUATION_DEPTH,
            use_mmap: false,
        }
    }
}

impl FileAccessProps {
    /// Create default file access properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-read allocation limit in bytes.
    pub fn max_read_bytes(mut self, bytes: u64) -> Self {
        self.max_read_bytes = bytes;
        self
    }

    /// Enable strict metadata checksum verification.
    pub fn verify_checksums(mut self, on: bool) -> Self {
        self.verify_checksums = on;
        self
    }

    /// Set the continuation depth limit.
    pub fn max_continuation_depth(mut self, depth: u32) -> Self {
        self.max_continuation_depth = depth;
        self
    }

    /// Memory-map the file when opening from a path.
    pub fn mmap(mut self, on: bool) -> Self {
        self.use_mmap = on;
        self
    }
}
