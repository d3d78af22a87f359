//! Memory-mapped byte source via `memmap2`.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use h5tile_format::source::ByteSource;
use h5tile_format::FormatError;

use crate::check_range;

/// Read-only mapping of a whole file.
pub struct MmapSource {
    _file: File,
    mmap: Mmap,
}

impl MmapSource {
    /// Map `path` for reading.
    ///
    /// The mapping assumes the file is not truncated by another process
    /// while it is open.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<MmapSource> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping; concurrent truncation is excluded by
        // the documented contract above.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(MmapSource { _file: file, mmap })
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl std::fmt::Debug for MmapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapSource")
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        check_range(self.mmap.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.mmap[start..start + buf.len()]);
        Ok(())
    }
}
