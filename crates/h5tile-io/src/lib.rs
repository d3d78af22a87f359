//! Byte sources for h5tile.
//!
//! [`FileSource`] issues positioned reads against an open file and never
//! loads the whole container. [`MmapSource`] (feature `mmap`) maps the
//! file and copies ranges out of the mapping. Both are shareable across
//! threads: positioned reads do not move a shared cursor.

use std::fs::File;
use std::io;
use std::path::Path;

use log::debug;

pub use h5tile_format::source::ByteSource;
use h5tile_format::FormatError;

#[cfg(feature = "mmap")]
mod mmap;

#[cfg(feature = "mmap")]
pub use mmap::MmapSource;

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// Positioned reads against an open file.
///
/// The length is captured at open time; reads past it fail with
/// `UnexpectedEof` without touching the file.
#[derive(Debug)]
pub struct FileSource {
    #[cfg(any(unix, windows))]
    file: File,
    #[cfg(not(any(unix, windows)))]
    file: std::sync::Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileSource> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let source = FileSource::from_file(file)?;
        debug!("opened {} ({} bytes)", path.display(), source.len);
        Ok(source)
    }

    pub fn from_file(file: File) -> io::Result<FileSource> {
        let len = file.metadata()?.len();
        Ok(FileSource {
            #[cfg(any(unix, windows))]
            file,
            #[cfg(not(any(unix, windows)))]
            file: std::sync::Mutex::new(file),
            len,
        })
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// Reject a read extending past `len` before any I/O happens.
pub(crate) fn check_range(len: u64, offset: u64, wanted: usize) -> Result<(), FormatError> {
    match offset.checked_add(wanted as u64) {
        Some(end) if end <= len => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            offset,
            needed: wanted,
            available: len.saturating_sub(offset) as usize,
        }),
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), FormatError> {
        check_range(self.len, offset, buf.len())?;
        self.read_exact_at(offset, buf)
            .map_err(|source| FormatError::Io {
                offset,
                length: buf.len(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// Opening helpers
// ---------------------------------------------------------------------------

/// Open `path` as a shareable byte source, memory-mapped when `use_mmap`
/// is set and the `mmap` feature is enabled.
pub fn open_source<P: AsRef<Path>>(path: P, use_mmap: bool) -> io::Result<Box<dyn ByteSource>> {
    #[cfg(feature = "mmap")]
    if use_mmap {
        return Ok(Box::new(MmapSource::open(path)?));
    }
    #[cfg(not(feature = "mmap"))]
    if use_mmap {
        log::warn!("memory mapping requested but the mmap feature is disabled");
    }
    Ok(Box::new(FileSource::open(path)?))
}
