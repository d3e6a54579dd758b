//! Thin owners around memory maps used as the backing of the shared store.
//!
//! Three flavours exist:
//! - [`MmapFileMut`]: file-backed, read-write. The writer creates the region
//!   (under `/dev/shm` this is a POSIX shared-memory object).
//! - [`MmapFile`]: file-backed, read-only. External readers attach with this.
//! - [`MmapAnon`]: anonymous, process-private. Used when shared memory is
//!   disabled and the store only serves in-process readers.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

pub struct MmapFileMut {
    _file: File,
    mmap: MmapMut,
}

pub struct MmapFile {
    _file: File,
    mmap: Mmap,
}

pub struct MmapAnon {
    mmap: MmapMut,
}

impl MmapFileMut {
    /// Create (or truncate) a file to `size_bytes` and map it read-write.
    /// The file is zero-filled by the kernel.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes as u64)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Base of the mapping. Valid for `len()` bytes while `self` lives.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MmapFile {
    /// Open an existing file and map it read-only
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;

        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MmapAnon {
    /// Map `size_bytes` of zeroed, process-private memory
    pub fn new(size_bytes: usize) -> io::Result<Self> {
        let mmap = MmapOptions::new().len(size_bytes).map_anon()?;
        Ok(Self { mmap })
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}
