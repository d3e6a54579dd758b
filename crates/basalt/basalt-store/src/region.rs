//! Typed views over the untyped byte mapping that backs the store.

use crate::shm_layout::{DirectoryEntry, ROW_SCHEMA_VERSION, RegionHeader, StoreLayout, TickerHeader};
use basalt_events::OhlcvRow;
use basalt_mmap::{MmapAnon, MmapFile, MmapFileMut};
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering, fence};

enum Backing {
    Shared(MmapFileMut),
    Attached(MmapFile),
    Private(MmapAnon),
}

/// Owns a mapping and hands out typed pointers into it.
///
/// Every accessor takes a byte offset produced by a [`StoreLayout`] that was
/// validated against the mapping length, so the pointers stay in bounds.
pub(crate) struct SharedRegion {
    /// Keeps the mapping alive; never touched after construction.
    _backing: Backing,
    base: *mut u8,
    len: usize,
    writable: bool,
}

// SAFETY: the region is plain memory. Mutation only happens through
// `RingStoreWriter`, which is the single owner of the writer role, and every
// reader goes through the seqlock protocol.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub fn shared(mut mm: MmapFileMut) -> Self {
        let base = mm.as_mut_ptr();
        let len = mm.len();
        Self {
            _backing: Backing::Shared(mm),
            base,
            len,
            writable: true,
        }
    }

    pub fn private(mut mm: MmapAnon) -> Self {
        let base = mm.as_mut_ptr();
        let len = mm.len();
        Self {
            _backing: Backing::Private(mm),
            base,
            len,
            writable: true,
        }
    }

    pub fn attached(mm: MmapFile) -> Self {
        // never written through: `writable` is false and only the writer
        // path calls the `_mut` accessors
        let base = mm.as_ptr() as *mut u8;
        let len = mm.len();
        Self {
            _backing: Backing::Attached(mm),
            base,
            len,
            writable: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Region header, or `None` if the mapping is too small to hold one.
    pub fn region_header(&self) -> Option<&RegionHeader> {
        if self.len < size_of::<RegionHeader>() {
            return None;
        }
        // SAFETY: offset 0 is page aligned and the length was checked
        Some(unsafe { &*(self.base as *const RegionHeader) })
    }

    /// Copies the directory out of the region.
    pub fn directory(&self, offset: usize, count: usize) -> Option<Vec<DirectoryEntry>> {
        let end = count
            .checked_mul(size_of::<DirectoryEntry>())?
            .checked_add(offset)?;
        if end > self.len {
            return None;
        }
        let ptr = unsafe { self.base.add(offset) as *const DirectoryEntry };
        // SAFETY: bounds checked above; DirectoryEntry is POD
        Some((0..count).map(|i| unsafe { ptr.add(i).read() }).collect())
    }

    /// Seqlock header of the entry at `offset`.
    #[inline(always)]
    pub fn ticker_header(&self, offset: usize) -> &TickerHeader {
        debug_assert!(offset + size_of::<TickerHeader>() <= self.len);
        // SAFETY: layout offsets are 64B aligned and inside the mapping
        unsafe { &*(self.base.add(offset) as *const TickerHeader) }
    }

    /// First row of the entry whose rows start at `offset`.
    #[inline(always)]
    pub fn rows(&self, offset: usize) -> *const OhlcvRow {
        unsafe { self.base.add(offset) as *const OhlcvRow }
    }

    #[inline(always)]
    pub fn rows_mut(&self, offset: usize) -> *mut OhlcvRow {
        debug_assert!(self.writable);
        unsafe { self.base.add(offset) as *mut OhlcvRow }
    }

    /// Stamps the header, directory and every ticker header into a fresh,
    /// zeroed mapping. The magic is written last so a reader attaching early
    /// sees either nothing or a complete layout.
    pub fn initialize(&self, layout: &StoreLayout, capacity: u64, writer_pid: u32) {
        debug_assert!(self.writable && self.len >= layout.total_bytes());

        // SAFETY: the mapping is exclusively ours until the magic is written
        // and is at least `layout.total_bytes()` long.
        unsafe {
            for (i, _) in layout.tickers().iter().enumerate() {
                let h = self.base.add(layout.entry_offset(i)) as *mut TickerHeader;
                std::ptr::write(
                    h,
                    TickerHeader {
                        epoch: AtomicU64::new(0),
                        write_cursor: AtomicU64::new(0),
                        last_update_ms: AtomicU64::new(0),
                        capacity,
                        schema_version: ROW_SCHEMA_VERSION,
                        writer_pid,
                    },
                );
            }

            let dir = self.base.add(layout.directory_offset()) as *mut DirectoryEntry;
            for (i, entry) in layout.directory().into_iter().enumerate() {
                std::ptr::write(dir.add(i), entry);
            }

            let mut header = layout.header();
            let magic = header.magic;
            header.magic = 0;
            let h = self.base as *mut RegionHeader;
            std::ptr::write(h, header);
            fence(Ordering::Release);
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*h).magic), magic);
        }
    }
}
