//! The global page free list (spec §4.1).
//!
//! Pages hold payload bits only — there is no per-page header in the directory-indexed design
//! (type information reaches the payload through the class via the [`crate::directory::Directory`]).
//! Individual pages are never returned to the OS; only a whole [`PageAllocator`] going away
//! (i.e. the owning [`crate::arena::Arena`] being dropped) releases the bulk mmap regions it made.

use std::io;
use std::ptr::{self, NonNull};

use log::{trace, warn};

use crate::error::Error;

/// Size of one page in bytes. Also the unit of bulk OS allocation.
pub const PAGE_BYTES: usize = 4096;

/// Size of one page in bits — the unit [`crate::class::Class`] divides into object slots.
pub const PAGE_BITS: u64 = (PAGE_BYTES * 8) as u64;

/// How many times a rejected bulk-mapping size may be doubled before giving up.
const MAX_GROW_RETRIES: u32 = 8;

/// A single fixed-size, page-aligned-enough block of raw storage.
///
/// `Page` does not own a `Drop` impl: pages are never individually freed, only handed back to
/// the [`PageAllocator`]'s free list. The bulk region backing every `Page` is freed exactly once,
/// when the `PageAllocator` itself is dropped.
#[derive(Debug)]
pub struct Page {
    ptr: NonNull<u8>,
}

impl Page {
    /// Raw pointer to the first byte of this page's storage.
    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

/// Owns the global free list of raw pages, backed by bulk anonymous `mmap` regions.
pub struct PageAllocator {
    free: Vec<Page>,
    bulk_regions: Vec<(NonNull<u8>, usize)>,
    bulk_pages: usize,
}

impl PageAllocator {
    /// Creates a new, empty allocator. No memory is mapped until the first [`acquire`](Self::acquire).
    pub fn new(bulk_pages_initial: usize) -> Self {
        PageAllocator {
            free: Vec::new(),
            bulk_regions: Vec::new(),
            bulk_pages: bulk_pages_initial.max(1),
        }
    }

    /// Hands out one page from the free list, growing it in bulk first if necessary.
    pub fn acquire(&mut self) -> Result<Page, Error> {
        if self.free.is_empty() {
            self.grow()?;
        }
        let page = self.free.pop().expect("grow() must populate the free list");
        trace!("PageAllocator: acquired page at {:p}", page.as_ptr());
        Ok(page)
    }

    /// Returns a page to the free list. The underlying mapping is retained for future reuse.
    pub fn release(&mut self, page: Page) {
        trace!("PageAllocator: released page at {:p}", page.as_ptr());
        self.free.push(page);
    }

    /// Requests a bulk mapping of `self.bulk_pages` pages, doubling and retrying if the OS
    /// rejects the requested size as invalid. Fails with [`Error::OutOfMemory`] on a hard failure.
    fn grow(&mut self) -> Result<(), Error> {
        let mut npages = self.bulk_pages;

        for attempt in 0..=MAX_GROW_RETRIES {
            let len = npages * PAGE_BYTES;

            let mapped = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };

            if mapped == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                let retryable = err.raw_os_error() == Some(libc::EINVAL) && attempt < MAX_GROW_RETRIES;
                if retryable {
                    warn!(
                        "PageAllocator: bulk mmap of {} bytes rejected ({}), doubling and retrying",
                        len, err
                    );
                    npages *= 2;
                    continue;
                }
                return Err(Error::OutOfMemory {
                    reason: format!("mmap of {} bytes failed: {}", len, err),
                });
            }

            let base = NonNull::new(mapped as *mut u8).expect("mmap returned null without MAP_FAILED");
            trace!("PageAllocator: mapped {} bytes at {:p}", len, base.as_ptr());
            self.bulk_regions.push((base, len));

            for i in 0..npages {
                let page_ptr = unsafe { base.as_ptr().add(i * PAGE_BYTES) };
                self.free.push(Page {
                    ptr: NonNull::new(page_ptr).expect("offset within a non-null mapping is non-null"),
                });
            }

            self.bulk_pages = npages;
            return Ok(());
        }

        unreachable!("loop always returns before exhausting MAX_GROW_RETRIES + 1 iterations")
    }
}

impl Drop for PageAllocator {
    fn drop(&mut self) {
        for (base, len) in self.bulk_regions.drain(..) {
            trace!("PageAllocator: unmapping {} bytes at {:p}", len, base.as_ptr());
            unsafe {
                libc::munmap(base.as_ptr() as *mut libc::c_void, len);
            }
        }
    }
}
