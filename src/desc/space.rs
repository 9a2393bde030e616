/*!
 * Guest Address Space
 * Reserved host region backing guest mappings, managed in 64KB map pages
 */

use std::os::unix::io::RawFd;
use std::ptr;
use tracing::{debug, trace};

use super::types::{MapFlags, ProtFlags};
use crate::core::limits::MAP_PAGE_SIZE;
use crate::core::{KernelError, KernelResult};

/// Reservation of host address space that guest mappings are placed into
///
/// Free pages are held as `PROT_NONE` anonymous memory so no other host
/// mapping can land inside the guest region. Unmapping a page puts a fresh
/// reservation back instead of leaving a hole.
#[derive(Debug)]
pub struct GuestAddressSpace {
    base: usize,
    size: usize,
    used: Vec<bool>,
}

impl GuestAddressSpace {
    /// Reserve `size` bytes (rounded up to map pages)
    pub fn reserve(size: usize) -> KernelResult<Self> {
        let pages = size.div_ceil(MAP_PAGE_SIZE).max(1);
        let size = pages * MAP_PAGE_SIZE;

        // SAFETY: anonymous PROT_NONE reservation at a kernel-chosen address.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(KernelError::OutOfMemory(format!(
                "cannot reserve {} bytes of guest address space: {}",
                size,
                std::io::Error::last_os_error()
            )));
        }

        debug!(base = addr as usize, size, "Guest address space reserved");
        Ok(Self {
            base: addr as usize,
            size,
            used: vec![false; pages],
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True if `[addr, addr + len)` lies inside the guest region
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        if len == 0 || addr < self.base {
            return false;
        }
        match addr.checked_add(len) {
            Some(end) => end <= self.base + self.size,
            None => false,
        }
    }

    /// True if the map page holding `addr` carries a live mapping
    pub fn is_mapped(&self, addr: usize) -> bool {
        self.page_index(addr)
            .map(|i| self.used[i])
            .unwrap_or(false)
    }

    pub fn mapped_pages(&self) -> usize {
        self.used.iter().filter(|u| **u).count()
    }

    /// Find the lowest free run of pages able to hold `len` bytes
    pub fn find_space(&self, len: usize) -> Option<usize> {
        let needed = len.div_ceil(MAP_PAGE_SIZE);
        if needed == 0 || needed > self.used.len() {
            return None;
        }

        let mut run = 0;
        for (i, used) in self.used.iter().enumerate() {
            if *used {
                run = 0;
                continue;
            }
            run += 1;
            if run == needed {
                return Some(self.base + (i + 1 - needed) * MAP_PAGE_SIZE);
            }
        }
        None
    }

    /// Guest-invoked unmap
    ///
    /// The region must start on a map page and lie inside the guest space.
    pub fn unmap(&mut self, addr: usize, len: usize) -> KernelResult<()> {
        if addr % MAP_PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument(format!(
                "unmap address {:#x} is not page aligned",
                addr
            )));
        }
        let span = round_up(len);
        if !self.contains(addr, span) {
            return Err(KernelError::InvalidArgument(format!(
                "unmap region {:#x}+{:#x} is outside guest space",
                addr, len
            )));
        }

        let mut page = addr;
        while page < addr + span {
            self.release_page(page)?;
            page += MAP_PAGE_SIZE;
        }
        Ok(())
    }

    /// Map `len` bytes of `fd` (or anonymous memory) page by page
    ///
    /// Each page is released first so a new mapping never merges with
    /// whatever occupied the page before.
    pub(crate) fn map_pages(
        &mut self,
        fd: Option<RawFd>,
        start: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: u64,
    ) -> KernelResult<usize> {
        if prot.exec {
            return Err(KernelError::InvalidArgument(
                "mapping protection may only combine read and write".into(),
            ));
        }
        if len == 0 {
            return Err(KernelError::InvalidArgument("zero length mapping".into()));
        }
        if offset % MAP_PAGE_SIZE as u64 != 0 {
            return Err(KernelError::InvalidArgument(format!(
                "mapping offset {:#x} is not page aligned",
                offset
            )));
        }

        let span = round_up(len);
        let start = if flags.fixed {
            match start {
                Some(addr) if addr % MAP_PAGE_SIZE == 0 && self.contains(addr, span) => addr,
                _ => {
                    return Err(KernelError::InvalidArgument(format!(
                        "fixed mapping at {:?} is outside guest space",
                        start
                    )))
                }
            }
        } else {
            if start.is_none() {
                trace!("Mapping is not fixed and has no start hint");
            }
            self.find_space(len)
                .ok_or(KernelError::OutOfAddressSpace(len))?
        };

        let mut native_flags = flags.to_native() | libc::MAP_FIXED;
        let raw_fd = match fd {
            Some(fd) => fd,
            None => {
                native_flags |= libc::MAP_ANONYMOUS;
                -1
            }
        };

        let end = start + len;
        let mut addr = start;
        let mut file_offset = offset;
        while addr < end {
            self.release_page(addr)?;

            let map_size = (end - addr).min(MAP_PAGE_SIZE);
            // SAFETY: `addr` is a page inside our own reservation, which was
            // just reset to PROT_NONE; MAP_FIXED only replaces that page.
            let status = unsafe {
                libc::mmap(
                    addr as *mut libc::c_void,
                    map_size,
                    prot.to_native(),
                    native_flags,
                    raw_fd,
                    file_offset as libc::off_t,
                )
            };
            if status == libc::MAP_FAILED {
                return Err(KernelError::Busy(format!(
                    "host mapping at {:#x} failed: {}",
                    addr,
                    std::io::Error::last_os_error()
                )));
            }
            self.mark(addr, true);

            addr += MAP_PAGE_SIZE;
            file_offset += MAP_PAGE_SIZE as u64;
        }

        debug!(addr = start, len, "Mapped guest region");
        Ok(start)
    }

    /// Replace one map page with a fresh PROT_NONE reservation
    fn release_page(&mut self, addr: usize) -> KernelResult<()> {
        // SAFETY: callers only pass page-aligned addresses inside the
        // reservation; MAP_FIXED swaps that page for anonymous PROT_NONE memory.
        let status = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                MAP_PAGE_SIZE,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if status == libc::MAP_FAILED {
            return Err(KernelError::Busy(format!(
                "cannot release guest page {:#x}: {}",
                addr,
                std::io::Error::last_os_error()
            )));
        }
        self.mark(addr, false);
        Ok(())
    }

    fn page_index(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr, 1) {
            return None;
        }
        Some((addr - self.base) / MAP_PAGE_SIZE)
    }

    fn mark(&mut self, addr: usize, used: bool) {
        if let Some(i) = self.page_index(addr) {
            self.used[i] = used;
        }
    }
}

impl Drop for GuestAddressSpace {
    fn drop(&mut self) {
        if let Err(e) = unmap_unchecked(self.base, self.size) {
            tracing::warn!(error = %e, "Failed to release guest address space");
        }
    }
}

/// Unmap host memory without any guest-space validation
///
/// Internal use only. Nothing reachable from a guest request may call this.
pub(crate) fn unmap_unchecked(addr: usize, len: usize) -> KernelResult<()> {
    // SAFETY: only called for regions this crate mapped itself.
    let rv = unsafe { libc::munmap(addr as *mut libc::c_void, len) };
    if rv != 0 {
        return Err(KernelError::io(
            format!("munmap {:#x}+{:#x}", addr, len),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

fn round_up(len: usize) -> usize {
    len.div_ceil(MAP_PAGE_SIZE) * MAP_PAGE_SIZE
}

/// Map anonymous zeroed memory into the guest space
pub fn map_anonymous(
    space: &mut GuestAddressSpace,
    start: Option<usize>,
    len: usize,
    prot: ProtFlags,
    flags: MapFlags,
) -> KernelResult<usize> {
    space.map_pages(None, start, len, prot, flags, 0)
}
