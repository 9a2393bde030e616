/*!
 * Host I/O Descriptor
 * Unbuffered wrapper around one host file handle
 */

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::trace;

use super::space::GuestAddressSpace;
use super::traits::Descriptor;
use super::types::{DescKind, DescStat, MapFlags, ProtFlags};
use super::xfer::{TransferBuffer, INVALID_HANDLE};
use crate::core::{KernelError, KernelResult};

/// Host I/O descriptor
///
/// Owns its handle; the handle is closed exactly once, when the descriptor
/// is dropped.
#[derive(Debug)]
pub struct HostIoDesc {
    file: File,
}

impl HostIoDesc {
    /// Take ownership of an already opened host file
    pub fn new(file: File) -> Self {
        trace!(fd = file.as_raw_fd(), "HostIoDesc created");
        Self { file }
    }

    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Self::new(File::from(fd))
    }

    /// Build a descriptor from the next handle slot of `xfer`
    ///
    /// The slot is consumed and the new descriptor owns the handle. Fails
    /// with an I/O error when no handle slots remain or the handle is not
    /// an open descriptor.
    pub fn internalize(xfer: &mut TransferBuffer) -> KernelResult<Self> {
        let handle = xfer.take_handle().ok_or_else(|| {
            KernelError::io(
                "internalize host descriptor",
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transfer buffer has no handles left",
                ),
            )
        })?;
        let fd = take_ownership(handle)?;
        Ok(Self::from_owned_fd(fd))
    }

    pub fn as_file(&self) -> &File {
        &self.file
    }
}

/// Validate a transferred handle and take ownership of it
pub(super) fn take_ownership(handle: RawFd) -> KernelResult<OwnedFd> {
    if handle == INVALID_HANDLE {
        return Err(KernelError::io(
            "internalize descriptor",
            std::io::Error::from_raw_os_error(libc::EBADF),
        ));
    }
    // SAFETY: F_GETFD only queries descriptor flags.
    if unsafe { libc::fcntl(handle, libc::F_GETFD) } < 0 {
        return Err(KernelError::io(
            format!("internalize descriptor {}", handle),
            std::io::Error::last_os_error(),
        ));
    }
    // SAFETY: the handle was removed from its transfer slot, so nothing
    // else will close it.
    Ok(unsafe { OwnedFd::from_raw_fd(handle) })
}

impl AsRawFd for HostIoDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Descriptor for HostIoDesc {
    fn kind(&self) -> DescKind {
        DescKind::HostIo
    }

    fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        (&self.file)
            .read(buf)
            .map_err(|e| KernelError::io("read host descriptor", e))
    }

    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        (&self.file)
            .write(buf)
            .map_err(|e| KernelError::io("write host descriptor", e))
    }

    fn seek(&self, pos: SeekFrom) -> KernelResult<u64> {
        (&self.file)
            .seek(pos)
            .map_err(|e| KernelError::io("seek host descriptor", e))
    }

    fn ioctl(&self, request: u64, arg: &mut [u8]) -> KernelResult<i32> {
        // SAFETY: `arg` is a live buffer the request may read and write.
        let rv = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                arg.as_mut_ptr() as *mut libc::c_void,
            )
        };
        if rv < 0 {
            return Err(KernelError::io(
                format!("ioctl {:#x}", request),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(rv)
    }

    fn stat(&self) -> KernelResult<DescStat> {
        let md = self
            .file
            .metadata()
            .map_err(|e| KernelError::io("fstat host descriptor", e))?;
        Ok(DescStat::from(&md))
    }

    fn truncate(&self, len: u64) -> KernelResult<()> {
        self.file
            .set_len(len)
            .map_err(|e| KernelError::io(format!("ftruncate to {}", len), e))
    }

    fn map(
        &self,
        space: &mut GuestAddressSpace,
        start: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: u64,
    ) -> KernelResult<usize> {
        space.map_pages(Some(self.file.as_raw_fd()), start, len, prot, flags, offset)
    }

    fn externalize_size(&self) -> (usize, usize) {
        (0, 1)
    }

    fn externalize(&self, xfer: &mut TransferBuffer) -> KernelResult<()> {
        xfer.push_handle(self.file.as_raw_fd());
        Ok(())
    }
}
