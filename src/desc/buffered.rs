/*!
 * Buffered Stream Descriptor
 * One-directional buffered handle for character devices and FIFOs
 */

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use super::host_io::take_ownership;
use super::traits::Descriptor;
use super::types::{DescKind, DescStat};
use super::xfer::TransferBuffer;
use crate::core::{KernelError, KernelResult};

#[derive(Debug)]
enum Stream {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

impl Stream {
    fn file(&self) -> &File {
        match self {
            Stream::Reader(r) => r.get_ref(),
            Stream::Writer(w) => w.get_ref(),
        }
    }
}

/// Buffered stream descriptor
///
/// Character devices and FIFOs are never seekable or mappable, so this kind
/// only supports I/O in the direction it was opened for.
#[derive(Debug)]
pub struct BufferedDesc {
    stream: Mutex<Stream>,
    fd: RawFd,
}

impl BufferedDesc {
    pub fn reader(file: File) -> Self {
        let fd = file.as_raw_fd();
        Self {
            stream: Mutex::new(Stream::Reader(BufReader::new(file))),
            fd,
        }
    }

    pub fn writer(file: File) -> Self {
        let fd = file.as_raw_fd();
        Self {
            stream: Mutex::new(Stream::Writer(BufWriter::new(file))),
            fd,
        }
    }

    pub fn is_writer(&self) -> bool {
        matches!(*self.stream.lock(), Stream::Writer(_))
    }

    /// Rebuild a buffered descriptor from a transferred handle
    ///
    /// Direction is not carried across the transfer; the handle's access
    /// mode decides whether it becomes a reader or a writer.
    pub fn internalize(xfer: &mut TransferBuffer) -> KernelResult<Self> {
        let handle = xfer.take_handle().ok_or_else(|| {
            KernelError::io(
                "internalize buffered descriptor",
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transfer buffer has no handles left",
                ),
            )
        })?;
        let fd = take_ownership(handle)?;
        // SAFETY: F_GETFL only queries status flags of an owned descriptor.
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        let file = File::from(fd);
        if flags >= 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
            Ok(Self::writer(file))
        } else {
            Ok(Self::reader(file))
        }
    }
}

impl AsRawFd for BufferedDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Descriptor for BufferedDesc {
    fn kind(&self) -> DescKind {
        DescKind::BufferedIo
    }

    fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        match &mut *self.stream.lock() {
            Stream::Reader(r) => r
                .read(buf)
                .map_err(|e| KernelError::io("read buffered descriptor", e)),
            Stream::Writer(_) => Err(KernelError::io(
                "read from write-only stream",
                std::io::Error::from_raw_os_error(libc::EBADF),
            )),
        }
    }

    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        match &mut *self.stream.lock() {
            Stream::Writer(w) => w
                .write(buf)
                .map_err(|e| KernelError::io("write buffered descriptor", e)),
            Stream::Reader(_) => Err(KernelError::io(
                "write to read-only stream",
                std::io::Error::from_raw_os_error(libc::EBADF),
            )),
        }
    }

    fn seek(&self, _pos: SeekFrom) -> KernelResult<u64> {
        Err(KernelError::NotImplemented("seek"))
    }

    fn ioctl(&self, request: u64, arg: &mut [u8]) -> KernelResult<i32> {
        let stream = self.stream.lock();
        // SAFETY: `arg` is a live buffer the request may read and write.
        let rv = unsafe {
            libc::ioctl(
                stream.file().as_raw_fd(),
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
        let stream = self.stream.lock();
        let md = stream
            .file()
            .metadata()
            .map_err(|e| KernelError::io("fstat buffered descriptor", e))?;
        Ok(DescStat::from(&md))
    }

    fn flush(&self) -> KernelResult<()> {
        if let Stream::Writer(w) = &mut *self.stream.lock() {
            w.flush()
                .map_err(|e| KernelError::io("flush buffered descriptor", e))?;
        }
        Ok(())
    }

    fn externalize_size(&self) -> (usize, usize) {
        (0, 1)
    }

    fn externalize(&self, xfer: &mut TransferBuffer) -> KernelResult<()> {
        // pending output must reach the host before another process sees the handle
        self.flush()?;
        xfer.push_handle(self.fd);
        Ok(())
    }
}
