/*!
 * Descriptor Traits
 * Capability-polymorphic interface over one open host handle
 */

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use super::space::GuestAddressSpace;
use super::types::{DescKind, DescStat, MapFlags, ProtFlags};
use super::xfer::TransferBuffer;
use crate::core::{KernelError, KernelResult};

/// Shared, reference-counted descriptor
pub type DescRef = Arc<dyn Descriptor>;

/// Descriptor trait
///
/// Every implementation wraps exactly one host handle and closes it exactly
/// once, when the last reference is dropped. The synchronization, messaging
/// and socket capabilities at the bottom of the trait exist so that callers
/// dispatching guest requests get an explicit `NotImplemented` instead of a
/// silent success; plain I/O descriptors never override them.
pub trait Descriptor: Send + Sync + fmt::Debug {
    /// Implementation kind, used to pick the matching internalizer
    fn kind(&self) -> DescKind;

    fn read(&self, buf: &mut [u8]) -> KernelResult<usize>;

    fn write(&self, buf: &[u8]) -> KernelResult<usize>;

    fn seek(&self, pos: SeekFrom) -> KernelResult<u64>;

    /// Pass-through ioctl; `arg` is the request's in/out argument block
    fn ioctl(&self, request: u64, arg: &mut [u8]) -> KernelResult<i32>;

    fn stat(&self) -> KernelResult<DescStat>;

    /// Set the length of the underlying resource
    fn truncate(&self, _len: u64) -> KernelResult<()> {
        Err(KernelError::NotImplemented("truncate"))
    }

    /// Push buffered data to the host
    fn flush(&self) -> KernelResult<()> {
        Ok(())
    }

    /// Map `len` bytes at `offset` into the guest address space
    ///
    /// Without `MapFlags::fixed` the descriptor reserves a free region
    /// itself; `start` is then only a hint.
    fn map(
        &self,
        _space: &mut GuestAddressSpace,
        _start: Option<usize>,
        _len: usize,
        _prot: ProtFlags,
        _flags: MapFlags,
        _offset: u64,
    ) -> KernelResult<usize> {
        Err(KernelError::NotImplemented("map"))
    }

    /// Guest-invoked unmap; the region must lie inside the guest space
    fn unmap(&self, space: &mut GuestAddressSpace, addr: usize, len: usize) -> KernelResult<()> {
        space.unmap(addr, len)
    }

    fn getdents(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::NotImplemented("getdents"))
    }

    /// Bytes and OS handles needed to transfer this descriptor
    fn externalize_size(&self) -> (usize, usize);

    /// Append this descriptor's host handle to `xfer`
    ///
    /// The local descriptor stays open and valid for the exporting process.
    fn externalize(&self, xfer: &mut TransferBuffer) -> KernelResult<()>;

    fn lock(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("lock"))
    }

    fn try_lock(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("try_lock"))
    }

    fn unlock(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("unlock"))
    }

    fn wait(&self, _mutex: &dyn Descriptor) -> KernelResult<()> {
        Err(KernelError::NotImplemented("wait"))
    }

    fn timed_wait_abs(&self, _mutex: &dyn Descriptor, _deadline: SystemTime) -> KernelResult<()> {
        Err(KernelError::NotImplemented("timed_wait_abs"))
    }

    fn signal(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("signal"))
    }

    fn broadcast(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("broadcast"))
    }

    fn send_msg(&self, _data: &[u8], _xfer: &TransferBuffer) -> KernelResult<usize> {
        Err(KernelError::NotImplemented("send_msg"))
    }

    fn recv_msg(&self, _buf: &mut [u8]) -> KernelResult<(usize, TransferBuffer)> {
        Err(KernelError::NotImplemented("recv_msg"))
    }

    fn connect_addr(&self) -> KernelResult<DescRef> {
        Err(KernelError::NotImplemented("connect_addr"))
    }

    fn accept_conn(&self) -> KernelResult<DescRef> {
        Err(KernelError::NotImplemented("accept_conn"))
    }

    fn post(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("post"))
    }

    fn sem_wait(&self) -> KernelResult<()> {
        Err(KernelError::NotImplemented("sem_wait"))
    }

    fn get_value(&self) -> KernelResult<i32> {
        Err(KernelError::NotImplemented("get_value"))
    }
}
