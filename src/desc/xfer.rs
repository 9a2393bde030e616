/*!
 * Descriptor Transfer Buffers
 * Byte payload plus OS handle slots used to move descriptors across processes
 */

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use tracing::{debug, warn};

use crate::core::limits::{MAX_XFER_BYTES, MAX_XFER_HANDLES};
use crate::core::{KernelError, KernelResult};

/// Marker for a handle slot that has already been consumed
pub const INVALID_HANDLE: RawFd = -1;

const FRAME_HEADER: usize = std::mem::size_of::<u32>();

/// Transfer buffer
///
/// Exporters append handles with [`push_handle`](Self::push_handle); importers
/// consume them in order with [`take_handle`](Self::take_handle). A buffer
/// received from another process owns its handles and closes whichever ones
/// were never taken.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    data: Vec<u8>,
    handles: Vec<RawFd>,
    next_handle: usize,
    owns_handles: bool,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that owns `handles`, as if they had just been received
    pub fn from_owned_handles(handles: Vec<OwnedFd>) -> Self {
        use std::os::unix::io::IntoRawFd;
        Self {
            data: Vec::new(),
            handles: handles.into_iter().map(IntoRawFd::into_raw_fd).collect(),
            next_handle: 0,
            owns_handles: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn push_handle(&mut self, handle: RawFd) {
        self.handles.push(handle);
    }

    /// Consume the next handle slot
    ///
    /// The slot is overwritten with [`INVALID_HANDLE`]; the caller becomes
    /// responsible for the returned handle.
    pub fn take_handle(&mut self) -> Option<RawFd> {
        let slot = self.handles.get_mut(self.next_handle)?;
        let handle = std::mem::replace(slot, INVALID_HANDLE);
        self.next_handle += 1;
        Some(handle)
    }

    pub fn handles(&self) -> &[RawFd] {
        &self.handles
    }

    pub fn remaining_handles(&self) -> usize {
        self.handles.len() - self.next_handle
    }

    /// Send payload and handles over a local domain socket
    pub fn send(&self, socket: &UnixStream) -> KernelResult<usize> {
        if self.handles.len() > MAX_XFER_HANDLES {
            return Err(KernelError::InvalidArgument(format!(
                "cannot transfer {} handles (limit {})",
                self.handles.len(),
                MAX_XFER_HANDLES
            )));
        }
        if self.data.len() > MAX_XFER_BYTES {
            return Err(KernelError::InvalidArgument(format!(
                "cannot transfer {} bytes (limit {})",
                self.data.len(),
                MAX_XFER_BYTES
            )));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER + self.data.len());
        frame.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.data);

        let iov = [IoSlice::new(&frame)];
        let rights = [ControlMessage::ScmRights(&self.handles)];
        let cmsgs: &[ControlMessage] = if self.handles.is_empty() {
            &[]
        } else {
            &rights
        };

        let sent = sendmsg::<()>(socket.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None)
            .map_err(|e| KernelError::errno("sendmsg transfer buffer", e))?;
        if sent < frame.len() {
            // handles travel with the first byte, only the frame tail is left
            let mut stream: &UnixStream = socket;
            stream
                .write_all(&frame[sent..])
                .map_err(|e| KernelError::io("write transfer payload", e))?;
        }

        debug!(
            bytes = self.data.len(),
            handles = self.handles.len(),
            "Transfer buffer sent"
        );
        Ok(self.data.len())
    }

    /// Receive a buffer sent with [`send`](Self::send)
    pub fn recv(socket: &UnixStream) -> KernelResult<Self> {
        let mut frame = vec![0u8; FRAME_HEADER + MAX_XFER_BYTES];
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_XFER_HANDLES]);

        let (received, handles) = {
            let mut iov = [IoSliceMut::new(&mut frame)];
            let msg = recvmsg::<()>(
                socket.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_space),
                MsgFlags::MSG_CMSG_CLOEXEC,
            )
            .map_err(|e| KernelError::errno("recvmsg transfer buffer", e))?;

            let mut handles = Vec::new();
            for cmsg in msg
                .cmsgs()
                .map_err(|e| KernelError::errno("transfer control data truncated", e))?
            {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    handles.extend(fds);
                }
            }
            (msg.bytes, handles)
        };

        // take ownership before any further failure so nothing leaks
        let mut buffer = Self {
            data: Vec::new(),
            handles,
            next_handle: 0,
            owns_handles: true,
        };

        if received < FRAME_HEADER {
            return Err(KernelError::io(
                "transfer buffer header",
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            ));
        }
        let mut header = [0u8; FRAME_HEADER];
        header.copy_from_slice(&frame[..FRAME_HEADER]);
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_XFER_BYTES {
            return Err(KernelError::protocol(format!(
                "transfer payload of {} bytes exceeds limit",
                len
            )));
        }

        let have = (received - FRAME_HEADER).min(len);
        buffer.data.extend_from_slice(&frame[FRAME_HEADER..FRAME_HEADER + have]);
        if have < len {
            let mut rest = vec![0u8; len - have];
            let mut stream: &UnixStream = socket;
            stream
                .read_exact(&mut rest)
                .map_err(|e| KernelError::io("read transfer payload", e))?;
            buffer.data.extend_from_slice(&rest);
        }

        debug!(
            bytes = buffer.data.len(),
            handles = buffer.handles.len(),
            "Transfer buffer received"
        );
        Ok(buffer)
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        if !self.owns_handles {
            return;
        }
        for handle in self.handles.drain(self.next_handle..) {
            if handle == INVALID_HANDLE {
                continue;
            }
            warn!(handle, "Closing transferred handle that was never internalized");
            // SAFETY: received handles are owned by this buffer until taken.
            drop(unsafe { OwnedFd::from_raw_fd(handle) });
        }
    }
}
