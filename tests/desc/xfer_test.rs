/*!
 * Handle Transfer Tests
 * Externalize, send over a local socket and internalize
 */

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::net::UnixStream;
use tempfile::NamedTempFile;

use sandbox_io::desc::{internalize, DescKind, Descriptor, HostIoDesc, TransferBuffer};
use sandbox_io::KernelError;

#[test]
fn test_descriptor_survives_transfer() {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(b"shared handle").unwrap();
    temp.flush().unwrap();
    let local = HostIoDesc::new(OpenOptions::new().read(true).open(temp.path()).unwrap());

    let (tx, rx) = UnixStream::pair().unwrap();
    let mut out = TransferBuffer::new();
    assert_eq!(local.externalize_size(), (0, 1));
    local.externalize(&mut out).unwrap();
    out.push_bytes(b"meta");
    out.send(&tx).unwrap();

    let mut incoming = TransferBuffer::recv(&rx).unwrap();
    assert_eq!(incoming.data(), b"meta");
    assert_eq!(incoming.remaining_handles(), 1);

    let remote = internalize(DescKind::HostIo, &mut incoming).unwrap();
    assert_eq!(incoming.remaining_handles(), 0);
    let mut buf = [0u8; 6];
    assert_eq!(remote.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf, b"shared");

    // the exporting side still owns a valid handle
    assert_eq!(local.stat().unwrap().size, 13);

    assert!(matches!(
        internalize(DescKind::HostIo, &mut incoming),
        Err(KernelError::Io { .. })
    ));
}

#[test]
fn test_buffered_direction_comes_from_handle() {
    let writer = OpenOptions::new().write(true).open("/dev/null").unwrap();
    let (tx, rx) = UnixStream::pair().unwrap();

    let mut out = TransferBuffer::new();
    out.push_handle(std::os::unix::io::AsRawFd::as_raw_fd(&writer));
    out.send(&tx).unwrap();

    let mut incoming = TransferBuffer::recv(&rx).unwrap();
    let desc = internalize(DescKind::BufferedIo, &mut incoming).unwrap();
    assert_eq!(desc.kind(), DescKind::BufferedIo);
    assert_eq!(desc.write(b"gone").unwrap(), 4);
    assert!(desc.read(&mut [0u8; 1]).is_err());
}
