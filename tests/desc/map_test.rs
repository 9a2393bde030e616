/*!
 * Mapping Tests
 * Page-by-page host mappings inside the guest address space
 */

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use tempfile::NamedTempFile;

use sandbox_io::core::limits::MAP_PAGE_SIZE;
use sandbox_io::desc::{map_anonymous, Descriptor, GuestAddressSpace, HostIoDesc, MapFlags, ProtFlags};
use sandbox_io::KernelError;

fn page_file(fill: impl Fn(usize) -> u8) -> (NamedTempFile, HostIoDesc) {
    let temp = NamedTempFile::new().unwrap();
    let content: Vec<u8> = (0..MAP_PAGE_SIZE).map(fill).collect();
    std::fs::write(temp.path(), &content).unwrap();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(temp.path())
        .unwrap();
    (temp, HostIoDesc::new(file))
}

fn mapped_bytes<'a>(addr: usize, len: usize) -> &'a [u8] {
    unsafe { std::slice::from_raw_parts(addr as *const u8, len) }
}

#[test]
fn test_map_file_read_only() {
    let (_temp, desc) = page_file(|i| (i % 251) as u8);
    let mut space = GuestAddressSpace::reserve(4 * MAP_PAGE_SIZE).unwrap();

    let addr = desc
        .map(&mut space, None, MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE, 0)
        .unwrap();
    assert_eq!(addr, space.base());
    assert!(space.is_mapped(addr));

    let bytes = mapped_bytes(addr, MAP_PAGE_SIZE);
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[300], (300 % 251) as u8);

    desc.unmap(&mut space, addr, MAP_PAGE_SIZE).unwrap();
    assert!(!space.is_mapped(addr));
    assert_eq!(space.mapped_pages(), 0);
}

#[test]
fn test_shared_write_reaches_file() {
    let (temp, desc) = page_file(|_| 0);
    let mut space = GuestAddressSpace::reserve(2 * MAP_PAGE_SIZE).unwrap();

    let addr = desc
        .map(&mut space, None, MAP_PAGE_SIZE, ProtFlags::PROT_READ_WRITE, MapFlags::SHARED, 0)
        .unwrap();
    unsafe { std::ptr::copy_nonoverlapping(b"mapped".as_ptr(), addr as *mut u8, 6) };
    space.unmap(addr, MAP_PAGE_SIZE).unwrap();

    let mut file = std::fs::File::open(temp.path()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut head = [0u8; 6];
    file.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"mapped");
}

#[test]
fn test_executable_mapping_rejected() {
    let (_temp, desc) = page_file(|_| 0x90);
    let mut space = GuestAddressSpace::reserve(MAP_PAGE_SIZE).unwrap();

    let prot = ProtFlags { read: true, write: false, exec: true };
    assert!(matches!(
        desc.map(&mut space, None, MAP_PAGE_SIZE, prot, MapFlags::PRIVATE, 0),
        Err(KernelError::InvalidArgument(_))
    ));
    assert_eq!(space.mapped_pages(), 0);
}

#[test]
fn test_out_of_address_space() {
    let mut space = GuestAddressSpace::reserve(2 * MAP_PAGE_SIZE).unwrap();
    let err = map_anonymous(
        &mut space,
        None,
        3 * MAP_PAGE_SIZE,
        ProtFlags::PROT_READ_WRITE,
        MapFlags::PRIVATE,
    )
    .unwrap_err();
    assert!(matches!(err, KernelError::OutOfAddressSpace(_)));
}

#[test]
fn test_free_runs_are_found_after_existing_mappings() {
    let mut space = GuestAddressSpace::reserve(4 * MAP_PAGE_SIZE).unwrap();
    let first = map_anonymous(&mut space, None, MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE)
        .unwrap();
    let second = map_anonymous(&mut space, None, 2 * MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE)
        .unwrap();
    assert_eq!(second, first + MAP_PAGE_SIZE);
    assert_eq!(space.mapped_pages(), 3);
}

#[test]
fn test_fixed_mapping_replaces_page() {
    let (_temp, desc) = page_file(|_| 0xab);
    let mut space = GuestAddressSpace::reserve(2 * MAP_PAGE_SIZE).unwrap();
    let target = space.base() + MAP_PAGE_SIZE;

    let anon = map_anonymous(
        &mut space,
        Some(target),
        MAP_PAGE_SIZE,
        ProtFlags::PROT_READ_WRITE,
        MapFlags::PRIVATE.fixed(),
    )
    .unwrap();
    assert_eq!(anon, target);
    assert_eq!(mapped_bytes(target, 1)[0], 0);

    let file = desc
        .map(&mut space, Some(target), MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE.fixed(), 0)
        .unwrap();
    assert_eq!(file, target);
    assert_eq!(mapped_bytes(target, 1)[0], 0xab);
    assert_eq!(space.mapped_pages(), 1);
}

#[test]
fn test_fixed_mapping_outside_space_rejected() {
    let mut space = GuestAddressSpace::reserve(MAP_PAGE_SIZE).unwrap();
    let outside = space.base() + MAP_PAGE_SIZE;
    assert!(matches!(
        map_anonymous(&mut space, Some(outside), MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE.fixed()),
        Err(KernelError::InvalidArgument(_))
    ));
}

#[test]
fn test_guest_unmap_is_checked() {
    let mut space = GuestAddressSpace::reserve(2 * MAP_PAGE_SIZE).unwrap();
    let base = space.base();
    assert!(matches!(
        space.unmap(base + 1, MAP_PAGE_SIZE),
        Err(KernelError::InvalidArgument(_))
    ));
    assert!(matches!(
        space.unmap(base, 3 * MAP_PAGE_SIZE),
        Err(KernelError::InvalidArgument(_))
    ));
}

#[test]
fn test_unaligned_offset_rejected() {
    let (_temp, desc) = page_file(|_| 0);
    let mut space = GuestAddressSpace::reserve(MAP_PAGE_SIZE).unwrap();
    assert!(matches!(
        desc.map(&mut space, None, MAP_PAGE_SIZE, ProtFlags::PROT_READ, MapFlags::PRIVATE, 4096),
        Err(KernelError::InvalidArgument(_))
    ));
}
