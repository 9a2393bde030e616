/*!
 * Descriptor Types
 * Host file types, stat records and mapping flags
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

/// Concrete descriptor implementation, chosen when the descriptor is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescKind {
    /// Unbuffered host file handle
    HostIo,
    /// Buffered one-directional stream over a character device or FIFO
    BufferedIo,
}

/// Host file type as reported by stat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFileType {
    File,
    Directory,
    Symlink,
    #[serde(rename = "block_device")]
    BlockDevice,
    #[serde(rename = "char_device")]
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl Default for HostFileType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<fs::FileType> for HostFileType {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_file() {
            HostFileType::File
        } else if ft.is_dir() {
            HostFileType::Directory
        } else if ft.is_char_device() {
            HostFileType::CharDevice
        } else if ft.is_block_device() {
            HostFileType::BlockDevice
        } else if ft.is_fifo() {
            HostFileType::Fifo
        } else if ft.is_symlink() {
            HostFileType::Symlink
        } else if ft.is_socket() {
            HostFileType::Socket
        } else {
            HostFileType::Unknown
        }
    }
}

impl fmt::Display for HostFileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostFileType::File => write!(f, "file"),
            HostFileType::Directory => write!(f, "directory"),
            HostFileType::Symlink => write!(f, "symlink"),
            HostFileType::BlockDevice => write!(f, "block device"),
            HostFileType::CharDevice => write!(f, "char device"),
            HostFileType::Fifo => write!(f, "fifo"),
            HostFileType::Socket => write!(f, "socket"),
            HostFileType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Stat record for an open descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescStat {
    pub file_type: HostFileType,
    pub size: u64,
    pub mode: u32,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl From<&fs::Metadata> for DescStat {
    fn from(md: &fs::Metadata) -> Self {
        Self {
            file_type: md.file_type().into(),
            size: md.len(),
            mode: md.mode(),
            dev: md.dev(),
            ino: md.ino(),
            nlink: md.nlink(),
            uid: md.uid(),
            gid: md.gid(),
            blksize: md.blksize(),
            atime: md.atime(),
            mtime: md.mtime(),
            ctime: md.ctime(),
        }
    }
}

/// Memory mapping protection flags (similar to POSIX mmap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl ProtFlags {
    pub const PROT_READ: Self = Self {
        read: true,
        write: false,
        exec: false,
    };

    pub const PROT_READ_WRITE: Self = Self {
        read: true,
        write: true,
        exec: false,
    };

    /// Never granted to guest mappings
    pub const PROT_EXEC: Self = Self {
        read: false,
        write: false,
        exec: true,
    };

    /// Host protection bits
    pub(crate) fn to_native(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.read {
            prot |= libc::PROT_READ;
        }
        if self.write {
            prot |= libc::PROT_WRITE;
        }
        if self.exec {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// Memory mapping flags (similar to POSIX mmap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFlags {
    /// Shared mapping - writes reach the underlying resource
    pub shared: bool,
    /// Map exactly at the requested start address
    pub fixed: bool,
}

impl MapFlags {
    pub const SHARED: Self = Self {
        shared: true,
        fixed: false,
    };

    pub const PRIVATE: Self = Self {
        shared: false,
        fixed: false,
    };

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    /// Host sharing bits; placement is handled by the guest address space
    pub(crate) fn to_native(self) -> libc::c_int {
        if self.shared {
            libc::MAP_SHARED
        } else {
            libc::MAP_PRIVATE
        }
    }
}
