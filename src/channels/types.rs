/*!
 * Channel Types
 * Protocols, access patterns and quota vectors
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

use crate::core::{KernelError, KernelResult};
use crate::desc::HostFileType;

/// Kind of host resource behind a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Regular,
    Directory,
    Character,
    Block,
    Fifo,
    Link,
    Socket,
    /// Legacy network channel; the name is kept but never opened
    Opaque,
}

impl Protocol {
    /// Classify an existing host resource
    pub fn from_file_type(ft: HostFileType) -> Option<Self> {
        match ft {
            HostFileType::File => Some(Protocol::Regular),
            HostFileType::Directory => Some(Protocol::Directory),
            HostFileType::CharDevice => Some(Protocol::Character),
            HostFileType::BlockDevice => Some(Protocol::Block),
            HostFileType::Fifo => Some(Protocol::Fifo),
            HostFileType::Symlink => Some(Protocol::Link),
            HostFileType::Socket => Some(Protocol::Socket),
            HostFileType::Unknown => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Protocol::Regular => "regular",
            Protocol::Directory => "directory",
            Protocol::Character => "character",
            Protocol::Block => "block",
            Protocol::Fifo => "fifo",
            Protocol::Link => "link",
            Protocol::Socket => "socket",
            Protocol::Opaque => "opaque",
        };
        f.write_str(s)
    }
}

/// Get/put ordering pattern declared for a channel
///
/// Discriminants are the manifest access-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AccessType {
    SeqGetSeqPut = 0,
    RndGetSeqPut = 1,
    SeqGetRndPut = 2,
    RndGetRndPut = 3,
}

impl AccessType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_random_get(self) -> bool {
        matches!(self, AccessType::RndGetSeqPut | AccessType::RndGetRndPut)
    }

    pub fn is_random_put(self) -> bool {
        matches!(self, AccessType::SeqGetRndPut | AccessType::RndGetRndPut)
    }

    /// True if either direction may seek
    pub fn is_random(self) -> bool {
        self.is_random_get() || self.is_random_put()
    }
}

impl TryFrom<i64> for AccessType {
    type Error = KernelError;

    fn try_from(code: i64) -> KernelResult<Self> {
        match code {
            0 => Ok(AccessType::SeqGetSeqPut),
            1 => Ok(AccessType::RndGetSeqPut),
            2 => Ok(AccessType::SeqGetRndPut),
            3 => Ok(AccessType::RndGetRndPut),
            other => Err(KernelError::semantic(format!(
                "invalid access type {}",
                other
            ))),
        }
    }
}

/// One quota dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Gets = 0,
    GetSize = 1,
    Puts = 2,
    PutSize = 3,
}

impl LimitKind {
    pub const ALL: [LimitKind; 4] = [
        LimitKind::Gets,
        LimitKind::GetSize,
        LimitKind::Puts,
        LimitKind::PutSize,
    ];
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LimitKind::Gets => "get count",
            LimitKind::GetSize => "get bytes",
            LimitKind::Puts => "put count",
            LimitKind::PutSize => "put bytes",
        };
        f.write_str(s)
    }
}

/// Four-dimensional quota vector, used for both limits and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quota([i64; 4]);

impl Quota {
    pub const ZERO: Quota = Quota([0; 4]);

    pub fn new(gets: i64, get_size: i64, puts: i64, put_size: i64) -> Self {
        Self([gets, get_size, puts, put_size])
    }

    pub fn from_array(values: [i64; 4]) -> Self {
        Self(values)
    }

    pub fn as_array(&self) -> [i64; 4] {
        self.0
    }

    /// Both get dimensions are non-zero
    pub fn allows_get(&self) -> bool {
        self[LimitKind::Gets] != 0 && self[LimitKind::GetSize] != 0
    }

    /// Both put dimensions are non-zero
    pub fn allows_put(&self) -> bool {
        self[LimitKind::Puts] != 0 && self[LimitKind::PutSize] != 0
    }
}

impl Index<LimitKind> for Quota {
    type Output = i64;

    fn index(&self, kind: LimitKind) -> &i64 {
        &self.0[kind as usize]
    }
}

impl IndexMut<LimitKind> for Quota {
    fn index_mut(&mut self, kind: LimitKind) -> &mut i64 {
        &mut self.0[kind as usize]
    }
}

/// I/O direction implied by a channel's limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoIntent {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl IoIntent {
    pub fn from_limits(limits: &Quota) -> Option<Self> {
        match (limits.allows_get(), limits.allows_put()) {
            (true, false) => Some(IoIntent::ReadOnly),
            (false, true) => Some(IoIntent::WriteOnly),
            (true, true) => Some(IoIntent::ReadWrite),
            (false, false) => None,
        }
    }
}

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Declared,
    ProtocolDetected,
    Opened,
    Active,
    Closed,
}
