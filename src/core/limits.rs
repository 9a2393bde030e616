/*!
 * System Limits and Constants
 *
 * Centralized location for manifest, channel, mapping and daemon limits.
 * Organized by domain; values match the on-disk and on-wire formats that
 * manifests, snapshots and job commands already use.
 */

// =============================================================================
// MANIFEST LIMITS
// =============================================================================

/// Current manifest version string
pub const MANIFEST_VERSION: &str = "20140509";

/// Deprecated manifest version (8-field channel records, `Program` keyword)
pub const MANIFEST_VERSION_DEPRECATED: &str = "20130611";

/// Largest manifest accepted from a file or a job command (512KB)
pub const MANIFEST_SIZE_LIMIT: usize = 0x80000;

/// Smallest manifest file that can hold all obligatory keywords
pub const MANIFEST_MIN_SIZE: usize = 124;

/// Maximum number of manifest lines considered
pub const MANIFEST_LINES_LIMIT: usize = 0x2000;

/// Maximum number of comma separated tokens in one value
pub const MANIFEST_TOKENS_LIMIT: usize = 0x10;

/// Prefix marking a legacy network channel name
pub const NAME_PREFIX_NET: &str = "opaque";

/// Longest path a local domain socket can bind to
/// [LINUX-COMPAT] sizeof(sockaddr_un.sun_path)
pub const UNIX_PATH_MAX: usize = 108;

// =============================================================================
// CHANNEL LIMITS
// =============================================================================

/// Alias of the channel declared by the deprecated `Program` keyword
pub const BOOT_CHANNEL_ALIAS: &str = "/boot/elf";

/// Get count and get size granted to the deprecated boot channel
pub const BOOT_CHANNEL_LIMIT: i64 = 0x1000000;

/// Host null device, never preallocated and never truncated
pub const DEV_NULL: &str = "/dev/null";

/// Permissions for channel files created by the sandbox
/// [SECURITY] owner read/write only
pub const CHANNEL_RIGHTS: u32 = 0o600;

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Base offset for names in a manifest-mode channel buffer
pub const MANIFEST_NAMES_BASE: u64 = 0xfffe_0000;

/// Base offset for names in a snapshot-mode channel buffer
pub const SNAPSHOT_NAMES_BASE: u64 = 0;

// =============================================================================
// MEMORY MAPPING
// =============================================================================

/// Granularity of guest mappings (64KB)
/// Every map/unmap is applied one page of this size at a time
pub const MAP_PAGE_SIZE: usize = 0x10000;

/// Default guest address space reservation (256MB)
pub const DEFAULT_GUEST_SPACE: usize = 256 * 1024 * 1024;

// =============================================================================
// DESCRIPTOR TRANSFER
// =============================================================================

/// Maximum handles carried by one transfer message
pub const MAX_XFER_HANDLES: usize = 16;

/// Maximum payload bytes carried by one transfer message
pub const MAX_XFER_BYTES: usize = 0x10000;

// =============================================================================
// DAEMON
// =============================================================================

/// Size of the job command length prefix
pub const COMMAND_PREFIX_SIZE: usize = std::mem::size_of::<u64>();
