/*!
 * Descriptor Module
 * Reference-counted wrappers around host I/O handles
 */

pub mod buffered;
pub mod host_io;
pub mod space;
pub mod traits;
pub mod types;
pub mod xfer;

use std::sync::Arc;

use crate::core::KernelResult;

// Re-exports
pub use buffered::BufferedDesc;
pub use host_io::HostIoDesc;
pub use space::{map_anonymous, GuestAddressSpace};
pub use traits::{DescRef, Descriptor};
pub use types::{DescKind, DescStat, HostFileType, MapFlags, ProtFlags};
pub use xfer::{TransferBuffer, INVALID_HANDLE};

/// Rebuild a descriptor of `kind` from the next handle slot of `xfer`
///
/// The returned descriptor is freshly and uniquely owned.
pub fn internalize(kind: DescKind, xfer: &mut TransferBuffer) -> KernelResult<DescRef> {
    Ok(match kind {
        DescKind::HostIo => Arc::new(HostIoDesc::internalize(xfer)?),
        DescKind::BufferedIo => Arc::new(BufferedDesc::internalize(xfer)?),
    })
}
