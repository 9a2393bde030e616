/*!
 * Sandbox I/O Library
 * Channels, host descriptors, manifests and the job daemon
 */

pub mod channels;
pub mod core;
pub mod daemon;
pub mod desc;
pub mod manifest;
pub mod monitoring;
pub mod signals;

// Re-exports
pub use crate::core::{exit_codes, KernelError, KernelResult, SessionConfig};
pub use channels::{
    AccessType, Channel, ChannelSet, IntegrityTag, IoIntent, LimitKind, Protocol, Quota, SerialMode,
};
pub use daemon::{DaemonOutcome, Session, SessionReport};
pub use desc::{DescKind, DescRef, Descriptor, GuestAddressSpace, TransferBuffer};
pub use manifest::Manifest;
pub use monitoring::init_tracing;
pub use signals::SignalHandler;
