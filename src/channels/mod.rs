/*!
 * Channels Module
 * Quota-limited bindings between guest aliases and host resources
 */

pub mod channel;
mod preload;
pub mod serializer;
pub mod set;
pub mod tag;
pub mod types;

// Re-exports
pub use channel::{Channel, ChannelReport};
pub use serializer::{ChannelRecord, SerialMode};
pub use set::ChannelSet;
pub use tag::IntegrityTag;
pub use types::{AccessType, ChannelState, IoIntent, LimitKind, Protocol, Quota};
