/*!
 * Channel
 * One quota-limited binding between a guest alias and a host resource
 */

use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use tracing::trace;

use super::tag::IntegrityTag;
use super::types::{AccessType, ChannelState, IoIntent, LimitKind, Protocol, Quota};
use crate::core::{KernelError, KernelResult};
use crate::desc::DescRef;

/// A manifest-declared channel
///
/// Declaration fields (alias, access type, limits) never change after
/// parsing. Everything else is runtime state owned by the session.
#[derive(Debug)]
pub struct Channel {
    pub(super) alias: String,
    pub(super) name: String,
    pub(super) protocol: Protocol,
    pub(super) access: AccessType,
    pub(super) limits: Quota,
    pub(super) counters: Quota,
    pub(super) handle: Option<DescRef>,
    pub(super) size: i64,
    pub(super) put_position: i64,
    pub(super) get_position: i64,
    pub(super) tag: Option<IntegrityTag>,
    pub(super) state: ChannelState,
    /// Name changed since the handle was opened
    pub(super) stale: bool,
}

/// Serializable per-channel summary for the session report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub alias: String,
    pub name: String,
    pub protocol: Protocol,
    pub access: AccessType,
    pub limits: Quota,
    pub counters: Quota,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Channel {
    pub fn new(
        alias: impl Into<String>,
        name: impl Into<String>,
        protocol: Protocol,
        access: AccessType,
        limits: Quota,
    ) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
            protocol,
            access,
            limits,
            counters: Quota::ZERO,
            handle: None,
            size: 0,
            put_position: 0,
            get_position: 0,
            tag: None,
            state: ChannelState::Declared,
            stale: false,
        }
    }

    /// Carry a put position over from earlier session state
    pub fn with_put_position(mut self, position: i64) -> Self {
        self.put_position = position;
        self
    }

    pub fn with_tag(mut self, tag: IntegrityTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn access_type(&self) -> AccessType {
        self.access
    }

    pub fn limits(&self) -> &Quota {
        &self.limits
    }

    pub fn counters(&self) -> &Quota {
        &self.counters
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn put_position(&self) -> i64 {
        self.put_position
    }

    pub fn get_position(&self) -> i64 {
        self.get_position
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn handle(&self) -> Option<&DescRef> {
        self.handle.as_ref()
    }

    pub fn tag(&self) -> Option<&IntegrityTag> {
        self.tag.as_ref()
    }

    pub fn intent(&self) -> Option<IoIntent> {
        IoIntent::from_limits(&self.limits)
    }

    pub fn is_readable(&self) -> bool {
        self.limits.allows_get()
    }

    pub fn is_writable(&self) -> bool {
        self.limits.allows_put()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn reset_counters(&mut self) {
        self.counters = Quota::ZERO;
    }

    /// Point the channel at a new host resource
    ///
    /// `protocol` is the one declared for `name`. An opaque declaration
    /// replaces whatever was detected; any other is detected again on
    /// reopen. An open handle stays in place until the next construction
    /// pass notices the change.
    pub fn retarget(&mut self, name: impl Into<String>, protocol: Protocol) {
        let name = name.into();
        let opacity_changed = (protocol == Protocol::Opaque) != (self.protocol == Protocol::Opaque);
        if name != self.name || opacity_changed {
            self.stale = self.handle.is_some();
            self.name = name;
            self.protocol = protocol;
        }
    }

    pub fn set_tag(&mut self, tag: Option<IntegrityTag>) {
        self.tag = tag;
    }

    /// Guest read of up to `buf.len()` bytes
    ///
    /// `offset` is honoured only by random-get channels; sequential channels
    /// continue from their own get position.
    pub fn get(&mut self, buf: &mut [u8], offset: i64) -> KernelResult<usize> {
        if !self.is_readable() {
            return Err(KernelError::InvalidArgument(format!(
                "{} is not readable",
                self.alias
            )));
        }
        let handle = self.active_handle()?;
        self.check_quota(LimitKind::Gets, LimitKind::GetSize, buf.len())?;

        let position = if self.access.is_random_get() {
            check_offset(&self.alias, offset)?
        } else {
            self.get_position
        };
        if self.protocol == Protocol::Regular {
            handle.seek(SeekFrom::Start(position as u64))?;
        }

        let read = handle.read(buf)?;
        self.counters[LimitKind::Gets] += 1;
        self.counters[LimitKind::GetSize] += read as i64;
        self.get_position = position + read as i64;
        if let Some(tag) = self.tag.as_mut() {
            tag.update(&buf[..read]);
        }
        self.state = ChannelState::Active;

        trace!(alias = %self.alias, position, read, "channel get");
        Ok(read)
    }

    /// Guest write of `buf`
    ///
    /// `offset` is honoured only by random-put channels; sequential channels
    /// append at their put position.
    pub fn put(&mut self, buf: &[u8], offset: i64) -> KernelResult<usize> {
        if !self.is_writable() {
            return Err(KernelError::InvalidArgument(format!(
                "{} is not writable",
                self.alias
            )));
        }
        let handle = self.active_handle()?;
        self.check_quota(LimitKind::Puts, LimitKind::PutSize, buf.len())?;

        let position = if self.access.is_random_put() {
            check_offset(&self.alias, offset)?
        } else {
            self.put_position
        };
        if self.protocol == Protocol::Regular {
            handle.seek(SeekFrom::Start(position as u64))?;
        }

        let written = handle.write(buf)?;
        self.counters[LimitKind::Puts] += 1;
        self.counters[LimitKind::PutSize] += written as i64;
        let end = position + written as i64;
        self.put_position = end;
        if self.protocol == Protocol::Regular {
            self.size = self.size.max(end);
        }
        if let Some(tag) = self.tag.as_mut() {
            tag.update(&buf[..written]);
        }
        self.state = ChannelState::Active;

        trace!(alias = %self.alias, position, written, "channel put");
        Ok(written)
    }

    pub fn report(&self) -> ChannelReport {
        ChannelReport {
            alias: self.alias.clone(),
            name: self.name.clone(),
            protocol: self.protocol,
            access: self.access,
            limits: self.limits,
            counters: self.counters,
            size: self.size,
            digest: self.tag.as_ref().map(IntegrityTag::digest),
        }
    }

    fn active_handle(&self) -> KernelResult<DescRef> {
        self.handle
            .clone()
            .ok_or_else(|| KernelError::InvalidArgument(format!("{} is not open", self.alias)))
    }

    /// Reject an operation that would push either counter past its limit
    fn check_quota(&self, count: LimitKind, bytes: LimitKind, len: usize) -> KernelResult<()> {
        let requested = self.counters[count] + 1;
        if requested > self.limits[count] {
            return Err(self.quota_error(count, requested));
        }
        let requested = self.counters[bytes].saturating_add(len as i64);
        if requested > self.limits[bytes] {
            return Err(self.quota_error(bytes, requested));
        }
        Ok(())
    }

    fn quota_error(&self, kind: LimitKind, requested: i64) -> KernelError {
        KernelError::Quota {
            alias: self.alias.clone(),
            kind,
            requested,
            limit: self.limits[kind],
        }
    }
}

fn check_offset(alias: &str, offset: i64) -> KernelResult<i64> {
    if offset < 0 {
        return Err(KernelError::InvalidArgument(format!(
            "negative offset {} on {}",
            offset, alias
        )));
    }
    Ok(offset)
}
