/*!
 * Channel Set
 * Declaration-ordered collection of channels with alias-sorted views
 */

use tracing::{error, info};

use super::channel::{Channel, ChannelReport};
use super::serializer::{self, SerialMode};
use crate::core::{KernelError, KernelResult, SessionConfig};

/// All channels of one manifest, in declaration order
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a channel; aliases must be unique
    pub fn push(&mut self, channel: Channel) -> KernelResult<()> {
        if self.get(channel.alias()).is_some() {
            return Err(KernelError::semantic(format!(
                "duplicate channel alias {}",
                channel.alias()
            )));
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn get(&self, alias: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.alias() == alias)
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.alias() == alias)
    }

    /// Working view ordered by alias; declaration order is untouched
    pub fn sorted(&self) -> Vec<&Channel> {
        let mut view: Vec<&Channel> = self.channels.iter().collect();
        view.sort_by(|a, b| a.alias().cmp(b.alias()));
        view
    }

    pub fn sorted_mut(&mut self) -> Vec<&mut Channel> {
        let mut view: Vec<&mut Channel> = self.channels.iter_mut().collect();
        view.sort_by(|a, b| a.alias().cmp(b.alias()));
        view
    }

    /// Open every channel in declaration order, stopping at the first failure
    pub fn open_all(&mut self, config: &SessionConfig) -> KernelResult<()> {
        for channel in &mut self.channels {
            channel.open(config)?;
        }
        info!(channels = self.channels.len(), "channels constructed");
        Ok(())
    }

    /// Reopen retargeted channels and refresh the rest
    pub fn reconstruct(&mut self, config: &SessionConfig) -> KernelResult<()> {
        for channel in &mut self.channels {
            channel.reconstruct(config)?;
        }
        Ok(())
    }

    /// Trim every open channel to its guest data without closing it
    pub fn settle_all(&mut self, config: &SessionConfig) -> KernelResult<()> {
        for channel in &mut self.channels {
            channel.settle(config)?;
        }
        Ok(())
    }

    /// Close every channel; the first error is returned after all are closed
    pub fn close_all(&mut self, config: &SessionConfig) -> KernelResult<()> {
        let mut first = None;
        for channel in &mut self.channels {
            if let Err(e) = channel.close(config) {
                error!(alias = %channel.alias(), error = %e, "failed to close channel");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn reset_counters(&mut self) {
        self.channels.iter_mut().for_each(Channel::reset_counters);
    }

    /// Serialize in declaration order
    pub fn serialize(&self, mode: SerialMode) -> KernelResult<Vec<u8>> {
        let view: Vec<&Channel> = self.channels.iter().collect();
        serializer::serialize(&view, mode)
    }

    /// Serialize in alias order, matching [`ChannelSet::deserialize_sorted`]
    pub fn serialize_sorted(&self, mode: SerialMode) -> KernelResult<Vec<u8>> {
        serializer::serialize(&self.sorted(), mode)
    }

    pub fn deserialize_sorted(&mut self, buffer: &[u8], mode: SerialMode) -> KernelResult<()> {
        let mut view = self.sorted_mut();
        serializer::deserialize(&mut view, buffer, mode)
    }

    pub fn reports(&self) -> Vec<ChannelReport> {
        self.channels.iter().map(Channel::report).collect()
    }
}

impl IntoIterator for ChannelSet {
    type Item = Channel;
    type IntoIter = std::vec::IntoIter<Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_iter()
    }
}
