/*!
 * Channel-Set Serializer
 * Relocatable binary export of channel declarations and counters
 *
 * Layout (little-endian):
 *   u64 total                    bytes after this header
 *   record[n]                    56 bytes each
 *   names                        NUL-terminated aliases, in record order
 *
 * record = { u32 type, u32 pad, i64 stats[4], u64 size, u64 name_offset }
 */

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::channel::Channel;
use super::types::{AccessType, Quota};
use crate::core::limits::{MANIFEST_NAMES_BASE, SNAPSHOT_NAMES_BASE};
use crate::core::{KernelError, KernelResult};

pub const HEADER_SIZE: usize = 8;
pub const RECORD_SIZE: usize = 56;

/// Which half of the channel state travels in the stats field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialMode {
    /// Declared limits; size only for random-access channels
    Manifest,
    /// Live counters and current sizes
    Snapshot,
}

impl SerialMode {
    /// Base added to every name offset
    pub fn base(self) -> u64 {
        match self {
            SerialMode::Manifest => MANIFEST_NAMES_BASE,
            SerialMode::Snapshot => SNAPSHOT_NAMES_BASE,
        }
    }
}

/// One decoded record together with its alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub access: u32,
    pub stats: [i64; 4],
    pub size: u64,
    pub name_offset: u64,
    pub alias: String,
}

/// Serialize `channels` in the given order
pub fn serialize(channels: &[&Channel], mode: SerialMode) -> KernelResult<Vec<u8>> {
    serialize_with_base(channels, mode, mode.base())
}

/// Serialize with an explicit name offset base
pub fn serialize_with_base(
    channels: &[&Channel],
    mode: SerialMode,
    base: u64,
) -> KernelResult<Vec<u8>> {
    let records_len = channels.len() * RECORD_SIZE;
    let names_len: usize = channels.iter().map(|c| c.alias().len() + 1).sum();
    let total = records_len + names_len;

    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(HEADER_SIZE + total).map_err(|_| {
        KernelError::OutOfMemory(format!("cannot allocate {} bytes for channels", total))
    })?;

    buf.put_u64_le(total as u64);

    let mut name_offset = base + records_len as u64;
    for channel in channels {
        let stats = match mode {
            SerialMode::Manifest => channel.limits(),
            SerialMode::Snapshot => channel.counters(),
        };
        let size = match mode {
            SerialMode::Manifest if !channel.access_type().is_random() => 0,
            _ => channel.size().max(0) as u64,
        };

        buf.put_u32_le(channel.access_type().code());
        buf.put_u32_le(0);
        for value in stats.as_array() {
            buf.put_i64_le(value);
        }
        buf.put_u64_le(size);
        buf.put_u64_le(name_offset);
        name_offset += channel.alias().len() as u64 + 1;
    }

    for channel in channels {
        buf.put_slice(channel.alias().as_bytes());
        buf.put_u8(0);
    }

    buf.shrink_to_fit();
    debug!(channels = channels.len(), bytes = buf.len(), ?mode, "channels serialized");
    Ok(buf)
}

/// Decode `count` records and their aliases
pub fn decode(buffer: &[u8], count: usize) -> KernelResult<Vec<ChannelRecord>> {
    if buffer.len() < HEADER_SIZE {
        return Err(KernelError::protocol("serialized channels: missing header"));
    }
    let mut header = &buffer[..HEADER_SIZE];
    let total = header.get_u64_le() as usize;
    let body = &buffer[HEADER_SIZE..];
    let records_len = count
        .checked_mul(RECORD_SIZE)
        .ok_or_else(|| KernelError::protocol("serialized channels: record count overflow"))?;
    if body.len() < total || total < records_len {
        return Err(KernelError::protocol(format!(
            "serialized channels: {} bytes cannot hold {} records",
            body.len().min(total),
            count
        )));
    }

    let (mut records, mut names) = body[..total].split_at(records_len);
    let mut decoded = Vec::with_capacity(count);
    for _ in 0..count {
        let access = records.get_u32_le();
        records.advance(4);
        let mut stats = [0i64; 4];
        for value in &mut stats {
            *value = records.get_i64_le();
        }
        let size = records.get_u64_le();
        let name_offset = records.get_u64_le();

        let end = names
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| KernelError::protocol("serialized channels: unterminated alias"))?;
        let alias = std::str::from_utf8(&names[..end])
            .map_err(|_| KernelError::protocol("serialized channels: alias is not utf-8"))?
            .to_string();
        names = &names[end + 1..];

        decoded.push(ChannelRecord {
            access,
            stats,
            size,
            name_offset,
            alias,
        });
    }
    Ok(decoded)
}

/// Overwrite positionally aligned channels from a serialized buffer
///
/// Both sides must already be sorted by alias. The first alias mismatch
/// aborts; channels before it stay updated.
pub fn deserialize(
    channels: &mut [&mut Channel],
    buffer: &[u8],
    mode: SerialMode,
) -> KernelResult<()> {
    let records = decode(buffer, channels.len())?;
    for (channel, record) in channels.iter_mut().zip(records) {
        if channel.alias != record.alias {
            return Err(KernelError::protocol(format!(
                "serialized channels: expected alias {}, found {}",
                channel.alias, record.alias
            )));
        }
        let access = AccessType::try_from(record.access as i64)
            .map_err(|_| KernelError::protocol(format!("invalid access type {}", record.access)))?;

        let stats = Quota::from_array(record.stats);
        match mode {
            SerialMode::Manifest => channel.limits = stats,
            SerialMode::Snapshot => channel.counters = stats,
        }
        channel.size = record.size as i64;
        channel.access = access;
    }
    Ok(())
}
