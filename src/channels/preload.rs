/*!
 * Channel Construction
 * Protocol detection, open policy, preallocation and teardown
 */

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::types::{AccessType, ChannelState, IoIntent, LimitKind, Protocol, Quota};
use crate::core::limits::CHANNEL_RIGHTS;
use crate::core::{KernelError, KernelResult, SessionConfig};
use crate::desc::{BufferedDesc, DescRef, Descriptor, HostFileType, HostIoDesc};

impl Channel {
    /// Probe the host resource and record its protocol
    ///
    /// An absent resource is a regular file still to be created. Opaque
    /// channels keep their tag without touching the host.
    pub fn detect_protocol(&mut self) -> KernelResult<Protocol> {
        if self.protocol != Protocol::Opaque {
            self.protocol = match std::fs::metadata(&self.name) {
                Err(_) => Protocol::Regular,
                Ok(md) => Protocol::from_file_type(HostFileType::from(md.file_type()))
                    .ok_or_else(|| {
                        KernelError::io(
                            format!("cannot detect source type of {}", self.name),
                            std::io::Error::from(std::io::ErrorKind::Unsupported),
                        )
                    })?,
            };
        }
        self.state = ChannelState::ProtocolDetected;
        Ok(self.protocol)
    }

    /// Open the host resource according to protocol and intent
    ///
    /// On success counters are zero and the channel is `Opened`.
    pub fn open(&mut self, config: &SessionConfig) -> KernelResult<()> {
        if self.handle.is_some() {
            self.close(config)?;
        }
        self.detect_protocol()?;
        let intent = self.intent().ok_or_else(|| {
            KernelError::semantic(format!("{} declares no i/o limits", self.alias))
        })?;

        match self.protocol {
            Protocol::Regular => self.open_regular(intent, config)?,
            Protocol::Character | Protocol::Fifo => self.open_stream(intent)?,
            Protocol::Opaque => {
                return Err(KernelError::semantic(format!(
                    "{}: network channels are not supported",
                    self.alias
                )))
            }
            other => {
                return Err(KernelError::semantic(format!(
                    "{}: {} channels are not supported",
                    self.alias, other
                )))
            }
        }

        self.counters = Quota::ZERO;
        self.get_position = 0;
        self.stale = false;
        self.state = ChannelState::Opened;
        debug!(
            alias = %self.alias,
            name = %self.name,
            protocol = %self.protocol,
            size = self.size,
            put_position = self.put_position,
            "channel opened"
        );
        Ok(())
    }

    fn open_regular(&mut self, intent: IoIntent, config: &SessionConfig) -> KernelResult<()> {
        match intent {
            IoIntent::ReadOnly => {
                let file = self.open_file(OpenOptions::new().read(true))?;
                self.size = resource_length(&file, &self.name)?;
                self.handle = Some(Arc::new(HostIoDesc::new(file)));
            }
            IoIntent::WriteOnly => {
                let file = self.open_file(
                    OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .mode(CHANNEL_RIGHTS),
                )?;
                let desc: DescRef = Arc::new(HostIoDesc::new(file));
                self.size = 0;
                self.preallocate(desc.as_ref(), config)?;
                self.handle = Some(desc);
            }
            IoIntent::ReadWrite => {
                if matches!(
                    self.access,
                    AccessType::SeqGetSeqPut | AccessType::SeqGetRndPut
                ) {
                    return Err(KernelError::semantic(format!(
                        "{}: random access requires a random get access type",
                        self.alias
                    )));
                }
                let file = self.open_file(
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .mode(CHANNEL_RIGHTS),
                )?;
                self.size = resource_length(&file, &self.name)?;
                let desc: DescRef = Arc::new(HostIoDesc::new(file));
                self.place_put_position(desc.as_ref(), config)?;
                self.handle = Some(desc);
            }
        }
        Ok(())
    }

    /// Position rules for a random-access regular resource of known `size`
    fn place_put_position(&mut self, desc: &dyn Descriptor, config: &SessionConfig) -> KernelResult<()> {
        if self.put_position > self.size {
            return Err(KernelError::semantic(format!(
                "{} put position {} is past the end of {} ({} bytes)",
                self.alias, self.put_position, self.name, self.size
            )));
        }
        if self.size == 0 && !config.is_null_device(&self.name) {
            self.preallocate(desc, config)?;
        } else if self.access == AccessType::RndGetSeqPut {
            self.put_position = self.size;
        } else {
            self.put_position = 0;
        }
        Ok(())
    }

    fn open_stream(&mut self, intent: IoIntent) -> KernelResult<()> {
        let desc = match intent {
            IoIntent::ReadOnly => {
                BufferedDesc::reader(self.open_file(OpenOptions::new().read(true))?)
            }
            // a FIFO opened read-write never blocks waiting for a reader
            IoIntent::WriteOnly => {
                BufferedDesc::writer(self.open_file(OpenOptions::new().read(true).write(true))?)
            }
            IoIntent::ReadWrite => {
                return Err(KernelError::semantic(format!(
                    "{}: {} channels cannot be random access",
                    self.alias, self.protocol
                )))
            }
        };
        self.size = 0;
        self.handle = Some(Arc::new(desc));
        Ok(())
    }

    fn open_file(&self, options: &OpenOptions) -> KernelResult<File> {
        options
            .open(&self.name)
            .map_err(|e| KernelError::io(format!("open {} for {}", self.name, self.alias), e))
    }

    /// Grow a writable resource to its put size limit
    fn preallocate(&self, desc: &dyn Descriptor, config: &SessionConfig) -> KernelResult<()> {
        if config.preallocation_disabled || config.is_null_device(&self.name) {
            return Ok(());
        }
        let len = self.limits[LimitKind::PutSize].max(0) as u64;
        desc.truncate(len)?;
        debug!(alias = %self.alias, bytes = len, "channel preallocated");
        Ok(())
    }

    /// Release the host resource
    ///
    /// Writable regular channels are cut back to the size the guest
    /// actually produced. The handle is dropped even when that fails.
    pub fn close(&mut self, config: &SessionConfig) -> KernelResult<()> {
        let Some(handle) = self.handle.take() else {
            self.state = ChannelState::Closed;
            return Ok(());
        };

        let result = self.trim(handle.as_ref(), config);
        if let Err(e) = &result {
            warn!(alias = %self.alias, error = %e, "channel teardown failed");
        }
        drop(handle);

        self.state = ChannelState::Closed;
        info!(
            alias = %self.alias,
            gets = self.counters[LimitKind::Gets],
            get_size = self.counters[LimitKind::GetSize],
            puts = self.counters[LimitKind::Puts],
            put_size = self.counters[LimitKind::PutSize],
            size = self.size,
            "channel closed"
        );
        result
    }

    /// Flush and cut a writable regular resource back to `size`
    fn trim(&self, handle: &dyn Descriptor, config: &SessionConfig) -> KernelResult<()> {
        handle.flush()?;
        if self.protocol == Protocol::Regular
            && self.is_writable()
            && !config.is_null_device(&self.name)
        {
            handle.truncate(self.size.max(0) as u64)?;
        }
        Ok(())
    }

    /// Drop any preallocation while keeping the handle open
    ///
    /// Afterwards the host resource is exactly as long as the guest data, so
    /// a later [`reconstruct`](Self::reconstruct) can trust its length.
    pub fn settle(&mut self, config: &SessionConfig) -> KernelResult<()> {
        match self.handle.clone() {
            Some(handle) => self.trim(handle.as_ref(), config),
            None => Ok(()),
        }
    }

    /// Reopen a retargeted channel, or re-derive the state of a kept one
    pub fn reconstruct(&mut self, config: &SessionConfig) -> KernelResult<()> {
        match self.handle.clone() {
            Some(handle) if !self.stale => self.refresh(handle.as_ref(), config),
            _ => self.open(config),
        }
    }

    /// Apply the open policy to a handle that stays open
    ///
    /// Another process may have written through the same resource since the
    /// handle was opened, so size and positions come from the host again.
    fn refresh(&mut self, handle: &dyn Descriptor, config: &SessionConfig) -> KernelResult<()> {
        let intent = self.intent().ok_or_else(|| {
            KernelError::semantic(format!("{} declares no i/o limits", self.alias))
        })?;

        if self.protocol == Protocol::Regular {
            match intent {
                IoIntent::ReadOnly => self.size = descriptor_length(handle, &self.name)?,
                IoIntent::WriteOnly => {
                    if !config.is_null_device(&self.name) {
                        handle.truncate(0)?;
                    }
                    self.size = 0;
                    self.put_position = 0;
                    self.preallocate(handle, config)?;
                }
                IoIntent::ReadWrite => {
                    self.size = descriptor_length(handle, &self.name)?;
                    self.place_put_position(handle, config)?;
                }
            }
        }

        self.counters = Quota::ZERO;
        self.get_position = 0;
        self.state = ChannelState::Opened;
        debug!(
            alias = %self.alias,
            size = self.size,
            put_position = self.put_position,
            "channel refreshed"
        );
        Ok(())
    }
}

fn descriptor_length(desc: &dyn Descriptor, name: &str) -> KernelResult<i64> {
    i64::try_from(desc.stat()?.size).map_err(|_| {
        KernelError::io(
            format!("{} has an invalid length", name),
            std::io::Error::from(std::io::ErrorKind::InvalidData),
        )
    })
}

fn resource_length(file: &File, name: &str) -> KernelResult<i64> {
    let md = file
        .metadata()
        .map_err(|e| KernelError::io(format!("stat {}", name), e))?;
    i64::try_from(md.len()).map_err(|_| {
        KernelError::io(
            format!("{} has an invalid length", name),
            std::io::Error::from(std::io::ErrorKind::InvalidData),
        )
    })
}
