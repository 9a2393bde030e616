/*!
 * Session
 * One job's manifest, its open channels and the handoff reconciliation
 */

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::net::UnixStream;
use tracing::{info, warn};

use super::command::read_command;
use crate::channels::ChannelReport;
use crate::core::{exit_codes, KernelError, KernelResult, SessionConfig};
use crate::desc::{GuestAddressSpace, MapFlags, ProtFlags};
use crate::manifest::Manifest;
use crate::signals::SignalHandler;

/// Final accounting written when a session ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_digest: Option<String>,
    pub channels: Vec<ChannelReport>,
}

/// A running job
pub struct Session {
    manifest: Manifest,
    /// Reserved when the session opens; inherited by daemon workers
    space: Option<GuestAddressSpace>,
    signals: SignalHandler,
    report_sink: Option<UnixStream>,
    exit_code: u8,
}

impl Session {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            space: None,
            signals: SignalHandler::new(),
            report_sink: None,
            exit_code: exit_codes::OK,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, code: u8) {
        self.exit_code = code;
    }

    /// True once a handoff connection has been adopted
    pub fn has_report_sink(&self) -> bool {
        self.report_sink.is_some()
    }

    pub fn space(&self) -> Option<&GuestAddressSpace> {
        self.space.as_ref()
    }

    /// Reserve the guest address space, open every channel and arm signals
    pub fn open(&mut self, config: &SessionConfig) -> KernelResult<()> {
        if self.space.is_none() {
            self.space = Some(GuestAddressSpace::reserve(config.guest_space_size)?);
        }
        self.manifest.channels.open_all(config)?;
        self.signals.init()
    }

    /// Map `len` bytes of an open channel into the guest address space
    pub fn map_channel(
        &mut self,
        alias: &str,
        start: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: u64,
    ) -> KernelResult<usize> {
        let space = self
            .space
            .as_mut()
            .ok_or_else(|| KernelError::InvalidArgument("session is not open".into()))?;
        let channel = self
            .manifest
            .channels
            .get(alias)
            .ok_or_else(|| KernelError::InvalidArgument(format!("no channel {}", alias)))?;
        if (prot.read && !channel.is_readable()) || (prot.write && !channel.is_writable()) {
            return Err(KernelError::InvalidArgument(format!(
                "{} does not allow the requested protection",
                alias
            )));
        }
        let handle = channel
            .handle()
            .ok_or_else(|| KernelError::InvalidArgument(format!("{} is not open", alias)))?;
        handle.map(space, start, len, prot, flags, offset)
    }

    /// Guest unmap inside the session's address space
    pub fn unmap(&mut self, addr: usize, len: usize) -> KernelResult<()> {
        self.space
            .as_mut()
            .ok_or_else(|| KernelError::InvalidArgument("session is not open".into()))?
            .unmap(addr, len)
    }

    /// Adopt the job sent over `stream`
    ///
    /// Called in a freshly forked worker. The stream becomes the report
    /// sink once the new manifest has been reconciled.
    pub fn handoff(&mut self, mut stream: UnixStream, config: &SessionConfig) -> KernelResult<()> {
        let text = read_command(&mut stream)?;
        let incoming = Manifest::from_text(&text)?;

        self.signals.rearm()?;
        reconcile(&mut self.manifest, incoming)?;
        self.manifest.channels.reconstruct(config)?;
        self.report_sink = Some(stream);
        self.exit_code = exit_codes::OK;

        info!(
            channels = self.manifest.channels.len(),
            node = self.manifest.node.as_deref().unwrap_or("-"),
            "job adopted"
        );
        Ok(())
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            exit_code: self.exit_code,
            node: self.manifest.node.clone(),
            memory_digest: self.manifest.mem_tag.as_ref().map(|t| t.digest()),
            channels: self.manifest.channels.reports(),
        }
    }

    /// Close all channels and write the report to the sink, or to `fallback`
    pub fn finish<W: Write>(&mut self, config: &SessionConfig, fallback: &mut W) -> KernelResult<()> {
        if let Err(e) = self.manifest.channels.close_all(config) {
            if self.exit_code == exit_codes::OK {
                self.exit_code = e.exit_code();
            }
            warn!(error = %e, "session teardown incomplete");
        }

        let report = self.report();
        let result = match self.report_sink.as_mut() {
            Some(sink) => write_report(sink, &report),
            None => write_report(fallback, &report),
        };
        self.space = None;
        self.signals.fini()?;
        result
    }
}

fn write_report<W: Write>(out: &mut W, report: &SessionReport) -> KernelResult<()> {
    let context = "write session report";
    serde_json::to_writer(&mut *out, report)
        .map_err(|e| KernelError::io(context, std::io::Error::other(e)))?;
    out.write_all(b"\n")
        .and_then(|_| out.flush())
        .map_err(|e| KernelError::io(context, e))
}

/// Fold an incoming manifest into the running one
///
/// Every channel position is checked before anything changes: both sets
/// sorted by alias must agree on alias, access type and limits. Only names,
/// integrity tags and the job scalars are taken from `incoming`; counters
/// are reset.
pub fn reconcile(current: &mut Manifest, incoming: Manifest) -> KernelResult<()> {
    let Manifest {
        mem_tag,
        timeout,
        node,
        job,
        channels: mut incoming_channels,
        ..
    } = incoming;

    if current.channels.len() != incoming_channels.len() {
        return Err(KernelError::protocol(format!(
            "{} channels open, {} requested",
            current.channels.len(),
            incoming_channels.len()
        )));
    }
    for (open, wanted) in current.channels.sorted().into_iter().zip(incoming_channels.sorted()) {
        if open.alias() != wanted.alias() {
            return Err(KernelError::protocol(format!(
                "difference in alias: {} open, {} requested",
                open.alias(),
                wanted.alias()
            )));
        }
        if open.access_type() != wanted.access_type() {
            return Err(KernelError::protocol(format!(
                "difference in access type of {}",
                open.alias()
            )));
        }
        if open.limits() != wanted.limits() {
            return Err(KernelError::protocol(format!(
                "difference in limits of {}",
                open.alias()
            )));
        }
    }

    for (open, wanted) in current
        .channels
        .sorted_mut()
        .into_iter()
        .zip(incoming_channels.sorted_mut())
    {
        open.retarget(wanted.name(), wanted.protocol());
        open.set_tag(wanted.tag().cloned());
        open.reset_counters();
    }

    current.mem_tag = mem_tag;
    current.timeout = timeout;
    current.node = node;
    current.job = job;
    Ok(())
}
