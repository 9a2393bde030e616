/*!
 * Manifest Module
 * Job description parsing: channels, resources and daemon settings
 *
 * A manifest is a list of `Key = value` lines. Lines without exactly one
 * `=` and unknown keys are skipped; known keys are validated through the
 * static keyword table.
 */

pub mod channel_decl;
pub mod keywords;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::channels::{ChannelSet, IntegrityTag};
use crate::core::limits::{MANIFEST_LINES_LIMIT, MANIFEST_MIN_SIZE, MANIFEST_SIZE_LIMIT};
use crate::core::{KernelError, KernelResult};
use keywords::{lookup, ManifestBuilder, KEYWORDS};

// Re-exports
pub use channel_decl::{parse_channel, parse_int, RecordFormat};

/// A parsed job manifest
#[derive(Debug)]
pub struct Manifest {
    pub version: String,
    pub boot: Option<String>,
    pub mem_size: i64,
    /// Present when the job asked for integrity tags
    pub mem_tag: Option<IntegrityTag>,
    pub timeout: i64,
    pub node: Option<String>,
    /// Daemon control socket path
    pub job: Option<PathBuf>,
    pub broker: Option<String>,
    pub channels: ChannelSet,
}

impl Manifest {
    fn empty() -> Self {
        Self {
            version: String::new(),
            boot: None,
            mem_size: 0,
            mem_tag: None,
            timeout: 0,
            node: None,
            job: None,
            broker: None,
            channels: ChannelSet::new(),
        }
    }

    /// Parse manifest text
    pub fn from_text(text: &str) -> KernelResult<Self> {
        let mut builder = ManifestBuilder::new();
        let mut lines = 0;

        for (index, line) in text.split('\n').take(MANIFEST_LINES_LIMIT).enumerate() {
            builder.line = index + 1;
            lines = index + 1;

            let mut parts = line.splitn(3, '=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            let Some((slot, keyword)) = lookup(key.trim()) else {
                debug!(line = builder.line, key = key.trim(), "unknown manifest key");
                continue;
            };

            builder.seen[slot] += 1;
            if value.trim().is_empty() {
                return Err(KernelError::syntax(
                    builder.line,
                    format!("{} has no value", keyword.name),
                ));
            }
            keyword.apply(&mut builder, value)?;
        }

        for (keyword, &count) in KEYWORDS.iter().zip(&builder.seen) {
            if keyword.obligatory && count == 0 {
                return Err(KernelError::syntax(
                    lines,
                    format!("{} is not specified", keyword.name),
                ));
            }
            if keyword.singleton && count > 1 {
                return Err(KernelError::syntax(
                    lines,
                    format!("duplicate {} keyword", keyword.name),
                ));
            }
        }

        let mut manifest = builder.manifest;
        if manifest.broker.is_some() && manifest.node.is_none() {
            return Err(KernelError::semantic("Broker requires Node"));
        }
        if manifest.mem_tag.is_some() {
            for channel in manifest.channels.iter_mut() {
                channel.set_tag(Some(IntegrityTag::new()));
            }
        }

        info!(
            version = %manifest.version,
            channels = manifest.channels.len(),
            timeout = manifest.timeout,
            daemon = manifest.job.is_some(),
            "manifest parsed"
        );
        Ok(manifest)
    }

    /// Read and parse a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let context = || format!("read manifest {}", path.display());

        let file = File::open(path).map_err(|e| KernelError::io(context(), e))?;
        let mut raw = Vec::new();
        file.take(MANIFEST_SIZE_LIMIT as u64)
            .read_to_end(&mut raw)
            .map_err(|e| KernelError::io(context(), e))?;

        if raw.is_empty() {
            return Err(KernelError::io(
                context(),
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            ));
        }
        if raw.len() < MANIFEST_MIN_SIZE {
            return Err(KernelError::syntax(
                0,
                format!("manifest is too small ({} bytes)", raw.len()),
            ));
        }
        let text = String::from_utf8(raw)
            .map_err(|e| KernelError::syntax(0, format!("manifest is not utf-8: {}", e)))?;
        Self::from_text(&text)
    }

    /// True when the manifest asks for the daemon
    pub fn is_daemon(&self) -> bool {
        self.job.is_some()
    }
}
