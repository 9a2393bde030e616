/*!
 * Manifest Keywords
 * Static keyword table mapping each key to its validation and assignment
 */

use std::path::PathBuf;

use super::channel_decl::{parse_channel, parse_int, RecordFormat};
use super::Manifest;
use crate::channels::{AccessType, Channel, IntegrityTag, Protocol, Quota};
use crate::core::limits::{
    BOOT_CHANNEL_ALIAS, BOOT_CHANNEL_LIMIT, MANIFEST_VERSION, MANIFEST_VERSION_DEPRECATED,
    UNIX_PATH_MAX,
};
use crate::core::{KernelError, KernelResult};

type ApplyFn = fn(&mut ManifestBuilder, &str) -> KernelResult<()>;

/// One recognised manifest key
pub struct Keyword {
    pub name: &'static str,
    pub obligatory: bool,
    pub singleton: bool,
    assign: ApplyFn,
}

pub static KEYWORDS: &[Keyword] = &[
    Keyword { name: "Channel", obligatory: true, singleton: false, assign: apply_channel },
    Keyword { name: "Version", obligatory: true, singleton: true, assign: apply_version },
    Keyword { name: "Boot", obligatory: false, singleton: true, assign: apply_boot },
    Keyword { name: "Program", obligatory: false, singleton: true, assign: apply_program },
    Keyword { name: "Memory", obligatory: true, singleton: true, assign: apply_memory },
    Keyword { name: "Timeout", obligatory: true, singleton: true, assign: apply_timeout },
    Keyword { name: "Node", obligatory: false, singleton: true, assign: apply_node },
    Keyword { name: "Job", obligatory: false, singleton: true, assign: apply_job },
    Keyword { name: "Broker", obligatory: false, singleton: true, assign: apply_broker },
];

pub fn lookup(key: &str) -> Option<(usize, &'static Keyword)> {
    KEYWORDS.iter().enumerate().find(|(_, k)| k.name == key)
}

impl Keyword {
    pub(super) fn apply(&self, builder: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
        (self.assign)(builder, value)
    }
}

/// Parse state threaded through the keyword functions
pub(super) struct ManifestBuilder {
    pub manifest: Manifest,
    pub line: usize,
    pub format: Option<RecordFormat>,
    pub seen: Vec<usize>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            manifest: Manifest::empty(),
            line: 0,
            format: None,
            seen: vec![0; KEYWORDS.len()],
        }
    }
}

fn apply_channel(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    let (format, channel) = parse_channel(value, b.line)?;
    match b.format {
        Some(previous) if previous != format => {
            return Err(KernelError::syntax(b.line, "mixed version manifest detected"))
        }
        _ => b.format = Some(format),
    }
    b.manifest.channels.push(channel)
}

fn apply_version(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    let version = value.trim();
    if version != MANIFEST_VERSION && version != MANIFEST_VERSION_DEPRECATED {
        return Err(KernelError::semantic(format!(
            "invalid manifest version {}",
            version
        )));
    }
    b.manifest.version = version.to_string();
    Ok(())
}

fn apply_boot(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    b.manifest.boot = Some(value.trim().to_string());
    Ok(())
}

/// Deprecated: the program is exposed as a read-only boot channel
fn apply_program(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    let channel = Channel::new(
        BOOT_CHANNEL_ALIAS,
        value.trim(),
        Protocol::Regular,
        AccessType::RndGetSeqPut,
        Quota::new(BOOT_CHANNEL_LIMIT, BOOT_CHANNEL_LIMIT, 0, 0),
    );
    b.manifest.channels.push(channel)
}

fn apply_memory(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    let tokens: Vec<&str> = value.split(',').collect();
    if tokens.len() != 2 {
        return Err(KernelError::syntax(b.line, "invalid memory token"));
    }
    b.manifest.mem_size = parse_int(tokens[0])?;
    b.manifest.mem_tag = match parse_int(tokens[1])? {
        0 => None,
        1 => Some(IntegrityTag::new()),
        _ => return Err(KernelError::semantic("invalid memory etag token")),
    };
    Ok(())
}

fn apply_timeout(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    b.manifest.timeout = parse_int(value)?;
    Ok(())
}

fn apply_node(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    b.manifest.node = Some(value.trim().to_string());
    Ok(())
}

fn apply_job(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    let job = value.trim();
    if job.len() > UNIX_PATH_MAX {
        return Err(KernelError::semantic(format!(
            "too long Job path ({} bytes)",
            job.len()
        )));
    }
    b.manifest.job = Some(PathBuf::from(job));
    Ok(())
}

fn apply_broker(b: &mut ManifestBuilder, value: &str) -> KernelResult<()> {
    b.manifest.broker = Some(value.trim().to_string());
    Ok(())
}
