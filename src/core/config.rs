/*!
 * Session Configuration
 * Per-invocation settings passed into channel construction and the daemon loop
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::limits::{DEFAULT_GUEST_SPACE, DEV_NULL, MAP_PAGE_SIZE};

/// Configuration for one process invocation
///
/// Built once at startup (usually via [`SessionConfig::from_env`]) and passed
/// by reference wherever channels are opened, closed or handed off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Skip preallocating writable channels to their put size limit
    pub preallocation_disabled: bool,
    /// Path treated as the host null device
    pub null_device: PathBuf,
    /// Size of the guest address space reservation used for mappings
    pub guest_space_size: usize,
    /// Emit JSON formatted traces
    pub trace_json: bool,
    /// Manifest to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preallocation_disabled: false,
            null_device: PathBuf::from(DEV_NULL),
            guest_space_size: DEFAULT_GUEST_SPACE,
            trace_json: false,
            manifest_path: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build configuration from environment variables
    ///
    /// Environment variables:
    /// - SANDBOX_IO_NO_PREALLOC: Disable channel preallocation (default: false)
    /// - SANDBOX_IO_TRACE_JSON: Enable JSON trace output (default: false)
    /// - SANDBOX_IO_GUEST_SPACE: Guest address space size in bytes (default: 256MB)
    /// - SANDBOX_IO_MANIFEST: Manifest path (default: none)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.preallocation_disabled = env_flag("SANDBOX_IO_NO_PREALLOC");
        config.trace_json = env_flag("SANDBOX_IO_TRACE_JSON");

        if let Some(size) = std::env::var("SANDBOX_IO_GUEST_SPACE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config.guest_space_size = round_to_map_pages(size);
        }

        config.manifest_path = std::env::var_os("SANDBOX_IO_MANIFEST").map(PathBuf::from);
        config
    }

    pub fn with_preallocation_disabled(mut self, disabled: bool) -> Self {
        self.preallocation_disabled = disabled;
        self
    }

    pub fn with_null_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.null_device = path.into();
        self
    }

    pub fn with_guest_space_size(mut self, size: usize) -> Self {
        self.guest_space_size = round_to_map_pages(size);
        self
    }

    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// True if `name` refers to the configured null device
    pub fn is_null_device(&self, name: &str) -> bool {
        Path::new(name) == self.null_device
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn round_to_map_pages(size: usize) -> usize {
    let pages = size.div_ceil(MAP_PAGE_SIZE).max(1);
    pages * MAP_PAGE_SIZE
}
