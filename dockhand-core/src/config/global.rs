use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// User-level configuration, read from `config.toml` in the dockhand config
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
pub struct GlobalConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// How long a discovery snapshot is served before the runtime is queried again.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScanConfig {
    /// Directories searched for compose files.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Maximum directory depth below each root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Directory names never descended into (case-insensitive).
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: default_max_depth(),
            ignore: default_ignore(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ComposeConfig {
    /// Explicit standalone compose binary. Skips variant detection when set.
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Capacity of a streaming operation's log queue.
    #[serde(default = "default_buffer")]
    pub log_buffer: usize,

    /// Capacity of a project event subscription.
    #[serde(default = "default_buffer")]
    pub event_buffer: usize,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            binary: None,
            log_buffer: default_buffer(),
            event_buffer: default_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Deadline for a single runtime API call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RuntimeConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

const fn default_cache_ttl_secs() -> u64 {
    30
}

const fn default_max_depth() -> usize {
    5
}

const fn default_buffer() -> usize {
    100
}

const fn default_timeout_secs() -> u64 {
    120
}

fn default_ignore() -> Vec<String> {
    [
        "node_modules",
        "vendor",
        ".git",
        "target",
        "dist",
        "build",
        "__pycache__",
        "venv",
        ".venv",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
