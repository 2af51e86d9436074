use anyhow::{Context, Result};
use dockhand_core::GlobalConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CACHE_TTL_VAR: &str = "DOCKHAND_CACHE_TTL";
pub const SCAN_DEPTH_VAR: &str = "DOCKHAND_SCAN_DEPTH";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub global: GlobalConfig,
    pub global_path: PathBuf,
}

impl ConfigLoader {
    /// Loads `config.toml` from the user config directory, then applies
    /// environment overrides.
    pub async fn load() -> Result<Self> {
        let global_path = Self::global_config_path();
        Self::load_from(global_path, |key| std::env::var(key).ok()).await
    }

    /// Loads from `path`, reading overrides through `env`.
    pub async fn load_from<F>(global_path: PathBuf, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut global = Self::load_global_config(&global_path).await?;
        apply_env_overrides(&mut global, env);
        Ok(Self {
            global,
            global_path,
        })
    }

    #[must_use]
    pub fn global_config_path() -> PathBuf {
        directories::ProjectDirs::from("com", "dockhand", "dockhand").map_or_else(
            || PathBuf::from("dockhand-config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    async fn load_global_config(path: &Path) -> Result<GlobalConfig> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(GlobalConfig::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

fn apply_env_overrides<F>(config: &mut GlobalConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(CACHE_TTL_VAR) {
        match value.trim().parse() {
            Ok(secs) => config.discovery.cache_ttl_secs = secs,
            Err(_) => warn!("Ignoring {}={:?}: not a number of seconds", CACHE_TTL_VAR, value),
        }
    }
    if let Some(value) = env(SCAN_DEPTH_VAR) {
        match value.trim().parse() {
            Ok(depth) => config.scan.max_depth = depth,
            Err(_) => warn!("Ignoring {}={:?}: not a depth", SCAN_DEPTH_VAR, value),
        }
    }
}
