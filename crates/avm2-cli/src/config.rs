//! Configuration file parsing for abc.toml.

use avm2_abc::EncodeOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Encoder settings
    #[serde(default)]
    pub encode: EncodeConfig,

    /// Listing settings
    #[serde(default)]
    pub dump: DumpConfig,
}

/// Encoder configuration.
#[derive(Debug, Default, Deserialize)]
pub struct EncodeConfig {
    /// Interleave debugfile/debugline markers into methods without any
    #[serde(default)]
    pub debug_instrumentation: bool,

    /// Class to register last in the class table
    pub main_class: Option<String>,
}

impl EncodeConfig {
    /// Encoder options, with command-line values taking precedence
    pub fn options(&self, debug: bool, main_class: Option<&str>) -> EncodeOptions {
        EncodeOptions {
            debug_instrumentation: debug || self.debug_instrumentation,
            main_class: main_class
                .map(str::to_string)
                .or_else(|| self.main_class.clone()),
        }
    }
}

/// Listing configuration.
#[derive(Debug, Deserialize)]
pub struct DumpConfig {
    /// Print method bodies, not just signatures
    #[serde(default = "default_true")]
    pub bodies: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self { bodies: true }
    }
}

fn default_true() -> bool {
    true
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        _ => Ok(Config::default()),
    }
}

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_ancestors(&cwd)
}

fn find_config_in_ancestors(start: &Path) -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["abc.toml", ".abcrc.toml"];

    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
