mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = ["./mediaforge.toml", "~/.config/mediaforge/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.processing.max_concurrent == 0 {
        anyhow::bail!("processing.max_concurrent cannot be 0");
    }

    if config.queue.history_limit == 0 {
        anyhow::bail!("queue.history_limit cannot be 0");
    }

    // Directories are created on demand; a missing parent is only worth a warning.
    for (name, dir) in [
        ("download", &config.download.directory),
        ("output", &config.output.directory),
    ] {
        if let Some(parent) = dir.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tracing::warn!("{} directory parent does not exist: {:?}", name, dir);
            }
        }
    }

    Ok(())
}
