//! External tool discovery and availability probes.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::Config;

/// Availability information for one external tool.
#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub name: &'static str,
    pub path: PathBuf,
    pub available: bool,
}

/// Resolve a configured tool path. Bare names are looked up on PATH.
pub fn resolve(configured: &Path) -> Option<PathBuf> {
    if configured.components().count() > 1 {
        return configured.exists().then(|| configured.to_path_buf());
    }
    which::which(configured).ok()
}

/// Run the tool's version command and report whether it exits cleanly.
pub fn is_available(configured: &Path, version_flag: &str) -> bool {
    let Some(path) = resolve(configured) else {
        return false;
    };
    Command::new(path)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Probe every tool the pipeline depends on, warning about missing ones.
/// Remote acquisition fails fast without yt-dlp; without ffmpeg, transcoding
/// is skipped and originals are passed through.
pub fn check_all(config: &Config) -> Vec<ToolCheck> {
    let checks = vec![
        ToolCheck {
            name: "yt-dlp",
            available: is_available(&config.processing.yt_dlp_path, "--version"),
            path: config.processing.yt_dlp_path.clone(),
        },
        ToolCheck {
            name: "ffmpeg",
            available: is_available(&config.processing.ffmpeg_path, "-version"),
            path: config.processing.ffmpeg_path.clone(),
        },
    ];

    for check in &checks {
        if check.available {
            tracing::debug!(tool = check.name, path = ?check.path, "tool available");
        } else {
            tracing::warn!(
                tool = check.name,
                path = ?check.path,
                "tool not found or not working; configure its path in the config file"
            );
        }
    }

    checks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_unavailable() {
        assert!(!is_available(
            Path::new("mediaforge-no-such-tool-xyz"),
            "--version"
        ));
    }

    #[test]
    fn absolute_path_must_exist() {
        assert_eq!(resolve(Path::new("/no/such/dir/ffmpeg")), None);
    }
}
