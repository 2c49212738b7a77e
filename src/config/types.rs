use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Where acquired files land before any transcoding.
    #[serde(default = "default_download_dir")]
    pub directory: PathBuf,

    /// "best", "worst" or a height cap like "720p".
    #[serde(default = "default_quality")]
    pub video_quality: String,

    #[serde(default = "default_quality")]
    pub audio_quality: String,

    /// Extract audio for every remote download.
    #[serde(default)]
    pub extract_audio: bool,

    /// Keep the video file around after audio extraction.
    #[serde(default = "default_true")]
    pub keep_video: bool,

    #[serde(default)]
    pub embed_subs: bool,

    /// yt-dlp output template (relative to the download directory).
    #[serde(default = "default_naming_pattern")]
    pub naming_pattern: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: PathBuf,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Concurrency slot budget shared by acquisition and transcoding.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Run the transcode stage at all. When off, files pass through as-is.
    #[serde(default = "default_true")]
    pub auto_process: bool,

    /// Remove source files after a successful transcode.
    #[serde(default)]
    pub delete_originals: bool,

    /// Dispatch loop idle interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Where transcoded files are written.
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    #[serde(default = "default_video_format")]
    pub video_format: String,

    #[serde(default = "default_audio_format")]
    pub audio_format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Completed and error histories each keep this many jobs.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Cadence of the status reporter.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/Downloads").as_ref())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/Downloads/Processed").as_ref())
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_true() -> bool {
    true
}

fn default_naming_pattern() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_yt_dlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_max_concurrent() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_video_format() -> String {
    "mp4".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_history_limit() -> usize {
    50
}

fn default_status_interval_secs() -> u64 {
    1
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_download_dir(),
            video_quality: default_quality(),
            audio_quality: default_quality(),
            extract_audio: false,
            keep_video: true,
            embed_subs: false,
            naming_pattern: default_naming_pattern(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: default_yt_dlp_path(),
            ffmpeg_path: default_ffmpeg_path(),
            max_concurrent: default_max_concurrent(),
            auto_process: true,
            delete_originals: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            video_format: default_video_format(),
            audio_format: default_audio_format(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}
