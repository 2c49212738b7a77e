//! Acquisition stage: fetch remote media through yt-dlp.
//!
//! The downloader is driven entirely through its CLI: progress is parsed from
//! `[download] NN.N%` lines and the resulting files from `Destination:` lines
//! on stdout.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;

use super::{push_tail, scan_lines, Acquirer, ProgressFn, StageError};
use crate::config::Config;
use crate::queue::JobOptions;

/// Lines of stderr retained for the failure message.
const ERROR_TAIL_LINES: usize = 10;

pub struct YtDlpAcquirer {
    bin: PathBuf,
    download_dir: PathBuf,
    naming_pattern: String,
    video_quality: String,
    audio_quality: String,
    extract_audio: bool,
    keep_video: bool,
    embed_subs: bool,
    audio_format: String,
}

impl YtDlpAcquirer {
    pub fn new(config: &Config) -> Self {
        Self {
            bin: config.processing.yt_dlp_path.clone(),
            download_dir: config.download.directory.clone(),
            naming_pattern: config.download.naming_pattern.clone(),
            video_quality: config.download.video_quality.clone(),
            audio_quality: config.download.audio_quality.clone(),
            extract_audio: config.download.extract_audio,
            keep_video: config.download.keep_video,
            embed_subs: config.download.embed_subs,
            audio_format: config.output.audio_format.clone(),
        }
    }

    fn build_args(&self, source: &str, options: &JobOptions) -> Vec<String> {
        let mut args = Vec::new();

        let template = self.download_dir.join(&self.naming_pattern);
        args.push("-o".to_string());
        args.push(template.to_string_lossy().to_string());

        if self.extract_audio || options.extract_audio {
            args.push("--extract-audio".to_string());
            let format = options
                .target_format
                .clone()
                .filter(|f| is_audio_format(f))
                .unwrap_or_else(|| self.audio_format.clone());
            args.push("--audio-format".to_string());
            args.push(format);

            if self.audio_quality != "best" && self.audio_quality != "worst" {
                args.push("--audio-quality".to_string());
                args.push(self.audio_quality.clone());
            }
            if self.keep_video {
                args.push("--keep-video".to_string());
            }
        } else {
            args.push("-f".to_string());
            args.push(format_selector(&self.video_quality));
        }

        if self.embed_subs {
            args.push("--embed-subs".to_string());
            args.push("--sub-langs".to_string());
            args.push("en,en-US".to_string());
        }

        // Keep original timestamps off so downstream tools see fresh files.
        args.push("--no-mtime".to_string());

        // A per-job selector wins over the configured quality.
        if let Some(ref selector) = options.format_selector {
            args.push("-f".to_string());
            args.push(selector.clone());
        }

        args.push(source.to_string());
        args
    }
}

impl Acquirer for YtDlpAcquirer {
    fn acquire(
        &self,
        source: &str,
        options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<Vec<PathBuf>, StageError> {
        std::fs::create_dir_all(&self.download_dir)?;

        let args = self.build_args(source, options);
        tracing::info!(source, "starting download: yt-dlp {}", args.join(" "));

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StageError::Spawn {
                tool: "yt-dlp".to_string(),
                source: e,
            })?;

        // Drain stderr on a side thread so the pipe never fills up while we
        // stream stdout for progress.
        let stderr_tail = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut tail = VecDeque::new();
                let mut buf = String::new();
                let mut reader = std::io::BufReader::new(stderr);
                if reader.read_to_string(&mut buf).is_ok() {
                    for line in buf.lines().filter(|l| !l.trim().is_empty()) {
                        tracing::debug!("yt-dlp: {line}");
                        push_tail(&mut tail, line, ERROR_TAIL_LINES);
                    }
                }
                tail
            })
        });

        let mut output_files: Vec<PathBuf> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            scan_lines(stdout, |line| {
                tracing::debug!("yt-dlp: {line}");
                if let Some(progress) = parse_progress(line) {
                    on_progress(progress);
                }
                if let Some(file) = parse_output_file(line) {
                    if !output_files.contains(&file) {
                        output_files.push(file);
                    }
                }
            })?;
        }

        let status = child.wait()?;
        let tail = stderr_tail
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(StageError::Tool {
                tool: "yt-dlp".to_string(),
                message: format!(
                    "exited with status {}: {}",
                    status,
                    tail.iter().cloned().collect::<Vec<_>>().join(" | ")
                ),
            });
        }

        on_progress(100.0);
        Ok(output_files)
    }
}

fn format_selector(video_quality: &str) -> String {
    match video_quality {
        "best" | "worst" => video_quality.to_string(),
        // "720p" style cap on the stream height.
        quality => match quality.strip_suffix('p').and_then(|h| h.parse::<u32>().ok()) {
            Some(height) => format!("best[height<={height}]"),
            None => "best".to_string(),
        },
    }
}

fn is_audio_format(format: &str) -> bool {
    matches!(format, "mp3" | "wav" | "flac" | "aac" | "ogg")
}

/// Parse a percentage from a `[download]  42.7% of ...` line.
fn parse_progress(line: &str) -> Option<f32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid regex"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Extract a downloaded file path from a stdout line.
fn parse_output_file(line: &str) -> Option<PathBuf> {
    if let Some((_, path)) = line.split_once("Destination:") {
        let path = path.trim();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    // Re-running a finished download prints this instead of a Destination.
    if let Some(rest) = line.strip_prefix("[download]") {
        if let Some((path, _)) = rest.split_once("has already been downloaded") {
            let path = path.trim();
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
    }
    None
}
