//! Transcoding stage: convert or extract audio through ffmpeg.
//!
//! Progress is derived from the `time=` field ffmpeg prints on stderr,
//! measured against the input duration reported by ffprobe. When the duration
//! cannot be determined the stage still runs, it just reports no intermediate
//! progress.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;

use super::{push_tail, scan_lines, ProgressFn, StageError, Transcoder};
use crate::config::Config;
use crate::queue::JobOptions;

const ERROR_TAIL_LINES: usize = 5;

/// Target formats treated as audio-only outputs.
pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg"];

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(config: &Config) -> Self {
        let ffmpeg = config.processing.ffmpeg_path.clone();
        let ffprobe = derive_ffprobe(&ffmpeg);
        Self { ffmpeg, ffprobe }
    }

    /// Input duration in seconds, via `ffprobe -show_format`.
    fn probe_duration(&self, input: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_duration_json(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<(), StageError> {
        let duration = self.probe_duration(input);
        if duration.is_none() {
            tracing::warn!(input = ?input, "could not determine duration; progress will be coarse");
        }

        let args = build_transcode_args(input, output, options);
        tracing::info!(input = ?input, output = ?output, "running ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StageError::Spawn {
                tool: "ffmpeg".to_string(),
                source: e,
            })?;

        let mut tail = VecDeque::new();
        if let Some(stderr) = child.stderr.take() {
            scan_lines(stderr, |line| {
                tracing::debug!("ffmpeg: {line}");
                push_tail(&mut tail, line, ERROR_TAIL_LINES);
                if let Some(duration) = duration {
                    if let Some(progress) = parse_time_progress(line, duration) {
                        on_progress(progress);
                    }
                }
            })?;
        }

        let status = child.wait()?;
        if !status.success() {
            // Partial output must never be mistaken for a result.
            let _ = std::fs::remove_file(output);
            return Err(StageError::Tool {
                tool: "ffmpeg".to_string(),
                message: format!(
                    "exited with status {}: {}",
                    status,
                    tail.iter().cloned().collect::<Vec<_>>().join(" | ")
                ),
            });
        }

        on_progress(100.0);
        Ok(())
    }
}

/// ffprobe ships next to ffmpeg; keep any custom directory or name suffix.
fn derive_ffprobe(ffmpeg: &Path) -> PathBuf {
    match ffmpeg.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.contains("ffmpeg") => {
            ffmpeg.with_file_name(name.replace("ffmpeg", "ffprobe"))
        }
        _ => PathBuf::from("ffprobe"),
    }
}

fn parse_duration_json(json: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value
        .get("format")?
        .get("duration")?
        .as_str()?
        .parse()
        .ok()
}

fn target_format(output: &Path) -> String {
    output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub(crate) fn is_audio_target(output: &Path, options: &JobOptions) -> bool {
    options.extract_audio || AUDIO_FORMATS.contains(&target_format(output).as_str())
}

fn build_transcode_args(input: &Path, output: &Path, options: &JobOptions) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];
    let format = target_format(output);

    if is_audio_target(output, options) {
        let codec = options
            .audio_codec
            .clone()
            .or_else(|| default_audio_codec(&format).map(str::to_string));
        if let Some(codec) = codec {
            args.push("-c:a".to_string());
            args.push(codec);
        }
        if let Some(ref bitrate) = options.audio_bitrate {
            args.push("-b:a".to_string());
            args.push(bitrate.clone());
        }
        args.push("-vn".to_string());
    } else {
        let (video_default, audio_default) = default_video_codecs(&format);
        args.push("-c:v".to_string());
        args.push(
            options
                .video_codec
                .clone()
                .unwrap_or_else(|| video_default.to_string()),
        );
        args.push("-c:a".to_string());
        args.push(
            options
                .audio_codec
                .clone()
                .unwrap_or_else(|| audio_default.to_string()),
        );
        if let Some(ref bitrate) = options.video_bitrate {
            args.push("-b:v".to_string());
            args.push(bitrate.clone());
        }
        if let Some(ref bitrate) = options.audio_bitrate {
            args.push("-b:a".to_string());
            args.push(bitrate.clone());
        }
        if let Some(ref resolution) = options.resolution {
            args.push("-s".to_string());
            args.push(resolution.clone());
        }
        if let Some(frame_rate) = options.frame_rate {
            args.push("-r".to_string());
            args.push(frame_rate.to_string());
        }
    }

    args.push("-y".to_string());
    args.push(output.to_string_lossy().to_string());
    args
}

fn default_video_codecs(format: &str) -> (&'static str, &'static str) {
    match format {
        "webm" => ("libvpx-vp9", "libopus"),
        _ => ("libx264", "aac"),
    }
}

fn default_audio_codec(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("libmp3lame"),
        "aac" => Some("aac"),
        "flac" => Some("flac"),
        "wav" => Some("pcm_s16le"),
        "ogg" => Some("libvorbis"),
        // Let ffmpeg pick from the container for anything else.
        _ => None,
    }
}

/// Parse a `time=HH:MM:SS.ss` field into a percentage of `duration`.
fn parse_time_progress(line: &str, duration: f64) -> Option<f32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid regex")
    });
    if duration <= 0.0 {
        return None;
    }
    let captures = re.captures(line)?;
    let hours: f64 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = captures.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = captures.get(3)?.as_str().parse().ok()?;
    let current = hours * 3600.0 + minutes * 60.0 + seconds;
    Some(((current / duration) * 100.0).min(100.0) as f32)
}
