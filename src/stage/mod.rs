//! Pipeline stage seams and the concrete external-tool wrappers.
//!
//! A stage is a blocking call: it occupies the calling thread for the full
//! lifetime of the underlying external process. The processor runs stages on
//! the blocking thread pool, never on the dispatch loop. Stage-local progress
//! is reported in [0, 100]; rescaling into a job's overall progress range is
//! the processor's responsibility, not the stage's.

pub mod acquire;
pub mod tools;
pub mod transcode;

pub use acquire::YtDlpAcquirer;
pub use transcode::FfmpegTranscoder;

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::queue::JobOptions;

/// Stage-local progress callback, invoked with percentages in [0, 100].
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} {message}")]
    Tool { tool: String, message: String },

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fetch a remote source into local files.
///
/// Returns the downloaded file paths; an empty set is a valid stage result
/// and is treated as a job failure by the caller. On success no returned path
/// refers to a partially written file.
pub trait Acquirer: Send + Sync {
    fn acquire(
        &self,
        source: &str,
        options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<Vec<PathBuf>, StageError>;
}

/// Convert a local file to the target format implied by `output`'s extension.
///
/// Must be idempotent on overwrite of `output`.
pub trait Transcoder: Send + Sync {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<(), StageError>;
}

/// Feed a tool's output to `on_line`, splitting on both `\n` and `\r`.
///
/// ffmpeg and yt-dlp rewrite their progress line in place with carriage
/// returns, so plain line iteration would only surface it at process exit.
pub(crate) fn scan_lines<R: Read>(
    reader: R,
    mut on_line: impl FnMut(&str),
) -> std::io::Result<()> {
    let mut current: Vec<u8> = Vec::new();
    for byte in reader.bytes() {
        let byte = byte?;
        if byte == b'\n' || byte == b'\r' {
            flush_line(&mut current, &mut on_line);
        } else {
            current.push(byte);
        }
    }
    flush_line(&mut current, &mut on_line);
    Ok(())
}

fn flush_line(current: &mut Vec<u8>, on_line: &mut impl FnMut(&str)) {
    if current.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(current);
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        on_line(trimmed);
    }
    current.clear();
}

/// Keep the most recent lines of tool output for error reporting.
pub(crate) fn push_tail(tail: &mut std::collections::VecDeque<String>, line: &str, limit: usize) {
    if tail.len() == limit {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}
