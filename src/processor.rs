//! Dispatch loop and per-job execution.
//!
//! [`JobProcessor::run`] is the single long-lived control loop: it polls the
//! queue, admits pending jobs while concurrency slots are free and hands each
//! admitted job to its own blocking worker. Stage failures, worker errors and
//! panics are all absorbed at the job boundary; nothing ever takes down the
//! loop or another job's worker.

use anyhow::{bail, Context, Result};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{Config, OutputConfig};
use crate::queue::{Job, JobKind, JobOptions, JobQueue};
use crate::stage::transcode::AUDIO_FORMATS;
use crate::stage::{tools, Acquirer, FfmpegTranscoder, Transcoder, YtDlpAcquirer};

/// Acquisition owns the first 70% of a job's progress range.
const ACQUIRE_SHARE: f32 = 0.7;
/// The transcode phase owns the remaining 70..=100 band.
const TRANSCODE_BASE: f32 = 70.0;
const TRANSCODE_SPAN: f32 = 30.0;

/// File extensions recognized as video for the auto-transcode policy; the
/// audio set is shared with the transcoder ([`AUDIO_FORMATS`]).
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm"];

/// Job processor that drives queued jobs through the pipeline stages.
pub struct JobProcessor {
    worker: Worker,
    poll_interval: std::time::Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Everything a per-job execution unit needs, cloned into each
/// `spawn_blocking` worker.
#[derive(Clone)]
struct Worker {
    queue: Arc<JobQueue>,
    config: Arc<Config>,
    acquirer: Arc<dyn Acquirer>,
    transcoder: Arc<dyn Transcoder>,
    transcoder_available: bool,
}

impl JobProcessor {
    pub fn new(queue: Arc<JobQueue>, config: Arc<Config>, shutdown_rx: mpsc::Receiver<()>) -> Self {
        let acquirer = Arc::new(YtDlpAcquirer::new(&config));
        let transcoder = Arc::new(FfmpegTranscoder::new(&config));
        let transcoder_available = tools::is_available(&config.processing.ffmpeg_path, "-version");
        Self::with_stages(
            queue,
            config,
            acquirer,
            transcoder,
            transcoder_available,
            shutdown_rx,
        )
    }

    /// Construct with explicit stage implementations. This is the seam tests
    /// use to run the full pipeline without external tools.
    pub fn with_stages(
        queue: Arc<JobQueue>,
        config: Arc<Config>,
        acquirer: Arc<dyn Acquirer>,
        transcoder: Arc<dyn Transcoder>,
        transcoder_available: bool,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        let poll_interval = std::time::Duration::from_millis(config.processing.poll_interval_ms);
        Self {
            worker: Worker {
                queue,
                config,
                acquirer,
                transcoder,
                transcoder_available,
            },
            poll_interval,
            shutdown_rx,
        }
    }

    /// Run the dispatch loop until the shutdown channel fires. In-flight
    /// workers are not cancelled; they run to completion on the blocking pool.
    pub async fn run(mut self) {
        tracing::info!("job processor started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    tracing::info!("job processor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            while let Some(job) = self.worker.queue.admit_next() {
                let worker = self.worker.clone();
                tokio::task::spawn_blocking(move || worker.execute(job));
            }
        }
    }
}

impl Worker {
    /// Per-job execution boundary: every failure mode, including a panic in a
    /// stage, ends as a Failed job and nothing else.
    fn execute(&self, job: Job) {
        let id = job.id;
        self.queue.mark_running(id);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline(&job)));
        match result {
            Ok(Ok(output)) => self.queue.complete(id, output),
            Ok(Err(e)) => self.queue.fail(id, &format!("{e:#}")),
            Err(panic) => self.queue.fail(id, &format!("internal error: {}", panic_message(&panic))),
        }
    }

    fn run_pipeline(&self, job: &Job) -> Result<PathBuf> {
        let files = match job.kind {
            JobKind::Remote => {
                let queue = Arc::clone(&self.queue);
                let id = job.id;
                let on_progress = move |p: f32| queue.update_progress(id, p * ACQUIRE_SHARE);
                let files = self
                    .acquirer
                    .acquire(&job.source, &job.options, &on_progress)
                    .context("download failed")?;
                if files.is_empty() {
                    bail!("no files were downloaded");
                }
                files
            }
            JobKind::Local => {
                let path = PathBuf::from(&job.source);
                if !path.exists() {
                    bail!("file not found: {}", job.source);
                }
                vec![path]
            }
        };

        let plan = TranscodePlan::decide(&self.config, &job.options, self.transcoder_available);
        let total = files.len();
        let mut processed = Vec::with_capacity(total);
        for (index, file) in files.iter().enumerate() {
            let output = match self.process_file(job, file, index, total, &plan) {
                Ok(path) => path,
                Err(e) => {
                    // Per-file transcode failure degrades to the original
                    // file; it never fails the job.
                    tracing::error!(
                        job_id = %job.id,
                        file = ?file,
                        error = %format!("{e:#}"),
                        "processing failed; keeping original file"
                    );
                    file.clone()
                }
            };
            processed.push(output);
        }

        Ok(processed
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from(&job.source)))
    }

    /// Run one file through the transcode stage, or pass it through when the
    /// plan says no conversion applies.
    fn process_file(
        &self,
        job: &Job,
        input: &Path,
        index: usize,
        total: usize,
        plan: &TranscodePlan,
    ) -> Result<PathBuf> {
        let target = match plan {
            TranscodePlan::Skip => None,
            TranscodePlan::Convert { format } => Some(format.clone()),
            TranscodePlan::Auto => auto_target(input, &self.config.output),
        };

        let Some(format) = target else {
            self.queue
                .update_progress(job.id, file_progress(index, total, 100.0));
            return Ok(input.to_path_buf());
        };

        let output_dir = &self.config.output.directory;
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output directory {output_dir:?}"))?;
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let output = output_dir.join(format!("{stem}.{format}"));

        let queue = Arc::clone(&self.queue);
        let id = job.id;
        let on_progress = move |p: f32| queue.update_progress(id, file_progress(index, total, p));
        self.transcoder
            .transcode(input, &output, &job.options, &on_progress)?;

        if self.config.processing.delete_originals && output != input {
            match std::fs::remove_file(input) {
                Ok(()) => tracing::info!(file = ?input, "deleted original file"),
                Err(e) => tracing::warn!(file = ?input, error = %e, "could not delete original file"),
            }
        }

        Ok(output)
    }
}

/// Whether the transcode stage runs for a job, decided once before execution
/// begins and never re-evaluated mid-run.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodePlan {
    /// No transcoding; acquired/local files pass through unchanged.
    Skip,
    /// Always transcode into this format.
    Convert { format: String },
    /// Transcode per file when its extension mismatches the configured target.
    Auto,
}

impl TranscodePlan {
    pub fn decide(config: &Config, options: &JobOptions, transcoder_available: bool) -> Self {
        if !config.processing.auto_process {
            return TranscodePlan::Skip;
        }
        if !transcoder_available {
            tracing::warn!("ffmpeg is not available; skipping processing");
            return TranscodePlan::Skip;
        }
        if let Some(ref format) = options.target_format {
            return TranscodePlan::Convert {
                format: format.clone(),
            };
        }
        if options.extract_audio {
            return TranscodePlan::Convert {
                format: config.output.audio_format.clone(),
            };
        }
        TranscodePlan::Auto
    }
}

/// Default-policy target for one file: convert when the extension mismatches
/// the configured format for its media class, otherwise leave it alone.
fn auto_target(input: &Path, output: &OutputConfig) -> Option<String> {
    let ext = input.extension()?.to_str()?.to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) && ext != output.video_format {
        return Some(output.video_format.clone());
    }
    if AUDIO_FORMATS.contains(&ext.as_str()) && ext != output.audio_format {
        return Some(output.audio_format.clone());
    }
    None
}

/// Rescale stage-local progress for file `index` of `total` into the job's
/// overall 70..=100 transcode band.
fn file_progress(index: usize, total: usize, stage_progress: f32) -> f32 {
    let total = total.max(1) as f32;
    let overall =
        TRANSCODE_BASE + (index as f32 + stage_progress / 100.0) * TRANSCODE_SPAN / total;
    overall.min(100.0)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job worker panicked".to_string()
    }
}
