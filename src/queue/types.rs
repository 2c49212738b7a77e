use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One submitted unit of work, tracked through acquisition and optional
/// transcoding until it reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    /// URL (Remote) or filesystem path (Local) to process.
    pub source: String,
    pub kind: JobKind,
    pub options: JobOptions,
    pub status: JobStatus,
    /// Overall progress in [0, 100]. Never moves backward within a run.
    pub progress: f32,
    /// Populated only in the Failed state.
    pub error: Option<String>,
    /// Populated only in the Completed state.
    pub output_file: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// A URL fetched through the acquisition stage before any transcoding.
    Remote,
    /// A file already on disk; the acquisition stage is skipped.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed absorb; no transitions leave them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-job processing options. All fields are optional; callers may supply
/// any subset and unrecognized configuration keys are ignored on the way in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Target container/format for the transcode stage (e.g. "mp4", "mp3").
    /// When set, transcoding always runs for this job.
    pub target_format: Option<String>,

    /// Extract an audio track instead of converting the full video.
    pub extract_audio: bool,

    /// Raw format selector passed to the acquisition tool (`-f`).
    pub format_selector: Option<String>,

    /// Codec and shaping overrides for the transcode stage.
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub audio_bitrate: Option<String>,
    /// Target resolution as "WIDTHxHEIGHT".
    pub resolution: Option<String>,
    pub frame_rate: Option<f32>,
}

impl Job {
    pub fn new(source: String, kind: JobKind, options: JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            kind,
            options,
            status: JobStatus::Queued,
            progress: 0.0,
            error: None,
            output_file: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Clamp into [0, 100] and never move backward, even if a stage reports
    /// progress out of order.
    pub fn update_progress(&mut self, progress: f32) {
        let clamped = progress.clamp(0.0, 100.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    pub fn complete(&mut self, output_file: PathBuf) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.output_file = Some(output_file);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }
}
