//! In-memory job queue shared between the dispatch loop, per-job workers and
//! polling observers.
//!
//! A job lives in exactly one of four collections at any instant: the pending
//! queue, the in-flight map, the completed history or the error history. All
//! four sit behind a single mutex so every move between collections is atomic
//! with respect to concurrent readers. The lock is only ever held for queue
//! manipulation and snapshot copying, never across a stage invocation.

mod types;

pub use types::*;

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub struct JobQueue {
    inner: Mutex<Collections>,
    max_concurrent: usize,
    history_limit: usize,
    stopped: AtomicBool,
}

#[derive(Default)]
struct Collections {
    pending: VecDeque<Job>,
    running: HashMap<Uuid, Job>,
    completed: VecDeque<Job>,
    errored: VecDeque<Job>,
}

impl JobQueue {
    pub fn new(max_concurrent: usize, history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Collections::default()),
            max_concurrent,
            history_limit,
            stopped: AtomicBool::new(false),
        })
    }

    /// Enqueue a new job at the tail of the pending queue. Never blocks and
    /// never rejects; source validation happens when the job runs.
    pub fn submit(&self, source: String, kind: JobKind, options: JobOptions) -> Uuid {
        let job = Job::new(source, kind, options);
        let id = job.id;
        tracing::info!(job_id = %id, source = %job.source, kind = ?kind, "queued job");
        self.inner.lock().pending.push_back(job);
        id
    }

    /// Defensive copy of every job across all four collections, most recently
    /// created first. Sorting happens outside the critical section.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs = {
            let inner = self.inner.lock();
            let mut jobs = Vec::with_capacity(
                inner.pending.len()
                    + inner.running.len()
                    + inner.completed.len()
                    + inner.errored.len(),
            );
            jobs.extend(inner.pending.iter().cloned());
            jobs.extend(inner.running.values().cloned());
            jobs.extend(inner.completed.iter().cloned());
            jobs.extend(inner.errored.iter().cloned());
            jobs
        };
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Look up a single job in whichever collection currently holds it.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .chain(inner.running.values())
            .chain(inner.completed.iter())
            .chain(inner.errored.iter())
            .find(|j| j.id == id)
            .cloned()
    }

    /// Discard the completed history. Pending, in-flight and error jobs are
    /// unaffected.
    pub fn clear_completed(&self) {
        self.inner.lock().completed.clear();
    }

    /// Discard the pending queue and both histories. In-flight jobs are left
    /// running; when they finish they are still appended to history.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.completed.clear();
        inner.errored.clear();
    }

    /// Stop admitting jobs from the pending queue. In-flight jobs run to
    /// completion; nothing is cancelled.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// True when nothing is pending or in flight.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.running.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Move the head of the pending queue into the in-flight map if a
    /// concurrency slot is free. Returns the admitted job for the worker that
    /// now owns it.
    pub fn admit_next(&self) -> Option<Job> {
        if self.is_stopped() {
            return None;
        }
        let mut inner = self.inner.lock();
        if inner.running.len() >= self.max_concurrent {
            return None;
        }
        let job = inner.pending.pop_front()?;
        let admitted = job.clone();
        inner.running.insert(job.id, job);
        Some(admitted)
    }

    /// Transition an in-flight job to Running. Called by the worker that
    /// admitted it, before the first stage invocation.
    pub fn mark_running(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.running.get_mut(&id) {
            job.start();
            tracing::info!(job_id = %id, source = %job.source, "job started");
        }
    }

    /// Write rescaled overall progress into an in-flight job. Values are
    /// clamped and never move the job's progress backward.
    pub fn update_progress(&self, id: Uuid, progress: f32) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.running.get_mut(&id) {
            job.update_progress(progress);
        }
    }

    /// Move an in-flight job to the completed history.
    pub fn complete(&self, id: Uuid, output_file: PathBuf) {
        let mut inner = self.inner.lock();
        let Some(mut job) = inner.running.remove(&id) else {
            tracing::warn!(job_id = %id, "completed job was not in flight");
            return;
        };
        job.complete(output_file);
        tracing::info!(job_id = %id, output = ?job.output_file, "job completed");
        push_history(&mut inner.completed, job, self.history_limit);
    }

    /// Move an in-flight job to the error history.
    pub fn fail(&self, id: Uuid, error: &str) {
        let mut inner = self.inner.lock();
        let Some(mut job) = inner.running.remove(&id) else {
            tracing::warn!(job_id = %id, "failed job was not in flight");
            return;
        };
        job.fail(error);
        tracing::error!(job_id = %id, error = %error, "job failed");
        push_history(&mut inner.errored, job, self.history_limit);
    }
}

/// Bounded history append: newest at the front, oldest evicted first.
fn push_history(history: &mut VecDeque<Job>, job: Job, limit: usize) {
    history.push_front(job);
    while history.len() > limit {
        history.pop_back();
    }
}
