//! Polling status reporter.
//!
//! The read model is deliberately pull-based: on a fixed cadence the reporter
//! takes a queue snapshot, derives aggregate counts and logs a status line.
//! The snapshot is consistent at the instant it was taken; jobs may move on
//! concurrently and the next poll picks that up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::queue::{Job, JobQueue, JobStatus};

/// Aggregate counts derived from one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTotals {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueTotals {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut totals = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Queued => totals.queued += 1,
                JobStatus::Running => totals.running += 1,
                JobStatus::Completed => totals.completed += 1,
                JobStatus::Failed => totals.failed += 1,
            }
        }
        totals
    }
}

pub struct StatusReporter {
    queue: Arc<JobQueue>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl StatusReporter {
    pub fn new(queue: Arc<JobQueue>, interval: Duration, shutdown_rx: mpsc::Receiver<()>) -> Self {
        Self {
            queue,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let snapshot = self.queue.snapshot();
            let totals = QueueTotals::from_jobs(&snapshot);
            if totals.running > 0 || totals.queued > 0 {
                tracing::info!(
                    active = totals.running,
                    queued = totals.queued,
                    completed = totals.completed,
                    failed = totals.failed,
                    "queue status"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobKind, JobOptions};
    use std::path::PathBuf;

    #[test]
    fn totals_count_each_status() {
        let queue = JobQueue::new(1, 50);
        queue.submit("a".into(), JobKind::Local, JobOptions::default());
        queue.submit("b".into(), JobKind::Local, JobOptions::default());

        let running = queue.admit_next().unwrap();
        queue.mark_running(running.id);

        let totals = QueueTotals::from_jobs(&queue.snapshot());
        assert_eq!(
            totals,
            QueueTotals {
                queued: 1,
                running: 1,
                completed: 0,
                failed: 0
            }
        );

        queue.complete(running.id, PathBuf::from("/out/a"));
        let totals = QueueTotals::from_jobs(&queue.snapshot());
        assert_eq!(totals.running, 0);
        assert_eq!(totals.completed, 1);
    }
}
