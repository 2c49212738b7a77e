//! End-to-end queue lifecycle tests running the real dispatch loop with stub
//! stage implementations, so no external tools are needed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use mediaforge::config::Config;
use mediaforge::processor::JobProcessor;
use mediaforge::queue::{JobKind, JobOptions, JobQueue, JobStatus};
use mediaforge::stage::{Acquirer, ProgressFn, StageError, Transcoder};

// ---------------------------------------------------------------------------
// Stub stages
// ---------------------------------------------------------------------------

/// Acquirer that returns a fixed file list (or a fixed error) after a short
/// delay, tracking how many acquisitions overlap.
struct StubAcquirer {
    files: Vec<PathBuf>,
    fail_with: Option<String>,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl StubAcquirer {
    fn returning(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            fail_with: None,
            delay: Duration::from_millis(50),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::returning(Vec::new())
        }
    }

    fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Acquirer for StubAcquirer {
    fn acquire(
        &self,
        _source: &str,
        _options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<Vec<PathBuf>, StageError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        on_progress(50.0);
        std::thread::sleep(self.delay);
        on_progress(100.0);

        self.current.fetch_sub(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(StageError::Tool {
                tool: "stub".to_string(),
                message: message.clone(),
            }),
            None => Ok(self.files.clone()),
        }
    }
}

/// Acquirer that blocks inside `acquire` until the test releases it, so a job
/// can be held in the Running state on purpose.
struct GatedAcquirer {
    gate: Mutex<std_mpsc::Receiver<()>>,
    files: Vec<PathBuf>,
}

impl GatedAcquirer {
    fn new(files: Vec<PathBuf>) -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        (
            Self {
                gate: Mutex::new(rx),
                files,
            },
            tx,
        )
    }
}

impl Acquirer for GatedAcquirer {
    fn acquire(
        &self,
        _source: &str,
        _options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<Vec<PathBuf>, StageError> {
        on_progress(10.0);
        let _ = self
            .gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        on_progress(100.0);
        Ok(self.files.clone())
    }
}

/// Transcoder that records every call and optionally fails on inputs whose
/// path contains a marker substring.
#[derive(Default)]
struct StubTranscoder {
    fail_on: Option<String>,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl StubTranscoder {
    fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transcoder for StubTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _options: &JobOptions,
        on_progress: ProgressFn,
    ) -> Result<(), StageError> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf()));
        if let Some(marker) = &self.fail_on {
            if input.to_string_lossy().contains(marker.as_str()) {
                return Err(StageError::Tool {
                    tool: "stub-ffmpeg".to_string(),
                    message: "conversion failed".to_string(),
                });
            }
        }
        on_progress(100.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    queue: Arc<JobQueue>,
    shutdown_tx: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(config: Config, acquirer: Arc<dyn Acquirer>, transcoder: Arc<dyn Transcoder>) -> Self {
        let config = Arc::new(config);
        let queue = JobQueue::new(
            config.processing.max_concurrent,
            config.queue.history_limit,
        );
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let processor =
            JobProcessor::with_stages(queue.clone(), config, acquirer, transcoder, true, shutdown_rx);
        let handle = tokio::spawn(processor.run());
        Self {
            queue,
            shutdown_tx,
            handle,
        }
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

fn fast_config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.processing.poll_interval_ms = 20;
    config.output.directory = output_dir.to_path_buf();
    config
}

/// Poll the queue until the predicate holds or the timeout elapses.
async fn wait_for(queue: &JobQueue, pred: impl Fn(&JobQueue) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if pred(queue) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_for_terminal(queue: &JobQueue, id: uuid::Uuid) -> JobStatus {
    assert!(
        wait_for(queue, |q| q
            .get(id)
            .map(|j| j.status.is_terminal())
            .unwrap_or(false))
        .await,
        "job {id} never reached a terminal state"
    );
    queue.get(id).unwrap().status
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.processing.max_concurrent = 2;
    config.processing.auto_process = false;

    let acquirer = Arc::new(StubAcquirer::returning(vec![PathBuf::from(
        "/dl/video.mp4",
    )]));
    let harness = Harness::start(config, acquirer.clone(), Arc::new(StubTranscoder::default()));

    let ids: Vec<_> = (0..5)
        .map(|i| {
            harness.queue.submit(
                format!("https://example.com/v/{i}"),
                JobKind::Remote,
                JobOptions::default(),
            )
        })
        .collect();

    let mut max_running_seen = 0;
    let done = {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            max_running_seen = max_running_seen.max(harness.queue.running_count());
            let terminal = ids
                .iter()
                .filter(|id| {
                    harness
                        .queue
                        .get(**id)
                        .map(|j| j.status.is_terminal())
                        .unwrap_or(false)
                })
                .count();
            if terminal == ids.len() {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    assert!(done, "jobs did not all finish");

    assert!(max_running_seen <= 2, "observed {max_running_seen} running jobs");
    assert!(acquirer.peak_concurrency() <= 2);

    for id in &ids {
        let job = harness.queue.get(*id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.output_file.as_deref(), Some(Path::new("/dl/video.mp4")));
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn acquire_failure_fails_the_job_with_its_error() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(
        fast_config(dir.path()),
        Arc::new(StubAcquirer::failing("HTTP Error 404")),
        Arc::new(StubTranscoder::default()),
    );

    let id = harness.queue.submit(
        "https://example.com/missing".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );

    assert_eq!(wait_for_terminal(&harness.queue, id).await, JobStatus::Failed);
    let job = harness.queue.get(id).unwrap();
    let error = job.error.expect("failed job must carry an error");
    assert!(error.contains("HTTP Error 404"), "error was {error:?}");

    harness.shutdown().await;
}

#[tokio::test]
async fn empty_acquisition_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(
        fast_config(dir.path()),
        Arc::new(StubAcquirer::returning(Vec::new())),
        Arc::new(StubTranscoder::default()),
    );

    let id = harness.queue.submit(
        "https://example.com/empty".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );

    assert_eq!(wait_for_terminal(&harness.queue, id).await, JobStatus::Failed);
    let error = harness.queue.get(id).unwrap().error.unwrap();
    assert!(error.contains("no files were downloaded"), "error was {error:?}");

    harness.shutdown().await;
}

#[tokio::test]
async fn local_job_without_processing_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("movie.mkv");
    std::fs::write(&input, b"not really a video").unwrap();

    let mut config = fast_config(dir.path());
    config.processing.auto_process = false;

    let harness = Harness::start(
        config,
        Arc::new(StubAcquirer::returning(Vec::new())),
        Arc::new(StubTranscoder::default()),
    );

    let id = harness.queue.submit(
        input.to_string_lossy().into_owned(),
        JobKind::Local,
        JobOptions::default(),
    );

    assert_eq!(
        wait_for_terminal(&harness.queue, id).await,
        JobStatus::Completed
    );
    let job = harness.queue.get(id).unwrap();
    assert_eq!(job.output_file.as_deref(), Some(input.as_path()));
    assert_eq!(job.progress, 100.0);

    harness.shutdown().await;
}

#[tokio::test]
async fn local_job_with_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(
        fast_config(dir.path()),
        Arc::new(StubAcquirer::returning(Vec::new())),
        Arc::new(StubTranscoder::default()),
    );

    let id = harness.queue.submit(
        "/nowhere/does-not-exist.mp4".to_string(),
        JobKind::Local,
        JobOptions::default(),
    );

    assert_eq!(wait_for_terminal(&harness.queue, id).await, JobStatus::Failed);
    let error = harness.queue.get(id).unwrap().error.unwrap();
    assert!(error.contains("file not found"), "error was {error:?}");

    harness.shutdown().await;
}

#[tokio::test]
async fn per_file_transcode_failure_keeps_original_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("processed");
    let config = fast_config(&out);

    // Three acquired files, all needing conversion; the first one fails.
    let files = vec![
        PathBuf::from("/dl/first_bad.mkv"),
        PathBuf::from("/dl/second.mkv"),
        PathBuf::from("/dl/third.mkv"),
    ];
    let transcoder = Arc::new(StubTranscoder::failing_on("first_bad"));
    let harness = Harness::start(
        config,
        Arc::new(StubAcquirer::returning(files)),
        transcoder.clone(),
    );

    let id = harness.queue.submit(
        "https://example.com/playlist".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );

    assert_eq!(
        wait_for_terminal(&harness.queue, id).await,
        JobStatus::Completed
    );

    // The failed file degrades to its original path; the job still completes
    // and reports the first file's path.
    let job = harness.queue.get(id).unwrap();
    assert_eq!(
        job.output_file.as_deref(),
        Some(Path::new("/dl/first_bad.mkv"))
    );
    assert!(job.error.is_none());

    // Every file was attempted, and the survivors landed in the output dir.
    let calls = transcoder.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].1, out.join("second.mp4"));
    assert_eq!(calls[2].1, out.join("third.mp4"));

    harness.shutdown().await;
}

#[tokio::test]
async fn clear_all_leaves_running_job_which_still_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.processing.max_concurrent = 1;
    config.processing.auto_process = false;

    let (gated, release) = GatedAcquirer::new(vec![PathBuf::from("/dl/held.mp4")]);
    let harness = Harness::start(config, Arc::new(gated), Arc::new(StubTranscoder::default()));

    let running_id = harness.queue.submit(
        "https://example.com/held".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );
    for i in 0..2 {
        harness.queue.submit(
            format!("https://example.com/waiting/{i}"),
            JobKind::Remote,
            JobOptions::default(),
        );
    }

    // Wait until the first job is actually running and the others are queued.
    assert!(
        wait_for(&harness.queue, |q| q
            .get(running_id)
            .map(|j| j.status == JobStatus::Running)
            .unwrap_or(false))
        .await
    );

    harness.queue.clear_all();

    let snapshot = harness.queue.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, running_id);
    assert_eq!(snapshot[0].status, JobStatus::Running);

    // Release the gate; the surviving job finishes into history.
    release.send(()).unwrap();
    assert_eq!(
        wait_for_terminal(&harness.queue, running_id).await,
        JobStatus::Completed
    );
    assert_eq!(harness.queue.snapshot().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn snapshot_progress_never_moves_backward() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.processing.auto_process = false;

    let mut acquirer = StubAcquirer::returning(vec![PathBuf::from("/dl/a.mp4")]);
    acquirer.delay = Duration::from_millis(150);
    let harness = Harness::start(config, Arc::new(acquirer), Arc::new(StubTranscoder::default()));

    let id = harness.queue.submit(
        "https://example.com/a".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );

    let mut observed = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(job) = harness.queue.get(id) {
            observed.push(job.progress);
            if job.status.is_terminal() {
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "job never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for pair in observed.windows(2) {
        assert!(pair[1] >= pair[0], "progress went backward: {observed:?}");
    }
    assert_eq!(*observed.last().unwrap(), 100.0);

    harness.shutdown().await;
}

#[tokio::test]
async fn stopped_queue_admits_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.processing.auto_process = false;

    let harness = Harness::start(
        config,
        Arc::new(StubAcquirer::returning(vec![PathBuf::from("/dl/a.mp4")])),
        Arc::new(StubTranscoder::default()),
    );

    harness.queue.stop();
    let id = harness.queue.submit(
        "https://example.com/late".to_string(),
        JobKind::Remote,
        JobOptions::default(),
    );

    // Give the dispatch loop a few poll cycles; the job must stay queued.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.queue.get(id).unwrap().status, JobStatus::Queued);

    harness.shutdown().await;
}
