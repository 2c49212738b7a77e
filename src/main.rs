mod cli;

use mediaforge::config;
use mediaforge::observer::StatusReporter;
use mediaforge::processor::JobProcessor;
use mediaforge::queue::{JobKind, JobOptions, JobQueue, JobStatus};
use mediaforge::stage::tools;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaforge=trace".to_string()
        } else {
            "mediaforge=debug".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Arc::new(config::load_config_or_default(cli.config.as_deref())?);

    match cli.command {
        Commands::CheckTools => {
            for check in tools::check_all(&config) {
                let status = if check.available { "ok" } else { "MISSING" };
                println!("{:<8} {:<8} {}", check.name, status, check.path.display());
            }
            Ok(())
        }
        Commands::Run {
            sources,
            local,
            format,
            extract_audio,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_queue(config, sources, local, format, extract_audio))
        }
    }
}

async fn run_queue(
    config: Arc<config::Config>,
    sources: Vec<String>,
    local: bool,
    format: Option<String>,
    extract_audio: bool,
) -> Result<()> {
    tools::check_all(&config);

    let queue = JobQueue::new(
        config.processing.max_concurrent,
        config.queue.history_limit,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let processor = JobProcessor::new(queue.clone(), config.clone(), shutdown_rx);
    let processor_handle = tokio::spawn(processor.run());

    let (reporter_tx, reporter_rx) = tokio::sync::mpsc::channel::<()>(1);
    let reporter = StatusReporter::new(
        queue.clone(),
        Duration::from_secs(config.queue.status_interval_secs),
        reporter_rx,
    );
    let reporter_handle = tokio::spawn(reporter.run());

    let options = JobOptions {
        target_format: format,
        extract_audio,
        ..Default::default()
    };
    for source in sources {
        let kind = classify_source(&source, local);
        queue.submit(source, kind, options.clone());
    }

    // Wait for the queue to drain, or for an interrupt. On interrupt nothing
    // new is admitted but in-flight jobs run to completion.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; finishing in-flight jobs");
                queue.stop();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if queue.is_idle() {
                    break;
                }
            }
        }
    }

    queue.stop();
    let _ = shutdown_tx.send(()).await;
    let _ = processor_handle.await;
    let _ = reporter_tx.send(()).await;
    let _ = reporter_handle.await;

    print_summary(&queue);
    Ok(())
}

/// Source kind classification is the submitter's job, not the queue's: an
/// http(s) URL is Remote, everything else is treated as a local path.
fn classify_source(source: &str, force_local: bool) -> JobKind {
    if force_local {
        return JobKind::Local;
    }
    match url::Url::parse(source) {
        Ok(parsed) if parsed.has_host() && matches!(parsed.scheme(), "http" | "https") => {
            JobKind::Remote
        }
        _ => JobKind::Local,
    }
}

fn print_summary(queue: &JobQueue) {
    for job in queue.snapshot().iter().rev() {
        match job.status {
            JobStatus::Completed => {
                let output = job
                    .output_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("done     {} -> {}", job.source, output);
            }
            JobStatus::Failed => {
                println!(
                    "failed   {} ({})",
                    job.source,
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
            JobStatus::Queued | JobStatus::Running => {
                println!("skipped  {}", job.source);
            }
        }
    }
}
