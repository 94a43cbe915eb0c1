//! fan-worker - Publish pipeline daemon
//!
//! Hosts both execution paths: the poll scheduler (always) and the durable
//! queue's worker pool (when the queue store is reachable). If the queue
//! store cannot be opened at startup the daemon logs the degradation and
//! runs poll-only.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use tracing::{info, warn};

use libfanout::credentials::{CredentialProvider, FileCredentialStore};
use libfanout::platforms::create_publishers;
use libfanout::rate_limiter::RateLimiter;
use libfanout::{
    Config, Database, FanoutError, JobQueue, PollScheduler, Publisher, QueueSettings, Result,
    SchedulerSettings, WorkerPool,
};

#[derive(Parser, Debug)]
#[command(name = "fan-worker")]
#[command(version)]
#[command(about = "Publish pipeline daemon")]
#[command(long_about = "\
fan-worker - Publish pipeline daemon

DESCRIPTION:
    fan-worker executes scheduled publishes. It runs two paths against the
    same data:

      - a poll scheduler that periodically claims due schedule entries
        straight from the content store (always available), and
      - a worker pool draining the durable job queue (preferred, used
        whenever the queue store is reachable).

    Both paths go through the same atomic claim, so they can run at the
    same time without double-publishing.

USAGE:
    # Run in foreground (logs to stderr)
    fan-worker

    # Custom poll cadence and worker count
    fan-worker --poll-interval 15 --concurrency 4

    # One tick + one queue drain, then exit (for testing)
    fan-worker --once

SIGNALS:
    SIGTERM, SIGINT - graceful shutdown (in-flight publishes finish)

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml (or FANOUT_CONFIG)

    [scheduler]
    poll_interval_secs = 30
    batch_size = 10
    match_tolerance_secs = 60

    [queue]
    path = \"~/.local/share/fanout/queue.db\"
    max_attempts = 3
    backoff_base_secs = 30
    concurrency = 2

EXIT CODES:
    0 - clean shutdown
    1 - runtime error
    2 - credential error
    3 - invalid input
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Queue worker count (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Path to the configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one poll tick and one queue drain, then exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(secs) = cli.poll_interval {
        config.scheduler.poll_interval_secs = secs;
    }
    if let Some(n) = cli.concurrency {
        config.queue.concurrency = n;
    }

    let db = Arc::new(Database::new(&config.database.path).await?);
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(FileCredentialStore::new(&config.credentials.path));
    let publisher = Arc::new(Publisher::new(
        create_publishers(&config.publisher)?,
        credentials,
        db.clone(),
        Duration::from_secs(config.publisher.request_timeout_secs),
    ));
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));

    let scheduler = PollScheduler::new(
        db.clone(),
        publisher.clone(),
        limiter.clone(),
        SchedulerSettings::from(&config.scheduler),
    );

    let queue = match JobQueue::connect(&config.queue.path, QueueSettings::from(&config.queue))
        .await
    {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!("job queue store unavailable, running poll-only: {}", e);
            None
        }
    };

    info!("fan-worker starting");

    if cli.once {
        let executed = scheduler.tick().await?;
        info!("single tick executed {} entr(ies)", executed);
        if let Some(queue) = &queue {
            let pool = WorkerPool::new(
                queue.clone(),
                db,
                publisher,
                limiter,
                config.scheduler.match_tolerance_secs,
            );
            let drained = pool.drain_once().await?;
            info!("drained {} job(s)", drained);
        }
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let mut tasks = Vec::new();
    {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { scheduler.run(shutdown).await }));
    }
    if let Some(queue) = queue {
        let pool = WorkerPool::new(
            queue,
            db,
            publisher,
            limiter,
            config.scheduler.match_tolerance_secs,
        );
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { pool.run(shutdown).await }));
    }
    join_all(tasks).await;

    info!("fan-worker stopped");
    Ok(())
}

fn init_logging(verbose: bool) {
    use libfanout::logging::{LogFormat, LoggingConfig};

    let format = std::env::var("FANOUT_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);
    let level = std::env::var("FANOUT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    LoggingConfig::new(format, level, verbose).init();
}

#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::sync::atomic::Ordering;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| FanoutError::InvalidInput(format!("signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
