//! fan-queue - Manage scheduled publishes
//!
//! Operator tool over the schedule: list what is waiting, cancel or
//! reschedule entries, force one to run now, and inspect queue statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::warn;

use libfanout::credentials::{CredentialProvider, FileCredentialStore};
use libfanout::platforms::create_publishers;
use libfanout::scheduling::parse_schedule_at;
use libfanout::service::posts::{PostService, ScheduleRequest};
use libfanout::service::publishing::PublishingService;
use libfanout::types::AttemptOutcome;
use libfanout::{
    Config, Database, FanoutError, JobQueue, PlatformId, Publisher, QueueSettings, Result,
    ScheduleEntry,
};

#[derive(Parser, Debug)]
#[command(name = "fan-queue")]
#[command(version)]
#[command(about = "Manage scheduled publishes")]
#[command(long_about = "\
fan-queue - Manage scheduled publishes

DESCRIPTION:
    fan-queue inspects and edits the scheduled publish queue: list waiting
    entries, cancel or reschedule them, force one to publish immediately,
    or show statistics.

COMMANDS:
    list        List waiting schedule entries
    cancel      Cancel a schedule entry (and its queued job, best effort)
    reschedule  Move an entry to a different time
    now         Claim and publish an entry immediately
    stats       Entry and job counts

USAGE EXAMPLES:
    # List everything still waiting
    fan-queue list

    # Only twitter, as JSON
    fan-queue list --platform twitter --format json

    # Cancel entry 42
    fan-queue cancel 42

    # Move entry 42 to tomorrow afternoon
    fan-queue reschedule 42 \"tomorrow 3pm\"

    # Publish entry 42 right now
    fan-queue now 42

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml (or FANOUT_CONFIG)

EXIT CODES:
    0 - success
    1 - operation failed
    2 - credential error
    3 - invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List waiting schedule entries
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Maximum number of entries
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },

    /// Cancel a schedule entry
    Cancel {
        /// Entry id to cancel
        entry_id: i64,
    },

    /// Reschedule an entry to a different time
    Reschedule {
        /// Entry id to reschedule
        entry_id: i64,

        /// New time (e.g. "tomorrow 3pm", "2h")
        time: String,
    },

    /// Claim and publish an entry immediately
    Now {
        /// Entry id to publish
        entry_id: i64,
    },

    /// Show schedule and queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "error" };
    libfanout::logging::LoggingConfig::new(
        libfanout::logging::LogFormat::Text,
        level.to_string(),
        cli.verbose,
    )
    .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Arc::new(Database::new(&config.database.path).await?);

    // Queue store trouble must not break read/cancel paths.
    let queue = match JobQueue::connect(&config.queue.path, QueueSettings::from(&config.queue))
        .await
    {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!("job queue store unavailable: {}", e);
            None
        }
    };

    match cli.command {
        Commands::List {
            format,
            platform,
            limit,
        } => cmd_list(&db, &format, platform.as_deref(), limit).await,
        Commands::Cancel { entry_id } => cmd_cancel(&db, queue, entry_id).await,
        Commands::Reschedule { entry_id, time } => {
            cmd_reschedule(&db, queue, entry_id, &time).await
        }
        Commands::Now { entry_id } => cmd_now(&config, &db, entry_id).await,
        Commands::Stats { format } => cmd_stats(&db, queue, &format).await,
    }
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(FanoutError::InvalidInput(format!(
            "invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

async fn cmd_list(
    db: &Arc<Database>,
    format: &str,
    platform: Option<&str>,
    limit: u32,
) -> Result<()> {
    validate_format(format)?;

    let platform = platform
        .map(|p| p.parse::<PlatformId>().map_err(FanoutError::InvalidInput))
        .transpose()?;
    let entries = db.scheduled_entries(platform, limit).await?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries)
                .map_err(|e| FanoutError::InvalidInput(e.to_string()))?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No waiting schedule entries.");
        return Ok(());
    }
    println!(
        "{:>6}  {:<10}  {:<20}  {:<10}  {}",
        "ID", "PLATFORM", "SCHEDULED", "STATUS", "POST"
    );
    for entry in entries {
        println!(
            "{:>6}  {:<10}  {:<20}  {:<10}  {}",
            entry.id,
            entry.platform.to_string(),
            format_ts(entry.scheduled_at),
            entry.status.to_string(),
            entry.post_id
        );
    }
    Ok(())
}

async fn cmd_cancel(db: &Arc<Database>, queue: Option<Arc<JobQueue>>, entry_id: i64) -> Result<()> {
    let entry = fetch_entry(db, entry_id).await?;
    let owner = owner_of(db, &entry).await?;

    let posts = PostService::new(db.clone(), queue);
    if posts.cancel(&entry.post_id, &owner, entry_id).await? {
        println!("Cancelled entry {} ({}).", entry_id, entry.platform);
    } else {
        println!(
            "Entry {} is no longer cancellable (status {}).",
            entry_id, entry.status
        );
    }
    Ok(())
}

async fn cmd_reschedule(
    db: &Arc<Database>,
    queue: Option<Arc<JobQueue>>,
    entry_id: i64,
    time: &str,
) -> Result<()> {
    let scheduled_at = parse_schedule_at(time)?;
    let entry = fetch_entry(db, entry_id).await?;
    let owner = owner_of(db, &entry).await?;

    let posts = PostService::new(db.clone(), queue);
    if !posts.cancel(&entry.post_id, &owner, entry_id).await? {
        return Err(FanoutError::InvalidInput(format!(
            "entry {} is no longer reschedulable (status {})",
            entry_id, entry.status
        )));
    }
    let replacement = posts
        .add_schedule(
            &entry.post_id,
            &owner,
            ScheduleRequest {
                platform: entry.platform,
                scheduled_at,
            },
        )
        .await?;

    println!(
        "Rescheduled entry {} -> {} at {}.",
        entry_id,
        replacement.id,
        format_ts(scheduled_at)
    );
    Ok(())
}

async fn cmd_now(config: &Config, db: &Arc<Database>, entry_id: i64) -> Result<()> {
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(FileCredentialStore::new(&config.credentials.path));
    let publisher = Arc::new(Publisher::new(
        create_publishers(&config.publisher)?,
        credentials,
        db.clone(),
        Duration::from_secs(config.publisher.request_timeout_secs),
    ));
    let publishing = PublishingService::new(db.clone(), publisher);

    match publishing.execute_entry(entry_id).await? {
        AttemptOutcome::Posted { external_id } => {
            println!("Published entry {}: {}", entry_id, external_id);
            Ok(())
        }
        AttemptOutcome::Failed { message, .. } => {
            // The attempt is settled and audited; report it and exit like
            // any other failed operation.
            eprintln!("Publish failed: {}", message);
            std::process::exit(1);
        }
    }
}

async fn cmd_stats(
    db: &Arc<Database>,
    queue: Option<Arc<JobQueue>>,
    format: &str,
) -> Result<()> {
    validate_format(format)?;

    let entry_stats = db.entry_stats().await?;
    let queue_stats = match &queue {
        Some(queue) => Some(queue.stats().await?),
        None => None,
    };

    if format == "json" {
        let payload = serde_json::json!({
            "entries": entry_stats.iter().cloned().collect::<std::collections::BTreeMap<String, i64>>(),
            "jobs": queue_stats,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload)
                .map_err(|e| FanoutError::InvalidInput(e.to_string()))?
        );
        return Ok(());
    }

    println!("Schedule entries:");
    if entry_stats.is_empty() {
        println!("  (none)");
    }
    for (status, count) in entry_stats {
        println!("  {:<12} {}", status, count);
    }
    match queue_stats {
        Some(stats) => {
            println!("Queue jobs:");
            println!("  {:<12} {}", "queued", stats.queued);
            println!("  {:<12} {}", "active", stats.active);
            println!("  {:<12} {}", "completed", stats.completed);
            println!("  {:<12} {}", "failed", stats.failed);
            println!("  {:<12} {}", "cancelled", stats.cancelled);
        }
        None => println!("Queue store unavailable (poll-only mode)."),
    }
    Ok(())
}

async fn fetch_entry(db: &Database, entry_id: i64) -> Result<ScheduleEntry> {
    db.entry(entry_id)
        .await?
        .ok_or_else(|| FanoutError::InvalidInput(format!("no such entry: {}", entry_id)))
}

async fn owner_of(db: &Database, entry: &ScheduleEntry) -> Result<String> {
    Ok(db
        .get_post(&entry.post_id)
        .await?
        .ok_or_else(|| {
            FanoutError::InvalidInput(format!("post {} no longer exists", entry.post_id))
        })?
        .owner_id)
}

fn format_ts(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_validation() {
        assert!(validate_format("text").is_ok());
        assert!(validate_format("json").is_ok());
        assert!(validate_format("yaml").is_err());
    }

    #[test]
    fn timestamps_render_as_utc() {
        assert_eq!(format_ts(0), "1970-01-01 00:00:00");
        assert_eq!(format_ts(1_700_000_000), "2023-11-14 22:13:20");
    }
}
