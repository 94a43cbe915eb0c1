//! fan-post - Create posts and schedule or publish them
//!
//! The caller surface of the pipeline as a Unix tool: create a post from
//! per-platform content blocks (JSON on stdin or a simple caption), attach
//! schedule entries, or publish immediately.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use libfanout::credentials::{CredentialProvider, FileCredentialStore};
use libfanout::scheduling::parse_schedule_at;
use libfanout::service::posts::ScheduleRequest;
use libfanout::service::FanoutService;
use libfanout::{Config, FanoutError, PlatformId, Result};

#[derive(Parser, Debug)]
#[command(name = "fan-post")]
#[command(version)]
#[command(about = "Create posts and schedule or publish them")]
#[command(long_about = "\
fan-post - Create posts and schedule or publish them

DESCRIPTION:
    fan-post creates a post owned by --owner from per-platform content
    blocks and either schedules it (--schedule, one entry per flag) or
    publishes it immediately (--now).

    Content is a JSON object keyed by platform name, each block shaped as
    {\"caption\": ..., \"hashtags\": [...], \"image_ref\": ...}. A bare
    --caption builds a 'default' block used by every platform.

USAGE EXAMPLES:
    # Immediate publish to facebook from a simple caption
    fan-post --owner user-1 --caption \"Hello world\" --now facebook

    # Schedule for two platforms from full JSON content on stdin
    echo '{\"facebook\":{\"caption\":\"Launch!\"},\"twitter\":{\"caption\":\"Launch!\"}}' | \\
        fan-post --owner user-1 --schedule facebook=\"tomorrow 9am\" --schedule twitter=2h

    # Add a schedule entry to an existing post
    fan-post --owner user-1 --post-id <ID> --schedule linkedin=1d

OUTPUT:
    A JSON document with the post id, its schedule entries, and any
    immediate publish results, on stdout.

EXIT CODES:
    0 - success
    1 - operation failed
    2 - credential error
    3 - invalid input
")]
struct Cli {
    /// Owner of the post
    #[arg(long, value_name = "USER")]
    owner: String,

    /// Operate on an existing post instead of creating one
    #[arg(long, value_name = "ID")]
    post_id: Option<String>,

    /// Shorthand content: builds a 'default' block from this caption
    #[arg(long, value_name = "TEXT", conflicts_with = "content_file")]
    caption: Option<String>,

    /// Read content JSON from a file instead of stdin
    #[arg(long, value_name = "FILE")]
    content_file: Option<PathBuf>,

    /// Schedule an entry: platform=time (repeatable)
    #[arg(long, value_name = "PLATFORM=TIME")]
    schedule: Vec<String>,

    /// Publish immediately to a platform (repeatable)
    #[arg(long, value_name = "PLATFORM")]
    now: Vec<String>,

    /// Path to the configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
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

    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(FileCredentialStore::new(&config.credentials.path));
    let service = FanoutService::from_config(&config, credentials).await?;

    let schedule = parse_schedule_flags(&cli.schedule)?;
    let now_platforms = cli
        .now
        .iter()
        .map(|p| p.parse::<PlatformId>().map_err(FanoutError::InvalidInput))
        .collect::<Result<Vec<_>>>()?;

    let (post_id, entries) = match &cli.post_id {
        Some(post_id) => {
            let mut entries = Vec::new();
            for request in schedule {
                entries.push(
                    service
                        .posts()
                        .add_schedule(post_id, &cli.owner, request)
                        .await?,
                );
            }
            (post_id.clone(), entries)
        }
        None => {
            let content = read_content(&cli)?;
            let (post, entries) = service.posts().create(&cli.owner, content, schedule).await?;
            (post.id, entries)
        }
    };

    let mut published = Vec::new();
    let mut failures = Vec::new();
    for platform in now_platforms {
        match service
            .publishing()
            .publish_now(&post_id, &cli.owner, platform)
            .await
        {
            Ok(result) => published.push(result),
            Err(e) => failures.push(serde_json::json!({
                "platform": platform,
                "error": e.to_string(),
            })),
        }
    }

    let output = serde_json::json!({
        "post_id": post_id,
        "entries": entries,
        "published": published,
        "failed": failures,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output)
            .map_err(|e| FanoutError::InvalidInput(e.to_string()))?
    );

    // Partial failure is still a failure for scripting purposes.
    if let Some(first) = output["failed"].as_array().and_then(|f| f.first()) {
        return Err(FanoutError::InvalidInput(format!(
            "publish failed: {}",
            first["error"].as_str().unwrap_or("unknown error")
        )));
    }
    Ok(())
}

fn parse_schedule_flags(flags: &[String]) -> Result<Vec<ScheduleRequest>> {
    let mut requests = Vec::with_capacity(flags.len());
    for flag in flags {
        let (platform, time) = flag.split_once('=').ok_or_else(|| {
            FanoutError::InvalidInput(format!(
                "invalid --schedule '{}': expected PLATFORM=TIME",
                flag
            ))
        })?;
        requests.push(ScheduleRequest {
            platform: platform.parse().map_err(FanoutError::InvalidInput)?,
            scheduled_at: parse_schedule_at(time)?,
        });
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_flags_parse_platform_and_time() {
        let requests = parse_schedule_flags(&["facebook=2h".to_string()]).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].platform, PlatformId::Facebook);
        assert!(requests[0].scheduled_at > chrono::Utc::now().timestamp());
    }

    #[test]
    fn schedule_flags_reject_bad_shapes() {
        assert!(parse_schedule_flags(&["facebook".to_string()]).is_err());
        assert!(parse_schedule_flags(&["myspace=2h".to_string()]).is_err());
        assert!(parse_schedule_flags(&["facebook=not a time".to_string()]).is_err());
    }
}

fn read_content(cli: &Cli) -> Result<serde_json::Value> {
    if let Some(caption) = &cli.caption {
        return Ok(serde_json::json!({ "default": { "caption": caption } }));
    }

    let raw = match &cli.content_file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| FanoutError::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| FanoutError::InvalidInput(format!("cannot read stdin: {}", e)))?;
            buffer
        }
    };

    if raw.trim().is_empty() {
        return Err(FanoutError::InvalidInput(
            "content cannot be empty; pass --caption or JSON on stdin".to_string(),
        ));
    }

    let content: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| FanoutError::InvalidInput(format!("content is not valid JSON: {}", e)))?;
    if !content.is_object() {
        return Err(FanoutError::InvalidInput(
            "content must be a JSON object keyed by platform".to_string(),
        ));
    }
    Ok(content)
}
