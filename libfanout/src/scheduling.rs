//! Parsing of human-readable schedule times
//!
//! The CLIs accept both relative durations ("1h", "30m", "2d") and natural
//! language ("tomorrow 3pm", "next friday"); everything normalizes to a UTC
//! timestamp before it reaches the pipeline.

use chrono::{DateTime, Duration, Utc};

use crate::error::{FanoutError, Result};

/// Parse a schedule string into an absolute time.
///
/// # Errors
///
/// Returns `InvalidInput` if the string matches no supported format.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    if input.is_empty() {
        return Err(FanoutError::InvalidInput(
            "schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(FanoutError::InvalidInput(format!(
        "could not parse schedule string: {}",
        input
    )))
}

/// Like [`parse_schedule`], but as a Unix timestamp
pub fn parse_schedule_at(input: &str) -> Result<i64> {
    Ok(parse_schedule(input)?.timestamp())
}

fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| FanoutError::InvalidInput("duration out of range".to_string()));
    }

    Err(FanoutError::InvalidInput(format!(
        "could not parse duration: {}",
        input
    )))
}

fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| FanoutError::InvalidInput(format!("could not parse time: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minutes() {
        let scheduled = parse_schedule("30m").unwrap();
        let diff = (scheduled - Utc::now()).num_minutes();
        assert!((29..=31).contains(&diff), "expected ~30 minutes, got {}", diff);
    }

    #[test]
    fn parse_hours() {
        let scheduled = parse_schedule("2h").unwrap();
        let diff = (scheduled - Utc::now()).num_minutes();
        assert!((119..=121).contains(&diff), "expected ~120 minutes, got {}", diff);
    }

    #[test]
    fn parse_days() {
        let scheduled = parse_schedule("1d").unwrap();
        let diff = (scheduled - Utc::now()).num_hours();
        assert!((23..=25).contains(&diff), "expected ~24 hours, got {}", diff);
    }

    #[test]
    fn parse_duration_with_space() {
        let scheduled = parse_schedule("1 hour").unwrap();
        let diff = (scheduled - Utc::now()).num_minutes();
        assert!((59..=61).contains(&diff));
    }

    #[test]
    fn parse_tomorrow() {
        let scheduled = parse_schedule("tomorrow").unwrap();
        let diff = (scheduled - Utc::now()).num_hours();
        assert!((20..=28).contains(&diff), "expected ~24 hours, got {}", diff);
    }

    #[test]
    fn parse_empty_is_rejected() {
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn parse_garbage_is_rejected() {
        assert!(parse_schedule("not a time").is_err());
    }

    #[test]
    fn timestamp_variant_is_in_the_future() {
        let at = parse_schedule_at("1h").unwrap();
        assert!(at > Utc::now().timestamp());
    }
}
