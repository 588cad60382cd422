//! Database commands for adding subscriptions, streams and progress

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

use feedstate::config::Config;
use feedstate::db::NewStream;

use super::open_database;
use crate::cli::output::{OutputFormat, print_formatted, print_success};

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Add a subscription
    AddSubscription {
        url: String,
        name: String,

        /// Also add it to this feed group
        #[arg(long)]
        group: Option<i64>,
    },

    /// Add a feed group
    AddGroup { name: String },

    /// Add a stream to a subscription's feed
    AddStream {
        subscription_id: i64,
        url: String,
        title: String,

        #[arg(long, default_value = "")]
        uploader: String,

        /// Duration in seconds
        #[arg(long, default_value_t = 0)]
        duration: i64,

        /// Upload date (RFC 3339)
        #[arg(long)]
        uploaded: Option<String>,
    },

    /// Record playback progress for a stream
    Progress { stream_id: i64, seconds: i64 },

    /// Mark a subscription's feed as loaded
    MarkUpdated {
        subscription_id: i64,

        /// When it was loaded (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(Serialize)]
struct CreatedResult {
    id: i64,
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let date = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid RFC 3339 date: {}", value))?;
    Ok(date.with_timezone(&Utc))
}

pub async fn run(command: DbCommands, format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let db = open_database(&config)?;

    match command {
        DbCommands::AddSubscription { url, name, group } => {
            let id = db.add_subscription(&url, &name)?;
            if let Some(group) = group {
                db.add_to_group(group, id)?;
            }
            print_formatted(&CreatedResult { id }, format, |r| {
                format!("Added subscription {} ({})", name, r.id)
            });
        }
        DbCommands::AddGroup { name } => {
            let id = db.add_group(&name)?;
            print_formatted(&CreatedResult { id }, format, |r| {
                format!("Added group {} ({})", name, r.id)
            });
        }
        DbCommands::AddStream {
            subscription_id,
            url,
            title,
            uploader,
            duration,
            uploaded,
        } => {
            let uploader = if uploader.is_empty() {
                db.subscription_name(subscription_id)?
                    .with_context(|| format!("Subscription not found: {}", subscription_id))?
            } else {
                uploader
            };
            let stream = NewStream {
                subscription_id,
                url,
                title,
                uploader,
                duration_secs: duration,
                upload_date: uploaded.as_deref().map(parse_date).transpose()?,
            };
            let id = db.add_stream(&stream)?;
            print_formatted(&CreatedResult { id }, format, |r| {
                format!("Added stream {} ({})", stream.title, r.id)
            });
        }
        DbCommands::Progress { stream_id, seconds } => {
            db.set_progress(stream_id, seconds)?;
            print_success(&format!("Stream {} progress set to {}s", stream_id, seconds), quiet);
        }
        DbCommands::MarkUpdated { subscription_id, at } => {
            let when = match at {
                Some(at) => parse_date(&at)?,
                None => Utc::now(),
            };
            db.mark_subscription_updated(subscription_id, when)?;
            print_success(
                &format!("Subscription {} updated at {}", subscription_id, when.to_rfc3339()),
                quiet,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let date = parse_date("2024-05-01T12:30:00+02:00").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-05-01T10:30:00+00:00");
        assert!(parse_date("yesterday").is_err());
    }
}
