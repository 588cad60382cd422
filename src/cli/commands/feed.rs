//! Feed viewing commands

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;

use feedstate::config::{Config, FeedConfig};
use feedstate::metrics::DatabaseMetrics;
use feedstate::preferences::{TomlPreferences, filters_from_preferences};
use feedstate::{FeedEventManager, FeedServices, FeedState, FeedViewModel};

use super::open_database;
use crate::cli::output::{OutputFormat, print_formatted};

/// How long `feed show` waits for the first state
const SHOW_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Subcommand, Debug)]
pub enum FeedCommands {
    /// Print the feed once it has loaded
    Show {
        /// Feed group id (-1 = all subscriptions)
        #[arg(long)]
        group: Option<i64>,

        /// Show at most this many items
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print every feed state change until interrupted
    Watch {
        /// Feed group id (-1 = all subscriptions)
        #[arg(long)]
        group: Option<i64>,
    },
}

pub async fn run(command: FeedCommands, format: OutputFormat) -> Result<()> {
    match command {
        FeedCommands::Show { group, limit } => show(group, limit, format).await,
        FeedCommands::Watch { group } => watch(group, format).await,
    }
}

fn view_model(group: Option<i64>) -> Result<(FeedViewModel, FeedConfig)> {
    let mut config = Config::load()?;
    if let Some(group) = group {
        config.feed.group_id = group;
    }

    let db = open_database(&config)?;
    let preferences = TomlPreferences::load(TomlPreferences::default_path()?)?;
    let filters = filters_from_preferences(&preferences)?;

    let services = FeedServices {
        events: Arc::new(FeedEventManager::new()),
        metrics: Arc::new(DatabaseMetrics::new(db.clone())),
        repository: db,
    };
    let vm = FeedViewModel::new(services, filters, &config.feed);
    Ok((vm, config.feed))
}

async fn show(group: Option<i64>, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let (mut vm, feed) = view_model(group)?;
    let mut states = vm.subscribe();

    tokio::time::timeout(
        SHOW_TIMEOUT,
        states.wait_for(|s| !matches!(s, FeedState::Loading)),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Timed out waiting for the feed"))??;

    // Metrics arrive shortly after the first list; take the state once it
    // stops changing for a few throttle windows
    let quiet = feed.throttle_window() * 3;
    let settle = async {
        while let Ok(Ok(())) = tokio::time::timeout(quiet, states.changed()).await {}
    };
    let _ = tokio::time::timeout(SHOW_TIMEOUT, settle).await;
    let state = states.borrow_and_update().clone();
    vm.shutdown();

    let state = match (state, limit) {
        (FeedState::Loaded { mut items, oldest_update, not_loaded_count, item_errors }, Some(limit)) => {
            items.truncate(limit);
            FeedState::Loaded { items, oldest_update, not_loaded_count, item_errors }
        }
        (state, _) => state,
    };

    print_formatted(&state, format, format_state);
    Ok(())
}

async fn watch(group: Option<i64>, format: OutputFormat) -> Result<()> {
    let (mut vm, _) = view_model(group)?;
    let mut states = vm.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_formatted(&state, format, format_state);
            }
        }
    }

    vm.shutdown();
    Ok(())
}

fn format_state(state: &FeedState) -> String {
    let mut lines = vec![state.to_string()];

    if let FeedState::Loaded { items, item_errors, .. } = state {
        for item in items {
            let date = item
                .upload_date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "no date".into());
            let marker = if item.is_fully_watched() {
                "[x]"
            } else if item.is_partially_watched() {
                "[~]"
            } else {
                "[ ]"
            };
            lines.push(format!("{} {:<16} {}  ({})", marker, date, item.title, item.uploader));
        }
        for error in item_errors.iter().flatten() {
            lines.push(format!("  ! {}", error));
        }
    }

    lines.join("\n")
}
