//! Feed filter preference commands

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use serde::Serialize;

use feedstate::preferences::{
    TomlPreferences, filters_from_preferences, save_show_future_items, save_show_played_items,
};
use feedstate::ShowItems;

use crate::cli::output::{OutputFormat, print_formatted, print_success};

#[derive(Subcommand, Debug)]
pub enum PrefsCommands {
    /// Show the stored feed filters
    Show,

    /// Set which watched streams are shown
    Played {
        #[arg(value_enum)]
        value: PlayedArg,
    },

    /// Set whether upcoming streams are shown
    Future {
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },

    /// Show preferences file path
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PlayedArg {
    Watched,
    PartiallyWatched,
    Default,
}

impl From<PlayedArg> for ShowItems {
    fn from(arg: PlayedArg) -> Self {
        match arg {
            PlayedArg::Watched => ShowItems::Watched,
            PlayedArg::PartiallyWatched => ShowItems::PartiallyWatched,
            PlayedArg::Default => ShowItems::Default,
        }
    }
}

#[derive(Serialize)]
struct PathResult {
    path: String,
    exists: bool,
}

pub async fn run(command: PrefsCommands, format: OutputFormat, quiet: bool) -> Result<()> {
    let path = TomlPreferences::default_path()?;

    match command {
        PrefsCommands::Show => {
            let store = TomlPreferences::load(&path)?;
            let filters = filters_from_preferences(&store)?;
            print_formatted(&filters, format, |f| {
                format!(
                    "Played items:  {}\nFuture items:  {}",
                    f.played_visibility,
                    if f.show_future { "shown" } else { "hidden" }
                )
            });
        }
        PrefsCommands::Played { value } => {
            let store = TomlPreferences::load(&path)?;
            let value = ShowItems::from(value);
            save_show_played_items(&store, value)?;
            print_success(&format!("Played items set to {}", value), quiet);
        }
        PrefsCommands::Future { value } => {
            let store = TomlPreferences::load(&path)?;
            save_show_future_items(&store, value)?;
            print_success(&format!("Future items set to {}", value), quiet);
        }
        PrefsCommands::Path => {
            let result = PathResult {
                path: path.to_string_lossy().to_string(),
                exists: path.exists(),
            };
            print_formatted(&result, format, |r| {
                format!("{}{}", r.path, if r.exists { "" } else { " (not found)" })
            });
        }
    }

    Ok(())
}
