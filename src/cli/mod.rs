//! CLI module for feedstate
//!
//! Provides command-line access to the feed view, preferences and database.

mod commands;
mod output;

use clap::{Parser, Subcommand};

pub use output::OutputFormat;

/// feedstate - aggregated subscription feed
#[derive(Parser, Debug)]
#[command(name = "feedstate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[command(flatten)]
    pub output: OutputOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output formatting options
#[derive(Parser, Debug, Clone)]
pub struct OutputOptions {
    /// Output in JSON format (for machine parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl OutputOptions {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or follow the feed
    Feed {
        #[command(subcommand)]
        command: commands::feed::FeedCommands,
    },

    /// Feed filter preferences
    Prefs {
        #[command(subcommand)]
        command: commands::prefs::PrefsCommands,
    },

    /// Populate the local feed database
    Db {
        #[command(subcommand)]
        command: commands::db::DbCommands,
    },
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output.format();
    let quiet = cli.output.quiet;

    match cli.command {
        Commands::Feed { command } => commands::feed::run(command, format).await,
        Commands::Prefs { command } => commands::prefs::run(command, format, quiet).await,
        Commands::Db { command } => commands::db::run(command, format, quiet).await,
    }
}
