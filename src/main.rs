use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

mod cli_exec;
mod cli_runtime;

use cli_runtime::{Cli, init_tracing};

#[derive(Subcommand)]
enum Commands {
    /// Refresh indexes, mirror every locally declared app and write the merged records
    Update {
        /// Worker pool size (defaults to the config's `jobs`)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Where to write the merged app records (defaults to tmp/merged-apps.json)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Emit the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Refresh the index cache without mirroring anything
    Fetch {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve and merge one app from the cached indexes and print the result
    Show {
        app_id: String,
        /// Refresh the index cache first
        #[arg(long)]
        refresh: bool,
    },

    /// Inspect or reset the index cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached sources with their validators
    Show {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the cache file
    Clear,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = cli_runtime::run(cli) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
