use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rostersync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Reconcile a subscription roster with IAM Identity Center users and groups",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Config file (defaults to ./config.toml when present)
    #[arg(short, long, global = true, env = "ROSTERSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check credentials, the identity store and the configured groups
    Test,

    /// Reconcile the directory with a roster file
    Process(ProcessArgs),

    /// Write a commented default configuration file
    InitConfig {
        /// Where to write the file
        #[arg(short, long, default_value = "config.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ProcessArgs {
    /// Roster file (CSV or TSV; UTF-8 or GBK)
    pub file: PathBuf,

    /// Create, update and delete users so the directory matches the roster
    #[arg(long, conflicts_with_all = ["removeusers", "upgrade"])]
    pub syncusers: bool,

    /// Only delete managed users absent from the roster
    #[arg(long, conflicts_with = "upgrade")]
    pub removeusers: bool,

    /// Only rewrite existing users' attributes to the configured format
    #[arg(long = "upgrade-attributes", alias = "update2ver0928")]
    pub upgrade: bool,

    /// Plan and report without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Concurrent workers (clamped to the configured bounds)
    #[arg(short = 'j', long)]
    pub max_workers: Option<usize>,

    /// Log progress instead of drawing a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ProcessArgs {
    pub fn mode(&self) -> reconcile::Mode {
        if self.syncusers {
            reconcile::Mode::Sync
        } else if self.removeusers {
            reconcile::Mode::Remove
        } else if self.upgrade {
            reconcile::Mode::Upgrade
        } else {
            reconcile::Mode::CreateOnly
        }
    }
}
