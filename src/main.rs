mod cli;
mod commands;
mod config;
mod directory;
mod loader;
mod metrics;
mod progress;
mod report;
mod ui;
mod validate;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Commands that talk to the directory need the config before logging
    let config = match cli.command {
        Command::Test | Command::Process(_) => match Config::load(cli.config.as_deref()) {
            Ok(config) => Some(config),
            Err(e) => {
                ui::error(&format!("{e:#}"));
                return ExitCode::from(2);
            }
        },
        Command::InitConfig { .. } | Command::Completions { .. } => None,
    };

    // Initialize logging: -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => config
            .as_ref()
            .map_or(log::LevelFilter::Warn, Config::log_level),
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match run(&ctx, cli.command, config.as_ref()) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(2)
        }
    }
}

fn run(ctx: &Context, command: Command, config: Option<&Config>) -> Result<ExitCode> {
    let config = config.cloned().unwrap_or_default();
    match command {
        Command::Test => commands::test::run(ctx, &config),
        Command::Process(args) => commands::process::run(ctx, &config, &args),
        Command::InitConfig { path, force } => {
            commands::init_config::run(ctx, &path, force).map(|()| ExitCode::SUCCESS)
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rostersync", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
