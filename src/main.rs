mod agent;
mod cli;
mod commands;
mod config;
mod facts;
mod journal;
mod store;
mod transport;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
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
        config: Config::load(&cli.config)?,
    };

    match cli.command {
        Command::Run => commands::run::run(&ctx).await,
        Command::Apply(args) => commands::apply::run(&ctx, args).await,
        Command::Status(args) => commands::status::run(&ctx, args).await,
        Command::Commands { json } => commands::catalog::run(json),
        Command::Variables => commands::variables::run(&ctx).await,
        Command::Users => commands::users::run(&ctx),
        Command::Log { lines } => commands::log::run(&ctx, lines),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "holdfast", &mut io::stdout());
            Ok(())
        }
    }
}
