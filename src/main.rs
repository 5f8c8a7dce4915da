mod cli;
mod commands;
mod executor;
mod explain;
mod plan;
mod playbook;
mod preflight;
mod retry;
mod ssh;
mod util;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, InstallCommand, UpgradeCommand, VolumeCommand};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub plan_file: std::path::PathBuf,
}

fn main() -> Result<()> {
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
        plan_file: cli.plan_file,
    };

    match cli.command {
        Commands::Install(cmd) => match cmd {
            InstallCommand::Plan(args) => commands::install::plan(&ctx, &args),
            InstallCommand::Validate(args) => commands::install::validate(&ctx, &args),
            InstallCommand::Apply(args) => commands::install::apply(&ctx, &args),
            InstallCommand::AddNode(args) => commands::install::add_node(&ctx, &args),
            InstallCommand::Step(args) => commands::install::step(&ctx, &args),
        },
        Commands::Upgrade(cmd) => match cmd {
            UpgradeCommand::Online(args) => commands::upgrade::run(&ctx, &args, true),
            UpgradeCommand::Offline(args) => commands::upgrade::run(&ctx, &args, false),
        },
        Commands::Volume(cmd) => match cmd {
            VolumeCommand::Add(args) => commands::volume::add(&ctx, &args),
            VolumeCommand::Delete(args) => commands::volume::delete(&ctx, &args),
        },
        Commands::Diagnose(args) => commands::diagnose::run(&ctx, &args),
        Commands::Info(args) => commands::info::run(&ctx, &args),
        Commands::Version => commands::version::run(),
        Commands::SeedRegistry(args) => commands::seed_registry::run(&ctx, &args),
        Commands::Dashboard(args) => commands::dashboard::run(&ctx, &args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "bosun", &mut io::stdout());
            Ok(())
        }
        Commands::PreflightServer(args) => commands::preflight::server(&args),
        Commands::PreflightClient(args) => commands::preflight::client(&args),
    }
}
