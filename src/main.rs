use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use treesync::cli::args::{Cli, Commands};
use treesync::cli::commands;
use treesync::config::Config;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let format = cli.output.unwrap_or(config.general.default_output);

    let output = match cli.command {
        Commands::Queue(args) => commands::queue(args.command, format)?,
        Commands::Tree(args) => commands::tree(&args, format)?,
        Commands::Config(args) => commands::config(&args.command, format)?,
        Commands::Demo(args) => commands::demo(&args, config, format)?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
