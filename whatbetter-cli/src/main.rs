mod cli;
mod commands;
mod config;

use crate::{
    cli::{Args, Commands},
    commands::{CommandExecutor, TranscodeRequest},
    config::AppConfig,
};
use anyhow::Result;
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_FILTER: &str = "whatbetter=info,whatbetter_transcode=info,process_utils=info";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    debug!("Loaded configuration: {:?}", config);

    match args.command {
        Commands::Transcode {
            source,
            formats,
            output_dir,
            threads,
            job_timeout,
            remaster_title,
        } => {
            let config = config.with_overrides(output_dir, threads, job_timeout);
            let executor = CommandExecutor::new(config);

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, rolling back");
                    interrupt.cancel();
                }
            });

            executor
                .transcode(
                    TranscodeRequest {
                        source,
                        formats,
                        remaster_title,
                    },
                    &cancel,
                )
                .await?;
        }

        Commands::Inspect { source, json } => {
            CommandExecutor::new(config).inspect(&source, json).await?;
        }

        Commands::Config { show } => {
            if show {
                println!("{}", config.show()?);
            } else {
                match AppConfig::default_path() {
                    Some(path) => println!("Configuration file: {}", path.display()),
                    None => println!("No configuration directory on this platform"),
                }
                println!("Use --show to display the effective configuration");
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
