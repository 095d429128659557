//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sourcemap_store_service::config::{Config, RetentionLimit};
use sourcemap_store_service::metrics;

use crate::logging;
use crate::server;

/// Source map store commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run(RunArgs),
}

/// Settings of the `run` command, overriding the configuration file.
#[derive(Args, Debug)]
struct RunArgs {
    /// Host or IP address to bind the server to.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the server to.
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of container source maps per application version, -1 or 0 for no limit.
    #[arg(long, value_name = "COUNT", allow_negative_numbers = true, value_parser = parse_retention_limit)]
    max_container_maps: Option<RetentionLimit>,

    /// Maximum number of code push source maps per application version, -1 or 0 for no limit.
    #[arg(long, value_name = "COUNT", allow_negative_numbers = true, value_parser = parse_retention_limit)]
    max_codepush_maps: Option<RetentionLimit>,

    /// Directory to store the database and the source maps in.
    #[arg(long, value_name = "DIR")]
    store_path: Option<PathBuf>,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = Some(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(limit) = self.max_container_maps {
            config.max_container_maps = limit;
        }
        if let Some(limit) = self.max_codepush_maps {
            config.max_codepush_maps = limit;
        }
        if let Some(root) = self.store_path {
            config.root_path = Some(root);
            config.paths = None;
        }
    }
}

fn parse_retention_limit(value: &str) -> Result<RetentionLimit, String> {
    let limit: i64 = value.parse().map_err(|err| format!("{err}"))?;
    RetentionLimit::try_from(limit).map_err(|err| err.to_string())
}

/// Command line interface parser.
#[derive(Parser)]
#[command(bin_name = "sourcemap-store", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;

    let Command::Run(args) = cli.command;
    args.apply(&mut config);

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: false,
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    server::run(config).context("failed to start the server")?;

    Ok(())
}
