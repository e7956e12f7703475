mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use tether_lib::identity::DEFAULT_MOUNT_POINT;
use tether_lib::logging::LogService;
use tether_lib::site::SiteOp;

use crate::cmd::{cmd_boot, cmd_resolve, cmd_site, cmd_watch};
use crate::output::OutputFormat;

/// tether - give an ephemeral instance a stable identity
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Settings file (default: /etc/tether/tether.toml when present)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Provision this instance, then watch for spot termination
  Boot {
    /// Exit after provisioning instead of watching
    #[arg(long)]
    no_watch: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Watch for spot termination and shut down when it is announced
  Watch,

  /// Show the desired state resolved from metadata and tags
  Resolve {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Start, stop or reload a site's containers
  Site {
    /// Site directory name under the root
    site: String,

    /// Operation: start, stop or reload
    operation: SiteOp,

    /// Directory holding the site directories
    #[arg(long, default_value = DEFAULT_MOUNT_POINT)]
    root: PathBuf,
  },
}

fn init_tracing(log: &LogService, verbose: bool) {
  let default_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  let filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
    .with(
      fmt::layer()
        .with_ansi(false)
        .with_writer(log.clone())
        .with_filter(LevelFilter::INFO),
    )
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let log = LogService::new();
  init_tracing(&log, cli.verbose);

  let config = cli.config.as_deref();
  match cli.command {
    Commands::Boot { no_watch, format } => cmd_boot(config, &log, !no_watch, format),
    Commands::Watch => cmd_watch(config),
    Commands::Resolve { format } => cmd_resolve(config, format),
    Commands::Site { site, operation, root } => cmd_site(&root, &site, operation),
  }
}
