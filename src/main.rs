mod backlog;
mod cache;
mod config;
mod logging;
mod output;
mod v1;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use crate::cache::{BacklogRepository, CacheSource};
use crate::config::Config;
use crate::v1::V1Client;

#[derive(Parser, Debug)]
#[command(name = "v1backlog")]
#[command(about = "Keep a local copy of a VersionOne backlog, reloading only when it changes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/v1backlog/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Scope (project) name to track
  #[arg(short, long)]
  scope: Option<String>,

  /// Keep polling every N seconds, printing the backlog whenever it reloads
  #[arg(short, long, value_name = "SECS")]
  watch: Option<u64>,

  /// Print items as JSON instead of a table
  #[arg(long)]
  json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override scope if specified on command line
  let config = match args.scope.clone() {
    Some(scope) => config.with_scope(scope),
    None => config,
  };

  let _log_guard = logging::init(&config.log)?;

  let client = V1Client::new(&config)?;
  let repository = BacklogRepository::new(client, &config.backlog).await?;
  info!(
    url = %config.versionone.url,
    scope = repository.scope(),
    "connected"
  );

  match args.watch {
    None => {
      let result = repository.retrieve_current_with_source().await?;
      eprintln!("{}", output::render_status(&result));
      print_backlog(&result.data, args.json)?;
    }
    Some(secs) => watch(&repository, Duration::from_secs(secs.max(1)), args.json).await?,
  }

  Ok(())
}

async fn watch(
  repository: &BacklogRepository<V1Client>,
  period: Duration,
  json: bool,
) -> Result<()> {
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = interval.tick() => {
        match repository.retrieve_current_with_source().await {
          Ok(result) => {
            eprintln!("{}", output::render_status(&result));
            if result.source == CacheSource::Network {
              print_backlog(&result.data, json)?;
            }
          }
          // Keep polling; the next tick may succeed
          Err(e) => error!(error = %e, "failed to retrieve backlog"),
        }
      }
      _ = tokio::signal::ctrl_c() => {
        info!("interrupted, stopping");
        return Ok(());
      }
    }
  }
}

fn print_backlog(backlog: &backlog::Backlog, json: bool) -> Result<()> {
  if json {
    println!("{}", output::render_json(backlog)?);
  } else {
    print!("{}", output::render_table(backlog));
  }
  Ok(())
}
