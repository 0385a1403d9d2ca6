//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use scrapecache_service::collector::{CollectorCache, SnapshotLookup, restored_sleep_duration};
use scrapecache_service::config::{CacheConfig, Config};
use scrapecache_service::snapshot::{SnapshotRecord, build_cache_tag};
use scrapecache_service::{logging, metrics};

use crate::output;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs the snapshot as a summary table.
    Table,
    /// Outputs the entire snapshot as JSON.
    Json,
}

/// Selects the persisted snapshot to work on.
#[derive(Clone, Debug, Args)]
struct CacheArgs {
    /// The snapshot location, overriding `cache.location` from the configuration file.
    ///
    /// Either a file path, `file://<path>` or `azblob://<account host>/<container>/<blob>`.
    #[arg(long, short)]
    location: Option<String>,

    /// The tag a restorable snapshot must carry, overriding `cache.tag`.
    #[arg(long, short)]
    tag: Option<String>,
}

impl CacheArgs {
    fn open(&self, config: &CacheConfig) -> Result<CollectorCache> {
        let mut config = config.clone();
        if let Some(location) = &self.location {
            config.location = Some(location.clone());
        }
        if let Some(tag) = &self.tag {
            config.tag = Some(tag.clone());
        }

        config
            .build()
            .context("invalid cache location")?
            .context("no cache location configured, pass one with --location")
    }
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Print the persisted snapshot as it is, without checking tag or expiry.
    Inspect {
        #[command(flatten)]
        cache: CacheArgs,

        /// The output format.
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Check whether a collector starting now would restore the persisted snapshot.
    ///
    /// Exits with an error if the snapshot would be ignored.
    Verify {
        #[command(flatten)]
        cache: CacheArgs,

        /// The scrape interval of the collector, overriding `collector.scrape_interval`.
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// Compute the cache tag for a set of collector settings.
    Tag {
        /// The tag prefix, usually a format version.
        #[arg(long, short)]
        prefix: String,

        /// Parse every value as JSON instead of taking it as a plain string.
        #[arg(long)]
        json: bool,

        /// The settings that invalidate persisted snapshots when they change.
        values: Vec<String>,
    },
}

/// Utilities for the state persisted by collectors.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output, overriding `logging.level`.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

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
pub async fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    logging::init_logging(&config.logging);
    if let Some(statsd) = config.metrics.statsd.as_deref() {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )?;
    }

    match cli.command {
        Command::Inspect { cache, format } => {
            inspect(&cache.open(&config.cache)?, format).await
        }
        Command::Verify { cache, interval } => {
            let interval = interval.unwrap_or(config.collector.scrape_interval);
            verify(&cache.open(&config.cache)?, interval).await
        }
        Command::Tag {
            prefix,
            json,
            values,
        } => {
            println!("{}", tag(&prefix, &values, json)?);
            Ok(())
        }
    }
}

async fn inspect(cache: &CollectorCache, format: OutputFormat) -> Result<()> {
    let content = cache
        .store()
        .read()
        .await
        .with_context(|| format!("failed to read snapshot from {}", cache.spec()))?;
    let Some(content) = content else {
        println!("Nothing persisted at {}", cache.spec());
        return Ok(());
    };
    let record = SnapshotRecord::from_bytes(&content).context("failed to decode snapshot")?;

    match format {
        OutputFormat::Table => output::print_snapshot(cache, &record, Utc::now()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
    }
    Ok(())
}

async fn verify(cache: &CollectorCache, interval: Duration) -> Result<()> {
    let now = Utc::now();
    match cache.load(now).await {
        SnapshotLookup::Usable(record) => {
            let first_sleep = restored_sleep_duration(record.expiry, now, interval);
            output::print_restorable(&record, now, interval, first_sleep);
            Ok(())
        }
        SnapshotLookup::Rejected(outcome) => {
            anyhow::bail!(
                "snapshot at {} would not be restored: {}",
                cache.spec(),
                output::describe_outcome(&outcome)
            )
        }
    }
}

fn tag(prefix: &str, values: &[String], json: bool) -> Result<String> {
    if !json {
        return Ok(build_cache_tag(prefix, values)?);
    }

    let values = values
        .iter()
        .map(|value| serde_json::from_str::<serde_json::Value>(value))
        .collect::<Result<Vec<_>, _>>()
        .context("values must be valid JSON with --json")?;
    Ok(build_cache_tag(prefix, &values)?)
}
