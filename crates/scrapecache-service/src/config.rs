use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::collector::CollectorCache;
use crate::discovery::DEFAULT_CACHE_TTL;
use crate::snapshot::{BlobCredential, ConfigurationError, StoreOptions};

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "scrapecache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how collector state is persisted.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// The snapshot location: a file path, `file://<path>` or
    /// `azblob://<storage account host>/<container>/<blob>`.
    ///
    /// Without a location, state is not persisted.
    pub location: Option<String>,

    /// When set, only snapshots written with exactly this tag are restored.
    pub tag: Option<String>,

    /// A deadline for every single snapshot read and write.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// The timeout for establishing a connection to an object store.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// A shared access signature for the blob container.
    pub sas_token: Option<String>,

    /// An OAuth bearer token for the storage account.
    pub bearer_token: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: None,
            tag: None,
            timeout: None,
            connect_timeout: Duration::from_secs(5),
            sas_token: None,
            bearer_token: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("location", &self.location)
            .field("tag", &self.tag)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("credential", &self.credential())
            .finish()
    }
}

impl CacheConfig {
    /// The credential for object stores.
    ///
    /// Tokens in the configuration take precedence over the environment.
    pub fn credential(&self) -> BlobCredential {
        if let Some(token) = self.sas_token.as_deref() {
            BlobCredential::SasToken(token.into())
        } else if let Some(token) = self.bearer_token.as_deref() {
            BlobCredential::BearerToken(token.into())
        } else {
            BlobCredential::from_env()
        }
    }

    /// The options used to open the snapshot store.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            credential: self.credential(),
            connect_timeout: self.connect_timeout,
        }
    }

    /// Creates the collector cache, or `None` if no location is configured.
    pub fn build(&self) -> Result<Option<CollectorCache>, ConfigurationError> {
        let Some(location) = self.location.as_deref() else {
            return Ok(None);
        };
        let cache = CollectorCache::resolve(location, self.tag.clone(), &self.store_options())?;
        Ok(Some(cache.with_deadline(self.timeout)))
    }
}

/// Controls the collection cadence.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectorConfig {
    /// The name of the collector, used in logs and metrics.
    pub name: String,
    /// The time between two collection cycles.
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            name: "collector".into(),
            scrape_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Controls resource discovery.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long discovered subscriptions and resource groups are reused.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Only these subscriptions are discovered. Empty means all.
    pub subscriptions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            subscriptions: Vec::new(),
        }
    }
}

/// The configuration file of a collector process.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Persistence of collector state.
    pub cache: CacheConfig,

    /// The collection cadence.
    pub collector: CollectorConfig,

    /// Resource discovery.
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Get a configuration from a file, or the default configuration without a file.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
