use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scrapecache_service::collector::{CollectorCache, Scraper};
use scrapecache_service::snapshot::{
    AzureBlobStore, BlobCredential, CacheSpec, FilesystemStore, MetricSample, MetricsByName,
    SnapshotRecord,
};
use scrapecache_test::BlobServer;

pub const BLOB_LOCATION: &str = "azblob://account.blob.core.windows.net/metrics/collector.json";
pub const BLOB_PATH: &str = "metrics/collector.json";

/// The metrics produced by [`StaticScraper`] in its `n`-th collection.
pub fn resource_group_metrics(n: usize) -> MetricsByName {
    let scrape = n.to_string();
    let mut metrics = MetricsByName::new();
    metrics.insert(
        "azure_resourcegroup_info".into(),
        vec![
            MetricSample::new([("resourceGroup", "rg-web"), ("scrape", scrape.as_str())], 1.0),
            MetricSample::new([("resourceGroup", "rg-db"), ("scrape", scrape.as_str())], 1.0),
        ],
    );
    metrics.insert(
        "azure_subscription_info".into(),
        vec![MetricSample::new([("subscriptionID", "aaaa-1")], 1.0)],
    );
    metrics
}

/// A scraper producing [`resource_group_metrics`] and counting its collections.
#[derive(Clone, Default)]
pub struct StaticScraper {
    pub calls: Arc<AtomicUsize>,
}

impl StaticScraper {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    fn metric_names(&self) -> Vec<String> {
        vec![
            "azure_resourcegroup_info".into(),
            "azure_subscription_info".into(),
        ]
    }

    async fn collect(&self) -> anyhow::Result<MetricsByName> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(resource_group_metrics(n))
    }
}

/// A cache persisting to `collector.json` in `dir`.
pub fn file_cache(dir: &Path, tag: Option<&str>) -> CollectorCache {
    let path = dir.join("collector.json");
    let spec = CacheSpec::parse(path.to_str().unwrap(), tag.map(str::to_owned)).unwrap();
    CollectorCache::new(spec, FilesystemStore::new(path).into())
}

/// A cache persisting to [`BLOB_PATH`] on `server`.
pub fn blob_cache(server: &BlobServer, tag: Option<&str>, credential: BlobCredential) -> CollectorCache {
    let spec = CacheSpec::parse(BLOB_LOCATION, tag.map(str::to_owned)).unwrap();
    let store = AzureBlobStore::new(
        &server.endpoint(),
        "metrics",
        "collector.json",
        credential,
        Duration::from_secs(1),
    )
    .unwrap();
    CollectorCache::new(spec, store.into())
}

/// A snapshot created `age` ago and expiring `remaining` from now.
pub fn snapshot(tag: Option<&str>, age: Duration, remaining: chrono::Duration) -> SnapshotRecord {
    let now = Utc::now();
    let created: DateTime<Utc> = now - chrono::Duration::from_std(age).unwrap();
    SnapshotRecord {
        created,
        expiry: now + remaining,
        tag: tag.map(str::to_owned),
        metrics: resource_group_metrics(0),
    }
}
