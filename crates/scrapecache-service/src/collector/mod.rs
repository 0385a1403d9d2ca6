//! Periodic metric collection with restart resilient state.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::snapshot::MetricsByName;

mod cache;
mod scheduler;
mod state;

pub use cache::{
    CollectorCache, RestoreOutcome, SAFETY_MARGIN, SnapshotLookup, apply_snapshot,
    restored_sleep_duration,
};
pub use scheduler::ScrapeScheduler;
pub use state::MetricState;

/// Produces the metrics of one collection cycle.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// The names of all metrics this scraper produces.
    fn metric_names(&self) -> Vec<String>;

    /// Collects a fresh set of metrics.
    async fn collect(&self) -> anyhow::Result<MetricsByName>;
}

/// Runs a [`Scraper`] periodically and keeps its latest metrics.
///
/// With a [`CollectorCache`], the metrics of every successful cycle are persisted and a
/// restarted collector serves the persisted metrics until its first own cycle completes.
pub struct Collector<S> {
    name: String,
    scraper: S,
    state: Arc<RwLock<MetricState>>,
    scheduler: ScrapeScheduler,
    cache: Option<CollectorCache>,
    last_scrape_time: Option<DateTime<Utc>>,
}

impl<S: Scraper> Collector<S> {
    /// Creates a collector running `scraper` every `scrape_interval`.
    pub fn new(name: impl Into<String>, scraper: S, scrape_interval: Duration) -> Self {
        let state = MetricState::with_metrics(scraper.metric_names());
        Self {
            name: name.into(),
            scraper,
            state: Arc::new(RwLock::new(state)),
            scheduler: ScrapeScheduler::new(scrape_interval),
            cache: None,
            last_scrape_time: None,
        }
    }

    /// Persists the collected metrics to `cache`.
    pub fn with_cache(mut self, cache: Option<CollectorCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The name of this collector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle to the live metrics, for serving them while the collector runs.
    pub fn metrics(&self) -> Arc<RwLock<MetricState>> {
        Arc::clone(&self.state)
    }

    /// The scheduler deciding the waits between cycles.
    pub fn scheduler(&self) -> &ScrapeScheduler {
        &self.scheduler
    }

    /// The start of the cycle that produced the current metrics.
    pub fn last_scrape_time(&self) -> Option<DateTime<Utc>> {
        self.last_scrape_time
    }

    /// Restores the persisted state, if a cache is configured and holds a usable snapshot.
    pub async fn restore(&mut self) -> RestoreOutcome {
        let Some(cache) = self.cache.as_ref() else {
            return RestoreOutcome::Disabled;
        };

        // Reading may take a network round trip, the live state is only locked to apply it.
        let now = Utc::now();
        let lookup = cache.load(now).await;
        let outcome = {
            let mut state = self.state.write().await;
            cache.finish_restore(lookup, &mut state, &mut self.scheduler, now)
        };
        if let Some(created) = outcome.last_scrape_time() {
            self.last_scrape_time = Some(created);
        }
        outcome
    }

    /// Runs a single collection cycle and persists its result.
    ///
    /// If collecting fails, the current metrics are kept and nothing is persisted. Failing to
    /// persist is logged but does not fail the cycle.
    pub async fn collect_once(&mut self) -> anyhow::Result<()> {
        let started = Utc::now();
        let start = Instant::now();
        let collected = self.scraper.collect().await?;

        let mut state = self.state.write().await;
        let unknown = state.apply_collected(collected);
        if !unknown.is_empty() {
            tracing::warn!(collector = %self.name, ?unknown, "Dropped unregistered metrics");
        }
        let interval = self.scheduler.scrape_interval();
        state.set_expiry(cache::add_interval(started, interval));
        self.last_scrape_time = Some(started);

        let state = state.downgrade();
        if let Some(cache) = self.cache.as_ref() {
            if let Err(err) = cache.save(&state, started, interval).await {
                tracing::error!(
                    collector = %self.name,
                    location = %cache.spec(),
                    error = &err as &dyn std::error::Error,
                    "Failed to save state to cache"
                );
            }
        }

        let samples: usize = state.metrics().values().map(Vec::len).sum();
        metric!(gauge("collector.samples") = samples as u64, "collector" => self.name.as_str());
        metric!(timer("collector.cycle") = start.elapsed(), "collector" => self.name.as_str());
        Ok(())
    }

    /// Restores the persisted state and then collects periodically until `shutdown` resolves.
    ///
    /// After a successful restore, the first collection waits for the restored metrics to
    /// expire. Otherwise it happens right away.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let outcome = self.restore().await;
        tracing::debug!(collector = %self.name, outcome = outcome.as_ref(), "Collector started");
        if outcome.is_restored() && !self.sleep(&mut shutdown).await {
            return;
        }

        loop {
            if let Err(err) = self.collect_once().await {
                tracing::error!(
                    collector = %self.name,
                    error = ?err,
                    "Collection failed, keeping previous metrics"
                );
            }
            if !self.sleep(&mut shutdown).await {
                break;
            }
        }

        tracing::info!(collector = %self.name, "Collector stopped");
    }

    /// Waits for the next cycle, returns `false` if `shutdown` resolved first.
    async fn sleep<F>(&mut self, shutdown: &mut std::pin::Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        let duration = self.scheduler.next_sleep();
        tracing::trace!(collector = %self.name, ?duration, "Sleeping until next collection");
        tokio::select! {
            _ = shutdown.as_mut() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
