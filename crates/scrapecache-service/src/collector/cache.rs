//! Restoring collector state on startup and persisting it after each cycle.
//!
//! On startup, a persisted [`SnapshotRecord`] is only used if
//!
//! - it can be read and decoded at all,
//! - it carries exactly the configured tag, if a tag is configured,
//! - it has not expired yet.
//!
//! Otherwise the collector starts cold. None of these cases is an error: a missing, broken or
//! stale snapshot only means that the first collection happens right away. A restored snapshot
//! shortens the first wait so that the next collection happens right after the restored data
//! expires, but never later than a regular scrape interval would.

use std::error::Error;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::snapshot::{
    CacheSpec, ConfigurationError, SnapshotError, SnapshotRecord, SnapshotStore, StoreError,
    StoreOptions, resolve,
};

use super::{MetricState, ScrapeScheduler};

/// Added to the remaining lifetime of a restored snapshot when scheduling the next collection.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// What happened when a collector tried to restore its state.
#[derive(Clone, Debug, PartialEq)]
pub enum RestoreOutcome {
    /// The collector has no cache configured.
    Disabled,
    /// Nothing has been persisted yet.
    NotFound,
    /// The store could not be read.
    Unavailable,
    /// The persisted bytes are not a valid snapshot.
    Undecodable,
    /// The snapshot was written with a different or no tag.
    TagMismatch {
        /// The configured tag.
        expected: String,
        /// The tag of the snapshot.
        found: Option<String>,
    },
    /// The snapshot has expired.
    Expired {
        /// When the snapshot expired.
        expiry: DateTime<Utc>,
    },
    /// The snapshot has been applied to the live state.
    Restored {
        /// When the cycle that produced the snapshot started.
        created: DateTime<Utc>,
        /// When the restored metrics expire.
        expiry: DateTime<Utc>,
        /// The number of registered metrics that were replaced.
        metrics: usize,
        /// The shortened wait before the next collection, if any.
        next_sleep: Option<Duration>,
    },
}

impl RestoreOutcome {
    /// Whether the snapshot has been applied.
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }

    /// The start of the cycle that produced the restored metrics.
    pub fn last_scrape_time(&self) -> Option<DateTime<Utc>> {
        match *self {
            Self::Restored { created, .. } => Some(created),
            _ => None,
        }
    }
}

impl AsRef<str> for RestoreOutcome {
    fn as_ref(&self) -> &str {
        match self {
            Self::Disabled => "disabled",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Undecodable => "undecodable",
            Self::TagMismatch { .. } => "tag_mismatch",
            Self::Expired { .. } => "expired",
            Self::Restored { .. } => "restored",
        }
    }
}

/// The result of reading and checking a persisted snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotLookup {
    /// The snapshot passed all checks and may be applied.
    Usable(SnapshotRecord),
    /// There is no usable snapshot.
    Rejected(RestoreOutcome),
}

/// How long to wait before the first collection after restoring a snapshot expiring at `expiry`.
///
/// This is the remaining lifetime plus [`SAFETY_MARGIN`]. Returns `None` if that is not shorter
/// than `scrape_interval`, as restoring must never delay a collection.
pub fn restored_sleep_duration(
    expiry: DateTime<Utc>,
    now: DateTime<Utc>,
    scrape_interval: Duration,
) -> Option<Duration> {
    let remaining = (expiry - now).to_std().unwrap_or_default();
    let sleep = remaining.saturating_add(SAFETY_MARGIN);
    (sleep < scrape_interval).then_some(sleep)
}

/// Adds a scrape interval to a point in time, saturating at the maximum.
pub(crate) fn add_interval(start: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| start.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Applies a checked snapshot to the live state of a collector.
///
/// The samples of every registered metric contained in the snapshot are replaced. Unregistered
/// metrics in the snapshot are ignored.
pub fn apply_snapshot(
    record: SnapshotRecord,
    state: &mut MetricState,
    scheduler: &mut ScrapeScheduler,
    now: DateTime<Utc>,
) -> RestoreOutcome {
    let mut restored = 0;
    for (name, list) in record.metrics {
        if state.replace(&name, list) {
            restored += 1;
        }
    }
    state.set_expiry(record.expiry);

    let next_sleep = restored_sleep_duration(record.expiry, now, scheduler.scrape_interval());
    if let Some(sleep) = next_sleep {
        scheduler.set_next_sleep_duration(sleep);
    }

    RestoreOutcome::Restored {
        created: record.created,
        expiry: record.expiry,
        metrics: restored,
        next_sleep,
    }
}

/// The snapshot cache of a single collector.
#[derive(Clone, Debug)]
pub struct CollectorCache {
    spec: CacheSpec,
    store: SnapshotStore,
    deadline: Option<Duration>,
}

impl CollectorCache {
    /// Creates a cache persisting to `store`.
    pub fn new(spec: CacheSpec, store: SnapshotStore) -> Self {
        Self {
            spec,
            store,
            deadline: None,
        }
    }

    /// Resolves a location string and creates a cache for it.
    pub fn resolve(
        location: &str,
        tag: Option<String>,
        options: &StoreOptions,
    ) -> Result<Self, ConfigurationError> {
        let (spec, store) = resolve(location, tag, options)?;
        Ok(Self::new(spec, store))
    }

    /// Limits the duration of every single read and write.
    ///
    /// A read running into the deadline counts as if nothing had been persisted. A write running
    /// into the deadline fails with [`StoreError::Timeout`].
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The location and tag of this cache.
    pub fn spec(&self) -> &CacheSpec {
        &self.spec
    }

    /// The store backing this cache.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(deadline) = self.deadline else {
            return self.store.read().await;
        };
        match tokio::time::timeout(deadline, self.store.read()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(location = %self.spec, ?deadline, "Reading cached state timed out");
                Ok(None)
            }
        }
    }

    async fn write(&self, content: &[u8]) -> Result<(), StoreError> {
        let Some(deadline) = self.deadline else {
            return self.store.write(content).await;
        };
        tokio::time::timeout(deadline, self.store.write(content))
            .await
            .map_err(|_| StoreError::Timeout(deadline))?
    }

    /// Reads the persisted snapshot and checks whether it may be restored at `now`.
    pub async fn load(&self, now: DateTime<Utc>) -> SnapshotLookup {
        let content = match self.read().await {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::info!(location = %self.spec, "No cached state found");
                return SnapshotLookup::Rejected(RestoreOutcome::NotFound);
            }
            Err(err) => {
                tracing::warn!(
                    location = %self.spec,
                    error = &err as &dyn Error,
                    "Failed to read cached state"
                );
                return SnapshotLookup::Rejected(RestoreOutcome::Unavailable);
            }
        };

        match SnapshotRecord::from_bytes(&content) {
            Ok(record) => self.check(record, now),
            Err(err) => {
                tracing::warn!(
                    location = %self.spec,
                    error = &err as &dyn Error,
                    "Unable to decode cached state"
                );
                SnapshotLookup::Rejected(RestoreOutcome::Undecodable)
            }
        }
    }

    /// Checks the tag and expiry of a decoded snapshot.
    pub fn check(&self, record: SnapshotRecord, now: DateTime<Utc>) -> SnapshotLookup {
        if let Some(expected) = self.spec.tag() {
            if record.tag.as_deref() != Some(expected) {
                tracing::info!(
                    expected,
                    found = record.tag.as_deref(),
                    "Cache tag mismatch, ignoring cached state"
                );
                return SnapshotLookup::Rejected(RestoreOutcome::TagMismatch {
                    expected: expected.to_owned(),
                    found: record.tag,
                });
            }
        }

        if record.is_expired_at(now) {
            tracing::info!(expiry = %record.expiry, "Ignoring cached state, already expired");
            return SnapshotLookup::Rejected(RestoreOutcome::Expired {
                expiry: record.expiry,
            });
        }

        SnapshotLookup::Usable(record)
    }

    /// Restores the persisted snapshot into `state`, if there is a usable one.
    ///
    /// On success, `scheduler` is told to wait only until shortly after the restored metrics
    /// expire.
    pub async fn restore(
        &self,
        state: &mut MetricState,
        scheduler: &mut ScrapeScheduler,
        now: DateTime<Utc>,
    ) -> RestoreOutcome {
        let lookup = self.load(now).await;
        self.finish_restore(lookup, state, scheduler, now)
    }

    /// Applies the result of [`load`](Self::load) to `state` and reports the outcome.
    pub fn finish_restore(
        &self,
        lookup: SnapshotLookup,
        state: &mut MetricState,
        scheduler: &mut ScrapeScheduler,
        now: DateTime<Utc>,
    ) -> RestoreOutcome {
        let outcome = match lookup {
            SnapshotLookup::Usable(record) => apply_snapshot(record, state, scheduler, now),
            SnapshotLookup::Rejected(outcome) => outcome,
        };

        metric!(
            counter("snapshot.restore") += 1,
            "outcome" => outcome.as_ref(),
            "backend" => self.store.name(),
        );
        if let RestoreOutcome::Restored {
            expiry, next_sleep, ..
        } = outcome
        {
            tracing::info!(
                location = %self.spec,
                %expiry,
                ?next_sleep,
                "Restored state from cache"
            );
        }

        outcome
    }

    /// Persists the metrics of a cycle that started at `started`.
    ///
    /// The snapshot stays valid for one `scrape_interval` after the cycle started.
    pub async fn save(
        &self,
        state: &MetricState,
        started: DateTime<Utc>,
        scrape_interval: Duration,
    ) -> Result<SnapshotRecord, SnapshotError> {
        let record = SnapshotRecord {
            created: started,
            expiry: add_interval(started, scrape_interval),
            tag: self.spec.tag().map(str::to_owned),
            metrics: state.metrics().clone(),
        };
        let content = record.to_bytes()?;

        let result = self.write(&content).await;
        metric!(
            counter("snapshot.save") += 1,
            "status" => if result.is_ok() { "ok" } else { "error" },
            "backend" => self.store.name(),
        );
        result?;

        tracing::debug!(
            location = %self.spec,
            bytes = content.len(),
            "Saved state to cache"
        );
        Ok(record)
    }
}
