use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use moka::sync::Cache;

/// The longest TTL an entry can be stored with.
///
/// Longer TTLs are clamped to this value so that deadline arithmetic can not overflow.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// An item saved in the moka cache, together with its own expiration deadline.
#[derive(Clone, Debug)]
struct LookupItem<V> {
    /// When this item lapses.
    deadline: Instant,
    /// The cached value.
    value: V,
}

/// A struct implementing [`moka::Expiry`] that uses the [`LookupItem`] deadline as the explicit
/// expiration time.
struct ItemExpiration;

/// Returns the duration between the `current_time` and `target_time` in the future.
/// In case the `target_time` is already elapsed, this will return `Some(ZERO)`.
fn saturating_duration_since(current_time: Instant, target_time: Instant) -> Option<Duration> {
    Some(
        target_time
            .checked_duration_since(current_time)
            .unwrap_or_default(),
    )
}

impl<V> moka::Expiry<String, LookupItem<V>> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LookupItem<V>,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LookupItem<V>,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }
}

/// An in-memory cache mapping string keys to values of type `V`, each with its own TTL.
///
/// The cache is cheap to clone, all clones share the same entries. It can be used concurrently
/// from any number of threads or tasks; concurrent writers of the same key race and the last
/// [`set`](Self::set) wins.
///
/// One cache holds exactly one value type. Callers that memoize different kinds of lookups
/// keep one cache per kind.
#[derive(Clone)]
pub struct LookupCache<V> {
    items: Cache<String, LookupItem<V>>,
    default_ttl: Duration,
}

impl<V> fmt::Debug for LookupCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupCache")
            .field("default_ttl", &self.default_ttl)
            .field("entries", &self.items.entry_count())
            .finish()
    }
}

impl<V> LookupCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an unbounded cache whose entries live for `default_ttl` unless stored with an
    /// explicit TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_capacity(default_ttl, None)
    }

    /// Creates a cache that holds at most `capacity` entries, if given.
    ///
    /// The capacity is only a safety net. Entries are expected to lapse by time.
    pub fn with_capacity(default_ttl: Duration, capacity: Option<u64>) -> Self {
        let mut builder = Cache::builder().expire_after(ItemExpiration);
        if let Some(capacity) = capacity {
            builder = builder.max_capacity(capacity);
        }

        Self {
            items: builder.build(),
            default_ttl: default_ttl.min(MAX_TTL),
        }
    }

    /// The TTL used by [`set_default`](Self::set_default).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value stored for `key`, if there is one that has not lapsed yet.
    pub fn get(&self, key: &str) -> Option<V> {
        let item = self.items.get(key)?;
        // moka evicts lazily, the deadline check makes lapsed items invisible right away.
        (item.deadline > Instant::now()).then_some(item.value)
    }

    /// Stores `value` for `key`, replacing any previous entry. The entry lapses after `ttl`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let deadline = Instant::now() + ttl.min(MAX_TTL);
        self.items.insert(key.into(), LookupItem { deadline, value });
    }

    /// Stores `value` for `key` with the [default TTL](Self::default_ttl).
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Removes the entry for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        self.items.invalidate(key);
    }

    /// Removes all entries.
    pub fn invalidate_all(&self) {
        self.items.invalidate_all();
    }

    /// Returns the cached value for `key`, or runs `producer` to compute it.
    ///
    /// The produced value is only cached if `producer` succeeds. An error is handed back to the
    /// caller exactly as the producer returned it and leaves the cache untouched, so the next
    /// call will run the producer again.
    ///
    /// Concurrent callers missing the same key will each run their producer; lookups are
    /// idempotent so this only costs duplicate work.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Physically removes lapsed entries.
    ///
    /// Calling this is never required for correctness, lapsed entries are invisible either way.
    pub fn run_pending_tasks(&self) {
        self.items.run_pending_tasks();
    }

    /// An approximate number of stored entries, which may include lapsed ones.
    pub fn entry_count(&self) -> u64 {
        self.items.entry_count()
    }
}
