//! Memoized resource discovery.
//!
//! Collectors enumerate the same subscriptions and resource groups on every cycle. Those rarely
//! change, so [`CachedInventory`] remembers each listing for a while instead of asking the
//! inventory again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scrapecache_lookup::LookupCache;
use serde::{Deserialize, Serialize};

use crate::config::DiscoveryConfig;

/// How long discovery results are reused by default.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

const SUBSCRIPTIONS_KEY: &str = "subscriptions";

fn resource_groups_key(subscription_id: &str) -> String {
    format!("resourcegroups:{subscription_id}")
}

/// A subscription visible to the collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// The subscription ID.
    pub id: String,
    /// The human readable name.
    #[serde(default)]
    pub display_name: String,
}

/// A resource group within a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// The resource group name as reported by the inventory.
    pub name: String,
    /// The region of the resource group.
    #[serde(default)]
    pub location: String,
    /// The resource group tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// The external inventory resources are discovered from.
///
/// Implementations must be free of side effects, calling them twice yields the same result
/// unless the inventory itself changed.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// The error of a failed listing.
    type Error: Send;

    /// Lists all subscriptions.
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, Self::Error>;

    /// Lists the resource groups of a subscription.
    async fn list_resource_groups(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<ResourceGroup>, Self::Error>;
}

/// An [`InventorySource`] wrapper caching every successful listing.
pub struct CachedInventory<S> {
    source: S,
    subscriptions: LookupCache<Arc<[Subscription]>>,
    resource_groups: LookupCache<Arc<BTreeMap<String, ResourceGroup>>>,
    cache_ttl: Duration,
    subscription_filter: Option<BTreeSet<String>>,
}

impl<S: InventorySource> CachedInventory<S> {
    /// Wraps `source`, caching its results for [`DEFAULT_CACHE_TTL`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            subscriptions: LookupCache::new(DEFAULT_CACHE_TTL),
            resource_groups: LookupCache::new(DEFAULT_CACHE_TTL),
            cache_ttl: DEFAULT_CACHE_TTL,
            subscription_filter: None,
        }
    }

    /// Wraps `source` with the TTL and subscription filter of the `discovery` configuration.
    pub fn from_config(source: S, config: &DiscoveryConfig) -> Self {
        let mut inventory = Self::new(source);
        inventory.set_cache_ttl(config.cache_ttl);
        inventory.set_subscription_filter(&config.subscriptions);
        inventory
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The TTL of newly cached listings.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Changes the TTL of listings cached from now on.
    pub fn set_cache_ttl(&mut self, ttl: Duration) {
        self.cache_ttl = ttl;
    }

    /// Restricts [`subscriptions`](Self::subscriptions) to the given subscription IDs.
    ///
    /// IDs are compared case insensitively. An empty filter lifts the restriction.
    pub fn set_subscription_filter<I, T>(&mut self, subscription_ids: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let filter: BTreeSet<_> = subscription_ids
            .into_iter()
            .map(|id| id.as_ref().to_lowercase())
            .collect();
        self.subscription_filter = (!filter.is_empty()).then_some(filter);
        self.subscriptions.invalidate(SUBSCRIPTIONS_KEY);
    }

    /// Forgets all cached listings.
    pub fn invalidate_all(&self) {
        self.subscriptions.invalidate(SUBSCRIPTIONS_KEY);
        self.resource_groups.invalidate_all();
    }

    /// Lists the subscriptions passing the subscription filter.
    pub async fn subscriptions(&self) -> Result<Arc<[Subscription]>, S::Error> {
        let mut missed = false;
        let result = self
            .subscriptions
            .get_or_try_insert_with(SUBSCRIPTIONS_KEY, self.cache_ttl, || {
                missed = true;
                async move {
                    tracing::debug!("Updating cached subscription list");
                    let mut subscriptions = self.source.list_subscriptions().await?;
                    if let Some(filter) = &self.subscription_filter {
                        subscriptions.retain(|s| filter.contains(&s.id.to_lowercase()));
                    }
                    tracing::debug!(count = subscriptions.len(), "Found subscriptions");
                    Ok::<Arc<[Subscription]>, S::Error>(subscriptions.into())
                }
            })
            .await;

        record_lookup(SUBSCRIPTIONS_KEY, missed);
        result
    }

    /// Lists the resource groups of a subscription, keyed by lowercased name.
    pub async fn resource_groups(
        &self,
        subscription_id: &str,
    ) -> Result<Arc<BTreeMap<String, ResourceGroup>>, S::Error> {
        let mut missed = false;
        let key = resource_groups_key(subscription_id);
        let result = self
            .resource_groups
            .get_or_try_insert_with(&key, self.cache_ttl, || {
                missed = true;
                async move {
                    tracing::debug!(subscription_id, "Updating cached resource group list");
                    let groups = self.source.list_resource_groups(subscription_id).await?;
                    let groups: BTreeMap<_, _> = groups
                        .into_iter()
                        .map(|group| (group.name.to_lowercase(), group))
                        .collect();
                    tracing::debug!(subscription_id, count = groups.len(), "Found resource groups");
                    Ok::<_, S::Error>(Arc::new(groups))
                }
            })
            .await;

        record_lookup("resourcegroups", missed);
        result
    }
}

fn record_lookup(cache: &str, missed: bool) {
    if missed {
        metric!(counter("lookup.miss") += 1, "cache" => cache);
    } else {
        metric!(counter("lookup.hit") += 1, "cache" => cache);
    }
}
