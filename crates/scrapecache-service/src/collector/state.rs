use chrono::{DateTime, Utc};

use crate::snapshot::{MetricList, MetricsByName};

/// The live metrics of a collector.
///
/// Only metrics that have been registered up front are ever held. Data for any other metric
/// name, whether freshly collected or restored from a snapshot, is dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricState {
    metrics: MetricsByName,
    expiry: Option<DateTime<Utc>>,
}

impl MetricState {
    /// Creates a state with an empty list for each of `names`.
    pub fn with_metrics<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let mut state = Self::default();
        for name in names {
            state.register(name);
        }
        state
    }

    /// Registers a metric name. Registering a name twice keeps its current samples.
    pub fn register(&mut self, name: impl Into<String>) {
        self.metrics.entry(name.into()).or_default();
    }

    /// Whether `name` is a registered metric.
    pub fn is_registered(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Replaces the samples of a registered metric.
    ///
    /// Returns `false` and leaves the state untouched if `name` is not registered.
    pub fn replace(&mut self, name: &str, list: MetricList) -> bool {
        match self.metrics.get_mut(name) {
            Some(current) => {
                *current = list;
                true
            }
            None => false,
        }
    }

    /// Replaces all registered metrics with the result of a collection cycle.
    ///
    /// Registered metrics missing from `collected` are cleared. Returns the names in
    /// `collected` that are not registered.
    pub fn apply_collected(&mut self, mut collected: MetricsByName) -> Vec<String> {
        for (name, current) in self.metrics.iter_mut() {
            *current = collected.remove(name).unwrap_or_default();
        }
        collected.into_keys().collect()
    }

    /// The samples of a metric.
    pub fn get(&self, name: &str) -> Option<&MetricList> {
        self.metrics.get(name)
    }

    /// All registered metrics.
    pub fn metrics(&self) -> &MetricsByName {
        &self.metrics
    }

    /// When the current metrics stop being valid.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Sets when the current metrics stop being valid.
    pub fn set_expiry(&mut self, expiry: DateTime<Utc>) {
        self.expiry = Some(expiry);
    }
}
