use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::SnapshotError;

/// A single sample of a metric, identified by its labels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// The labels of this sample, in a stable order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// The sample value.
    #[serde(with = "sample_value")]
    pub value: f64,
}

impl MetricSample {
    /// Creates a sample from label pairs and a value.
    pub fn new<I, K, V>(labels: I, value: f64) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value,
        }
    }
}

/// The ordered samples of one metric.
pub type MetricList = Vec<MetricSample>;

/// All metric lists of a collector, keyed by metric name.
pub type MetricsByName = BTreeMap<String, MetricList>;

/// The persisted state of a collector.
///
/// This is the unit that is written after every collection cycle and read back once when a
/// collector starts. Unknown fields are ignored when reading, so older collectors can read
/// snapshots written by newer ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// When the collection cycle that produced these metrics started.
    pub created: DateTime<Utc>,
    /// After this point in time, the snapshot must no longer be restored.
    pub expiry: DateTime<Utc>,
    /// The invalidation tag the collector was configured with when writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// The collected metrics.
    #[serde(default, deserialize_with = "deserialize_metrics")]
    pub metrics: MetricsByName,
}

/// Reads the metric lists, skipping metrics persisted as `null`.
fn deserialize_metrics<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<MetricsByName, D::Error> {
    let metrics = BTreeMap::<String, Option<MetricList>>::deserialize(deserializer)?;
    Ok(metrics
        .into_iter()
        .filter_map(|(name, list)| Some((name, list?)))
        .collect())
}

impl SnapshotRecord {
    /// Serializes the snapshot into its persisted JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(SnapshotError::Encode)
    }

    /// Parses a snapshot from its persisted JSON form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }

    /// Whether the snapshot is expired at `now`.
    ///
    /// A snapshot expiring exactly at `now` is considered expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// How long the snapshot stays valid after `now`, zero if it is already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry - now).to_std().unwrap_or_default()
    }

    /// The total number of samples over all metrics.
    pub fn sample_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }
}

/// (De)serializes sample values.
///
/// JSON has no representation for non-finite numbers, so those are written as the strings
/// Prometheus uses in its text format.
mod sample_value {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawValue {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value == f64::INFINITY {
            serializer.serialize_str("+Inf")
        } else if *value == f64::NEG_INFINITY {
            serializer.serialize_str("-Inf")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let text = match RawValue::deserialize(deserializer)? {
            RawValue::Number(value) => return Ok(value),
            RawValue::Text(text) => text,
        };
        match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "+Inf" | "Inf" => Ok(f64::INFINITY),
            "-Inf" => Ok(f64::NEG_INFINITY),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"a number, NaN, +Inf or -Inf",
            )),
        }
    }
}
