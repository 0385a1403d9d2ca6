use std::time::Duration;

use chrono::{DateTime, Utc};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};

use scrapecache_service::collector::{CollectorCache, RestoreOutcome, SAFETY_MARGIN};
use scrapecache_service::snapshot::SnapshotRecord;

/// Prints where a snapshot lives, its metadata and the number of samples per metric.
pub fn print_snapshot(cache: &CollectorCache, record: &SnapshotRecord, now: DateTime<Utc>) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row![r->"Location:", cache.store().describe()]);
    table.add_row(row![r->"Backend:", cache.store().name()]);
    table.add_row(row![r->"Created:", record.created.to_rfc3339()]);
    table.add_row(row![r->"Expiry:", expiry_status(record, now)]);
    table.add_row(row![r->"Tag:", record.tag.as_deref().unwrap_or("-")]);
    table.printstd();
    println!();

    let mut metrics = Table::new();
    metrics.set_titles(row![b => "Metric", "Samples"]);
    for (name, samples) in &record.metrics {
        metrics.add_row(row![name, r->samples.len()]);
    }
    metrics.add_row(row![b->"Total", br->record.sample_count()]);
    metrics.printstd();
}

/// Prints when a collector restoring `record` would collect next.
pub fn print_restorable(
    record: &SnapshotRecord,
    now: DateTime<Utc>,
    scrape_interval: Duration,
    first_sleep: Option<Duration>,
) {
    let first_collection = match first_sleep {
        Some(sleep) => format!(
            "in {} (expiry plus {})",
            format_duration(sleep),
            format_duration(SAFETY_MARGIN)
        ),
        None => format!(
            "in {} (regular scrape interval)",
            format_duration(scrape_interval)
        ),
    };

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row![r->"Restorable:", "yes"]);
    table.add_row(row![r->"Expiry:", expiry_status(record, now)]);
    table.add_row(row![r->"Samples:", record.sample_count()]);
    table.add_row(row![r->"Next collection:", first_collection]);
    table.printstd();
}

/// Explains why a snapshot was or would be ignored.
pub fn describe_outcome(outcome: &RestoreOutcome) -> String {
    match outcome {
        RestoreOutcome::Disabled => "no cache is configured".into(),
        RestoreOutcome::NotFound => "nothing has been persisted yet".into(),
        RestoreOutcome::Unavailable => "the store could not be read".into(),
        RestoreOutcome::Undecodable => "the persisted snapshot can not be decoded".into(),
        RestoreOutcome::TagMismatch { expected, found } => match found {
            Some(found) => format!("expected tag `{expected}`, found `{found}`"),
            None => format!("expected tag `{expected}`, found no tag"),
        },
        RestoreOutcome::Expired { expiry } => format!("expired at {}", expiry.to_rfc3339()),
        RestoreOutcome::Restored { .. } => "restored".into(),
    }
}

fn expiry_status(record: &SnapshotRecord, now: DateTime<Utc>) -> String {
    let expiry = record.expiry.to_rfc3339();
    if record.is_expired_at(now) {
        let ago = (now - record.expiry).to_std().unwrap_or_default();
        format!("{expiry} (expired {} ago)", format_duration(ago))
    } else {
        let remaining = record.remaining(now);
        format!("{expiry} (valid for {})", format_duration(remaining))
    }
}

/// Formats a duration in whole seconds.
fn format_duration(duration: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_secs(duration.as_secs()))
}
