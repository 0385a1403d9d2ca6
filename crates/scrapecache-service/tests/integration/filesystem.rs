use std::time::Duration;

use scrapecache_service::collector::{Collector, RestoreOutcome};
use scrapecache_service::snapshot::{FilesystemStore, SnapshotRecord, SnapshotStore};
use scrapecache_test as test;

use crate::{StaticScraper, file_cache, resource_group_metrics, snapshot};

const INTERVAL: Duration = Duration::from_secs(10 * 60);

async fn persist(dir: &std::path::Path, record: &SnapshotRecord) {
    let store = SnapshotStore::from(FilesystemStore::new(dir.join("collector.json")));
    store.write(&record.to_bytes().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_save_and_restore_round_trip() {
    test::setup();
    let dir = test::tempdir();

    let scraper = StaticScraper::default();
    let mut first = Collector::new("rg", scraper, INTERVAL)
        .with_cache(Some(file_cache(dir.path(), Some("v2"))));
    first.collect_once().await.unwrap();
    let collected = first.metrics().read().await.clone();

    let mut second = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), Some("v2"))));
    let outcome = second.restore().await;

    assert!(outcome.is_restored(), "{outcome:?}");
    let restored = second.metrics().read().await.clone();
    assert_eq!(restored.metrics(), collected.metrics());
    assert_eq!(restored.metrics(), &resource_group_metrics(1));
    assert_eq!(restored.expiry(), collected.expiry());
    assert_eq!(second.last_scrape_time(), first.last_scrape_time());
}

#[tokio::test]
async fn test_tag_is_enforced() {
    test::setup();
    let dir = test::tempdir();
    let remaining = chrono::Duration::minutes(5);

    for tag in [Some("v1"), None] {
        persist(dir.path(), &snapshot(tag, Duration::ZERO, remaining)).await;

        let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
            .with_cache(Some(file_cache(dir.path(), Some("v2"))));
        let outcome = collector.restore().await;

        assert_eq!(
            outcome,
            RestoreOutcome::TagMismatch {
                expected: "v2".into(),
                found: tag.map(str::to_owned),
            }
        );
        let state = collector.metrics().read().await.clone();
        assert!(state.metrics().values().all(Vec::is_empty));
        assert_eq!(collector.scheduler().pending_override(), None);
    }

    // without a configured tag, the tagged snapshot is fine
    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    assert!(collector.restore().await.is_restored());
}

#[tokio::test]
async fn test_expired_snapshot_is_ignored() {
    test::setup();
    let dir = test::tempdir();
    let record = snapshot(
        Some("v2"),
        Duration::from_secs(900),
        -chrono::Duration::minutes(5),
    );
    persist(dir.path(), &record).await;

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), Some("v2"))));
    let outcome = collector.restore().await;

    assert_eq!(
        outcome,
        RestoreOutcome::Expired {
            expiry: record.expiry
        }
    );
    assert_eq!(collector.last_scrape_time(), None);
    assert_eq!(collector.metrics().read().await.expiry(), None);
}

#[tokio::test]
async fn test_restore_shortens_first_sleep() {
    test::setup();
    let dir = test::tempdir();
    let record = snapshot(
        None,
        Duration::from_secs(120),
        chrono::Duration::minutes(8),
    );
    persist(dir.path(), &record).await;

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    let outcome = collector.restore().await;
    assert!(outcome.is_restored());
    assert_eq!(collector.last_scrape_time(), Some(record.created));

    // 8 minutes remaining plus the safety margin, minus the time the test took
    let sleep = collector.scheduler().pending_override().unwrap();
    assert!(sleep <= Duration::from_secs(9 * 60), "{sleep:?}");
    assert!(sleep > Duration::from_secs(9 * 60 - 5), "{sleep:?}");
    assert!(sleep < INTERVAL);
}

#[tokio::test]
async fn test_restore_never_lengthens_the_cadence() {
    test::setup();
    let dir = test::tempdir();
    persist(
        dir.path(),
        &snapshot(None, Duration::ZERO, chrono::Duration::seconds(570)),
    )
    .await;

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    let outcome = collector.restore().await;

    assert!(outcome.is_restored());
    assert_eq!(collector.scheduler().pending_override(), None);
}

#[tokio::test]
async fn test_interrupted_write_keeps_previous_snapshot() {
    test::setup();
    let dir = test::tempdir();
    let record = snapshot(None, Duration::ZERO, chrono::Duration::minutes(5));
    persist(dir.path(), &record).await;

    // a crash between writing the temp file and renaming it leaves this behind
    let store = FilesystemStore::new(dir.path().join("collector.json"));
    std::fs::write(store.temp_path(), b"{\"created\": \"2024-03-01T12").unwrap();

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    assert!(collector.restore().await.is_restored());
    assert_eq!(
        collector.metrics().read().await.metrics(),
        &resource_group_metrics(0)
    );

    // the next save overwrites the leftover and does not leave a temp file
    collector.collect_once().await.unwrap();
    assert!(!store.temp_path().exists());
    let saved = SnapshotRecord::from_bytes(&std::fs::read(store.path()).unwrap()).unwrap();
    assert_eq!(saved.metrics, resource_group_metrics(1));
}

#[tokio::test]
async fn test_undecodable_snapshot_is_a_cold_start() {
    test::setup();
    let dir = test::tempdir();
    std::fs::write(dir.path().join("collector.json"), b"not json at all").unwrap();

    let scraper = StaticScraper::default();
    let mut collector = Collector::new("rg", scraper.clone(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    assert_eq!(collector.restore().await, RestoreOutcome::Undecodable);

    // the first cycle replaces the broken snapshot
    collector.collect_once().await.unwrap();
    assert_eq!(scraper.calls(), 1);
    let mut restarted = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    assert!(restarted.restore().await.is_restored());
}

#[tokio::test]
async fn test_missing_directory_is_created() {
    test::setup();
    let dir = test::tempdir();
    let nested = dir.path().join("state").join("exporter");

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(Some(file_cache(&nested, None)));
    assert_eq!(collector.restore().await, RestoreOutcome::NotFound);

    collector.collect_once().await.unwrap();
    assert!(nested.join("collector.json").is_file());
}
