use std::time::{Duration, Instant};

use scrapecache_service::collector::{Collector, RestoreOutcome};
use scrapecache_service::config::CacheConfig;
use scrapecache_service::snapshot::{BlobCredential, FilesystemStore, SnapshotRecord, SnapshotStore};
use scrapecache_test::{self as test, BlobServer, StatusCode};

use crate::{
    BLOB_PATH, StaticScraper, blob_cache, file_cache, resource_group_metrics, snapshot,
};

const INTERVAL: Duration = Duration::from_secs(10 * 60);

async fn persist_fresh_snapshot(dir: &std::path::Path) {
    // expires in two minutes, so the first collection is due in about three
    let record = snapshot(None, Duration::from_secs(480), chrono::Duration::minutes(2));
    let store = SnapshotStore::from(FilesystemStore::new(dir.join("collector.json")));
    store.write(&record.to_bytes().unwrap()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restored_metrics_are_served_until_expiry() {
    test::setup();
    let dir = test::tempdir();
    persist_fresh_snapshot(dir.path()).await;

    let scraper = StaticScraper::default();
    let collector = Collector::new("rg", scraper.clone(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    let metrics = collector.metrics();

    collector
        .run(tokio::time::sleep(Duration::from_secs(150)))
        .await;

    assert_eq!(scraper.calls(), 0);
    assert_eq!(metrics.read().await.metrics(), &resource_group_metrics(0));
}

#[tokio::test(start_paused = true)]
async fn test_first_collection_after_restored_expiry() {
    test::setup();
    let dir = test::tempdir();
    persist_fresh_snapshot(dir.path()).await;

    let scraper = StaticScraper::default();
    let collector = Collector::new("rg", scraper.clone(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));
    let metrics = collector.metrics();

    // the collection at ~180s is followed by a regular ten minute wait
    collector
        .run(tokio::time::sleep(Duration::from_secs(200)))
        .await;

    assert_eq!(scraper.calls(), 1);
    assert_eq!(metrics.read().await.metrics(), &resource_group_metrics(1));

    let saved = std::fs::read(dir.path().join("collector.json")).unwrap();
    let saved = SnapshotRecord::from_bytes(&saved).unwrap();
    assert_eq!(saved.metrics, resource_group_metrics(1));
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_collects_right_away() {
    test::setup();
    let dir = test::tempdir();

    let scraper = StaticScraper::default();
    let collector = Collector::new("rg", scraper.clone(), INTERVAL)
        .with_cache(Some(file_cache(dir.path(), None)));

    collector
        .run(tokio::time::sleep(Duration::from_secs(1)))
        .await;

    assert_eq!(scraper.calls(), 1);
    assert!(dir.path().join("collector.json").is_file());
}

#[tokio::test]
async fn test_failed_save_does_not_fail_the_cycle() {
    test::setup();
    let server = BlobServer::new();
    server.force_status(Some(StatusCode::FORBIDDEN));

    let scraper = StaticScraper::default();
    let mut collector = Collector::new("rg", scraper.clone(), INTERVAL).with_cache(Some(
        blob_cache(&server, Some("v2"), BlobCredential::Anonymous),
    ));

    assert_eq!(collector.restore().await, RestoreOutcome::Unavailable);
    collector.collect_once().await.unwrap();

    assert_eq!(scraper.calls(), 1);
    assert_eq!(
        collector.metrics().read().await.metrics(),
        &resource_group_metrics(1)
    );
    assert!(collector.last_scrape_time().is_some());
    assert_eq!(server.blob(BLOB_PATH), None);
}

#[tokio::test]
async fn test_configured_cache() {
    test::setup();
    let dir = test::tempdir();
    let location = dir.path().join("state").join("collector.json");

    let config = CacheConfig {
        location: Some(format!("file://{}", location.display())),
        tag: Some("v2".into()),
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };

    let mut first = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(config.build().unwrap());
    assert_eq!(first.restore().await, RestoreOutcome::NotFound);
    first.collect_once().await.unwrap();

    let saved = SnapshotRecord::from_bytes(&std::fs::read(&location).unwrap()).unwrap();
    assert_eq!(saved.tag.as_deref(), Some("v2"));

    let mut second = Collector::new("rg", StaticScraper::default(), INTERVAL)
        .with_cache(config.build().unwrap());
    assert!(second.restore().await.is_restored());
    assert_eq!(
        second.metrics().read().await.metrics(),
        &resource_group_metrics(1)
    );
}

#[tokio::test]
async fn test_metrics_stay_readable_while_restoring() {
    test::setup();
    let server = BlobServer::new();
    let record = snapshot(None, Duration::ZERO, chrono::Duration::minutes(5));
    server.put_blob(BLOB_PATH, record.to_bytes().unwrap());
    server.delay_responses(Some(Duration::from_millis(500)));

    let mut collector = Collector::new("rg", StaticScraper::default(), INTERVAL).with_cache(Some(
        blob_cache(&server, None, BlobCredential::Anonymous),
    ));
    let metrics = collector.metrics();

    // reads in the middle of the slow download are answered right away
    let reader = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        let state = metrics.read().await;
        (started.elapsed(), state.metrics().values().all(Vec::is_empty))
    };
    let (outcome, (waited, empty)) = tokio::join!(collector.restore(), reader);

    assert!(outcome.is_restored(), "{outcome:?}");
    assert!(waited < Duration::from_millis(200), "{waited:?}");
    assert!(empty);
    assert_eq!(
        metrics.read().await.metrics(),
        &resource_group_metrics(0)
    );
}
