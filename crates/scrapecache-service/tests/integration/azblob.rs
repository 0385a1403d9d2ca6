use std::time::Duration;

use chrono::Utc;

use scrapecache_service::collector::{MetricState, RestoreOutcome, ScrapeScheduler};
use scrapecache_service::snapshot::{BlobCredential, SnapshotError, SnapshotRecord, StoreError};
use scrapecache_test::{self as test, BlobServer, Method, StatusCode};

use crate::{BLOB_PATH, blob_cache, resource_group_metrics, snapshot};

const INTERVAL: Duration = Duration::from_secs(5 * 60);

fn registered_state() -> MetricState {
    MetricState::with_metrics(["azure_resourcegroup_info", "azure_subscription_info"])
}

#[tokio::test]
async fn test_blob_round_trip() {
    test::setup();
    let server = BlobServer::new();
    let cache = blob_cache(&server, Some("v2"), BlobCredential::Anonymous);

    let mut state = registered_state();
    for (name, list) in resource_group_metrics(1) {
        state.replace(&name, list);
    }
    let started = Utc::now();
    cache.save(&state, started, INTERVAL).await.unwrap();

    let stored = SnapshotRecord::from_bytes(&server.blob(BLOB_PATH).unwrap()).unwrap();
    assert_eq!(stored.created, started);
    assert_eq!(stored.tag.as_deref(), Some("v2"));

    let put = &server.requests()[0];
    assert_eq!(put.method, Method::PUT);
    assert_eq!(put.path, BLOB_PATH);
    assert_eq!(put.headers["x-ms-blob-type"], "BlockBlob");
    assert!(put.headers.contains_key("x-ms-version"));
    assert!(!put.headers.contains_key("authorization"));

    let mut restored = registered_state();
    let mut scheduler = ScrapeScheduler::new(INTERVAL);
    let outcome = cache.restore(&mut restored, &mut scheduler, Utc::now()).await;
    assert!(outcome.is_restored());
    assert_eq!(restored.metrics(), state.metrics());
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    test::setup();
    let server = BlobServer::new();
    let cache = blob_cache(&server, None, BlobCredential::Anonymous);

    assert_eq!(cache.store().read().await.unwrap(), None);

    let mut state = registered_state();
    let mut scheduler = ScrapeScheduler::new(INTERVAL);
    let outcome = cache.restore(&mut state, &mut scheduler, Utc::now()).await;
    assert_eq!(outcome, RestoreOutcome::NotFound);
}

#[tokio::test]
async fn test_errors_are_not_absence() {
    test::setup();
    let server = BlobServer::new();
    let record = snapshot(None, Duration::ZERO, chrono::Duration::minutes(5));
    server.put_blob(BLOB_PATH, record.to_bytes().unwrap());
    let cache = blob_cache(&server, None, BlobCredential::Anonymous);

    server.force_status(Some(StatusCode::FORBIDDEN));
    let err = cache.store().read().await.unwrap_err();
    assert!(
        matches!(err, StoreError::PermissionDenied(ref details) if details.contains("AuthorizationFailure")),
        "{err:?}"
    );

    server.force_status(Some(StatusCode::INTERNAL_SERVER_ERROR));
    let err = cache.store().read().await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)), "{err:?}");

    let mut state = registered_state();
    let mut scheduler = ScrapeScheduler::new(INTERVAL);
    let outcome = cache.restore(&mut state, &mut scheduler, Utc::now()).await;
    assert_eq!(outcome, RestoreOutcome::Unavailable);
    assert_eq!(state, registered_state());

    server.force_status(None);
    let outcome = cache.restore(&mut state, &mut scheduler, Utc::now()).await;
    assert!(outcome.is_restored());
}

#[tokio::test]
async fn test_failed_upload() {
    test::setup();
    let server = BlobServer::new();
    let cache = blob_cache(&server, None, BlobCredential::Anonymous);
    server.force_status(Some(StatusCode::UNAUTHORIZED));

    let result = cache.save(&registered_state(), Utc::now(), INTERVAL).await;
    assert!(
        matches!(result, Err(SnapshotError::Store(StoreError::PermissionDenied(_)))),
        "{result:?}"
    );
    assert_eq!(server.blob(BLOB_PATH), None);
}

#[tokio::test]
async fn test_unreachable_account() {
    test::setup();
    let server = BlobServer::new();
    let cache = blob_cache(&server, None, BlobCredential::Anonymous);
    drop(server);
    tokio::task::yield_now().await;

    let mut state = registered_state();
    let mut scheduler = ScrapeScheduler::new(INTERVAL);
    let outcome = cache.restore(&mut state, &mut scheduler, Utc::now()).await;
    assert_eq!(outcome, RestoreOutcome::Unavailable);
}

#[tokio::test]
async fn test_credentials_are_sent() {
    test::setup();
    let server = BlobServer::new();

    let cache = blob_cache(&server, None, BlobCredential::BearerToken("t0k3n".into()));
    cache.store().read().await.unwrap();

    let cache = blob_cache(
        &server,
        None,
        BlobCredential::SasToken("?sv=2021-08-06&sig=abc".into()),
    );
    cache.store().write(b"{}").await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].headers["authorization"], "Bearer t0k3n");
    assert_eq!(requests[0].query, None);
    assert!(!requests[1].headers.contains_key("authorization"));
    assert_eq!(requests[1].query.as_deref(), Some("sv=2021-08-06&sig=abc"));
    assert_eq!(server.blob(BLOB_PATH).as_deref(), Some(&b"{}"[..]));
}

#[tokio::test]
async fn test_deadline() {
    test::setup();
    let server = BlobServer::new();
    let record = snapshot(None, Duration::ZERO, chrono::Duration::minutes(5));
    server.put_blob(BLOB_PATH, record.to_bytes().unwrap());
    server.delay_responses(Some(Duration::from_millis(500)));

    let cache = blob_cache(&server, None, BlobCredential::Anonymous)
        .with_deadline(Some(Duration::from_millis(50)));

    // a slow read counts as nothing persisted
    let mut state = registered_state();
    let mut scheduler = ScrapeScheduler::new(INTERVAL);
    let outcome = cache.restore(&mut state, &mut scheduler, Utc::now()).await;
    assert_eq!(outcome, RestoreOutcome::NotFound);

    // a slow write is an error
    let result = cache.save(&state, Utc::now(), INTERVAL).await;
    assert!(
        matches!(
            result,
            Err(SnapshotError::Store(StoreError::Timeout(deadline))) if deadline == Duration::from_millis(50)
        ),
        "{result:?}"
    );
}
