use std::sync::Arc;

use chrono::{Duration, Utc};
use veilstat_core::salt::{Salt, SaltManager, SaltStore};
use veilstat_duckdb::DuckDbBackend;

#[tokio::test]
async fn test_empty_store_accepts_first_salt() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    assert!(db.load().await.expect("load").is_none());

    let salt = Salt::generate(Utc::now(), Duration::hours(1));
    let current = db.put_if_current(None, &salt).await.expect("put");
    assert_eq!(current.value, salt.value);
    assert_eq!(db.load().await.expect("load").expect("stored").value, salt.value);
}

#[tokio::test]
async fn test_stale_expectation_keeps_winner() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    let now = Utc::now();
    let old = Salt::generate(now - Duration::minutes(10), Duration::hours(1));
    db.put_if_current(None, &old).await.expect("seed");

    let first = Salt::generate(now, Duration::hours(1));
    let second = Salt::generate(now, Duration::hours(1));
    let won = db
        .put_if_current(Some(&old.value), &first)
        .await
        .expect("first");
    let lost = db
        .put_if_current(Some(&old.value), &second)
        .await
        .expect("second");

    assert_eq!(won.value, first.value);
    assert_eq!(lost.value, first.value);
}

#[tokio::test]
async fn test_expired_salt_is_replaced_without_expectation() {
    let db = DuckDbBackend::open_in_memory().expect("db");
    let now = Utc::now();
    let old = Salt::generate(now - Duration::hours(2), Duration::hours(1));
    db.put_if_current(None, &old).await.expect("seed");

    let fresh = Salt::generate(now, Duration::hours(1));
    let current = db.put_if_current(None, &fresh).await.expect("put");
    assert_eq!(current.value, fresh.value);
}

#[tokio::test]
async fn test_manager_persists_salt_across_instances() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let a = SaltManager::new(db.clone(), std::time::Duration::from_secs(3600));
    let b = SaltManager::new(db.clone(), std::time::Duration::from_secs(3600));

    let first = a.current_salt().await.expect("salt");
    let second = b.current_salt().await.expect("salt");
    assert_eq!(first.value, second.value);

    let rotated = b.rotate().await.expect("rotate");
    assert_ne!(rotated.value, first.value);
    assert_eq!(a.current_salt().await.expect("salt").value, rotated.value);
}
