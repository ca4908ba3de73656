use chrono::{TimeDelta, Utc};
use roprox_core::models::{CandidateProxy, EvictionFilter, ProxyStatus, ProxyType, StatusUpdate};
use roprox_core::score::{ScorePolicy, SuccessRatio};
use roprox_db::ProxyRepository;

use crate::integration::common::setup_test_db;

fn candidate(host: &str, port: u16) -> CandidateProxy {
    CandidateProxy::new("test", host, port, ProxyType::Http)
}

fn update(host: &str, port: u16, status: ProxyStatus) -> StatusUpdate {
    StatusUpdate {
        host: host.into(),
        port,
        status,
        last_check: Utc::now(),
    }
}

/// Pins the stored score regardless of counters.
struct FixedScore(f64);

impl ScorePolicy for FixedScore {
    fn score(&self, _success_count: u32, _fail_count: u32) -> f64 {
        self.0
    }
}

#[tokio::test]
async fn upsert_creates_never_probed_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);

    let seen_at = Utc::now();
    repo.upsert(&candidate("1.2.3.4", 8080).with_location("DE"), seen_at)
        .await
        .unwrap();

    let record = repo.get("1.2.3.4", 8080).await.unwrap().expect("record");
    assert_eq!(record.source, "test");
    assert_eq!(record.proxy_type, ProxyType::Http);
    assert_eq!(record.location.as_deref(), Some("DE"));
    assert_eq!(record.status, ProxyStatus::Unknown);
    assert_eq!(record.success_count, 0);
    assert!(record.last_check.is_none());
    assert!((record.last_scanned - seen_at).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn reingestion_keeps_probe_state() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);

    repo.upsert(&candidate("1.2.3.4", 8080).with_location("DE"), Utc::now())
        .await
        .unwrap();
    let failed = update("1.2.3.4", 8080, ProxyStatus::Fail);
    assert!(repo.update_status(&failed, &SuccessRatio).await.unwrap());
    let probed = repo.get("1.2.3.4", 8080).await.unwrap().unwrap();

    let later = Utc::now() + TimeDelta::seconds(5);
    let socks = CandidateProxy::new("other", "1.2.3.4", 8080, ProxyType::Socks5);
    repo.upsert(&socks, later).await.unwrap();

    let record = repo.get("1.2.3.4", 8080).await.unwrap().unwrap();
    assert_eq!(record.source, "other");
    assert_eq!(record.proxy_type, ProxyType::Socks5);
    assert_eq!(record.location.as_deref(), Some("DE"));
    assert_eq!(record.status, ProxyStatus::Fail);
    assert_eq!(record.fail_count, 1);
    assert_eq!(record.last_check, probed.last_check);
    assert!(record.last_scanned > probed.last_scanned);
}

#[tokio::test]
async fn select_stale_puts_never_probed_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    let now = Utc::now();

    for (host, age) in [("1.1.1.1", 120), ("2.2.2.2", 10), ("3.3.3.3", 3600)] {
        repo.upsert(&candidate(host, 80), now).await.unwrap();
        let mut u = update(host, 80, ProxyStatus::Ok);
        u.last_check = now - TimeDelta::seconds(age);
        repo.update_status(&u, &SuccessRatio).await.unwrap();
    }
    repo.upsert(&candidate("4.4.4.4", 80), now).await.unwrap();

    let stale = repo
        .select_stale(now - TimeDelta::seconds(60))
        .await
        .unwrap();
    let hosts: Vec<_> = stale.iter().map(|r| r.host.as_str()).collect();
    assert_eq!(hosts, vec!["4.4.4.4", "3.3.3.3", "1.1.1.1"]);
}

#[tokio::test]
async fn update_status_counts_and_reports_missing_rows() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    repo.upsert(&candidate("5.6.7.8", 1080), Utc::now())
        .await
        .unwrap();

    for status in [ProxyStatus::Ok, ProxyStatus::Ok, ProxyStatus::Fail] {
        repo.update_status(&update("5.6.7.8", 1080, status), &SuccessRatio)
            .await
            .unwrap();
    }

    let record = repo.get("5.6.7.8", 1080).await.unwrap().unwrap();
    assert_eq!(record.status, ProxyStatus::Fail);
    assert_eq!(record.success_count, 2);
    assert_eq!(record.fail_count, 1);
    assert!((record.score - 200.0 / 3.0).abs() < 1e-9);

    let vanished = repo
        .update_status(&update("9.9.9.9", 1, ProxyStatus::Ok), &SuccessRatio)
        .await
        .unwrap();
    assert!(!vanished);
}

#[tokio::test]
async fn last_check_never_moves_backwards() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    repo.upsert(&candidate("5.6.7.8", 1080), Utc::now())
        .await
        .unwrap();

    let first = update("5.6.7.8", 1080, ProxyStatus::Ok);
    repo.update_status(&first, &SuccessRatio).await.unwrap();
    let before = repo.get("5.6.7.8", 1080).await.unwrap().unwrap().last_check.unwrap();

    let mut skewed = update("5.6.7.8", 1080, ProxyStatus::Ok);
    skewed.last_check = first.last_check - TimeDelta::seconds(30);
    repo.update_status(&skewed, &SuccessRatio).await.unwrap();

    let after = repo.get("5.6.7.8", 1080).await.unwrap().unwrap().last_check.unwrap();
    assert!(after > before);
}

#[tokio::test]
async fn delete_where_matches_status_age_and_floor() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    let now = Utc::now();
    let old = now - TimeDelta::days(2);

    // Old failures with different scores, an old OK and a fresh failure.
    for (host, status, seen, score) in [
        ("1.1.1.1", ProxyStatus::Fail, old, 10.0),
        ("1.1.1.2", ProxyStatus::Fail, old, 80.0),
        ("1.1.1.3", ProxyStatus::Ok, old, 10.0),
        ("1.1.1.4", ProxyStatus::Fail, now, 10.0),
    ] {
        repo.upsert(&candidate(host, 80), seen).await.unwrap();
        repo.update_status(&update(host, 80, status), &FixedScore(score))
            .await
            .unwrap();
    }

    let cutoff = now - TimeDelta::days(1);
    let with_floor = EvictionFilter::failed_since(cutoff).with_score_below(Some(50.0));
    assert_eq!(repo.delete_where(&with_floor).await.unwrap(), 1);
    assert!(repo.get("1.1.1.1", 80).await.unwrap().is_none());

    let plain = EvictionFilter::failed_since(cutoff);
    assert_eq!(repo.delete_where(&plain).await.unwrap(), 1);
    assert!(repo.get("1.1.1.2", 80).await.unwrap().is_none());
    assert!(repo.get("1.1.1.3", 80).await.unwrap().is_some());
    assert!(repo.get("1.1.1.4", 80).await.unwrap().is_some());
}

#[tokio::test]
async fn list_and_count_by_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    let now = Utc::now();

    for (host, status, score) in [
        ("2.2.2.1", ProxyStatus::Ok, 40.0),
        ("2.2.2.2", ProxyStatus::Ok, 90.0),
        ("2.2.2.3", ProxyStatus::Fail, 0.0),
    ] {
        repo.upsert(&candidate(host, 80), now).await.unwrap();
        repo.update_status(&update(host, 80, status), &FixedScore(score))
            .await
            .unwrap();
    }
    repo.upsert(&candidate("2.2.2.4", 80), now).await.unwrap();

    let ok = repo.list(Some(ProxyStatus::Ok), 10).await.unwrap();
    let hosts: Vec<_> = ok.iter().map(|r| r.host.as_str()).collect();
    assert_eq!(hosts, vec!["2.2.2.2", "2.2.2.1"]);

    assert_eq!(repo.list(None, 3).await.unwrap().len(), 3);
    assert_eq!(repo.count_by_status(ProxyStatus::Ok).await.unwrap(), 2);
    assert_eq!(repo.count_by_status(ProxyStatus::Fail).await.unwrap(), 1);
    assert_eq!(repo.count_by_status(ProxyStatus::Unknown).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_write_backs_keep_score_in_step_with_counters() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProxyRepository::new(pool);
    repo.upsert(&candidate("7.7.7.7", 3128), Utc::now())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        let status = if i % 2 == 0 {
            ProxyStatus::Ok
        } else {
            ProxyStatus::Fail
        };
        handles.push(tokio::spawn(async move {
            repo.update_status(&update("7.7.7.7", 3128, status), &SuccessRatio)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let record = repo.get("7.7.7.7", 3128).await.unwrap().unwrap();
    assert_eq!(record.success_count, 4);
    assert_eq!(record.fail_count, 4);
    assert_eq!(record.score, 50.0);
}
