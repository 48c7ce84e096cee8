// Integration tests for the user session lifecycle
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use authsession::models::user_session_key;
use authsession::testing::{FaultyStore, MockTokenRefresher, TestFixtures};
use authsession::{RecordCodec, SessionError, SessionStore, UserSessionConfig, UserSessionManager};

#[tokio::test]
async fn test_fingerprint_mismatch_invalidates_for_everyone() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store());
    let f1 = TestFixtures::fingerprint();
    let f2 = TestFixtures::other_fingerprint();

    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();

    assert!(sessions.validate(&s1, &f1).await.unwrap().is_some());
    assert!(sessions.validate(&s1, &f2).await.unwrap().is_none());
    assert!(sessions.validate(&s1, &f1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rotation_retires_old_id() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store());
    let f1 = TestFixtures::fingerprint();

    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    let s2 = sessions.rotate(&s1).await.unwrap();

    assert_ne!(s1, s2);
    assert!(sessions.validate(&s1, &f1).await.unwrap().is_none());

    let record = sessions.validate(&s2, &f1).await.unwrap().unwrap();
    assert_eq!(record.subject, "u1");
    assert_eq!(record.provider, "google");
    assert_eq!(record.access_token, "test_access_token");
    assert_eq!(record.refresh_token.as_deref(), Some("test_refresh_token"));
}

#[tokio::test]
async fn test_rotation_survives_failed_old_delete() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();

    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();

    faulty.fail_next_removals(2);
    let s2 = sessions.rotate(&s1).await.unwrap();
    assert!(sessions.validate(&s2, &f1).await.unwrap().is_some());

    // Background cleanup retries with the fast fixture schedule
    for _ in 0..50 {
        if !faulty.exists(&user_session_key(&s1)).await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!faulty.exists(&user_session_key(&s1)).await.unwrap());
    assert!(faulty.removal_attempts() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_validation_racing_logout_does_not_revive_session() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();
    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    faulty.set_latency(Some(Duration::from_millis(100)));

    // Reads the record at 100ms, writes it back at 200ms
    let validation = tokio::spawn({
        let (sessions, s1, f1) = (sessions.clone(), s1.clone(), f1.clone());
        async move { sessions.validate(&s1, &f1).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Lands at 150ms
    sessions.delete(&s1).await.unwrap();

    assert!(validation.await.unwrap().unwrap().is_none());
    faulty.set_latency(None);
    assert!(!faulty.exists(&user_session_key(&s1)).await.unwrap());
    assert!(sessions.validate(&s1, &f1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_validation_racing_eviction_does_not_revive_session() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();
    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    faulty.set_latency(Some(Duration::from_millis(100)));

    // Foreign fingerprint: loads at 100ms, evicts at 200ms
    let foreign = tokio::spawn({
        let (sessions, s1) = (sessions.clone(), s1.clone());
        async move { sessions.validate(&s1, &TestFixtures::other_fingerprint()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Genuine client: loads at 110ms, writes back at 210ms
    let genuine = tokio::spawn({
        let (sessions, s1, f1) = (sessions.clone(), s1.clone(), f1.clone());
        async move { sessions.validate(&s1, &f1).await }
    });

    assert!(foreign.await.unwrap().unwrap().is_none());
    assert!(genuine.await.unwrap().unwrap().is_none());
    faulty.set_latency(None);
    assert!(sessions.validate(&s1, &f1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_validation_racing_rotation_does_not_revive_old_id() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();
    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    faulty.set_latency(Some(Duration::from_millis(100)));

    // Old record is taken at 400ms
    let rotation = tokio::spawn({
        let (sessions, s1) = (sessions.clone(), s1.clone());
        async move { sessions.rotate(&s1).await }
    });
    tokio::time::sleep(Duration::from_millis(250)).await;
    // Loads the old record at 350ms, writes it back at 450ms
    let validation = tokio::spawn({
        let (sessions, s1, f1) = (sessions.clone(), s1.clone(), f1.clone());
        async move { sessions.validate(&s1, &f1).await }
    });

    let s2 = rotation.await.unwrap().unwrap();
    assert!(validation.await.unwrap().unwrap().is_none());
    faulty.set_latency(None);
    assert!(sessions.validate(&s1, &f1).await.unwrap().is_none());
    assert!(sessions.validate(&s2, &f1).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rotation_after_logout_is_refused() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();
    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    faulty.set_latency(Some(Duration::from_millis(100)));

    // Loads at 100ms, tries to take the old record at 400ms
    let rotation = tokio::spawn({
        let (sessions, s1) = (sessions.clone(), s1.clone());
        async move { sessions.rotate(&s1).await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    sessions.delete(&s1).await.unwrap();

    assert!(matches!(rotation.await.unwrap(), Err(SessionError::NotFound)));
    faulty.set_latency(None);
    assert!(sessions.list_session_ids().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_completes_when_caller_gives_up() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    faulty.set_latency(Some(Duration::from_millis(100)));

    let create = sessions.create("u1", "google", TestFixtures::fingerprint(), TestFixtures::tokens(3600));
    assert!(tokio::time::timeout(Duration::from_millis(50), create).await.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    faulty.set_latency(None);
    assert_eq!(sessions.list_session_ids().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_completes_when_caller_gives_up() {
    let faulty = Arc::new(FaultyStore::new(TestFixtures::memory_store()));
    let sessions = TestFixtures::session_manager(faulty.clone());
    let f1 = TestFixtures::fingerprint();
    let s1 = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    faulty.set_latency(Some(Duration::from_millis(100)));

    // Gives up after the new record is being written
    assert!(tokio::time::timeout(Duration::from_millis(150), sessions.rotate(&s1))
        .await
        .is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    faulty.set_latency(None);
    let ids = sessions.list_session_ids().await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], s1);
    assert!(sessions.validate(&ids[0], &f1).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_completes_when_caller_gives_up() {
    let refresher = Arc::new(MockTokenRefresher::rotating(3600).with_delay(Duration::from_secs(2)));
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(refresher.clone());
    let f1 = TestFixtures::fingerprint();
    let id = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(30))
        .await
        .unwrap();

    assert!(tokio::time::timeout(Duration::from_secs(1), sessions.refresh_access_token(&id))
        .await
        .is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let record = sessions.validate(&id, &f1).await.unwrap().unwrap();
    assert_eq!(refresher.calls(), 1);
    assert_eq!(record.access_token, "refreshed_access_token");
    assert_eq!(record.refresh_token.as_deref(), Some("rotated_refresh_token"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_racing_logout_discards_tokens() {
    let refresher = Arc::new(MockTokenRefresher::rotating(3600).with_delay(Duration::from_secs(2)));
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(refresher);
    let f1 = TestFixtures::fingerprint();
    let id = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(30))
        .await
        .unwrap();

    let refresh = tokio::spawn({
        let (sessions, id) = (sessions.clone(), id.clone());
        async move { sessions.refresh_access_token(&id).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    sessions.delete(&id).await.unwrap();

    assert!(matches!(refresh.await.unwrap(), Err(SessionError::NotFound)));
    assert!(sessions.validate(&id, &f1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_created_ids_are_distinct() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store());
    let mut ids = HashSet::new();
    for _ in 0..50 {
        let id = sessions
            .create("u1", "google", TestFixtures::fingerprint(), TestFixtures::tokens(3600))
            .await
            .unwrap();
        assert!(id.len() >= 43);
        assert!(ids.insert(id));
    }
}

#[tokio::test]
async fn test_validation_slides_expiry_within_lifetime_cap() {
    let sessions = UserSessionManager::new(
        TestFixtures::memory_store(),
        RecordCodec::plain(),
        UserSessionConfig {
            idle_timeout_secs: 600,
            max_lifetime_secs: 900,
            ..TestFixtures::session_config()
        },
    );
    let f1 = TestFixtures::fingerprint();
    let id = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();

    let first = sessions.validate(&id, &f1).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = sessions.validate(&id, &f1).await.unwrap().unwrap();

    assert!(second.last_activity_at > first.last_activity_at);
    assert!(second.expires_at >= first.expires_at);
    assert!(second.expires_at <= second.created_at + chrono::Duration::seconds(900));
}

#[tokio::test]
async fn test_refresh_updates_tokens_and_keeps_lifetime() {
    let refresher = Arc::new(MockTokenRefresher::rotating(3600));
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(refresher.clone());
    let f1 = TestFixtures::fingerprint();

    let id = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(30))
        .await
        .unwrap();
    let before = sessions.validate(&id, &f1).await.unwrap().unwrap();
    assert!(sessions.needs_access_token_refresh(&before));

    let refreshed = sessions.refresh_access_token(&id).await.unwrap();

    assert_eq!(refreshed.id, id);
    assert_eq!(refreshed.access_token, "refreshed_access_token");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rotated_refresh_token"));
    assert_eq!(refreshed.expires_at, before.expires_at);
    assert!(!sessions.needs_access_token_refresh(&refreshed));
    assert_eq!(
        refresher.last_request(),
        Some(("google".to_string(), "test_refresh_token".to_string()))
    );

    let stored = sessions.validate(&id, &f1).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "refreshed_access_token");
}

#[tokio::test]
async fn test_refresh_not_due_skips_provider() {
    let refresher = Arc::new(MockTokenRefresher::succeeding(3600));
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(refresher.clone());

    let id = sessions
        .create("u1", "google", TestFixtures::fingerprint(), TestFixtures::tokens(3600))
        .await
        .unwrap();
    let record = sessions.refresh_access_token(&id).await.unwrap();

    assert_eq!(record.access_token, "test_access_token");
    assert_eq!(refresher.calls(), 0);
}

#[tokio::test]
async fn test_refresh_failure_leaves_session_untouched() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(Arc::new(MockTokenRefresher::failing("invalid_grant")));
    let f1 = TestFixtures::fingerprint();

    let id = sessions
        .create("u1", "google", f1.clone(), TestFixtures::tokens(10))
        .await
        .unwrap();

    assert!(matches!(
        sessions.refresh_access_token(&id).await,
        Err(SessionError::IdentityProvider(_))
    ));
    let record = sessions.validate(&id, &f1).await.unwrap().unwrap();
    assert_eq!(record.access_token, "test_access_token");
}

#[tokio::test(start_paused = true)]
async fn test_slow_token_exchange_times_out() {
    let refresher = MockTokenRefresher::succeeding(3600).with_delay(Duration::from_secs(30));
    let sessions = UserSessionManager::new(
        TestFixtures::memory_store(),
        RecordCodec::plain(),
        UserSessionConfig {
            token_exchange_timeout: Duration::from_secs(10),
            ..TestFixtures::session_config()
        },
    )
    .with_token_refresher(Arc::new(refresher));

    let id = sessions
        .create("u1", "google", TestFixtures::fingerprint(), TestFixtures::tokens(5))
        .await
        .unwrap();

    assert!(matches!(
        sessions.refresh_access_token(&id).await,
        Err(SessionError::Timeout)
    ));
}

#[tokio::test]
async fn test_refresh_unknown_session() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store())
        .with_token_refresher(Arc::new(MockTokenRefresher::succeeding(3600)));
    assert!(matches!(
        sessions.refresh_access_token("missing").await,
        Err(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_logout_everywhere() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store());
    let f1 = TestFixtures::fingerprint();

    for _ in 0..3 {
        sessions
            .create("u1", "google", f1.clone(), TestFixtures::tokens(3600))
            .await
            .unwrap();
    }
    let keep = sessions
        .create("u2", "google", f1.clone(), TestFixtures::tokens(3600))
        .await
        .unwrap();

    assert_eq!(sessions.delete_all_for_subject("u1").await.unwrap(), 3);
    assert_eq!(sessions.list_session_ids().await.unwrap(), vec![keep.clone()]);
    assert!(sessions.validate(&keep, &f1).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validations_of_distinct_sessions() {
    let sessions = TestFixtures::session_manager(TestFixtures::memory_store());
    let f1 = TestFixtures::fingerprint();

    let mut ids = Vec::new();
    for n in 0..32 {
        ids.push(
            sessions
                .create(&format!("u{n}"), "google", f1.clone(), TestFixtures::tokens(3600))
                .await
                .unwrap(),
        );
    }

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .enumerate()
        .map(|(n, id)| {
            let sessions = sessions.clone();
            let f1 = f1.clone();
            tokio::spawn(async move {
                let record = sessions.validate(&id, &f1).await.unwrap().unwrap();
                assert_eq!(record.subject, format!("u{n}"));
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
}
