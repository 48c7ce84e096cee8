// Behavioural conformance of both SessionStore backends
//
// The Redis cases need a live server and are ignored by default:
//   REDIS_URL=redis://127.0.0.1:6379 cargo test --features testing -- --ignored
use std::sync::Arc;
use std::time::Duration;

use authsession::models::{auth_session_key, user_session_key, UserSessionRecord};
use authsession::store::redis::RedisStoreConfig;
use authsession::testing::TestFixtures;
use authsession::utils::crypto::generate_id;
use authsession::{
    InProcessSessionStore, NetworkedSessionStore, RecordCodec, SessionError, SessionStore,
};

const TTL: Duration = Duration::from_secs(60);

async fn redis_store() -> Arc<dyn SessionStore> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let config = RedisStoreConfig {
        url,
        // Isolate each test run
        key_prefix: format!("authsession-test:{}:", generate_id()),
        ..RedisStoreConfig::default()
    };
    Arc::new(NetworkedSessionStore::connect(config).await.unwrap())
}

async fn record_round_trip(store: Arc<dyn SessionStore>) {
    for codec in [RecordCodec::plain(), RecordCodec::sealed(b"conformance")] {
        let record = UserSessionRecord::new(
            "u1",
            "google",
            TestFixtures::fingerprint(),
            TestFixtures::tokens(1234),
            3600,
        );
        let key = user_session_key(&record.id);
        store.set(&key, &codec.encode(&record).unwrap(), TTL).await.unwrap();

        let payload = store.get(&key).await.unwrap().unwrap();
        let decoded: UserSessionRecord = codec.decode(&payload).unwrap();
        assert_eq!(decoded, record);
    }
}

async fn missing_keys_are_absent_not_errors(store: Arc<dyn SessionStore>) {
    assert_eq!(store.get("user_session:missing").await.unwrap(), None);
    assert_eq!(store.take("auth_session:missing").await.unwrap(), None);
    assert!(!store.exists("user_session:missing").await.unwrap());
    store.delete("user_session:missing").await.unwrap();
}

async fn take_is_single_use(store: Arc<dyn SessionStore>) {
    let key = auth_session_key("c1");
    store.set(&key, b"handshake", TTL).await.unwrap();
    assert_eq!(store.take(&key).await.unwrap(), Some(b"handshake".to_vec()));
    assert_eq!(store.take(&key).await.unwrap(), None);
    assert!(!store.exists(&key).await.unwrap());
}

async fn set_overwrites(store: Arc<dyn SessionStore>) {
    let key = user_session_key("overwrite");
    store.set(&key, b"one", TTL).await.unwrap();
    store.set(&key, b"two", TTL).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some(b"two".to_vec()));
}

async fn conditional_update_requires_live_key(store: Arc<dyn SessionStore>) {
    let key = user_session_key("conditional");
    assert!(!store.set_if_present(&key, b"one", TTL).await.unwrap());
    assert!(!store.exists(&key).await.unwrap());

    store.set(&key, b"one", TTL).await.unwrap();
    assert!(store.set_if_present(&key, b"two", TTL).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(b"two".to_vec()));

    store.delete(&key).await.unwrap();
    assert!(!store.set_if_present(&key, b"three", TTL).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
}

async fn list_by_prefix_scopes_keys(store: Arc<dyn SessionStore>) {
    for n in 0..5 {
        store.set(&user_session_key(&format!("s{n}")), b"x", TTL).await.unwrap();
    }
    store.set(&auth_session_key("c"), b"x", TTL).await.unwrap();

    let mut keys = store.list_by_prefix("user_session:").await.unwrap();
    keys.sort();
    let expected: Vec<String> = (0..5).map(|n| user_session_key(&format!("s{n}"))).collect();
    assert_eq!(keys, expected);
}

async fn entries_expire(store: Arc<dyn SessionStore>) {
    let key = user_session_key("short-lived");
    store.set(&key, b"x", Duration::from_secs(1)).await.unwrap();
    assert!(store.exists(&key).await.unwrap());

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(store.get(&key).await.unwrap(), None);
    assert!(store.list_by_prefix("user_session:short").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_record_round_trip() {
    record_round_trip(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_missing_keys() {
    missing_keys_are_absent_not_errors(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_take_is_single_use() {
    take_is_single_use(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_set_overwrites() {
    set_overwrites(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_conditional_update() {
    conditional_update_requires_live_key(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_list_by_prefix() {
    list_by_prefix_scopes_keys(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_entries_expire() {
    entries_expire(TestFixtures::memory_store()).await;
}

#[tokio::test]
async fn test_memory_never_reports_unavailable_after_close() {
    let store = InProcessSessionStore::with_sweeper(Duration::from_secs(60));
    store.set("k", b"v", TTL).await.unwrap();
    store.close().await;

    assert_eq!(store.get("k").await.unwrap(), None);
    store.set("k", b"v", TTL).await.unwrap();
    assert!(store.health_check().await);
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_record_round_trip() {
    record_round_trip(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_missing_keys() {
    missing_keys_are_absent_not_errors(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_take_is_single_use() {
    take_is_single_use(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_set_overwrites() {
    set_overwrites(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_conditional_update() {
    conditional_update_requires_live_key(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_list_by_prefix() {
    list_by_prefix_scopes_keys(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_entries_expire() {
    entries_expire(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a running Redis server (REDIS_URL)"]
async fn test_redis_closed_store_is_unavailable() {
    let store = redis_store().await;
    assert!(store.health_check().await);
    store.close().await;

    assert!(!store.health_check().await);
    assert!(matches!(
        store.get("user_session:any").await,
        Err(SessionError::BackendUnavailable(_))
    ));
}
