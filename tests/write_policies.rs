use hearth_session::model::attribute;
use hearth_session::{
    CacheConfig, EvictionPolicy, InMemorySessionDataStore, SessionCache, SessionData,
    SessionDataStore,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

fn sample_data(id: &str) -> SessionData {
    SessionData::new(id, "/app", OffsetDateTime::now_utc(), Duration::minutes(10))
}

#[test]
fn no_write_happens_before_release_without_save_on_create() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(store.clone(), CacheConfig::new());

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");
    assert_eq!(store.saves(), 0, "no write until release");

    session
        .set_attribute("user", attribute("u-77".to_string()))
        .expect("set attribute");
    cache.release("S1", &session).expect("release");
    assert_eq!(store.saves(), 1, "dirty data written when references hit zero");
}

#[test]
fn save_on_create_writes_synchronously_inside_add() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(store.clone(), CacheConfig::new().with_save_on_create(true));

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");
    assert_eq!(store.saves(), 1, "written before release is ever called");
    assert!(store.exists("S1").expect("record present"));

    cache.release("S1", &session).expect("release");
    assert_eq!(store.saves(), 1, "clean session is not rewritten on release");
}

#[test]
fn clean_release_does_not_touch_the_store() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(store.clone(), CacheConfig::new());

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");
    cache.release("S1", &session).expect("first release");
    assert_eq!(store.saves(), 1);

    let reused = cache.get("S1").expect("get").expect("resident");
    reused.access(OffsetDateTime::now_utc()).expect("access");
    cache.release("S1", &reused).expect("second release");
    assert_eq!(store.saves(), 1, "access alone does not dirty the session");
}

#[test]
fn commit_flushes_dirty_data_while_staying_resident() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(
        store.clone(),
        CacheConfig::new().with_flush_on_response_commit(true),
    );

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");

    cache.commit(&session).expect("commit");
    assert_eq!(store.saves(), 1, "dirty data flushed at response commit");
    assert!(cache.contains("S1"), "session stays resident");

    cache.commit(&session).expect("second commit");
    assert_eq!(store.saves(), 1, "clean session is not rewritten");

    session
        .set_attribute("step", attribute(2_i64))
        .expect("dirty again");
    cache.commit(&session).expect("third commit");
    assert_eq!(store.saves(), 2);
}

#[test]
fn commit_is_a_no_op_without_the_flag() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(store.clone(), CacheConfig::new());

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");

    cache.commit(&session).expect("commit");
    assert_eq!(store.saves(), 0);
}

#[test]
fn save_on_inactive_evict_forces_a_write_of_clean_sessions() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let window = std::time::Duration::from_secs(60);
    let cache = SessionCache::new(
        store.clone(),
        CacheConfig::new()
            .with_eviction(EvictionPolicy::EvictOnInactivity { idle: window })
            .with_save_on_inactive_evict(true),
    );

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");
    cache.release("S1", &session).expect("release");
    assert_eq!(store.saves(), 1, "release wrote the fresh session");

    let later = OffsetDateTime::now_utc() + Duration::hours(1);
    assert_eq!(cache.sweep(later), 1);
    assert_eq!(store.saves(), 2, "flag forces a write even though clean");
}

#[test]
fn inactivity_evict_of_clean_sessions_skips_the_write_without_the_flag() {
    let store = Arc::new(InMemorySessionDataStore::new());
    let window = std::time::Duration::from_secs(60);
    let cache = SessionCache::new(
        store.clone(),
        CacheConfig::new().with_eviction(EvictionPolicy::EvictOnInactivity { idle: window }),
    );

    let session = cache.new_session(sample_data("S1"));
    cache.add("S1", &session).expect("add");
    cache.release("S1", &session).expect("release");
    assert_eq!(store.saves(), 1);

    let later = OffsetDateTime::now_utc() + Duration::hours(1);
    assert_eq!(cache.sweep(later), 1);
    assert_eq!(store.saves(), 1, "clean eviction needs no second write");
    assert!(store.exists("S1").expect("store copy intact"));
}
