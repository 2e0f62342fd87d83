use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use hearth_session::model::attribute;
use hearth_session::{
    CacheConfig, EvictionPolicy, InMemorySessionDataStore, SessionCache, SessionData,
    SessionDataStore,
};
use time::{Duration, OffsetDateTime};

fn bench_data(id: &str) -> SessionData {
    let mut data = SessionData::new(id, "/bench", OffsetDateTime::now_utc(), Duration::minutes(30));
    data.set_attribute("payload", attribute(vec![42u8; 64]));
    data
}

fn cache_benches(c: &mut Criterion) {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(store.clone(), CacheConfig::new());

    c.bench_function("cache_get_resident", |b| {
        let session = cache.new_session(bench_data("bench-get"));
        cache.add("bench-get", &session).expect("add");
        b.iter(|| {
            black_box(cache.get("bench-get").expect("get").expect("resident"));
        });
    });

    c.bench_function("cache_clean_request_cycle", |b| {
        let session = cache.new_session(bench_data("bench-cycle"));
        cache.add("bench-cycle", &session).expect("add");
        cache.release("bench-cycle", &session).expect("settle");
        b.iter(|| {
            let session = cache
                .get("bench-cycle")
                .expect("get")
                .expect("resident");
            session.access(OffsetDateTime::now_utc()).expect("access");
            cache.release("bench-cycle", &session).expect("release");
        });
    });

    c.bench_function("cache_dirty_release", |b| {
        let session = cache.new_session(bench_data("bench-dirty"));
        cache.add("bench-dirty", &session).expect("add");
        cache.release("bench-dirty", &session).expect("settle");
        let counter = AtomicU64::new(0);
        b.iter(|| {
            let seq = counter.fetch_add(1, Ordering::Relaxed);
            let session = cache
                .get("bench-dirty")
                .expect("get")
                .expect("resident");
            session.access(OffsetDateTime::now_utc()).expect("access");
            session
                .set_attribute("seq", attribute(seq))
                .expect("set attribute");
            cache.release("bench-dirty", &session).expect("release");
        });
    });
}

fn write_through_benches(c: &mut Criterion) {
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::non_retaining(
        store.clone(),
        CacheConfig::new().with_eviction(EvictionPolicy::EvictOnExit),
    );

    c.bench_function("null_cache_request_cycle", |b| {
        let counter = AtomicU64::new(0);
        let seed = cache.new_session(bench_data("bench-null-0"));
        cache.add("bench-null-0", &seed).expect("add");
        cache.release("bench-null-0", &seed).expect("settle");
        b.iter(|| {
            let bucket = counter.fetch_add(1, Ordering::Relaxed) % 16;
            let id = format!("bench-null-{bucket}");
            match cache.get(&id).expect("get") {
                Some(session) => {
                    session.access(OffsetDateTime::now_utc()).expect("access");
                    cache.release(&id, &session).expect("release");
                }
                None => {
                    let session = cache.new_session(bench_data(&id));
                    cache.add(&id, &session).expect("add");
                    cache.release(&id, &session).expect("release");
                }
            }
        });
    });
}

fn store_benches(c: &mut Criterion) {
    let store = InMemorySessionDataStore::new();

    c.bench_function("inmemory_store_put", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter = counter.wrapping_add(1);
            let bucket = counter % 16;
            let id = format!("bench-put-{bucket}");
            black_box(store.store(&id, &bench_data(&id)).expect("store"));
        });
    });

    c.bench_function("inmemory_store_load", |b| {
        let data = bench_data("bench-load");
        store.store("bench-load", &data).expect("seed");
        b.iter(|| {
            black_box(store.load("bench-load").expect("load"));
        });
    });
}

criterion_group!(session_ops, cache_benches, write_through_benches, store_benches);
criterion_main!(session_ops);
