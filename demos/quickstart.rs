use hearth_session::model::attribute;
use hearth_session::{
    CacheConfig, EvictionPolicy, InMemorySessionDataStore, SessionCache, SessionData,
    SessionDataStore, SessionResult,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

fn run_retaining_demo() -> SessionResult<()> {
    println!("== Retaining cache demo ==");
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::new(
        store.clone(),
        CacheConfig::new()
            .with_eviction(EvictionPolicy::EvictOnInactivity {
                idle: std::time::Duration::from_secs(300),
            })
            .with_save_on_create(true),
    );

    let now = OffsetDateTime::now_utc();
    let data = SessionData::new("demo-1", "/shop", now, Duration::minutes(30));
    let session = cache.new_session(data);
    cache.add("demo-1", &session)?;
    println!("Created session demo-1 (saves so far: {})", store.saves());

    session.set_attribute("cart", attribute("3 items".to_string()))?;
    cache.release("demo-1", &session)?;
    println!(
        "Released; resident = {}, saves = {}",
        cache.contains("demo-1"),
        store.saves()
    );

    let swept = cache.sweep(now + Duration::minutes(10));
    println!("Sweep after 10 idle minutes evicted {swept} session(s)");

    let reloaded = cache.get("demo-1")?.expect("store copy present");
    reloaded.access(OffsetDateTime::now_utc())?;
    if let Some(cart) = reloaded.get_attribute("cart")? {
        let cart = cart.as_any().downcast_ref::<String>().expect("string value");
        println!("Reloaded with cart attribute: {cart}");
    }
    cache.release("demo-1", &reloaded)?;

    cache.delete("demo-1")?;
    println!("Deleted; exists = {}", cache.exists("demo-1")?);
    Ok(())
}

fn run_write_through_demo() -> SessionResult<()> {
    println!("== Non-retaining (write-through) cache demo ==");
    let store = Arc::new(InMemorySessionDataStore::new());
    let cache = SessionCache::non_retaining(store.clone(), CacheConfig::new());

    let now = OffsetDateTime::now_utc();
    let data = store.new_session_data("demo-2", "/api", now, now, None, Duration::minutes(5));
    let session = cache.new_session(data);
    cache.add("demo-2", &session)?;
    println!(
        "After add: contains = {} (never retained), exists = {}",
        cache.contains("demo-2"),
        cache.exists("demo-2")?
    );

    session.set_attribute("token", attribute(7_i64))?;
    cache.release("demo-2", &session)?;
    println!(
        "After release: contains = {}, exists = {}, saves = {}",
        cache.contains("demo-2"),
        cache.exists("demo-2")?,
        store.saves()
    );
    Ok(())
}

fn main() -> SessionResult<()> {
    run_retaining_demo()?;
    println!();
    run_write_through_demo()
}
