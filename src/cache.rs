use crate::config::{CacheConfig, EvictionPolicy};
use crate::error::{SessionError, SessionResult};
use crate::model::SessionData;
use crate::session::Session;
use crate::store::SessionDataStore;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, trace, warn};

type LoadOutcome = SessionResult<Option<Arc<Session>>>;

/// Pending-load marker shared by every caller racing `get` for one id. The
/// first caller installs it and performs the store read; the rest block on
/// the condvar and receive the same outcome.
struct LoadFlight {
    outcome: Mutex<Option<LoadOutcome>>,
    ready: Condvar,
}

impl LoadFlight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: LoadOutcome) {
        let mut slot = self.outcome.lock();
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> LoadOutcome {
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            self.ready.wait(&mut slot);
        }
        slot.clone().expect("flight completed")
    }
}

enum FlightRole {
    Leader(Arc<LoadFlight>),
    Waiter(Arc<LoadFlight>),
}

const SWEEP_HINT_INTERVAL: Duration = Duration::seconds(60);

/// Single authority for resident [`Session`] objects.
///
/// All access to a session by id goes through the cache: it keeps at most one
/// resident object per id process-wide, gates store loads with a per-id
/// single-flight marker, and applies the configured eviction and write
/// policies when a request releases its reference.
///
/// The non-retaining variant (see [`SessionCache::non_retaining`]) never
/// inserts into the table at all: `contains` stays false even between `add`
/// and `release`, and `delete` returns `None` even when the store record was
/// removed. Both are documented contracts of that variant, not bugs.
pub struct SessionCache {
    store: Arc<dyn SessionDataStore>,
    config: CacheConfig,
    retaining: bool,
    sessions: DashMap<String, Arc<Session>>,
    loads: DashMap<String, Arc<LoadFlight>>,
    sweep_hint: Mutex<OffsetDateTime>,
}

impl SessionCache {
    /// Builds a retaining cache over `store`.
    pub fn new(store: Arc<dyn SessionDataStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            retaining: true,
            sessions: DashMap::new(),
            loads: DashMap::new(),
            sweep_hint: Mutex::new(OffsetDateTime::now_utc()),
        }
    }

    /// Builds the non-retaining ("null") variant: sessions are written out
    /// and dropped from memory the moment their reference count reaches
    /// zero, regardless of the configured eviction mode.
    pub fn non_retaining(store: Arc<dyn SessionDataStore>, config: CacheConfig) -> Self {
        Self {
            retaining: false,
            ..Self::new(store, config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of resident sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Wraps `data` in a fresh session holding one reference for the creating
    /// request. The session is not resident until [`add`](Self::add).
    pub fn new_session(&self, data: SessionData) -> Arc<Session> {
        trace!(session = %data.id(), "created session object");
        Arc::new(Session::new(data))
    }

    /// Registers `session` as resident under `id`.
    ///
    /// Fails with [`SessionError::AlreadyResident`] when a different object
    /// already occupies the id; re-adding the same object is a no-op. With
    /// `save_on_create` set, the data is written to the store inside this
    /// call and a write failure propagates — the session stays registered so
    /// the only copy of the data is not lost.
    pub fn add(&self, id: &str, session: &Arc<Session>) -> SessionResult<()> {
        if self.retaining {
            match self.sessions.entry(id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    if !Arc::ptr_eq(occupied.get(), session) {
                        return Err(SessionError::AlreadyResident(id.to_string()));
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    session.set_resident(true);
                    vacant.insert(session.clone());
                }
            }
            debug!(session = %id, "session resident");
        }
        if self.config.save_on_create {
            self.write_session(id, session)?;
        }
        Ok(())
    }

    /// Returns the resident session for `id`, or loads it from the store.
    ///
    /// Concurrent callers for the same id share a single store read and
    /// receive the same object; a caller that abandons the wait does not
    /// cancel the load. Unknown ids return `Ok(None)`.
    pub fn get(&self, id: &str) -> SessionResult<Option<Arc<Session>>> {
        if self.retaining {
            if let Some(entry) = self.sessions.get(id) {
                trace!(session = %id, "resident hit");
                return Ok(Some(entry.value().clone()));
            }
        }

        let role = match self.loads.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                FlightRole::Waiter(occupied.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let flight = Arc::new(LoadFlight::new());
                vacant.insert(flight.clone());
                FlightRole::Leader(flight)
            }
        };

        match role {
            FlightRole::Waiter(flight) => flight.wait(),
            FlightRole::Leader(flight) => {
                let outcome = self.load_session(id);
                flight.complete(outcome.clone());
                self.loads.remove(id);
                outcome
            }
        }
    }

    /// True only while a session is resident in the table. Always false on
    /// the non-retaining variant, by design.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// True when the session is known resident or present in the store.
    pub fn exists(&self, id: &str) -> SessionResult<bool> {
        if let Some(entry) = self.sessions.get(id) {
            let session = entry.value().clone();
            drop(entry);
            let now = OffsetDateTime::now_utc();
            return Ok(session.is_valid() && !session.is_expired(now));
        }
        self.store.exists(id)
    }

    /// Releases one request's hold on `session`; call exactly once per
    /// matching `get`-plus-`access` or `new_session`-plus-`add`.
    ///
    /// When the reference count reaches zero the write policy is applied
    /// first (a failure propagates and leaves the session resident), then
    /// the eviction policy.
    pub fn release(&self, id: &str, session: &Arc<Session>) -> SessionResult<()> {
        let remaining = session.complete()?;
        if remaining > 0 {
            trace!(session = %id, remaining, "released, still referenced");
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();
        if !session.is_valid() {
            self.drop_resident(id, session);
            return Ok(());
        }

        let outcome = self.config.release_outcome(session.is_dirty());
        if outcome.write {
            self.write_session(id, session)?;
        }

        if outcome.evict || !self.retaining {
            session.will_passivate();
            self.drop_resident(id, session);
            debug!(session = %id, "evicted on release");
        } else if matches!(self.config.eviction, EvictionPolicy::EvictOnInactivity { .. }) {
            session.stamp_idle(now);
            self.maybe_sweep(now);
        }
        Ok(())
    }

    /// Response-commit hook: with `flush_on_response_commit` set, dirty data
    /// is written out while the session stays resident.
    pub fn commit(&self, session: &Arc<Session>) -> SessionResult<()> {
        if !self.config.flush_on_response_commit || !session.is_valid() {
            return Ok(());
        }
        if session.is_dirty() {
            let id = session.id();
            self.write_session(&id, session)?;
            trace!(session = %id, "flushed on response commit");
        }
        Ok(())
    }

    /// Removes `id` from the table and the store. Returns the session that
    /// was resident; the non-retaining variant always returns `None`, even
    /// when a store record was deleted.
    pub fn delete(&self, id: &str) -> SessionResult<Option<Arc<Session>>> {
        let removed_record = self.store.delete(id)?;
        let resident = self.sessions.remove(id).map(|(_, session)| {
            session.set_resident(false);
            session
        });
        debug!(session = %id, removed_record, was_resident = resident.is_some(), "deleted");
        Ok(resident)
    }

    /// Inactivity pass: evicts resident sessions that have been idle past the
    /// configured window since their last release. A failed eviction write is
    /// logged and the session retained for the next cycle, so dirty data is
    /// never dropped. Returns the number of sessions evicted.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let Some(window) = self.config.eviction.idle_window() else {
            return 0;
        };

        let candidates: Vec<(String, Arc<Session>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = 0;
        for (id, session) in candidates {
            let Some(dirty) = session.eviction_candidate(now, window) else {
                continue;
            };
            if self.config.sweep_write(dirty) {
                if let Err(error) = self.write_session(&id, &session) {
                    warn!(session = %id, %error, "eviction write failed, session retained");
                    continue;
                }
            }
            session.will_passivate();
            if self.evict_if_unreferenced(&id, &session) {
                debug!(session = %id, "evicted after inactivity");
                evicted += 1;
            }
        }
        evicted
    }

    /// Expiry reaping: deletes store records past their deadline and destroys
    /// expired resident sessions with no in-flight requests. Returns the ids
    /// destroyed; per-id delete failures are logged and retried next cycle.
    pub fn scavenge(&self, now: OffsetDateTime) -> SessionResult<Vec<String>> {
        let mut candidates: HashSet<String> = self.store.expired(now)?.into_iter().collect();
        for entry in self.sessions.iter() {
            if entry.value().is_expired(now) && entry.value().requests() == 0 {
                candidates.insert(entry.key().clone());
            }
        }

        let mut destroyed = Vec::new();
        for id in candidates {
            if let Some(session) = self.sessions.get(&id).map(|entry| entry.value().clone()) {
                // Skip sessions a request picked back up since the scan.
                if !session.is_expired(now) || session.requests() > 0 {
                    continue;
                }
            }
            match self.store.delete(&id) {
                Ok(_) => {
                    if let Some((_, session)) = self
                        .sessions
                        .remove_if(&id, |_, session| session.requests() == 0)
                    {
                        session.set_resident(false);
                    }
                    debug!(session = %id, "scavenged expired session");
                    destroyed.push(id);
                }
                Err(error) => {
                    warn!(session = %id, %error, "scavenge delete failed, will retry");
                }
            }
        }
        Ok(destroyed)
    }

    fn load_session(&self, id: &str) -> LoadOutcome {
        // A racing add may have registered the id after the fast-path miss.
        if self.retaining {
            if let Some(entry) = self.sessions.get(id) {
                return Ok(Some(entry.value().clone()));
            }
        }

        let data = match self.store.load(id) {
            Ok(Some(data)) => data,
            Ok(None) => {
                trace!(session = %id, "unknown to cache and store");
                return Ok(None);
            }
            Err(SessionError::Unreadable(_)) if self.config.remove_unloadable => {
                warn!(session = %id, "removing unloadable session record");
                if let Err(error) = self.store.delete(id) {
                    warn!(session = %id, %error, "failed to delete unloadable record");
                }
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let loaded = Arc::new(Session::loaded(data));
        if self.retaining {
            match self.sessions.entry(id.to_string()) {
                // An add raced the load; its object wins and the loaded copy
                // is discarded without activation.
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    return Ok(Some(occupied.get().clone()));
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    loaded.set_resident(true);
                    vacant.insert(loaded.clone());
                }
            }
            if self.config.eviction.idle_window().is_some() {
                loaded.stamp_idle(OffsetDateTime::now_utc());
            }
        }

        debug!(session = %id, "loaded from store");
        loaded.did_activate();
        Ok(Some(loaded))
    }

    fn write_session(&self, id: &str, session: &Arc<Session>) -> SessionResult<()> {
        let (mut data, version) = session.snapshot();
        let saved_at = OffsetDateTime::now_utc();
        // The durable copy is in sync by definition, so it is written clean;
        // a reload must not observe the pre-write dirty flag.
        data.clean(saved_at);
        self.store.store(id, &data)?;
        session.mark_clean(version, saved_at);
        trace!(session = %id, "wrote session data");
        Ok(())
    }

    fn drop_resident(&self, id: &str, session: &Arc<Session>) {
        if self.retaining {
            self.sessions
                .remove_if(id, |_, resident| Arc::ptr_eq(resident, session));
        }
        session.set_resident(false);
    }

    fn evict_if_unreferenced(&self, id: &str, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, resident| {
                Arc::ptr_eq(resident, session) && resident.requests() == 0
            })
            .is_some();
        if removed {
            session.set_resident(false);
        }
        removed
    }

    // Opportunistic sweep piggybacking on release traffic, throttled so a
    // busy cache does not rescan its table on every request.
    fn maybe_sweep(&self, now: OffsetDateTime) {
        {
            let mut hint = self.sweep_hint.lock();
            if now - *hint < SWEEP_HINT_INTERVAL {
                return;
            }
            *hint = now;
        }
        let evicted = self.sweep(now);
        if evicted > 0 {
            debug!(evicted, "opportunistic sweep");
        }
    }
}
