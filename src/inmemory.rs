use crate::error::{SessionError, SessionResult};
use crate::model::SessionData;
use crate::store::SessionDataStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

struct Record {
    data: SessionData,
    expires_at: Option<OffsetDateTime>,
    unreadable: bool,
}

impl Record {
    fn new(data: SessionData) -> Self {
        let expires_at = data.expires_at();
        Self {
            data,
            expires_at,
            unreadable: false,
        }
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Reference [`SessionDataStore`] backed by a concurrent hash map.
///
/// Intended for tests and embedded single-node use: it keeps operation
/// counters so write behavior can be asserted, and offers [`poison`] to make
/// a record unreadable, exercising the cache's remove-unloadable path.
///
/// [`poison`]: InMemorySessionDataStore::poison
#[derive(Default)]
pub struct InMemorySessionDataStore {
    records: DashMap<String, Record>,
    loads: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
}

impl InMemorySessionDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `load` calls that found a record.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `store` calls.
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Number of `delete` calls that removed a record.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks an existing record unreadable; subsequent loads fail with
    /// [`SessionError::Unreadable`] until the record is overwritten or
    /// deleted. Returns false when the id is unknown.
    pub fn poison(&self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.unreadable = true;
                true
            }
            None => false,
        }
    }
}

impl SessionDataStore for InMemorySessionDataStore {
    fn load(&self, id: &str) -> SessionResult<Option<SessionData>> {
        match self.records.get(id) {
            Some(record) => {
                if record.unreadable {
                    return Err(SessionError::Unreadable(id.to_string()));
                }
                self.loads.fetch_add(1, Ordering::Relaxed);
                Ok(Some(record.data.clone()))
            }
            None => Ok(None),
        }
    }

    fn store(&self, id: &str, data: &SessionData) -> SessionResult<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.records.insert(id.to_string(), Record::new(data.clone()));
        Ok(())
    }

    fn delete(&self, id: &str) -> SessionResult<bool> {
        let removed = self.records.remove(id).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn exists(&self, id: &str) -> SessionResult<bool> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .get(id)
            .map(|record| !record.is_expired(now))
            .unwrap_or(false))
    }

    fn expired(&self, cutoff: OffsetDateTime) -> SessionResult<Vec<String>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(cutoff))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
