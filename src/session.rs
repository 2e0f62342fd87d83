use crate::error::{SessionError, SessionResult};
use crate::model::{Attribute, SessionData};
use parking_lot::Mutex;
use std::fmt;
use time::{Duration, OffsetDateTime};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Validity {
    Valid,
    Invalid,
}

struct Inner {
    data: SessionData,
    validity: Validity,
    requests: u32,
    resident: bool,
    idle_since: Option<OffsetDateTime>,
    // Bumped on every dirtying mutation so a store write that raced a
    // concurrent mutation cannot mark the newer state clean.
    version: u64,
}

/// In-memory view over one [`SessionData`] plus request bookkeeping.
///
/// Shared between request handlers as `Arc<Session>`; the owning cache is the
/// only writer of the resident flag. The reference count tracks in-flight
/// requests: `access` increments it, `complete` decrements it, and the cache
/// applies eviction and write policy when it returns to zero.
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    /// Wraps freshly built data. The creating request holds one reference.
    pub fn new(data: SessionData) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data,
                validity: Validity::Valid,
                requests: 1,
                resident: false,
                idle_since: None,
                version: 0,
            }),
        }
    }

    /// Wraps data loaded back from a store; no request holds it yet.
    pub(crate) fn loaded(data: SessionData) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data,
                validity: Validity::Valid,
                requests: 0,
                resident: false,
                idle_since: None,
                version: 0,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.lock().data.id().to_string()
    }

    pub fn context_path(&self) -> String {
        self.inner.lock().data.context_path().to_string()
    }

    /// Marks a request arrival: bumps the reference count and refreshes the
    /// access time and expiry deadline.
    pub fn access(&self, now: OffsetDateTime) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if inner.validity == Validity::Invalid {
            return Err(SessionError::InvalidSession(inner.data.id().to_string()));
        }
        inner.requests += 1;
        inner.idle_since = None;
        inner.data.touch(now);
        Ok(())
    }

    /// Marks a request departure. Returns the remaining reference count.
    ///
    /// Completing past zero is a usage-protocol violation; the count is left
    /// at zero and [`SessionError::ReferenceUnderflow`] is returned.
    pub fn complete(&self) -> SessionResult<u32> {
        let mut inner = self.inner.lock();
        if inner.requests == 0 {
            return Err(SessionError::ReferenceUnderflow(
                inner.data.id().to_string(),
            ));
        }
        inner.requests -= 1;
        Ok(inner.requests)
    }

    pub fn requests(&self) -> u32 {
        self.inner.lock().requests
    }

    /// True while the owning cache has this object in its table.
    pub fn is_resident(&self) -> bool {
        self.inner.lock().resident
    }

    pub(crate) fn set_resident(&self, resident: bool) {
        self.inner.lock().resident = resident;
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().validity == Validity::Valid
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.inner.lock().data.is_expired(now)
    }

    pub fn last_accessed(&self) -> OffsetDateTime {
        self.inner.lock().data.accessed()
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.inner.lock().data.expires_at()
    }

    pub fn max_inactive(&self) -> Duration {
        self.inner.lock().data.max_inactive()
    }

    pub fn set_max_inactive(&self, interval: Duration) -> SessionResult<()> {
        let mut inner = self.checked_lock()?;
        inner.data.set_max_inactive(interval);
        inner.version += 1;
        Ok(())
    }

    pub fn set_attribute(
        &self,
        name: impl Into<String>,
        value: Attribute,
    ) -> SessionResult<Option<Attribute>> {
        let mut inner = self.checked_lock()?;
        inner.version += 1;
        Ok(inner.data.set_attribute(name, value))
    }

    pub fn get_attribute(&self, name: &str) -> SessionResult<Option<Attribute>> {
        let inner = self.checked_lock()?;
        Ok(inner.data.get_attribute(name))
    }

    pub fn remove_attribute(&self, name: &str) -> SessionResult<Option<Attribute>> {
        let mut inner = self.checked_lock()?;
        let removed = inner.data.remove_attribute(name);
        if removed.is_some() {
            inner.version += 1;
        }
        Ok(removed)
    }

    pub fn attribute_names(&self) -> SessionResult<Vec<String>> {
        let inner = self.checked_lock()?;
        Ok(inner.data.attribute_names())
    }

    /// Transitions to the terminal destroyed state and drains the attribute
    /// map so the caller can unbind values. Idempotent; a second call returns
    /// an empty list.
    pub fn invalidate(&self) -> Vec<(String, Attribute)> {
        let mut inner = self.inner.lock();
        if inner.validity == Validity::Invalid {
            return Vec::new();
        }
        inner.validity = Validity::Invalid;
        inner.version += 1;
        inner.data.take_attributes()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.inner.lock().data.is_dirty()
    }

    pub(crate) fn snapshot(&self) -> (SessionData, u64) {
        let inner = self.inner.lock();
        (inner.data.clone(), inner.version)
    }

    /// Clears the dirty flag only if no mutation landed since `version` was
    /// snapshotted.
    pub(crate) fn mark_clean(&self, version: u64, saved_at: OffsetDateTime) {
        let mut inner = self.inner.lock();
        if inner.version == version {
            inner.data.clean(saved_at);
        }
    }

    pub(crate) fn stamp_idle(&self, now: OffsetDateTime) {
        self.inner.lock().idle_since = Some(now);
    }

    /// Sweep probe: `Some(dirty)` when the session is unreferenced, valid,
    /// and has been idle past `window` since its last release.
    pub(crate) fn eviction_candidate(
        &self,
        now: OffsetDateTime,
        window: std::time::Duration,
    ) -> Option<bool> {
        let inner = self.inner.lock();
        if inner.requests > 0 || inner.validity == Validity::Invalid {
            return None;
        }
        let since = inner.idle_since?;
        let window = Duration::try_from(window).ok()?;
        if now - since >= window {
            Some(inner.data.is_dirty())
        } else {
            None
        }
    }

    /// Notifies listener-capable attribute values that the data is about to
    /// leave memory. Failures are logged, never propagated.
    pub(crate) fn will_passivate(&self) {
        let (id, values) = self.listener_snapshot();
        for value in values {
            if let Some(listener) = value.as_activation_listener() {
                if let Err(error) = listener.will_passivate(&id) {
                    warn!(session = %id, %error, "passivation listener failed");
                }
            }
        }
    }

    /// Notifies listener-capable attribute values after a reload.
    pub(crate) fn did_activate(&self) {
        let (id, values) = self.listener_snapshot();
        for value in values {
            if let Some(listener) = value.as_activation_listener() {
                if let Err(error) = listener.did_activate(&id) {
                    warn!(session = %id, %error, "activation listener failed");
                }
            }
        }
    }

    // Callbacks run outside the session lock so a listener touching its own
    // session cannot deadlock.
    fn listener_snapshot(&self) -> (String, Vec<Attribute>) {
        let inner = self.inner.lock();
        let id = inner.data.id().to_string();
        let values = inner.data.attributes().map(|(_, v)| v.clone()).collect();
        (id, values)
    }

    fn checked_lock(&self) -> SessionResult<parking_lot::MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        if inner.validity == Validity::Invalid {
            return Err(SessionError::InvalidSession(inner.data.id().to_string()));
        }
        Ok(inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &inner.data.id())
            .field("valid", &(inner.validity == Validity::Valid))
            .field("requests", &inner.requests)
            .field("resident", &inner.resident)
            .field("dirty", &inner.data.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attribute;

    fn session() -> Session {
        let data = SessionData::new(
            "s1",
            "/app",
            OffsetDateTime::now_utc(),
            Duration::minutes(10),
        );
        Session::new(data)
    }

    #[test]
    fn new_session_starts_with_one_reference() {
        let session = session();
        assert_eq!(session.requests(), 1);
        assert_eq!(session.complete().expect("first complete"), 0);

        let err = session.complete().expect_err("underflow");
        assert_eq!(err, SessionError::ReferenceUnderflow("s1".into()));
        assert_eq!(session.requests(), 0, "count stays at zero after underflow");
    }

    #[test]
    fn access_clears_idle_stamp_and_extends_expiry() {
        let session = session();
        let now = OffsetDateTime::now_utc();
        session.stamp_idle(now);

        session.access(now + Duration::minutes(5)).expect("access");
        assert_eq!(session.requests(), 2);
        assert_eq!(
            session.expires_at(),
            Some(now + Duration::minutes(15)),
            "expiry follows the refreshed access time"
        );
        assert!(
            session
                .eviction_candidate(now + Duration::hours(1), std::time::Duration::from_secs(1))
                .is_none(),
            "a referenced session is never an eviction candidate"
        );
    }

    #[test]
    fn invalidate_is_terminal_and_idempotent() {
        let session = session();
        session
            .set_attribute("name", attribute("value".to_string()))
            .expect("set before invalidate");

        let drained = session.invalidate();
        assert_eq!(drained.len(), 1);
        assert!(session.invalidate().is_empty());
        assert!(!session.is_valid());

        let err = session.get_attribute("name").err().expect("invalid session");
        assert_eq!(err, SessionError::InvalidSession("s1".into()));
        assert!(session.set_max_inactive(Duration::minutes(1)).is_err());
        assert!(session.access(OffsetDateTime::now_utc()).is_err());
    }

    #[test]
    fn mark_clean_skips_when_a_mutation_raced_the_write() {
        let session = session();
        let (_, version) = session.snapshot();

        session
            .set_attribute("k", attribute(1_i64))
            .expect("mutation after snapshot");
        session.mark_clean(version, OffsetDateTime::now_utc());
        assert!(session.is_dirty(), "raced write must not hide the mutation");

        let (_, version) = session.snapshot();
        session.mark_clean(version, OffsetDateTime::now_utc());
        assert!(!session.is_dirty());
    }

    #[test]
    fn eviction_candidate_requires_idle_window() {
        let session = session();
        session.complete().expect("drop creating reference");

        let now = OffsetDateTime::now_utc();
        session.stamp_idle(now);

        let window = std::time::Duration::from_secs(60);
        assert!(session.eviction_candidate(now, window).is_none());
        let ready = session
            .eviction_candidate(now + Duration::seconds(61), window)
            .expect("idle past the window");
        assert!(ready, "never-saved data reports dirty");
    }
}
