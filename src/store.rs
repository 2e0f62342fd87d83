use crate::error::SessionResult;
use crate::model::SessionData;
use time::{Duration, OffsetDateTime};

/// Durable persistence contract for [`SessionData`], keyed by session id.
///
/// Implementations own the durable copy; the cache owns the authoritative
/// in-memory copy while a session is resident. Operations must be safe to
/// call concurrently for different ids — concurrent operations on the same id
/// are serialized by the cache's per-id gate, not by the store.
pub trait SessionDataStore: Send + Sync + 'static {
    /// Reads the record for `id`, or `None` when the id is unknown.
    ///
    /// A record that exists but cannot be read back surfaces as
    /// [`SessionError::Unreadable`](crate::SessionError::Unreadable) so the
    /// cache can apply its remove-unloadable policy.
    fn load(&self, id: &str) -> SessionResult<Option<SessionData>>;

    /// Writes the record for `id`, replacing any previous copy.
    fn store(&self, id: &str, data: &SessionData) -> SessionResult<()>;

    /// Removes the record for `id`; true when something was deleted.
    fn delete(&self, id: &str) -> SessionResult<bool>;

    /// True when a live record for `id` exists in the backend.
    fn exists(&self, id: &str) -> SessionResult<bool>;

    /// Maintenance scan: ids of records expired at or before `cutoff`.
    fn expired(&self, cutoff: OffsetDateTime) -> SessionResult<Vec<String>>;

    /// Builds a record using the store's clock and precision conventions.
    fn new_session_data(
        &self,
        id: &str,
        context_path: &str,
        created: OffsetDateTime,
        accessed: OffsetDateTime,
        last_saved: Option<OffsetDateTime>,
        max_inactive: Duration,
    ) -> SessionData {
        SessionData::restored(id, context_path, created, accessed, last_saved, max_inactive)
    }
}
