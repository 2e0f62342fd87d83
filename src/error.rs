use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the cache and store layers.
///
/// Variants carry owned strings so the enum stays `Clone`; single-flight
/// waiters receive the same load failure the leading caller observed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A different session object is already registered for this id.
    #[error("session {0} already has a resident entry")]
    AlreadyResident(String),

    /// The id is unknown to both the cache and the backing store.
    #[error("session {0} not found")]
    NotFound(String),

    /// The backing store failed during load, store, or delete.
    #[error("persistence failure for session {id}: {reason}")]
    Persistence { id: String, reason: String },

    /// The stored record exists but cannot be read back.
    #[error("session {0} could not be read from the store")]
    Unreadable(String),

    /// Operation attempted on a session after `invalidate`.
    #[error("session {0} has been invalidated")]
    InvalidSession(String),

    /// More `complete` calls than `access` calls.
    #[error("session {0} released more times than it was acquired")]
    ReferenceUnderflow(String),
}
