use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a resident session with no in-flight requests leaves memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum EvictionPolicy {
    /// Sessions stay resident until explicit deletion or expiry.
    NeverEvict,
    /// A sweep removes sessions idle longer than `idle` since their release.
    EvictOnInactivity { idle: Duration },
    /// Sessions are removed as soon as their reference count reaches zero.
    EvictOnExit,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::NeverEvict
    }
}

impl EvictionPolicy {
    pub fn idle_window(&self) -> Option<Duration> {
        match self {
            Self::EvictOnInactivity { idle } => Some(*idle),
            _ => None,
        }
    }
}

/// Construction-time policy surface of a [`SessionCache`](crate::SessionCache).
///
/// The write flags are independent and combined by OR at each decision point;
/// the decision logic lives in [`CacheConfig::release_outcome`] and
/// [`CacheConfig::sweep_write`] so it stays testable as pure functions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    pub eviction: EvictionPolicy,
    /// Persist synchronously when a session becomes resident via `add`.
    pub save_on_create: bool,
    /// Persist immediately before the inactivity sweep removes a session.
    pub save_on_inactive_evict: bool,
    /// Persist at response commit even though the session stays resident.
    pub flush_on_response_commit: bool,
    /// Delete records the store reports as unreadable instead of failing `get`.
    pub remove_unloadable: bool,
}

/// What a release that dropped the reference count to zero must do, in order:
/// the write decision is evaluated on pre-eviction state, and eviction only
/// acts once the required write has succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub write: bool,
    pub evict: bool,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_save_on_create(mut self, enabled: bool) -> Self {
        self.save_on_create = enabled;
        self
    }

    pub fn with_save_on_inactive_evict(mut self, enabled: bool) -> Self {
        self.save_on_inactive_evict = enabled;
        self
    }

    pub fn with_flush_on_response_commit(mut self, enabled: bool) -> Self {
        self.flush_on_response_commit = enabled;
        self
    }

    pub fn with_remove_unloadable(mut self, enabled: bool) -> Self {
        self.remove_unloadable = enabled;
        self
    }

    /// Decision table for a release that reached zero references.
    pub fn release_outcome(&self, dirty: bool) -> ReleaseOutcome {
        ReleaseOutcome {
            write: dirty,
            evict: matches!(self.eviction, EvictionPolicy::EvictOnExit),
        }
    }

    /// Decision table for the inactivity sweep: dirty data is always written
    /// before eviction, and the flag forces a write of clean sessions too.
    pub fn sweep_write(&self, dirty: bool) -> bool {
        dirty || self.save_on_inactive_evict
    }
}
