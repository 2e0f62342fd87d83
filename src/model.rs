use crate::error::SessionResult;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Notification hook for attribute values that hold transient resources.
///
/// The cache invokes `will_passivate` before a session's data leaves memory
/// with its stored record kept, and `did_activate` after the data is loaded
/// back in. Failures are logged by the cache and never block the operation
/// that triggered them.
pub trait ActivationListener: Send + Sync {
    fn will_passivate(&self, id: &str) -> SessionResult<()> {
        let _ = id;
        Ok(())
    }

    fn did_activate(&self, id: &str) -> SessionResult<()> {
        let _ = id;
        Ok(())
    }
}

/// An arbitrary value stored under a session attribute name.
///
/// `as_activation_listener` is a capability hook: values that need to release
/// or reacquire resources across a passivation boundary return `Some(self)`.
/// The cache checks the capability dynamically, so plain data types carry no
/// listener machinery at all.
pub trait AttributeValue: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn as_activation_listener(&self) -> Option<&dyn ActivationListener> {
        None
    }
}

/// Shared handle to an attribute value.
pub type Attribute = Arc<dyn AttributeValue>;

/// Wraps a value into an [`Attribute`] handle.
pub fn attribute<V: AttributeValue>(value: V) -> Attribute {
    Arc::new(value)
}

impl AttributeValue for String {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for i64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for u64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for f64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for bool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for Vec<u8> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AttributeValue for serde_json::Value {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Persisted state of one session.
///
/// The expiry deadline is maintained as `accessed + max_inactive` whenever the
/// interval is positive; a zero or negative interval means the session never
/// expires on its own.
#[derive(Clone)]
pub struct SessionData {
    id: String,
    context_path: String,
    created: OffsetDateTime,
    accessed: OffsetDateTime,
    last_saved: Option<OffsetDateTime>,
    expiry: Option<OffsetDateTime>,
    max_inactive: Duration,
    attributes: HashMap<String, Attribute>,
    dirty: bool,
}

impl SessionData {
    /// Builds the record for a freshly created session.
    pub fn new(
        id: impl Into<String>,
        context_path: impl Into<String>,
        created: OffsetDateTime,
        max_inactive: Duration,
    ) -> Self {
        let mut data = Self {
            id: id.into(),
            context_path: context_path.into(),
            created,
            accessed: created,
            last_saved: None,
            expiry: None,
            max_inactive,
            attributes: HashMap::new(),
            dirty: false,
        };
        data.recompute_expiry();
        data
    }

    /// Rebuilds a record from persisted fields, as a store would on load.
    pub fn restored(
        id: impl Into<String>,
        context_path: impl Into<String>,
        created: OffsetDateTime,
        accessed: OffsetDateTime,
        last_saved: Option<OffsetDateTime>,
        max_inactive: Duration,
    ) -> Self {
        let mut data = Self {
            id: id.into(),
            context_path: context_path.into(),
            created,
            accessed,
            last_saved,
            expiry: None,
            max_inactive,
            attributes: HashMap::new(),
            dirty: false,
        };
        data.recompute_expiry();
        data
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn accessed(&self) -> OffsetDateTime {
        self.accessed
    }

    pub fn last_saved(&self) -> Option<OffsetDateTime> {
        self.last_saved
    }

    /// Absolute expiry deadline; `None` means the session never expires.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expiry
    }

    pub fn max_inactive(&self) -> Duration {
        self.max_inactive
    }

    /// Replaces the inactivity interval and recomputes the deadline.
    pub fn set_max_inactive(&mut self, interval: Duration) {
        self.max_inactive = interval;
        self.recompute_expiry();
        self.dirty = true;
    }

    /// Refreshes the access time and deadline without dirtying the record.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.accessed = now;
        self.recompute_expiry();
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expiry {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// True when the store copy may be stale. A record that has never been
    /// saved counts as dirty regardless of the mutation flag.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.last_saved.is_none()
    }

    /// Marks the record as persisted at `saved_at`.
    pub fn clean(&mut self, saved_at: OffsetDateTime) {
        self.last_saved = Some(saved_at);
        self.dirty = false;
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Attribute) -> Option<Attribute> {
        self.dirty = true;
        self.attributes.insert(name.into(), value)
    }

    pub fn get_attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes.get(name).cloned()
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        let removed = self.attributes.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub(crate) fn attributes(&self) -> impl Iterator<Item = (&String, &Attribute)> {
        self.attributes.iter()
    }

    pub(crate) fn take_attributes(&mut self) -> Vec<(String, Attribute)> {
        self.attributes.drain().collect()
    }

    fn recompute_expiry(&mut self) {
        self.expiry = if self.max_inactive.is_positive() {
            Some(self.accessed + self.max_inactive)
        } else {
            None
        };
    }
}

impl fmt::Debug for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionData")
            .field("id", &self.id)
            .field("context_path", &self.context_path)
            .field("created", &self.created)
            .field("accessed", &self.accessed)
            .field("last_saved", &self.last_saved)
            .field("expiry", &self.expiry)
            .field("max_inactive", &self.max_inactive)
            .field("attributes", &self.attributes.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
