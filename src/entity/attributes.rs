use std::collections::BTreeMap;

use crate::{
    connection::ConnectionRef,
    value::{Row, Value},
};

/// Per-instance attribute store with dirty tracking.
///
/// Holds the *current* attribute values and, for every attribute written since the last sync, the
/// value it had before its first write (`None` if it was absent). An attribute is dirty when its
/// current value differs from that recorded original.
#[derive(Clone, Default)]
pub struct Attributes {
    current: Row,
    original: BTreeMap<String, Option<Value>>,
    exists: bool,
    connection: Option<ConnectionRef>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.current.get(name)
    }

    /// Write an attribute. Only the first write to a key since the last sync records the original
    /// value, so repeated writes never lose it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();

        if !self.original.contains_key(&name) {
            self.original
                .insert(name.clone(), self.current.get(&name).cloned());
        }

        self.current.insert(name, value.into());
    }

    pub fn fill<I, K, V>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        attributes
            .into_iter()
            .for_each(|(name, value)| self.set(name, value));
    }

    /// The value `name` had at the last sync, or before its first write.
    #[must_use]
    pub fn original(&self, name: &str) -> Option<&Value> {
        match self.original.get(name) {
            Some(original) => original.as_ref(),
            None => self.current.get(name),
        }
    }

    /// All current attributes.
    #[must_use]
    pub const fn values(&self) -> &Row {
        &self.current
    }

    /// Attributes whose current value differs from the original.
    #[must_use]
    pub fn changes(&self) -> Row {
        self.current
            .iter()
            .filter(|(name, value)| match self.original.get(*name) {
                Some(Some(original)) => original != *value,
                Some(None) => true,
                None => false,
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.current
            .iter()
            .any(|(name, value)| match self.original.get(name) {
                Some(Some(original)) => original != value,
                Some(None) => true,
                None => false,
            })
    }

    /// Discard all edits made since the last sync.
    pub fn reset(&mut self) {
        for (name, original) in &self.original {
            match original {
                Some(value) => {
                    self.current.insert(name.clone(), value.clone());
                }
                None => {
                    self.current.remove(name);
                }
            }
        }
    }

    /// Make the current snapshot the new original and flag the row as persisted.
    pub fn mark_as_existing(&mut self) {
        self.original = self
            .current
            .iter()
            .map(|(name, value)| (name.clone(), Some(value.clone())))
            .collect();
        self.exists = true;
    }

    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    pub(crate) const fn set_exists(&mut self, exists: bool) {
        self.exists = exists;
    }

    #[must_use]
    pub const fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.as_ref()
    }

    pub fn attach_connection(&mut self, connection: ConnectionRef) {
        self.connection = Some(connection);
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attributes")
            .field("current", &self.current)
            .field("original", &self.original)
            .field("exists", &self.exists)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::Attributes;
    use crate::value::Value;

    #[test]
    fn test_first_write_keeps_original() {
        let mut attributes = Attributes::new();
        attributes.set("a", "before");
        attributes.mark_as_existing();

        attributes.set("a", "v1");
        attributes.set("a", "v2");

        assert_eq!(attributes.changes().get("a"), Some(&Value::from("v2")));
        assert_eq!(attributes.original("a"), Some(&Value::from("before")));
    }

    #[test]
    fn test_new_attribute_original_is_absent() {
        let mut attributes = Attributes::new();
        attributes.set("a", 1);
        attributes.set("a", 2);

        assert_eq!(attributes.original("a"), None);
        assert!(attributes.is_dirty());

        attributes.reset();

        assert_eq!(attributes.get("a"), None);
        assert!(!attributes.is_dirty());
    }

    #[test]
    fn test_dirty_cycle() {
        let mut attributes = Attributes::new();
        attributes.fill([("name", "John"), ("email", "john@x.com")]);
        attributes.mark_as_existing();

        assert!(!attributes.is_dirty());
        assert!(attributes.exists());

        attributes.set("name", "John");
        assert!(!attributes.is_dirty(), "writing an equal value is not a change");

        attributes.set("name", "Jane");
        assert!(attributes.is_dirty());
        assert_eq!(attributes.changes().len(), 1);

        attributes.reset();
        assert!(!attributes.is_dirty());
        assert_eq!(attributes.get("name"), Some(&Value::from("John")));
    }

    #[test]
    fn test_explicit_null_is_tracked() {
        let mut attributes = Attributes::new();
        attributes.set("nickname", Value::Null);

        assert!(attributes.is_dirty());
        assert_eq!(attributes.get("nickname"), Some(&Value::Null));
    }
}
