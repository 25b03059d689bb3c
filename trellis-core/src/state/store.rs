//! State storage and the public/private key predicate.

use serde_json::{Map, Value};

/// The property bag type: text keys mapped to dynamic values, in insertion
/// order.
pub type StateMap = Map<String, Value>;

/// Keys starting with this marker are private: invisible to reads,
/// existence checks, enumeration, deletion, and the snapshot export, though
/// the write path still stores them.
pub const PRIVATE_MARKER: char = '_';

/// Whether a key is visible through the public surface.
pub fn is_public(key: &str) -> bool {
    !key.starts_with(PRIVATE_MARKER)
}

/// The raw property bag backing one model instance.
///
/// Never handed out directly: the [`Model`](super::Model) facade filters
/// every public-surface operation through [`is_public`], while the write
/// procedure reads and writes the store unfiltered.
#[derive(Debug, Default)]
pub(crate) struct StateStore {
    entries: StateMap,
}

impl StateStore {
    pub fn new(entries: StateMap) -> Self {
        Self { entries }
    }

    /// Unfiltered read.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Unfiltered existence check.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Unfiltered write. Returns the previous value, if any.
    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    /// Unfiltered removal, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Clone of the full state, private keys included.
    ///
    /// The write procedure freezes one of these per update; handlers and
    /// derivations only ever see the clone, so the snapshot cannot mutate
    /// under them.
    pub fn snapshot(&self) -> StateMap {
        self.entries.clone()
    }

    /// Public entries, in insertion order.
    pub fn public_entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter(|(key, _)| is_public(key))
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Public keys, in insertion order.
    pub fn public_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|key| is_public(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StateStore {
        let mut entries = StateMap::new();
        entries.insert("name".to_owned(), json!("Nikolay"));
        entries.insert("_secret".to_owned(), json!(42));
        entries.insert("family".to_owned(), json!("Yanovskiy"));
        StateStore::new(entries)
    }

    #[test]
    fn private_marker_predicate() {
        assert!(is_public("name"));
        assert!(is_public("n_ame"));
        assert!(!is_public("_secret"));
        assert!(!is_public("__proto"));
    }

    #[test]
    fn public_iteration_filters_private_keys() {
        let store = store();
        let keys: Vec<&str> = store.public_keys().collect();
        assert_eq!(keys, vec!["name", "family"]);

        let entries: Vec<(&str, &Value)> = store.public_entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "name");
    }

    #[test]
    fn unfiltered_access_sees_private_keys() {
        let mut store = store();
        assert_eq!(store.get("_secret"), Some(&json!(42)));
        assert!(store.contains("_secret"));
        assert_eq!(store.remove("_secret"), Some(json!(42)));
        assert!(!store.contains("_secret"));
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let mut store = store();
        let snapshot = store.snapshot();

        store.insert("name".to_owned(), json!("Anton"));

        assert_eq!(snapshot.get("name"), Some(&json!("Nikolay")));
        assert_eq!(store.get("name"), Some(&json!("Anton")));
        // The snapshot carries private keys; it backs the internal write
        // procedure, not the export surface.
        assert_eq!(snapshot.get("_secret"), Some(&json!(42)));
    }

    #[test]
    fn remove_preserves_entry_order() {
        let mut store = store();
        store.remove("_secret");
        let keys: Vec<&str> = store.public_keys().collect();
        assert_eq!(keys, vec!["name", "family"]);
    }
}
