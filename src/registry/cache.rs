use moka::sync::Cache;

/// Existence cache for the target registry.
///
/// Presence of a key (a target reference or a repository name) means "known
/// to exist". Entries carry no payload, are inserted only after a confirmed
/// probe or create, and are never individually invalidated; capacity is
/// bounded with frequency-aware admission.
pub struct ExistenceCache {
    entries: Cache<String, ()>,
}

impl ExistenceCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&self, key: String) {
        self.entries.insert(key, ());
    }
}

impl Default for ExistenceCache {
    fn default() -> Self {
        Self::new(2048)
    }
}
