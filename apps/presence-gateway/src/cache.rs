use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Resolved enrichment for one tag. Written once, never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub id: String,
    #[serde(rename = "auth")]
    pub authorized: bool,
    #[serde(rename = "info")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub count: usize,
    pub items: Vec<CacheEntry>,
}

/// Cache-aside store of tag metadata. Entries never expire; a present entry means the tag was
/// already enriched and must not be looked up again.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Inserts the entry for `id`. Callers check [`MetadataCache::get`] first; an existing entry
    /// is kept as-is.
    pub fn set(&self, id: &str, authorized: bool, description: Option<String>) {
        let mut entries = self.lock();
        debug_assert!(
            !entries.contains_key(id),
            "metadata cache entry for {id} written twice"
        );
        entries.entry(id.to_string()).or_insert_with(|| CacheEntry {
            id: id.to_string(),
            authorized,
            description,
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries ordered by id.
    pub fn snapshot(&self) -> CacheSnapshot {
        let mut items: Vec<CacheEntry> = self.lock().values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        CacheSnapshot {
            count: items.len(),
            items,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_until_set() {
        let cache = MetadataCache::new();
        assert!(cache.get("X").is_none());

        cache.set("X", true, Some("Nike Air Max 90".to_string()));

        let entry = cache.get("X").unwrap();
        assert!(entry.authorized);
        assert_eq!(entry.description.as_deref(), Some("Nike Air Max 90"));
        assert!(cache.contains("X"));
    }

    #[test]
    fn snapshot_reports_count_and_wire_field_names() {
        let cache = MetadataCache::new();
        cache.set("B", false, Some("Invalid tag".to_string()));
        cache.set("A", true, None);

        let snap = cache.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.items[0].id, "A");

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["items"][1]["auth"], serde_json::json!(false));
        assert_eq!(json["items"][1]["info"], serde_json::json!("Invalid tag"));
        assert_eq!(json["items"][0]["info"], serde_json::Value::Null);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "written twice"))]
    fn second_set_for_same_id_does_not_overwrite() {
        let cache = MetadataCache::new();
        cache.set("A", true, Some("first".to_string()));
        cache.set("A", false, None);
        assert_eq!(cache.get("A").unwrap().description.as_deref(), Some("first"));
    }
}
