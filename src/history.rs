use crate::search::fold_case;
use crate::storage::{HISTORY_KEY, KeyValueStore, read_json, remove_key, write_json};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub const MAX_HISTORY_ENTRIES: usize = 5;

/// Recent search queries, newest first, persisted under `searchHistory`.
///
/// Entries are unique ignoring case; re-recording a query moves it to the
/// front with the newly typed spelling. Clones share one writer lock, so
/// concurrent records through the same cache never drop each other.
#[derive(Clone)]
pub struct HistoryCache {
    store: Arc<dyn KeyValueStore>,
    capacity: NonZeroUsize,
    writer: Arc<Mutex<()>>,
}

impl HistoryCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, MAX_HISTORY_ENTRIES)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Persisted entries, newest first. Malformed state reads as empty.
    pub fn entries(&self) -> Vec<String> {
        read_json(self.store.as_ref(), HISTORY_KEY).unwrap_or_default()
    }

    pub fn record(&self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        let _writer = self.writer.lock();
        let mut cache = self.load_cache();
        cache.put(fold_case(query), query.to_string());
        let entries: Vec<&String> = cache.iter().map(|(_, text)| text).collect();
        write_json(self.store.as_ref(), HISTORY_KEY, &entries);
    }

    /// Stored entries containing `prefix` anywhere, ignoring case, in stored order.
    pub fn suggestions(&self, prefix: &str) -> Vec<String> {
        let needle = fold_case(prefix);
        self.entries()
            .into_iter()
            .filter(|entry| fold_case(entry).contains(&needle))
            .collect()
    }

    pub fn clear(&self) {
        let _writer = self.writer.lock();
        remove_key(self.store.as_ref(), HISTORY_KEY);
    }

    // Replays stored entries oldest first so the newest ends up most recent.
    // Duplicates and overflow in hand-edited state collapse here.
    fn load_cache(&self) -> LruCache<String, String> {
        let mut cache = LruCache::new(self.capacity);
        for entry in self.entries().into_iter().rev() {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            cache.put(fold_case(trimmed), trimmed.to_string());
        }
        cache
    }
}
