use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{StorageHandle, PREVIEW_CACHE_KEY};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachedPreview {
    pub url: String,
    pub title: String,
    pub description: String,
    pub image: String,
}

/// URL -> last good preview. Entries never expire; they leave only through
/// [`PreviewCache::clear`].
pub struct PreviewCache {
    storage: StorageHandle,
    entries: IndexMap<String, CachedPreview>,
}

impl PreviewCache {
    pub fn load(storage: StorageHandle) -> Result<Self, StorageError> {
        let entries = match storage.read_document(PREVIEW_CACHE_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(?err, "preview cache unreadable, starting empty");
                IndexMap::new()
            }),
            None => IndexMap::new(),
        };
        Ok(Self { storage, entries })
    }

    pub fn get(&self, url: &str) -> Option<&CachedPreview> {
        self.entries.get(url)
    }

    /// Stores the entry and rewrites the cache document. A failed write is
    /// logged; the in-memory entry still serves this session.
    pub fn insert(&mut self, entry: CachedPreview) {
        self.entries.insert(entry.url.clone(), entry);
        if let Err(err) = self.write() {
            tracing::warn!(?err, "failed to persist preview cache");
        }
    }

    /// Drops every entry and the document. Returns how many entries went.
    pub fn clear(&mut self) -> Result<usize, StorageError> {
        let removed = self.entries.len();
        self.entries.clear();
        self.storage.delete_document(PREVIEW_CACHE_KEY)?;
        Ok(removed)
    }

    fn write(&self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.entries)?;
        self.storage.write_document(PREVIEW_CACHE_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;
    use tempfile::TempDir;

    fn entry(url: &str) -> CachedPreview {
        CachedPreview {
            url: url.into(),
            title: "Title".into(),
            description: String::new(),
            image: String::new(),
        }
    }

    #[test]
    fn entries_persist_across_loads() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let storage = storage::open(&temp.path().join("c.db"), 1000)?;
        let mut cache = PreviewCache::load(storage.clone())?;
        cache.insert(entry("https://a.com"));

        let reloaded = PreviewCache::load(storage.clone())?;
        assert_eq!(reloaded.get("https://a.com"), Some(&entry("https://a.com")));
        let raw = storage.read_document(PREVIEW_CACHE_KEY)?.unwrap_or_default();
        assert!(raw.starts_with(r#"{"https://a.com":{"url":"https://a.com""#));
        Ok(())
    }

    #[test]
    fn clear_drops_document() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let storage = storage::open(&temp.path().join("c.db"), 1000)?;
        let mut cache = PreviewCache::load(storage.clone())?;
        cache.insert(entry("https://a.com"));
        cache.insert(entry("https://b.com"));
        assert_eq!(cache.clear()?, 2);
        assert_eq!(cache.get("https://a.com"), None);
        assert_eq!(PreviewCache::load(storage.clone())?.get("https://b.com"), None);
        assert_eq!(storage.read_document(PREVIEW_CACHE_KEY)?, None);
        Ok(())
    }
}
