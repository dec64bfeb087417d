use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{NetworkError, StorageError};
use crate::store::{LinkResolution, LinkStatus};
use crate::storage::StorageHandle;

pub mod cache;
pub mod providers;
pub mod urls;

pub use cache::{CachedPreview, PreviewCache};
pub use providers::{PageMetadata, PreviewProvider};
pub use urls::{extract_urls, is_likely_url, normalize_url};

/// Resolved (or failed) metadata for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub url: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub status: LinkStatus,
}

impl Preview {
    pub fn failed(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: url.to_string(),
            description: String::new(),
            image: String::new(),
            status: LinkStatus::Error,
        }
    }

    pub fn pending(url: &str) -> Self {
        Self {
            status: LinkStatus::Pending,
            ..Self::failed(url)
        }
    }

    pub fn to_resolution(&self) -> LinkResolution {
        match self.status {
            LinkStatus::Ok => LinkResolution::Resolved {
                title: self.title.clone(),
                description: self.description.clone(),
                image: self.image.clone(),
            },
            _ => LinkResolution::Failed,
        }
    }
}

impl From<&CachedPreview> for Preview {
    fn from(cached: &CachedPreview) -> Self {
        Self {
            url: cached.url.clone(),
            title: cached.title.clone(),
            description: cached.description.clone(),
            image: cached.image.clone(),
            status: LinkStatus::Ok,
        }
    }
}

/// Resolves URLs through an ordered provider chain in front of a persistent
/// cache. Cache hits never touch the network.
pub struct PreviewResolver {
    providers: Vec<Box<dyn PreviewProvider>>,
    cache: Mutex<PreviewCache>,
}

impl PreviewResolver {
    pub fn new(providers: Vec<Box<dyn PreviewProvider>>, cache: PreviewCache) -> Self {
        Self {
            providers,
            cache: Mutex::new(cache),
        }
    }

    pub fn load(
        providers: Vec<Box<dyn PreviewProvider>>,
        storage: StorageHandle,
    ) -> Result<Self, StorageError> {
        Ok(Self::new(providers, PreviewCache::load(storage)?))
    }

    pub fn cached(&self, url: &str) -> Option<Preview> {
        self.cache.lock().get(&normalize_url(url)).map(Preview::from)
    }

    pub async fn resolve(&self, url: &str) -> Preview {
        let key = normalize_url(url);
        if let Some(hit) = self.cached(&key) {
            debug!(url = %key, "preview cache hit");
            return hit;
        }
        match self.fetch(&key).await {
            Ok(meta) => {
                let preview = build_preview(&key, meta);
                self.cache.lock().insert(CachedPreview {
                    url: key,
                    title: preview.title.clone(),
                    description: preview.description.clone(),
                    image: preview.image.clone(),
                });
                preview
            }
            Err(err) => {
                warn!(%err, "preview unavailable");
                Preview::failed(&key)
            }
        }
    }

    /// Full-data clear; the only way cache entries go away.
    pub fn clear_cache(&self) -> Result<usize, StorageError> {
        self.cache.lock().clear()
    }

    async fn fetch(&self, url: &str) -> Result<PageMetadata, NetworkError> {
        for provider in &self.providers {
            match provider.extract(url).await {
                Ok(meta) => return Ok(meta),
                Err(err) => {
                    debug!(provider = provider.name(), %err, "provider failed, trying next");
                }
            }
        }
        Err(NetworkError::Exhausted(url.to_string()))
    }
}

/// Title falls back to the resolved page's hostname, then the request's.
fn build_preview(url: &str, meta: PageMetadata) -> Preview {
    let title = meta
        .title
        .or_else(|| meta.resolved_url.as_deref().and_then(urls::hostname))
        .or_else(|| urls::hostname(url))
        .unwrap_or_else(|| url.to_string());
    Preview {
        url: url.to_string(),
        title,
        description: meta.description.unwrap_or_default(),
        image: meta.image.unwrap_or_default(),
        status: LinkStatus::Ok,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;

    /// Provider answering from a fixed table; unknown URLs fail with HTTP 502.
    pub struct ScriptedProvider {
        pub name: &'static str,
        pub answers: HashMap<String, PageMetadata>,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                answers: HashMap::new(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn answer(mut self, url: &str, title: &str) -> Self {
            self.answers.insert(
                url.to_string(),
                PageMetadata {
                    title: Some(title.to_string()),
                    ..PageMetadata::default()
                },
            );
            self
        }

        pub fn calls(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl PreviewProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, url: &str) -> Result<PageMetadata, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(url)
                .cloned()
                .ok_or(NetworkError::Status {
                    provider: self.name,
                    status: 502,
                })
        }
    }
}
