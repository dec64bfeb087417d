use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::assets::{AssetWorker, CacheStorage, HttpNetwork};
use crate::config::{themes, AppConfig, ConfigPaths, ThemeName};
use crate::error::ValidationError;
use crate::preview::{providers, urls, Preview, PreviewProvider, PreviewResolver};
use crate::storage::StorageHandle;
use crate::store::{compose, LinkStatus, Message, MessageStore, SharedStore};
use crate::sync::{SweepReport, SyncCoordinator};

const FETCHING_TITLE: &str = "Fetching preview\u{2026}";
const UNAVAILABLE_TITLE: &str = "Preview unavailable";

/// Wires the store, resolver and sync coordinator over one storage handle.
pub struct App {
    pub config: Arc<AppConfig>,
    pub paths: ConfigPaths,
    pub storage: StorageHandle,
    store: SharedStore,
    resolver: Arc<PreviewResolver>,
    sync: SyncCoordinator,
    theme: ThemeName,
}

impl App {
    pub fn new(config: Arc<AppConfig>, storage: StorageHandle, paths: ConfigPaths) -> Result<Self> {
        let providers = providers::from_config(&config.preview)?;
        Self::with_providers(config, storage, paths, providers)
    }

    pub fn with_providers(
        config: Arc<AppConfig>,
        storage: StorageHandle,
        paths: ConfigPaths,
        providers: Vec<Box<dyn PreviewProvider>>,
    ) -> Result<Self> {
        let store = MessageStore::load(storage.clone())
            .context("loading message store")?
            .into_shared();
        let resolver = Arc::new(
            PreviewResolver::load(providers, storage.clone()).context("loading preview cache")?,
        );
        let theme = themes::load_preference(&storage, config.theme)
            .context("reading theme preference")?;
        // Starts offline so the first online observation counts as a restore.
        let sync = SyncCoordinator::new(store.clone(), resolver.clone(), false);
        Ok(Self {
            config,
            paths,
            storage,
            store,
            resolver,
            sync,
            theme,
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<PreviewResolver> {
        &self.resolver
    }

    /// Composes `input` into a message for the active category. Online sends
    /// resolve every link first; offline sends leave them pending.
    pub async fn send(&self, input: &str, online: bool) -> Result<Message, ValidationError> {
        let draft = compose(input)?;
        let mut message = MessageStore::new_message(&draft);
        if online {
            for link in message.content.links_mut() {
                let preview = self.resolver.resolve(&link.url).await;
                link.title = preview.title;
                link.description = preview.description;
                link.image = preview.image;
                link.status = preview.status;
            }
        }
        let mut store = self.store.lock();
        let category = store.active_category().to_string();
        store.append_message(&category, message.clone())?;
        Ok(message)
    }

    /// Preview for something the user is about to send. Never touches the
    /// store; `None` when the input is not a URL.
    pub async fn preview_input(&self, input: &str, online: bool) -> Option<Preview> {
        let url = urls::parse_url(input.trim())?;
        if !online {
            return Some(Preview {
                title: FETCHING_TITLE.to_string(),
                ..Preview::pending(&url)
            });
        }
        let preview = self.resolver.resolve(&url).await;
        if preview.status == LinkStatus::Error {
            return Some(Preview {
                title: UNAVAILABLE_TITLE.to_string(),
                ..preview
            });
        }
        Some(preview)
    }

    pub async fn connectivity_changed(&self, online: bool) -> Option<SweepReport> {
        self.sync.connectivity_changed(online).await
    }

    /// Sweeps pending links regardless of the last observed connectivity.
    pub async fn sync_now(&self) -> Option<SweepReport> {
        self.sync.sweep().await
    }

    pub fn theme(&self) -> ThemeName {
        self.theme
    }

    pub fn set_theme(&mut self, theme: ThemeName) -> Result<ThemeName> {
        themes::save_preference(&self.storage, theme).context("saving theme preference")?;
        self.theme = theme;
        Ok(theme)
    }

    pub fn toggle_theme(&mut self) -> Result<ThemeName> {
        self.set_theme(self.theme.toggled())
    }

    /// Drops every persisted document, the preview cache included, and
    /// re-seeds the store.
    pub fn clear_all_data(&mut self) -> Result<()> {
        let removed = self
            .storage
            .clear_documents()
            .context("clearing persisted documents")?;
        let previews = self
            .resolver
            .clear_cache()
            .context("clearing preview cache")?;
        self.store.lock().reset();
        self.theme = self.config.theme;
        info!(removed, previews, "cleared all local data");
        Ok(())
    }

    pub fn asset_worker(&self) -> Result<AssetWorker> {
        let db_path = if self.config.storage.asset_cache_path.as_os_str().is_empty() {
            &self.paths.asset_cache_path
        } else {
            &self.config.storage.asset_cache_path
        };
        let cache = CacheStorage::open(db_path, self.config.storage.wal_autocheckpoint)
            .with_context(|| format!("opening asset cache {}", db_path.display()))?;
        let network = HttpNetwork::new(&self.config.preview.user_agent)?;
        AssetWorker::new(&self.config.assets, cache, Arc::new(network))
            .context("configuring asset worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::testing::ScriptedProvider;
    use crate::storage::{self, PREVIEW_CACHE_KEY, STORE_KEY, THEME_KEY};
    use crate::store::{StoreDocument, GENERAL, STARRED};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn test_app(providers: Vec<Box<dyn PreviewProvider>>) -> anyhow::Result<(TempDir, App)> {
        let temp = TempDir::new()?;
        let root = temp.path();
        let paths = ConfigPaths::rooted(
            root.join("config"),
            root.join("config/config.toml"),
            root.join("data"),
        );
        let storage = storage::open(&paths.database_path, 1000)?;
        let app = App::with_providers(Arc::new(AppConfig::default()), storage, paths, providers)?;
        Ok((temp, app))
    }

    #[tokio::test]
    async fn offline_send_leaves_links_pending() -> anyhow::Result<()> {
        let (_temp, app) = test_app(Vec::new())?;
        app.store().lock().create_category("Research")?;

        let message = app.send("check a.com and b.com", false).await?;
        let urls: Vec<_> = message.links().iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
        assert!(message.links().iter().all(|l| l.status == LinkStatus::Pending));
        assert_eq!(message.text.as_deref(), Some("check and"));

        let store = app.store().lock();
        assert_eq!(store.query("Research", "").count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn online_send_resolves_before_appending() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new("primary").answer("https://a.com", "A");
        let (_temp, app) = test_app(vec![Box::new(provider)])?;

        let message = app.send("a.com down.example", true).await?;
        assert_eq!(message.links()[0].status, LinkStatus::Ok);
        assert_eq!(message.links()[0].title, "A");
        assert_eq!(message.links()[1].status, LinkStatus::Error);
        assert!(app.store().lock().pending_links().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn send_rejects_blank_input_and_starred_target() -> anyhow::Result<()> {
        let (_temp, app) = test_app(Vec::new())?;
        assert_matches!(app.send("   ", false).await, Err(ValidationError::EmptyMessage));

        app.store().lock().select_category(STARRED)?;
        assert_matches!(
            app.send("a.com", false).await,
            Err(ValidationError::VirtualCategory(_))
        );
        Ok(())
    }

    #[tokio::test]
    async fn instant_preview_depends_on_connectivity() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new("primary").answer("https://a.com", "A");
        let (_temp, app) = test_app(vec![Box::new(provider)])?;

        assert_eq!(app.preview_input("not a url", true).await, None);
        let offline = app.preview_input("a.com", false).await.expect("url preview");
        assert_eq!(offline.status, LinkStatus::Pending);
        assert_eq!(offline.title, FETCHING_TITLE);

        let online = app.preview_input("a.com", true).await.expect("url preview");
        assert_eq!(online.title, "A");
        let failed = app.preview_input("b.com", true).await.expect("url preview");
        assert_eq!(failed.title, UNAVAILABLE_TITLE);
        assert_eq!(app.store().lock().query(GENERAL, "").count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reconnect_sweeps_offline_sends() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new("primary").answer("https://a.com", "A");
        let (_temp, app) = test_app(vec![Box::new(provider)])?;
        app.send("a.com", false).await?;

        let report = app.connectivity_changed(true).await.expect("sweep ran");
        assert_eq!(report.resolved, 1);
        assert_eq!(app.connectivity_changed(true).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn clear_all_data_resets_everything() -> anyhow::Result<()> {
        let provider = ScriptedProvider::new("primary").answer("https://a.com", "A");
        let (_temp, mut app) = test_app(vec![Box::new(provider)])?;
        app.store().lock().create_category("Work")?;
        app.send("a.com", true).await?;
        app.set_theme(ThemeName::Dark)?;

        app.clear_all_data()?;
        assert_eq!(app.store().lock().document(), &StoreDocument::default());
        assert!(app.resolver().cached("https://a.com").is_none());
        assert_eq!(app.storage.read_document(PREVIEW_CACHE_KEY)?, None);
        assert_eq!(app.storage.read_document(THEME_KEY)?, None);
        assert!(app.storage.read_document(STORE_KEY)?.is_some());
        assert_eq!(app.theme(), ThemeName::Light);
        Ok(())
    }

    #[test]
    fn theme_toggle_persists() -> anyhow::Result<()> {
        let (_temp, mut app) = test_app(Vec::new())?;
        assert_eq!(app.toggle_theme()?, ThemeName::Dark);
        assert_eq!(app.storage.read_document(THEME_KEY)?.as_deref(), Some("dark"));
        assert_eq!(app.toggle_theme()?, ThemeName::Light);
        Ok(())
    }
}
