use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub mod themes;

pub use themes::ThemeName;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "LinkSaver";
const APP_NAME: &str = "linksaver";

pub const CONFIG_ENV: &str = "LINKSAVER_CONFIG";
pub const DATA_ENV: &str = "LINKSAVER_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub asset_cache_path: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::rooted(config_dir, config_file, data_root))
    }

    /// Lays out every derived path under an explicit config/data pair.
    pub fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            database_path: data_dir.join("linksaver.db"),
            asset_cache_path: data_dir.join("assets.db"),
            data_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: ThemeName,
    pub storage: StorageOptions,
    pub preview: PreviewOptions,
    pub assets: AssetOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Light,
            storage: StorageOptions::default(),
            preview: PreviewOptions::default(),
            assets: AssetOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.preview.providers.is_empty() {
            tracing::warn!("no preview providers configured, restoring defaults");
            self.preview.providers = PreviewOptions::default().providers;
        }
        if self.assets.version == 0 {
            bail!("asset cache version must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    #[serde(skip)]
    pub asset_cache_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            asset_cache_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        if self.asset_cache_path.as_os_str().is_empty() {
            self.asset_cache_path = paths.asset_cache_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Jsonlink,
    Microlink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
    /// Tried in order until one resolves.
    pub providers: Vec<ProviderSpec>,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderSpec {
                    kind: ProviderKind::Jsonlink,
                    endpoint: "https://jsonlink.io/api/extract".into(),
                },
                ProviderSpec {
                    kind: ProviderKind::Microlink,
                    endpoint: "https://api.microlink.io/".into(),
                },
            ],
            request_timeout_ms: 10_000,
            user_agent: format!("linksaver/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl PreviewOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetOptions {
    pub cache_name: String,
    pub version: u32,
    /// Base URL the shell paths are resolved against.
    pub origin: String,
    pub entry: String,
    pub shell: Vec<String>,
    pub navigation_timeout_ms: u64,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            cache_name: "linksaver-chat".into(),
            version: 2,
            origin: "http://localhost:8080/".into(),
            entry: "./index.html".into(),
            shell: [
                "./",
                "./index.html",
                "./style.css",
                "./script.js",
                "./manifest.json",
                "./icons/icon.svg",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            navigation_timeout_ms: 4000,
        }
    }
}

impl AssetOptions {
    /// Bucket name in `<name>-v<N>` form.
    pub fn bucket_name(&self) -> String {
        format!("{}-v{}", self.cache_name, self.version)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        ConfigPaths::rooted(
            config_dir.clone(),
            config_dir.join("config.toml"),
            base.join("data"),
        )
    }

    #[test]
    fn load_or_init_writes_default_config() -> Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::from_paths(temp_paths(&temp));
        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.assets.bucket_name(), "linksaver-chat-v2");
        assert_eq!(cfg.preview.providers.len(), 2);
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let reloaded = loader.load()?;
        assert_eq!(reloaded.assets.shell, cfg.assets.shell);
        assert_eq!(reloaded.theme, ThemeName::Light);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_sections() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "theme = \"dark\"\n[assets]\nversion = 7\n[preview]\nproviders = []\n",
        )?;
        let cfg = ConfigLoader::from_paths(paths).load()?;
        assert_eq!(cfg.theme, ThemeName::Dark);
        assert_eq!(cfg.assets.bucket_name(), "linksaver-chat-v7");
        assert_eq!(cfg.assets.navigation_timeout(), Duration::from_millis(4000));
        assert_eq!(cfg.preview.providers[0].kind, ProviderKind::Jsonlink);
        Ok(())
    }

    #[test]
    fn zero_asset_version_is_rejected() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(&paths.config_file, "[assets]\nversion = 0\n")?;
        assert!(ConfigLoader::from_paths(paths).load().is_err());
        Ok(())
    }
}
