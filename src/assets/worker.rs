//! The asset worker and the command loop that drives it.
//!
//! Lifecycle follows install -> activate -> fetch. Install stages the shell
//! into the current `<name>-v<N>` bucket; activate prunes every other bucket
//! and starts interception. Until a version is active nothing is intercepted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    cache_key, AssetNetwork, AssetRequest, AssetResponse, CacheStorage, FetchOutcome, RequestMode,
    ResponseSource,
};
use crate::config::AssetOptions;
use crate::error::AssetError;

pub struct AssetWorker {
    bucket: String,
    origin: Url,
    entry: Url,
    shell: Vec<Url>,
    navigation_timeout: Duration,
    storage: CacheStorage,
    network: Arc<dyn AssetNetwork>,
    revalidations: Vec<JoinHandle<()>>,
}

impl AssetWorker {
    pub fn new(
        options: &AssetOptions,
        storage: CacheStorage,
        network: Arc<dyn AssetNetwork>,
    ) -> Result<Self, AssetError> {
        let origin = Url::parse(&options.origin)
            .map_err(|err| AssetError::InvalidUrl(format!("{}: {err}", options.origin)))?;
        let entry = join(&origin, &options.entry)?;
        let shell = options
            .shell
            .iter()
            .map(|path| join(&origin, path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bucket: options.bucket_name(),
            origin,
            entry,
            shell,
            navigation_timeout: options.navigation_timeout(),
            storage,
            network,
            revalidations: Vec::new(),
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Resolves an app-relative path against the configured origin.
    pub fn resolve(&self, path: &str) -> Result<Url, AssetError> {
        join(&self.origin, path)
    }

    /// Fetches the whole shell, then writes it in one transaction. Any failed
    /// or non-2xx fetch aborts before anything is stored.
    pub async fn install(&mut self) -> Result<usize, AssetError> {
        let mut fetched = Vec::with_capacity(self.shell.len());
        for url in &self.shell {
            let response = self.network.get(url).await?;
            if !response.is_success() {
                return Err(AssetError::Status {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            fetched.push((cache_key(url), response));
        }
        self.storage.put_all(&self.bucket, &fetched)?;
        info!(bucket = %self.bucket, entries = fetched.len(), "asset shell installed");
        Ok(fetched.len())
    }

    pub fn activate(&mut self) -> Result<Vec<String>, AssetError> {
        let pruned = self.storage.activate(&self.bucket)?;
        for name in &pruned {
            info!(bucket = %name, "pruned stale asset bucket");
        }
        info!(bucket = %self.bucket, "asset worker active");
        Ok(pruned)
    }

    pub async fn fetch(&mut self, request: &AssetRequest) -> FetchOutcome {
        self.revalidations.retain(|task| !task.is_finished());
        if !request.is_get() {
            return FetchOutcome::Passthrough;
        }
        let active = match self.storage.active() {
            Ok(Some(bucket)) => bucket,
            Ok(None) => return FetchOutcome::Passthrough,
            Err(err) => {
                warn!(%err, "asset cache unreadable, passing request through");
                return FetchOutcome::Passthrough;
            }
        };
        if request.mode == RequestMode::Navigate {
            return self.navigate(&active, request).await;
        }
        if request.url.origin() != self.origin.origin() {
            return FetchOutcome::Passthrough;
        }
        self.stale_while_revalidate(&active, request).await
    }

    /// Waits for background revalidations started by earlier fetches.
    pub async fn settle(&mut self) {
        for task in self.revalidations.drain(..) {
            if let Err(err) = task.await {
                warn!(%err, "asset revalidation task failed");
            }
        }
    }

    async fn navigate(&mut self, bucket: &str, request: &AssetRequest) -> FetchOutcome {
        let timeout = self.navigation_timeout;
        let fresh = match tokio::time::timeout(timeout, self.network.get(&self.entry)).await {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(AssetError::Status {
                url: self.entry.to_string(),
                status: response.status,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AssetError::Timeout(timeout.as_millis() as u64)),
        };
        match fresh {
            Ok(response) => {
                if let Err(err) = self.storage.put(bucket, &cache_key(&self.entry), &response) {
                    warn!(%err, "failed to refresh cached shell entry");
                }
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(err) => {
                debug!(%err, url = %request.url, "navigation falling back to cache");
                match self
                    .lookup_any(&self.entry)
                    .or_else(|| self.lookup_any(&request.url))
                {
                    Some(response) => FetchOutcome::Respond {
                        response,
                        source: ResponseSource::Cache,
                    },
                    None => FetchOutcome::NetworkError,
                }
            }
        }
    }

    async fn stale_while_revalidate(&mut self, bucket: &str, request: &AssetRequest) -> FetchOutcome {
        let key = cache_key(&request.url);
        let cached = self.storage.match_in(bucket, &key).unwrap_or_else(|err| {
            warn!(%err, "asset cache lookup failed");
            None
        });
        if let Some(response) = cached {
            let task = tokio::spawn(revalidate(
                Arc::clone(&self.network),
                self.storage.clone(),
                bucket.to_string(),
                request.url.clone(),
            ));
            self.revalidations.push(task);
            return FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
            };
        }

        match self.network.get(&request.url).await {
            Ok(response) => {
                if response.is_success() {
                    if let Err(err) = self.storage.put(bucket, &key, &response) {
                        warn!(%err, "failed to cache asset");
                    }
                }
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(err) => {
                debug!(%err, "asset fetch failed, serving shell entry");
                match self.lookup_any(&self.entry) {
                    Some(response) => FetchOutcome::Respond {
                        response,
                        source: ResponseSource::Cache,
                    },
                    None => FetchOutcome::NetworkError,
                }
            }
        }
    }

    fn lookup_any(&self, url: &Url) -> Option<AssetResponse> {
        self.storage.match_any(&cache_key(url)).unwrap_or_else(|err| {
            warn!(%err, "asset cache lookup failed");
            None
        })
    }
}

fn join(origin: &Url, path: &str) -> Result<Url, AssetError> {
    origin
        .join(path)
        .map_err(|err| AssetError::InvalidUrl(format!("{path}: {err}")))
}

async fn revalidate(network: Arc<dyn AssetNetwork>, storage: CacheStorage, bucket: String, url: Url) {
    match network.get(&url).await {
        Ok(response) if response.is_success() => {
            if let Err(err) = storage.put(&bucket, &cache_key(&url), &response) {
                warn!(%err, %url, "failed to store revalidated asset");
            }
        }
        Ok(response) => debug!(%url, status = response.status, "revalidation skipped"),
        Err(err) => debug!(%err, %url, "revalidation failed"),
    }
}

/// Requests sent from [`AssetHandle`] to the worker task. Each carries the
/// channel its result goes back on.
pub enum AssetCommand {
    Install {
        reply: oneshot::Sender<Result<usize, AssetError>>,
    },
    Activate {
        reply: oneshot::Sender<Result<Vec<String>, AssetError>>,
    },
    Fetch {
        request: AssetRequest,
        reply: oneshot::Sender<FetchOutcome>,
    },
    Settle {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running worker. Cheaply cloneable; the worker stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct AssetHandle {
    command_tx: mpsc::UnboundedSender<AssetCommand>,
}

impl AssetHandle {
    pub async fn install(&self) -> Result<usize, AssetError> {
        let (reply, rx) = oneshot::channel();
        self.send(AssetCommand::Install { reply })?;
        rx.await.map_err(|_| AssetError::WorkerGone)?
    }

    pub async fn activate(&self) -> Result<Vec<String>, AssetError> {
        let (reply, rx) = oneshot::channel();
        self.send(AssetCommand::Activate { reply })?;
        rx.await.map_err(|_| AssetError::WorkerGone)?
    }

    pub async fn fetch(&self, request: AssetRequest) -> Result<FetchOutcome, AssetError> {
        let (reply, rx) = oneshot::channel();
        self.send(AssetCommand::Fetch { request, reply })?;
        rx.await.map_err(|_| AssetError::WorkerGone)
    }

    pub async fn settle(&self) -> Result<(), AssetError> {
        let (reply, rx) = oneshot::channel();
        self.send(AssetCommand::Settle { reply })?;
        rx.await.map_err(|_| AssetError::WorkerGone)
    }

    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }

    fn send(&self, command: AssetCommand) -> Result<(), AssetError> {
        self.command_tx
            .send(command)
            .map_err(|_| AssetError::WorkerGone)
    }
}

/// Starts the worker on the current runtime.
pub fn spawn(worker: AssetWorker) -> AssetHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(worker_loop(worker, command_rx));
    AssetHandle { command_tx }
}

async fn worker_loop(mut worker: AssetWorker, mut command_rx: mpsc::UnboundedReceiver<AssetCommand>) {
    while let Some(command) = command_rx.recv().await {
        match command {
            AssetCommand::Install { reply } => {
                let _ = reply.send(worker.install().await);
            }
            AssetCommand::Activate { reply } => {
                let _ = reply.send(worker.activate());
            }
            AssetCommand::Fetch { request, reply } => {
                let _ = reply.send(worker.fetch(&request).await);
            }
            AssetCommand::Settle { reply } => {
                worker.settle().await;
                let _ = reply.send(());
            }
        }
    }
    worker.settle().await;
    debug!(bucket = %worker.bucket, "asset worker stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use super::*;

    const ORIGIN: &str = "http://app.test/";

    #[derive(Default)]
    struct FakeNetwork {
        pages: Mutex<HashMap<String, AssetResponse>>,
        offline: AtomicBool,
        delay: Mutex<Option<Duration>>,
        hits: Mutex<Vec<String>>,
    }

    impl FakeNetwork {
        fn serving(pages: &[(&str, &'static str)]) -> Arc<Self> {
            let network = Self::default();
            for (url, body) in pages {
                network.set(url, body);
            }
            Arc::new(network)
        }

        fn set(&self, url: &str, body: &'static str) {
            self.pages.lock().insert(
                url.to_string(),
                AssetResponse::ok("text/plain", Bytes::from_static(body.as_bytes())),
            );
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        fn hits(&self) -> usize {
            self.hits.lock().len()
        }
    }

    #[async_trait]
    impl AssetNetwork for FakeNetwork {
        async fn get(&self, url: &Url) -> Result<AssetResponse, AssetError> {
            self.hits.lock().push(url.to_string());
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(AssetError::Fetch {
                    url: url.to_string(),
                    message: "offline".into(),
                });
            }
            Ok(self.pages.lock().get(url.as_str()).cloned().unwrap_or(AssetResponse {
                status: 404,
                headers: Vec::new(),
                body: Bytes::new(),
            }))
        }
    }

    fn options(version: u32) -> AssetOptions {
        AssetOptions {
            version,
            origin: ORIGIN.into(),
            shell: vec!["./".into(), "./index.html".into(), "./app.css".into()],
            ..AssetOptions::default()
        }
    }

    fn shell_network() -> Arc<FakeNetwork> {
        FakeNetwork::serving(&[
            ("http://app.test/", "root"),
            ("http://app.test/index.html", "shell"),
            ("http://app.test/app.css", "css-1"),
        ])
    }

    fn worker(
        temp: &TempDir,
        version: u32,
        network: &Arc<FakeNetwork>,
    ) -> anyhow::Result<AssetWorker> {
        let storage = CacheStorage::open(&temp.path().join("assets.db"), 1000)?;
        Ok(AssetWorker::new(&options(version), storage, network.clone())?)
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).and_then(|base| base.join(path)).expect("test url")
    }

    fn body(outcome: &FetchOutcome) -> Option<(&[u8], ResponseSource)> {
        match outcome {
            FetchOutcome::Respond { response, source } => Some((response.body.as_ref(), *source)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn nothing_is_intercepted_before_activation() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        assert_eq!(worker.install().await?, 3);
        let outcome = worker.fetch(&AssetRequest::get(url("app.css"))).await;
        assert_eq!(outcome, FetchOutcome::Passthrough);
        Ok(())
    }

    #[tokio::test]
    async fn installed_shell_serves_navigation_offline() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        assert!(worker.activate()?.is_empty());

        network.go_offline();
        let outcome = worker.fetch(&AssetRequest::navigate(url("some/deep/page"))).await;
        assert_eq!(body(&outcome), Some((&b"shell"[..], ResponseSource::Cache)));
        Ok(())
    }

    #[tokio::test]
    async fn failed_install_stores_nothing() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = FakeNetwork::serving(&[
            ("http://app.test/", "root"),
            ("http://app.test/index.html", "shell"),
        ]);
        let mut worker = worker(&temp, 2, &network)?;
        assert_matches!(
            worker.install().await,
            Err(AssetError::Status { status: 404, .. })
        );
        assert!(worker.storage.keys()?.is_empty());
        assert_matches!(worker.activate(), Err(AssetError::NotInstalled(_)));
        Ok(())
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_version_serving() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut v2 = worker(&temp, 2, &network)?;
        v2.install().await?;
        v2.activate()?;

        network.pages.lock().remove("http://app.test/app.css");
        let mut v3 = worker(&temp, 3, &network)?;
        assert!(v3.install().await.is_err());
        assert!(v3.activate().is_err());
        assert_eq!(v3.storage.active()?.as_deref(), Some("linksaver-chat-v2"));

        network.go_offline();
        let outcome = v3.fetch(&AssetRequest::navigate(url("./"))).await;
        assert_eq!(body(&outcome), Some((&b"shell"[..], ResponseSource::Cache)));
        let outcome = v3.fetch(&AssetRequest::get(url("app.css"))).await;
        assert_eq!(body(&outcome), Some((&b"css-1"[..], ResponseSource::Cache)));
        Ok(())
    }

    #[tokio::test]
    async fn activation_prunes_old_versions() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut v2 = worker(&temp, 2, &network)?;
        v2.install().await?;
        v2.activate()?;

        let mut v3 = worker(&temp, 3, &network)?;
        v3.install().await?;
        assert_eq!(v3.activate()?, vec!["linksaver-chat-v2"]);
        assert_eq!(v3.storage.keys()?, vec!["linksaver-chat-v3"]);
        Ok(())
    }

    #[tokio::test]
    async fn navigation_prefers_network_and_refreshes_entry() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        worker.activate()?;

        network.set("http://app.test/index.html", "shell-2");
        let outcome = worker.fetch(&AssetRequest::navigate(url("./"))).await;
        assert_eq!(body(&outcome), Some((&b"shell-2"[..], ResponseSource::Network)));

        network.go_offline();
        let outcome = worker.fetch(&AssetRequest::navigate(url("./"))).await;
        assert_eq!(body(&outcome), Some((&b"shell-2"[..], ResponseSource::Cache)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_navigation_times_out_to_cache() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        worker.activate()?;

        *network.delay.lock() = Some(Duration::from_secs(30));
        network.set("http://app.test/index.html", "too-late");
        let started = tokio::time::Instant::now();
        let outcome = worker.fetch(&AssetRequest::navigate(url("./"))).await;
        assert_eq!(body(&outcome), Some((&b"shell"[..], ResponseSource::Cache)));
        assert!(started.elapsed() < Duration::from_secs(30));
        Ok(())
    }

    #[tokio::test]
    async fn cached_assets_are_revalidated_in_background() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        worker.activate()?;

        network.set("http://app.test/app.css", "css-2");
        let first = worker.fetch(&AssetRequest::get(url("app.css"))).await;
        assert_eq!(body(&first), Some((&b"css-1"[..], ResponseSource::Cache)));
        worker.settle().await;
        let second = worker.fetch(&AssetRequest::get(url("app.css"))).await;
        assert_eq!(body(&second), Some((&b"css-2"[..], ResponseSource::Cache)));
        Ok(())
    }

    #[tokio::test]
    async fn uncached_assets_wait_for_network() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        worker.activate()?;

        network.set("http://app.test/data.json", "{}");
        let outcome = worker.fetch(&AssetRequest::get(url("data.json"))).await;
        assert_eq!(body(&outcome), Some((&b"{}"[..], ResponseSource::Network)));
        assert!(worker
            .storage
            .match_in("linksaver-chat-v2", "http://app.test/data.json")?
            .is_some());

        let missing = worker.fetch(&AssetRequest::get(url("missing.png"))).await;
        assert_matches!(missing, FetchOutcome::Respond { ref response, .. } if response.status == 404);
        assert!(worker
            .storage
            .match_in("linksaver-chat-v2", "http://app.test/missing.png")?
            .is_none());

        network.go_offline();
        let offline = worker.fetch(&AssetRequest::get(url("other.png"))).await;
        assert_eq!(body(&offline), Some((&b"shell"[..], ResponseSource::Cache)));
        Ok(())
    }

    #[tokio::test]
    async fn cross_origin_and_non_get_pass_through() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let mut worker = worker(&temp, 2, &network)?;
        worker.install().await?;
        worker.activate()?;
        let before = network.hits();

        let provider = Url::parse("https://jsonlink.io/api/extract?url=https://a.com")?;
        assert_eq!(
            worker.fetch(&AssetRequest::get(provider)).await,
            FetchOutcome::Passthrough
        );
        let post = AssetRequest {
            method: "POST".into(),
            ..AssetRequest::get(url("app.css"))
        };
        assert_eq!(worker.fetch(&post).await, FetchOutcome::Passthrough);
        assert_eq!(network.hits(), before);
        Ok(())
    }

    #[tokio::test]
    async fn handle_drives_the_worker_task() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let network = shell_network();
        let handle = spawn(worker(&temp, 2, &network)?);
        assert_eq!(handle.install().await?, 3);
        handle.activate().await?;

        let outcome = handle.fetch(AssetRequest::get(url("index.html"))).await?;
        assert_eq!(body(&outcome), Some((&b"shell"[..], ResponseSource::Cache)));
        handle.settle().await?;
        assert!(handle.is_alive());
        Ok(())
    }
}
