//! Drives pending links to a terminal status when connectivity comes back.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::preview::PreviewResolver;
use crate::store::{LinkResolution, PendingLink, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    Restored,
    Lost,
}

/// Turns a stream of online/offline observations into edges.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    online: bool,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        Self { online }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn observe(&mut self, online: bool) -> Option<ConnectivityChange> {
        let change = match (self.online, online) {
            (false, true) => Some(ConnectivityChange::Restored),
            (true, false) => Some(ConnectivityChange::Lost),
            _ => None,
        };
        self.online = online;
        change
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Messages whose links changed and were re-announced.
    pub replaced: usize,
}

pub struct SyncCoordinator {
    store: SharedStore,
    resolver: Arc<PreviewResolver>,
    monitor: Mutex<ConnectivityMonitor>,
    sweeping: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(store: SharedStore, resolver: Arc<PreviewResolver>, online: bool) -> Self {
        Self {
            store,
            resolver,
            monitor: Mutex::new(ConnectivityMonitor::new(online)),
            sweeping: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.monitor.lock().is_online()
    }

    /// Feeds one connectivity observation. Only an offline -> online edge
    /// starts a sweep.
    pub async fn connectivity_changed(&self, online: bool) -> Option<SweepReport> {
        let change = self.monitor.lock().observe(online);
        match change {
            Some(ConnectivityChange::Restored) => {
                info!("connectivity restored, resolving pending previews");
                self.sweep().await
            }
            Some(ConnectivityChange::Lost) => {
                info!("connectivity lost");
                None
            }
            None => None,
        }
    }

    /// Resolves every pending link. Each link is attempted on its own; a
    /// failure only marks that link. The store is written once at the end.
    /// Returns `None` when a sweep is already running.
    pub async fn sweep(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.sweeping.try_lock() else {
            debug!("sweep already running");
            return None;
        };

        let targets = self.store.lock().pending_links();
        let mut outcomes: Vec<(PendingLink, LinkResolution)> = Vec::with_capacity(targets.len());
        for target in targets {
            let preview = self.resolver.resolve(&target.url).await;
            outcomes.push((target, preview.to_resolution()));
        }

        let mut report = SweepReport {
            attempted: outcomes.len(),
            ..SweepReport::default()
        };
        let mut store = self.store.lock();
        let mut touched: Vec<(String, String)> = Vec::new();
        for (target, outcome) in &outcomes {
            if !store.record_resolution(target, outcome) {
                continue;
            }
            match outcome {
                LinkResolution::Resolved { .. } => report.resolved += 1,
                LinkResolution::Failed => report.failed += 1,
            }
            let key = (target.category.clone(), target.message_id.clone());
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        if !touched.is_empty() {
            store.persist();
            for (category, message_id) in &touched {
                store.notify_replaced(category, message_id);
            }
        }
        report.replaced = touched.len();
        info!(
            attempted = report.attempted,
            resolved = report.resolved,
            failed = report.failed,
            "preview sweep finished"
        );
        Some(report)
    }
}
