//! Watcher supervision
//!
//! Owns the two watcher tasks and the OS notifier, and tears everything
//! down on cancellation. Teardown failures are logged, never escalated;
//! the process is exiting anyway.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pairsync_core::config::Config;
use pairsync_core::ports::local_filesystem::ILocalFileSystem;
use pairsync_core::ports::remote_api::IRemoteApi;
use pairsync_core::ports::state_store::IPairStateStore;

use crate::events::EventSequencer;
use crate::local::LocalChangeWatcher;
use crate::notifier::Notifier;
use crate::remote::RemoteChangeWatcher;
use crate::suppression::SuppressionSet;

/// Running watcher stack. Dropping it without calling
/// [`shutdown`](WatcherSupervisor::shutdown) aborts the tasks.
pub struct WatcherSupervisor {
    cancel: CancellationToken,
    notifier: Option<Notifier>,
    fs: Arc<dyn ILocalFileSystem>,
    local_task: JoinHandle<Result<()>>,
    remote_task: JoinHandle<Result<()>>,
    local: Arc<LocalChangeWatcher>,
    remote: Arc<RemoteChangeWatcher>,
}

impl WatcherSupervisor {
    /// Starts the notifier and both watcher loops.
    pub fn start(
        config: &Config,
        fs: Arc<dyn ILocalFileSystem>,
        remote_api: Arc<dyn IRemoteApi>,
        store: Arc<dyn IPairStateStore>,
        suppression: Arc<SuppressionSet>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (sequencer, events) = EventSequencer::channel();
        let notifier = Notifier::start(Arc::clone(&fs), sequencer)?;

        let local = Arc::new(LocalChangeWatcher::new(
            Arc::clone(&fs),
            Arc::clone(&store),
            suppression,
            config.watch.tick_interval,
        ));
        let remote = Arc::new(RemoteChangeWatcher::new(
            remote_api,
            store,
            config.watch.remote_poll_interval,
        ));

        let local_task = {
            let local = Arc::clone(&local);
            let cancel = cancel.clone();
            tokio::spawn(async move { local.run(events, cancel).await })
        };
        let remote_task = {
            let remote = Arc::clone(&remote);
            let cancel = cancel.clone();
            tokio::spawn(async move { remote.run(cancel).await })
        };

        info!(root = %fs.base_folder().display(), "watchers started");
        Ok(Self {
            cancel,
            notifier: Some(notifier),
            fs,
            local_task,
            remote_task,
            local,
            remote,
        })
    }

    pub fn local(&self) -> &LocalChangeWatcher {
        &self.local
    }

    pub fn remote(&self) -> &RemoteChangeWatcher {
        &self.remote
    }

    /// Cancels both loops, waits for them, and releases the notifier.
    pub async fn shutdown(mut self) {
        info!("shutting down watchers");
        self.cancel.cancel();

        match self.local_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "local watcher exited with error"),
            Err(e) => warn!(error = %e, "local watcher task panicked"),
        }
        match self.remote_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "remote watcher exited with error"),
            Err(e) => warn!(error = %e, "remote watcher task panicked"),
        }

        if let Some(notifier) = self.notifier.take() {
            notifier.stop(self.fs.base_folder());
        }
    }
}
