//! Engine lifecycle management: connect, start, run loop, shutdown.

use std::future::pending;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncEngineConfig;
use crate::error::SyncError;
use crate::remote::{HttpRemoteClient, HttpRemoteConfig};
use crate::resilience::retry::Backoff;
use crate::storage::sql::SqlStore;

use super::{EngineState, PullReport, SyncEngine};

impl SyncEngine {
    /// Build an engine over the SQLite store and HTTP remote named in `config`.
    pub async fn connect(
        config: SyncEngineConfig,
        config_rx: watch::Receiver<SyncEngineConfig>,
    ) -> Result<Self, SyncError> {
        let base_url = config
            .remote_url
            .clone()
            .ok_or_else(|| SyncError::Config("remote_url is required".into()))?;

        info!(store = %config.store_url(), remote = %base_url, "Connecting sync engine");
        let store = SqlStore::new(config.store_url()).await?;
        let remote = HttpRemoteClient::new(HttpRemoteConfig {
            base_url,
            api_key: config.api_key.clone(),
            timeout: config.request_timeout(),
        })?;

        Ok(Self::new(config, config_rx, Arc::new(store), Arc::new(remote)))
    }

    /// Check the local store and load sync state.
    ///
    /// Nothing is fetched or pushed here; the first pull and drain happen in
    /// [`run()`](Self::run) or on an explicit call.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        let startup_start = StdInstant::now();
        info!("Starting sync engine...");
        self.set_state(EngineState::Starting);

        let cursor = self.local.load_cursor().await?;
        let pending = self.local.pending_count().await?;
        let goals = self.local.list_goals().await?.len();
        crate::metrics::set_outbox_depth(pending);

        match cursor {
            Some(cursor) => info!(%cursor, goals, pending, "Local store loaded"),
            None => info!(goals, pending, "Local store loaded, never synced"),
        }

        self.set_state(EngineState::Ready);
        crate::metrics::record_startup_total(startup_start.elapsed());
        info!("Sync engine ready");
        Ok(())
    }

    /// Push what is queued, then pull.
    ///
    /// A failed drain does not prevent the pull; the pull's result is returned.
    pub async fn sync_now(&self) -> Result<PullReport, SyncError> {
        if let Err(e) = self.drain_outbox().await {
            warn!(error = %e, "Drain before pull failed");
        }
        self.pull().await
    }

    /// Run the main event loop until [`shutdown()`](Self::shutdown).
    ///
    /// - pulls immediately, then every `pull_interval_secs`
    /// - drains when a mutation is queued; after a transient push failure
    ///   waits out an exponential backoff before the next drain
    /// - applies config updates (pull interval, push backoff)
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        let mut config_rx = self.config_rx.lock().await;

        self.set_state(EngineState::Running);
        info!("Sync engine running");

        let (mut pull_interval, push_retry) = {
            let config = self.config.read();
            (config.pull_interval(), config.push_retry())
        };
        let mut backoff = Backoff::new(push_retry);
        let mut next_pull = Some(Instant::now());
        // Drain whatever survived the last run
        let mut next_drain = Some(Instant::now());

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    break;
                }

                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    info!(
                        pull_interval_secs = new_config.pull_interval_secs,
                        push_backoff_max_secs = new_config.push_backoff_max_secs,
                        "Config updated"
                    );
                    if new_config.pull_interval() != pull_interval {
                        pull_interval = new_config.pull_interval();
                        next_pull = pull_interval.map(|interval| Instant::now() + interval);
                    }
                    backoff.reconfigure(new_config.push_retry());
                    *self.config.write() = new_config;
                }

                _ = self.drain_notify.notified() => {
                    // During backoff the deadline stands
                    if backoff.failures() == 0 {
                        next_drain = Some(Instant::now());
                    }
                }

                _ = sleep_until_opt(next_drain) => {
                    next_drain = None;
                    match self.drain_outbox().await {
                        Ok(_) => {
                            if backoff.failures() > 0 {
                                info!(failures = backoff.failures(), "Push delivery recovered");
                            }
                            backoff.reset();
                            crate::metrics::set_push_backoff(std::time::Duration::ZERO);
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            crate::metrics::set_push_backoff(delay);
                            if e.is_transient() {
                                warn!(error = %e, retry_in = ?delay, "Outbox drain interrupted");
                            } else {
                                error!(error = %e, retry_in = ?delay, "Outbox drain failed on local store");
                            }
                            next_drain = Some(Instant::now() + delay);
                        }
                    }
                }

                _ = sleep_until_opt(next_pull) => {
                    // Failures are logged and reported as events by pull()
                    let _ = self.pull().await;
                    next_pull = pull_interval.map(|interval| Instant::now() + interval);
                }
            }
        }

        debug!("Run loop exited");
    }

    /// Initiate graceful shutdown.
    ///
    /// Stops the run loop. Queued mutations stay in the outbox and are sent
    /// on the next run.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating sync engine shutdown...");
        self.set_state(EngineState::ShuttingDown);
        self.shutdown.send_replace(true);

        match self.local.pending_count().await {
            Ok(0) => info!("Sync engine shutdown complete"),
            Ok(pending) => info!(pending, "Sync engine shutdown complete, pushes left queued"),
            Err(e) => warn!(error = %e, "Sync engine shutdown complete, outbox depth unknown"),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
