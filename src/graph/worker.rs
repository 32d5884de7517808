//! Long-running ingestion worker.
//!
//! Runs every configured account through one coordinator invocation, each
//! on its own task so accounts progress independently, then sleeps until
//! the next trigger. The trigger interval tightens to the catch-up cadence
//! while any account is still back-filling. Invocations share nothing in
//! memory; all cross-invocation state lives in `sync_states`.

use crate::config::IngestConfig;
use crate::graph::coordinator::SyncCoordinator;
use crate::provider::MailProvider;
use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct IngestWorker {
    pool: PgPool,
    provider: Arc<dyn MailProvider>,
    config: IngestConfig,
    trigger: Arc<Notify>,
    shutdown: CancellationToken,
}

impl IngestWorker {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn MailProvider>,
        config: IngestConfig,
        trigger: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            provider,
            config,
            trigger,
            shutdown,
        }
    }

    /// Worker loop: runs until shutdown. Wakes on the timer or on a manual
    /// trigger from the admin endpoint.
    pub async fn run(self) {
        if self.config.accounts.is_empty() {
            log::warn!("ingest worker: no accounts configured, exiting");
            return;
        }

        log::info!(
            "ingest worker started: {} account(s), {}s budget",
            self.config.accounts.len(),
            self.config.sync_budget_secs
        );

        loop {
            let all_caught_up = self.run_all_accounts().await;

            let interval = Duration::from_secs(if all_caught_up {
                self.config.idle_interval_secs
            } else {
                self.config.catchup_interval_secs
            });

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.trigger.notified() => {
                    log::info!("ingest worker: manual trigger");
                }
                _ = self.shutdown.cancelled() => {
                    log::info!("ingest worker stopping");
                    break;
                }
            }
        }
    }

    /// One pass over every account, in parallel. Returns whether all
    /// accounts are caught up (controls the trigger cadence).
    async fn run_all_accounts(&self) -> bool {
        let budget = Duration::from_secs(self.config.sync_budget_secs);

        let mut handles = Vec::with_capacity(self.config.accounts.len());
        for account in &self.config.accounts {
            let coordinator = SyncCoordinator::new(
                self.pool.clone(),
                self.provider.clone(),
                account.clone(),
                self.config.page_size,
            );
            let label = account.label.clone();
            handles.push((
                label,
                tokio::spawn(async move { coordinator.run_once(budget).await }),
            ));
        }

        let mut all_caught_up = true;
        for (label, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    if !outcome.caught_up {
                        all_caught_up = false;
                    }
                }
                Ok(Err(err)) => {
                    all_caught_up = false;
                    log::error!("account {}: sync invocation failed: {}", label, err);
                }
                Err(err) => {
                    all_caught_up = false;
                    log::error!("account {}: sync task panicked: {}", label, err);
                }
            }
        }

        all_caught_up
    }
}
