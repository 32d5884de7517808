//! Per-account sync state machine.
//!
//! Each account moves through three modes, with the cursor persisted in
//! `sync_states` at every page boundary:
//!
//! - **Cold batch**: paginated day windows walked forward from the batch
//!   start date (2000-01-01, early enough to capture imported mailboxes).
//!   An empty day advances the window; a non-empty day pages through with
//!   the provider's page token. Guarantees forward progress under short
//!   execution budgets and survives restarts without re-counting.
//! - **Hot incremental**: once the batch day passes today, history pages
//!   are pulled from the persisted provider cursor.
//! - **Full rescan**: last-resort reconciliation when no cursor exists or
//!   the provider reports it expired; walks everything in pages of 100,
//!   relying on processed-message dedup.
//!
//! Invocations are self-contained: every page boundary is durable before
//! the next page is fetched, and a crash mid-page re-enters the same page
//! deduplicated by `processed_messages`.

use crate::config::AccountConfig;
use crate::graph::blacklist::BlacklistEngine;
use crate::graph::processor::{MessageProcessor, ProcessOutcome};
use crate::graph::store::EntityStore;
use crate::graph::IngestError;
use crate::provider::{
    HistoryParams, ListMessagesParams, MailProvider, ProviderError, ProviderMessage,
};
use chrono::{NaiveDate, Utc};
use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Page size for the full-rescan walk.
pub const FULL_SYNC_PAGE_SIZE: u32 = 100;

/// First day of the cold-batch walk. Predates every mail provider so
/// imported and migrated messages are captured.
pub fn default_batch_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid batch start date")
}

/// Listing query bounding one day window: `[day, day + 1)`.
fn day_window_query(day: NaiveDate) -> String {
    let next = day.succ_opt().unwrap_or(day);
    format!(
        "after:{} before:{}",
        day.format("%Y/%m/%d"),
        next.format("%Y/%m/%d")
    )
}

fn out_of_budget(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Aggregated result of one coordinator invocation.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub stats: ProcessOutcome,
    pub messages_processed: u64,
    pub messages_skipped: u64,
    pub pages: u32,
    /// Per-message failures; these never abort a page.
    pub errors: Vec<String>,
    pub caught_up: bool,
}

impl SyncOutcome {
    pub fn merge(&mut self, other: SyncOutcome) {
        self.stats.merge(other.stats);
        self.messages_processed += other.messages_processed;
        self.messages_skipped += other.messages_skipped;
        self.pages += other.pages;
        self.errors.extend(other.errors);
        self.caught_up |= other.caught_up;
    }
}

/// Drives a single account through one sync invocation.
pub struct SyncCoordinator {
    store: EntityStore,
    blacklist: BlacklistEngine,
    provider: Arc<dyn MailProvider>,
    account: AccountConfig,
    self_address: String,
    page_size: u32,
}

impl SyncCoordinator {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn MailProvider>,
        account: AccountConfig,
        page_size: u32,
    ) -> Self {
        let self_address = account.normalized_self_address();
        Self {
            store: EntityStore::new(pool.clone()),
            blacklist: BlacklistEngine::new(pool),
            provider,
            account,
            self_address,
            page_size,
        }
    }

    /// One self-contained invocation: loop cold-batch pages until the
    /// wall-clock budget runs out or the account is caught up, then tail
    /// the provider's change history.
    pub async fn run_once(&self, budget: Duration) -> Result<SyncOutcome, IngestError> {
        if let Err(err) = self.blacklist.load_cache().await {
            log::warn!(
                "account {}: blacklist cache unavailable, using point queries: {}",
                self.account.label,
                err
            );
        }

        let deadline = Instant::now() + budget;
        let mut outcome = SyncOutcome::default();

        loop {
            let state = self.store.read_sync_state(&self.account.label).await?;
            let batch_day = state.as_ref().and_then(|s| s.batch_day);
            let today = Utc::now().date_naive();

            match batch_day {
                Some(day) if day > today => {
                    let hot = self.incremental_sync(Some(deadline)).await?;
                    outcome.merge(hot);
                    outcome.caught_up = true;
                    break;
                }
                _ => {
                    let page = self.batch_sync(self.page_size).await?;
                    outcome.merge(page);
                    if out_of_budget(Some(deadline)) {
                        break;
                    }
                }
            }
        }

        self.store.touch_last_synced(&self.account.label).await?;

        log::info!(
            "account {}: {} processed, {} skipped, {} pages, {} errors{}",
            self.account.label,
            outcome.messages_processed,
            outcome.messages_skipped,
            outcome.pages,
            outcome.errors.len(),
            if outcome.caught_up { ", caught up" } else { "" }
        );

        Ok(outcome)
    }

    /// One cold-batch page: list the current day window, process the page,
    /// persist the cursor. An empty window advances the day.
    pub async fn batch_sync(&self, page_size: u32) -> Result<SyncOutcome, IngestError> {
        let label = &self.account.label;
        let mut outcome = SyncOutcome::default();

        let state = self.store.read_sync_state(label).await?;
        let today = Utc::now().date_naive();
        let (batch_day, page_token, page_number) = match &state {
            Some(s) => (
                s.batch_day.unwrap_or_else(default_batch_start),
                s.page_token.clone(),
                s.page_number,
            ),
            None => (default_batch_start(), None, 0),
        };

        if batch_day > today {
            outcome.caught_up = true;
            return Ok(outcome);
        }

        // Fetch the hot-path cursor up front so it is already durable once
        // the cold walk crosses today.
        let profile = self.provider.get_profile().await?;

        let page = self
            .provider
            .list_messages(ListMessagesParams {
                page_token: page_token.clone(),
                max_results: Some(page_size),
                q: Some(day_window_query(batch_day)),
            })
            .await?;
        outcome.pages = 1;

        if page.messages.is_empty() {
            let next_day = batch_day.succ_opt().unwrap_or(batch_day);
            self.store
                .save_batch_progress(label, next_day, None, 0)
                .await?;
            self.store
                .save_provider_cursor(label, &profile.history_id)
                .await?;
            log::debug!("account {}: day {} empty, advancing", label, batch_day);
            return Ok(outcome);
        }

        let ids: Vec<String> = page.messages.iter().map(|m| m.id.clone()).collect();
        let messages = self.fetch_messages(&ids, &mut outcome).await;
        self.apply_messages(&messages, &mut outcome).await?;

        match &page.next_page_token {
            Some(next) => {
                self.store
                    .save_batch_progress(label, batch_day, Some(next.as_str()), page_number + 1)
                    .await?;
                log::debug!(
                    "account {}: day {} page {} done, more pages",
                    label,
                    batch_day,
                    page_number
                );
            }
            None => {
                let next_day = batch_day.succ_opt().unwrap_or(batch_day);
                self.store
                    .save_batch_progress(label, next_day, None, 0)
                    .await?;
                log::debug!("account {}: day {} complete", label, batch_day);
            }
        }
        self.store
            .save_provider_cursor(label, &profile.history_id)
            .await?;

        Ok(outcome)
    }

    /// Hot path: pull history pages from the persisted provider cursor and
    /// apply every message addition. Falls back to [`Self::full_sync`] when
    /// no cursor exists or the provider reports it stale.
    pub async fn incremental_sync(
        &self,
        deadline: Option<Instant>,
    ) -> Result<SyncOutcome, IngestError> {
        let label = &self.account.label;

        let state = self.store.read_sync_state(label).await?;
        let Some(cursor) = state.and_then(|s| s.provider_cursor) else {
            log::info!("account {}: no provider cursor, running full sync", label);
            return self.full_sync(deadline).await;
        };

        let mut outcome = SyncOutcome::default();
        let mut latest_cursor = cursor.clone();
        let mut page_token: Option<String> = None;

        loop {
            if out_of_budget(deadline) {
                break;
            }

            let page = match self
                .provider
                .get_history(HistoryParams {
                    start_cursor: cursor.clone(),
                    page_token: page_token.clone(),
                })
                .await
            {
                Ok(page) => page,
                Err(ProviderError::CursorExpired) => {
                    log::warn!("account {}: history cursor expired, running full sync", label);
                    return self.full_sync(deadline).await;
                }
                Err(err) => return Err(err.into()),
            };
            outcome.pages += 1;

            let mut to_fetch = Vec::new();
            for entry in &page.history {
                for message_ref in &entry.messages_added {
                    if self.store.has_processed(&message_ref.id).await? {
                        outcome.messages_skipped += 1;
                    } else {
                        to_fetch.push(message_ref.id.clone());
                    }
                }
            }

            if !to_fetch.is_empty() {
                let messages = self.fetch_messages(&to_fetch, &mut outcome).await;
                self.apply_messages(&messages, &mut outcome).await?;
            }

            latest_cursor = page.history_id.clone();
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        self.store.save_provider_cursor(label, &latest_cursor).await?;
        Ok(outcome)
    }

    /// Last-resort reconciliation: walk every message without a day window.
    /// Already-counted messages are skipped by the dedup ledger. The
    /// provider cursor is re-read only after a complete walk.
    pub async fn full_sync(&self, deadline: Option<Instant>) -> Result<SyncOutcome, IngestError> {
        let label = &self.account.label;
        log::info!("account {}: starting full reconciliation walk", label);

        let mut outcome = SyncOutcome::default();
        let mut page_token: Option<String> = None;
        let mut completed = false;

        loop {
            if out_of_budget(deadline) {
                break;
            }

            let page = self
                .provider
                .list_messages(ListMessagesParams {
                    page_token: page_token.clone(),
                    max_results: Some(FULL_SYNC_PAGE_SIZE),
                    q: None,
                })
                .await?;
            outcome.pages += 1;

            let mut to_fetch = Vec::new();
            for message_ref in &page.messages {
                if self.store.has_processed(&message_ref.id).await? {
                    outcome.messages_skipped += 1;
                } else {
                    to_fetch.push(message_ref.id.clone());
                }
            }

            if !to_fetch.is_empty() {
                let messages = self.fetch_messages(&to_fetch, &mut outcome).await;
                self.apply_messages(&messages, &mut outcome).await?;
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    completed = true;
                    break;
                }
            }
        }

        if completed {
            let profile = self.provider.get_profile().await?;
            self.store
                .save_provider_cursor(label, &profile.history_id)
                .await?;
        }

        Ok(outcome)
    }

    /// Fetch full message details for one page of ids. A failed batch call
    /// degrades to per-message fetches; a message that still cannot be
    /// fetched is recorded as an error and retried on a later invocation
    /// (it is never marked processed).
    async fn fetch_messages(
        &self,
        ids: &[String],
        outcome: &mut SyncOutcome,
    ) -> Vec<ProviderMessage> {
        match self.provider.batch_get_messages(ids).await {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!(
                    "account {}: batch fetch failed, retrying messages individually: {}",
                    self.account.label,
                    err
                );
                let mut messages = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.provider.get_message(id).await {
                        Ok(message) => messages.push(message),
                        Err(err) => {
                            outcome.errors.push(format!("message {id}: {err}"));
                        }
                    }
                }
                messages
            }
        }
    }

    /// Process one page worth of fetched messages in list order. Each
    /// message is marked processed before its mutation batches run, so a
    /// crash mid-message skips it on retry rather than double counting.
    /// Per-message failures are recorded without aborting the page.
    async fn apply_messages(
        &self,
        messages: &[ProviderMessage],
        outcome: &mut SyncOutcome,
    ) -> Result<(), IngestError> {
        let processor = MessageProcessor::new(&self.store, &self.blacklist);

        for message in messages {
            if self.store.has_processed(&message.id).await? {
                outcome.messages_skipped += 1;
                continue;
            }
            if !self.store.mark_processed(&message.id, &self.account.label).await? {
                outcome.messages_skipped += 1;
                continue;
            }

            match processor
                .process(&self.account.label, &self.self_address, message)
                .await
            {
                Ok(stats) => {
                    outcome.stats.merge(stats);
                    outcome.messages_processed += 1;
                }
                Err(err) => {
                    log::warn!(
                        "account {}: message {} failed: {}",
                        self.account.label,
                        message.id,
                        err
                    );
                    outcome
                        .errors
                        .push(format!("message {}: {}", message.id, err));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_window_query_bounds_one_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(day_window_query(day), "after:2024/03/01 before:2024/03/02");
    }

    #[test]
    fn day_window_query_crosses_month_and_year_boundaries() {
        let day = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(day_window_query(day), "after:2024/12/31 before:2025/01/01");
    }

    #[test]
    fn batch_start_captures_imported_mail() {
        assert_eq!(
            default_batch_start(),
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
    }
}
