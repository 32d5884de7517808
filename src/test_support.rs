//! Helpers shared by the integration test suites.
//!
//! [`TestDatabase`] provisions a throwaway Postgres database from
//! `TEST_DATABASE_URL` and runs migrations; suites skip cleanly when the
//! variable is unset. [`StaticProvider`] is a deterministic in-memory
//! [`MailProvider`] that serves canned messages, honors the
//! `after:/before:` listing grammar, and records every listing query for
//! assertions.

use crate::provider::{
    HistoryEntry, HistoryPage, HistoryParams, ListMessagesParams, MailProvider, MessageHeaders,
    MessagePage, MessageRef, Profile, ProviderError, ProviderMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rocket::{Build, Rocket, Route};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
pub enum TestDatabaseError {
    /// `TEST_DATABASE_URL` is not set; the suite should skip.
    MissingUrl,
    Provision(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
}

/// A uniquely named database created from the admin connection in
/// `TEST_DATABASE_URL`, migrated and dropped on close.
pub struct TestDatabase {
    base_url: String,
    db_name: String,
    pool: PgPool,
}

impl TestDatabase {
    pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
        let base_url =
            std::env::var("TEST_DATABASE_URL").map_err(|_| TestDatabaseError::MissingUrl)?;

        let db_name = format!("mailgraph_test_{}", Uuid::new_v4().simple());

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .map_err(TestDatabaseError::Provision)?;
        sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
            .execute(&admin_pool)
            .await
            .map_err(TestDatabaseError::Provision)?;
        admin_pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&swap_database(&base_url, &db_name))
            .await
            .map_err(TestDatabaseError::Provision)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(TestDatabaseError::Migrate)?;

        Ok(Self {
            base_url,
            db_name,
            pool,
        })
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    /// Drop the provisioned database.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.pool.close().await;

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await?;
        sqlx::query(&format!(
            r#"DROP DATABASE IF EXISTS "{}" WITH (FORCE)"#,
            self.db_name
        ))
        .execute(&admin_pool)
        .await?;
        admin_pool.close().await;

        Ok(())
    }
}

/// Replace the database segment of a Postgres URL, preserving any query
/// string.
fn swap_database(url: &str, db_name: &str) -> String {
    let (prefix, rest) = match url.rfind('/') {
        Some(idx) => (&url[..idx], &url[idx + 1..]),
        None => (url, ""),
    };
    match rest.find('?') {
        Some(q) => format!("{prefix}/{db_name}{}", &rest[q..]),
        None => format!("{prefix}/{db_name}"),
    }
}

/// Builds a minimal Rocket instance for route tests that do not need a
/// database.
pub struct TestRocketBuilder {
    rocket: Rocket<Build>,
}

impl TestRocketBuilder {
    pub fn new() -> Self {
        Self {
            rocket: rocket::build(),
        }
    }

    pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
        self.rocket = self.rocket.mount("/api", routes);
        self
    }

    pub fn blocking_client(self) -> rocket::local::blocking::Client {
        rocket::local::blocking::Client::tracked(self.rocket).expect("valid rocket instance")
    }
}

impl Default for TestRocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a canned message; the internal timestamp is derived from the
/// RFC 3339 date.
pub fn canned_message(
    id: &str,
    thread_id: &str,
    from: &str,
    to: &str,
    cc: &str,
    date: &str,
) -> ProviderMessage {
    let parsed: DateTime<Utc> = date.parse().expect("valid RFC 3339 date");
    let opt = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };

    ProviderMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        headers: MessageHeaders {
            from: opt(from),
            to: opt(to),
            cc: opt(cc),
            date: opt(date),
        },
        internal_timestamp_ms: parsed.timestamp_millis(),
    }
}

/// Deterministic in-memory mail provider.
pub struct StaticProvider {
    profile: Profile,
    messages: Vec<ProviderMessage>,
    history_entries: Vec<HistoryEntry>,
    cursor_expired: AtomicBool,
    list_queries: Mutex<Vec<String>>,
}

impl StaticProvider {
    pub fn new(email_address: &str, history_id: &str) -> Self {
        Self {
            profile: Profile {
                history_id: history_id.to_string(),
                email_address: email_address.to_string(),
            },
            messages: Vec::new(),
            history_entries: Vec::new(),
            cursor_expired: AtomicBool::new(false),
            list_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_messages(mut self, messages: Vec<ProviderMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_history(mut self, entries: Vec<HistoryEntry>) -> Self {
        self.history_entries = entries;
        self
    }

    /// Make `get_history` report a stale cursor, forcing the full-sync
    /// fallback.
    pub fn with_expired_cursor(self) -> Self {
        self.cursor_expired.store(true, Ordering::SeqCst);
        self
    }

    /// Every `q` string passed to `list_messages`, in call order.
    pub fn recorded_queries(&self) -> Vec<String> {
        self.list_queries.lock().expect("query log lock").clone()
    }

    fn message_day(message: &ProviderMessage) -> Option<NaiveDate> {
        Utc.timestamp_millis_opt(message.internal_timestamp_ms)
            .single()
            .map(|dt| dt.date_naive())
    }
}

fn parse_day_window(q: &str) -> Option<(NaiveDate, NaiveDate)> {
    let mut after = None;
    let mut before = None;
    for token in q.split_whitespace() {
        if let Some(value) = token.strip_prefix("after:") {
            after = NaiveDate::parse_from_str(value, "%Y/%m/%d").ok();
        } else if let Some(value) = token.strip_prefix("before:") {
            before = NaiveDate::parse_from_str(value, "%Y/%m/%d").ok();
        }
    }
    Some((after?, before?))
}

#[async_trait]
impl MailProvider for StaticProvider {
    async fn list_messages(
        &self,
        params: ListMessagesParams,
    ) -> Result<MessagePage, ProviderError> {
        if let Some(q) = &params.q {
            self.list_queries
                .lock()
                .expect("query log lock")
                .push(q.clone());
        }

        let window = params.q.as_deref().and_then(parse_day_window);

        // chronological listing; providers make no ordering promise and
        // the pipeline only requires per-day forward progress
        let mut matching: Vec<&ProviderMessage> = self
            .messages
            .iter()
            .filter(|message| match window {
                Some((after, before)) => Self::message_day(message)
                    .map(|day| day >= after && day < before)
                    .unwrap_or(false),
                None => true,
            })
            .collect();
        matching.sort_by_key(|message| message.internal_timestamp_ms);

        let offset: usize = params
            .page_token
            .as_deref()
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        let limit = params.max_results.unwrap_or(100) as usize;

        let page: Vec<MessageRef> = matching
            .iter()
            .skip(offset)
            .take(limit)
            .map(|message| MessageRef {
                id: message.id.clone(),
                thread_id: message.thread_id.clone(),
            })
            .collect();

        let next_page_token = if offset + page.len() < matching.len() {
            Some((offset + page.len()).to_string())
        } else {
            None
        };

        Ok(MessagePage {
            messages: page,
            next_page_token,
            result_size_estimate: Some(matching.len() as u64),
        })
    }

    async fn get_message(&self, id: &str) -> Result<ProviderMessage, ProviderError> {
        self.messages
            .iter()
            .find(|message| message.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn batch_get_messages(
        &self,
        ids: &[String],
    ) -> Result<Vec<ProviderMessage>, ProviderError> {
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            messages.push(self.get_message(id).await?);
        }
        Ok(messages)
    }

    async fn get_history(&self, _params: HistoryParams) -> Result<HistoryPage, ProviderError> {
        if self.cursor_expired.load(Ordering::SeqCst) {
            return Err(ProviderError::CursorExpired);
        }

        Ok(HistoryPage {
            history: self.history_entries.clone(),
            history_id: self.profile.history_id.clone(),
            next_page_token: None,
        })
    }

    async fn get_profile(&self) -> Result<Profile, ProviderError> {
        Ok(self.profile.clone())
    }
}
