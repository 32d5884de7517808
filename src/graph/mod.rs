//! Ingestion pipeline: the stateful, resumable process that walks mailbox
//! history, deduplicates messages, extracts addresses, filters them through
//! the blacklist engine, and commits batched stat updates against the
//! relationship graph.

pub mod address;
pub mod blacklist;
pub mod coordinator;
pub mod processor;
pub mod store;
pub mod threads;
pub mod worker;

use crate::provider::ProviderError;
use rocket_db_pools::sqlx;
use thiserror::Error;

/// Errors surfaced by the ingestion pipeline.
///
/// Provider errors come back once adapter-side retries are exhausted; store
/// errors abort the current invocation with the sync cursor un-advanced so
/// the next invocation retries the same page.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
