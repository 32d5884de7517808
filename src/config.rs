//! Ingestion configuration, deserialized from Rocket's figment
//! (`[default.ingest]` in Rocket.toml or `MAILGRAPH_INGEST_*` environment
//! overrides).

use serde::Deserialize;

/// One mailbox to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Opaque account label (`work`, `personal`, ...). Used as the
    /// SyncState key and recorded on thread references.
    pub label: String,
    /// The account owner's canonical address; classifies messages as sent
    /// or received.
    pub self_address: String,
}

impl AccountConfig {
    /// Lowercased owner address for case-insensitive comparison.
    pub fn normalized_self_address(&self) -> String {
        self.self_address.to_lowercase()
    }
}

/// Worker-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Accounts to ingest. Empty disables the worker.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Soft wall-clock budget per account per invocation, seconds.
    #[serde(default = "default_sync_budget_secs")]
    pub sync_budget_secs: u64,
    /// Trigger interval while any account is still back-filling, seconds.
    #[serde(default = "default_catchup_interval_secs")]
    pub catchup_interval_secs: u64,
    /// Trigger interval once every account is caught up, seconds.
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    /// Page size for the cold-batch listing calls.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            sync_budget_secs: default_sync_budget_secs(),
            catchup_interval_secs: default_catchup_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

const fn default_sync_budget_secs() -> u64 {
    20
}

const fn default_catchup_interval_secs() -> u64 {
    60
}

const fn default_idle_interval_secs() -> u64 {
    900
}

const fn default_page_size() -> u32 {
    100
}
