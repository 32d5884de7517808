//! Data transfer objects exposed by the API.
//!
//! Every struct derives `JsonSchema` so `rocket_okapi` can describe the
//! payloads in the generated OpenAPI document.

use crate::graph::threads::ThreadRef;
use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A company aggregated from every domain seen for it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    /// Opaque identifier.
    pub id: Uuid,
    /// Display name; defaults to the first domain seen and is never
    /// auto-renamed.
    pub name: Option<String>,
    pub emails_to: i64,
    pub emails_from: i64,
    pub emails_included: i64,
    pub meetings_completed: i64,
    pub meetings_upcoming: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A domain belonging to a company.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// Lowercased FQDN; the primary key.
    pub domain: String,
    pub company_id: Uuid,
    pub is_primary: bool,
    pub emails_to: i64,
    pub emails_from: i64,
    pub emails_included: i64,
    pub meetings_completed: i64,
    pub meetings_upcoming: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tracked person at a company.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub company_id: Uuid,
    /// Display name; written once from the first named observation.
    pub name: Option<String>,
    pub emails_to: i64,
    pub emails_from: i64,
    pub emails_included: i64,
    pub meetings_completed: i64,
    pub meetings_upcoming: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent threads this contact appeared on, newest first.
    pub recent_threads: Vec<ThreadRef>,
}

/// One address belonging to a contact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    /// Lowercased address; the primary key.
    pub address: String,
    pub contact_id: Uuid,
    pub domain: String,
    /// Display name first observed for this address.
    pub observed_name: Option<String>,
    pub is_active: bool,
    pub emails_to: i64,
    pub emails_from: i64,
    pub emails_included: i64,
    pub meetings_completed: i64,
    pub meetings_upcoming: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub recent_threads: Vec<ThreadRef>,
}

/// Company detail: the company plus its domains and contacts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompanyDetail {
    #[serde(flatten)]
    pub company: Company,
    pub domains: Vec<Domain>,
    pub contacts: Vec<Contact>,
}

/// Contact detail: the contact plus its addresses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContactDetail {
    #[serde(flatten)]
    pub contact: Contact,
    pub addresses: Vec<EmailAddress>,
}

/// Per-account sync cursor readout.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub account: String,
    /// `pending`, `cold-batch`, or `hot-incremental`.
    pub mode: String,
    /// Day window currently being back-filled.
    pub batch_day: Option<NaiveDate>,
    pub page_number: i32,
    pub has_provider_cursor: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Entity totals for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_companies: i64,
    pub total_domains: i64,
    pub total_contacts: i64,
    pub total_email_addresses: i64,
    pub total_processed_messages: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Simple message wrapper for acknowledgement responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Generic wrapper used by endpoints that return a single payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Pagination metadata accompanying list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageMetadata {
    /// One-based page index.
    pub page: i64,
    /// Page size.
    pub size: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    #[serde(rename = "totalElements")]
    pub total_elements: i64,
}

/// Wrapper for paginated datasets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: PageMetadata,
}

impl<T> PaginatedResponse<T> {
    /// Create a paginated response and compute pagination totals.
    pub fn new(data: Vec<T>, page: i64, size: i64, total_elements: i64) -> Self {
        let total_pages = if size > 0 {
            (total_elements + size - 1) / size
        } else {
            0
        };

        Self {
            data,
            page: PageMetadata {
                page,
                size,
                total_pages,
                total_elements,
            },
        }
    }
}
