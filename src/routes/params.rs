//! Query parameter helpers shared by the list endpoints.
//!
//! The types follow Rocket's `FromForm` conventions and derive `JsonSchema`
//! so the generated OpenAPI document reflects the available parameters and
//! their defaults.

use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    50
}

const MAX_PAGE_SIZE: i64 = 100;

/// Common pagination parameters applied to list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    /// One-based page index (defaults to the first page).
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page (clamped between 1 and 100, default 50).
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl PaginationParams {
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.size()
    }
}

/// Sort direction for list endpoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, rocket::FromFormField,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[field(value = "asc")]
    Asc,
    #[field(value = "desc")]
    Desc,
}

impl SortOrder {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sortable columns on the company list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, rocket::FromFormField,
)]
#[serde(rename_all = "camelCase")]
pub enum CompanySortField {
    #[field(value = "lastSeen")]
    LastSeen,
    #[field(value = "createdAt")]
    CreatedAt,
    #[field(value = "emailsFrom")]
    EmailsFrom,
    #[field(value = "name")]
    Name,
}

impl CompanySortField {
    pub fn column(self) -> &'static str {
        match self {
            Self::LastSeen => "last_seen",
            Self::CreatedAt => "created_at",
            Self::EmailsFrom => "emails_from",
            Self::Name => "name",
        }
    }
}

/// Sortable columns on the contact list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, rocket::FromFormField,
)]
#[serde(rename_all = "camelCase")]
pub enum ContactSortField {
    #[field(value = "lastSeen")]
    LastSeen,
    #[field(value = "createdAt")]
    CreatedAt,
    #[field(value = "emailsFrom")]
    EmailsFrom,
    #[field(value = "name")]
    Name,
}

impl ContactSortField {
    pub fn column(self) -> &'static str {
        match self {
            Self::LastSeen => "last_seen",
            Self::CreatedAt => "created_at",
            Self::EmailsFrom => "emails_from",
            Self::Name => "name",
        }
    }
}
