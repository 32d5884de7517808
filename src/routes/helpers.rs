//! Shared helpers for Rocket route handlers.

use crate::error::ApiError;
use crate::graph::threads::RecentThreads;
use crate::models::{Contact, EmailAddress};
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use uuid::Uuid;

/// Parse an opaque entity id path segment.
pub fn parse_entity_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid id '{raw}'")))
}

/// Normalize and validate a domain supplied on the admin API.
pub fn validate_domain(raw: &str) -> Result<String, ApiError> {
    let domain = raw.trim().to_lowercase();
    if domain.is_empty()
        || domain.contains('@')
        || domain.contains(char::is_whitespace)
        || !domain.contains('.')
    {
        return Err(ApiError::BadRequest(format!("invalid domain '{raw}'")));
    }
    Ok(domain)
}

/// Escape LIKE metacharacters and wrap for substring matching.
pub fn like_pattern(q: &str) -> String {
    format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"))
}

/// Contact row with the raw JSONB thread cell, as read from the store.
#[derive(Debug, FromRow)]
pub struct ContactRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: Option<String>,
    pub recent_threads: serde_json::Value,
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

impl ContactRow {
    pub fn into_contact(self) -> Contact {
        Contact {
            id: self.id,
            company_id: self.company_id,
            name: self.name,
            emails_to: self.emails_to,
            emails_from: self.emails_from,
            emails_included: self.emails_included,
            meetings_completed: self.meetings_completed,
            meetings_upcoming: self.meetings_upcoming,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            created_at: self.created_at,
            updated_at: self.updated_at,
            recent_threads: RecentThreads::from_value(&self.recent_threads)
                .entries()
                .to_vec(),
        }
    }
}

/// Email address row with the raw JSONB thread cell.
#[derive(Debug, FromRow)]
pub struct EmailAddressRow {
    pub address: String,
    pub contact_id: Uuid,
    pub domain: String,
    pub observed_name: Option<String>,
    pub is_active: bool,
    pub recent_threads: serde_json::Value,
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

impl EmailAddressRow {
    pub fn into_email_address(self) -> EmailAddress {
        EmailAddress {
            address: self.address,
            contact_id: self.contact_id,
            domain: self.domain,
            observed_name: self.observed_name,
            is_active: self.is_active,
            emails_to: self.emails_to,
            emails_from: self.emails_from,
            emails_included: self.emails_included,
            meetings_completed: self.meetings_completed,
            meetings_upcoming: self.meetings_upcoming,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            created_at: self.created_at,
            updated_at: self.updated_at,
            recent_threads: RecentThreads::from_value(&self.recent_threads)
                .entries()
                .to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_domain_shape() {
        assert_eq!(validate_domain(" Beta.IO ").unwrap(), "beta.io");
        assert!(validate_domain("").is_err());
        assert!(validate_domain("jane@beta.io").is_err());
        assert!(validate_domain("no-dot").is_err());
        assert!(validate_domain("has space.io").is_err());
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
