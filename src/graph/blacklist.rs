//! Blacklist decision engine.
//!
//! Two layers decide whether an address is tracked as a relationship:
//!
//! 1. **Static patterns** — regex tables matching system/transactional
//!    local parts (`noreply`, `billing`, ...) and marketing subdomains
//!    (`@mail.`, `@news.`, ...), with a free-mail whitelist that suppresses
//!    local-part false positives on personal mailboxes.
//! 2. **Dynamic domain set** — the `blacklisted_domains` table, cached
//!    in memory per engine instance with a day+count freshness rule and a
//!    point-query fallback while the cache is cold.
//!
//! Categories exist for bookkeeping only; any hit excludes the address.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tokio::sync::RwLock;

/// Closed set of blacklist categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistCategory {
    Spam,
    Personal,
    Transactional,
    Manual,
}

impl BlacklistCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Personal => "personal",
            Self::Transactional => "transactional",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for BlacklistCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "spam" => Ok(Self::Spam),
            "personal" => Ok(Self::Personal),
            "transactional" => Ok(Self::Transactional),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown blacklist category '{other}'")),
        }
    }
}

/// Row shape shared with the blacklist admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub domain: String,
    pub category: String,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Domains where transactional local-part heuristics are suppressed:
/// `info@gmail.com` is a person, not a system mailbox.
const WHITELISTED_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "protonmail.com",
    "proton.me",
];

/// Free-mail domains seeded as `personal` for deployments that only want
/// corporate relationships tracked.
const PERSONAL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "ymail.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
    "gmx.com",
    "zoho.com",
    "fastmail.com",
    "hey.com",
    "mail.com",
    "yandex.com",
];

/// Local-part patterns, anchored to the whole local part with an optional
/// separator-delimited suffix (`notify` matches `notify-123` but `info`
/// does not match `information`).
const LOCAL_PART_PATTERNS: &[&str] = &[
    r"no[._-]?reply",
    r"do[._-]?not[._-]?reply",
    r"mailer[._-]?daemon",
    r"postmaster",
    r"bounces?",
    r"auto[._-]?reply",
    r"automated",
    r"notifications?",
    r"notify",
    r"alerts?",
    r"news(letter)?",
    r"marketing",
    r"promo(tion)?s?",
    r"campaigns?",
    r"support",
    r"info",
    r"sales",
    r"hello",
    r"contact",
    r"team",
    r"feedback",
    r"billing",
    r"subscriptions?",
    r"updates?",
    r"service",
    r"help",
    r"admin",
    r"webmaster",
];

/// Full-address patterns catching marketing subdomains and the `.edu` bulk
/// senders.
const FULL_ADDRESS_PATTERNS: &[&str] = &[
    r"@email\.",
    r"@e\.",
    r"@t\.",
    r"@m\.",
    r"@mail\.",
    r"@news\.",
    r"@notify\.",
    r"@alerts?\.",
    r"@promo\.",
    r"@offers?\.",
    r"@campaign\.",
    r"@action\.",
    r"@messages?\.",
    r"\.edu$",
];

static LOCAL_PART_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
static FULL_ADDRESS_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

fn local_part_regexes() -> &'static [Regex] {
    LOCAL_PART_REGEXES.get_or_init(|| {
        LOCAL_PART_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(&format!(r"(?i)^(?:{pattern})(?:[._+-].*)?$"))
                    .expect("invalid local-part blacklist pattern")
            })
            .collect()
    })
}

fn full_address_regexes() -> &'static [Regex] {
    FULL_ADDRESS_REGEXES.get_or_init(|| {
        FULL_ADDRESS_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(&format!(r"(?i){pattern}"))
                    .expect("invalid full-address blacklist pattern")
            })
            .collect()
    })
}

/// Static classification: does the address look like a system or marketing
/// sender? Whitelisted domains short-circuit to `false`.
pub fn is_transactional(address: &str) -> bool {
    let address = address.to_lowercase();
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };

    if WHITELISTED_DOMAINS.contains(&domain) {
        return false;
    }

    local_part_regexes().iter().any(|re| re.is_match(local))
        || full_address_regexes().iter().any(|re| re.is_match(&address))
}

struct DomainCache {
    domains: HashSet<String>,
    loaded_on: NaiveDate,
    row_count: i64,
}

/// Blacklist engine bound to the persisted domain set.
///
/// The cache is per engine instance; the coordinator refreshes it at
/// invocation start and the engine degrades to point queries when it is
/// missing.
pub struct BlacklistEngine {
    pool: PgPool,
    cache: RwLock<Option<DomainCache>>,
}

impl BlacklistEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(None),
        }
    }

    /// Snapshot the persisted domain set into memory.
    ///
    /// A populated cache is reused while the calendar day and the persisted
    /// row count both match what was recorded at load time; otherwise the
    /// snapshot is rebuilt.
    pub async fn load_cache(&self) -> Result<(), sqlx::Error> {
        let today = Utc::now().date_naive();
        let row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blacklisted_domains")
            .fetch_one(&self.pool)
            .await?;

        {
            let guard = self.cache.read().await;
            if let Some(cache) = guard.as_ref() {
                if cache.loaded_on == today && cache.row_count == row_count {
                    return Ok(());
                }
            }
        }

        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM blacklisted_domains")
            .fetch_all(&self.pool)
            .await?;
        let domains: HashSet<String> = rows.into_iter().map(|(domain,)| domain).collect();

        log::debug!("blacklist cache loaded: {} domains", domains.len());
        *self.cache.write().await = Some(DomainCache {
            domains,
            loaded_on: today,
            row_count,
        });

        Ok(())
    }

    /// Membership check against the dynamic domain set.
    pub async fn is_domain_blacklisted(&self, domain: &str) -> Result<bool, sqlx::Error> {
        let domain = domain.to_lowercase();

        {
            let guard = self.cache.read().await;
            if let Some(cache) = guard.as_ref() {
                return Ok(cache.domains.contains(&domain));
            }
        }

        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blacklisted_domains WHERE domain = $1)")
            .bind(&domain)
            .fetch_one(&self.pool)
            .await
    }

    /// Full exclusion decision for one address.
    pub async fn is_blacklisted(&self, address: &str) -> Result<bool, sqlx::Error> {
        if is_transactional(address) {
            return Ok(true);
        }

        match address.split_once('@') {
            Some((_, domain)) => self.is_domain_blacklisted(domain).await,
            None => Ok(false),
        }
    }

    /// Insert or re-categorize a domain.
    pub async fn add(
        &self,
        domain: &str,
        category: BlacklistCategory,
        source: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let domain = domain.to_lowercase();

        sqlx::query(
            r#"INSERT INTO blacklisted_domains (domain, category, source)
               VALUES ($1, $2, $3)
               ON CONFLICT (domain) DO UPDATE
               SET category = EXCLUDED.category, source = EXCLUDED.source"#,
        )
        .bind(&domain)
        .bind(category.as_str())
        .bind(source)
        .execute(&self.pool)
        .await?;

        if let Some(cache) = self.cache.write().await.as_mut() {
            if cache.domains.insert(domain) {
                cache.row_count += 1;
            }
        }

        Ok(())
    }

    /// Remove a domain; returns whether a row was deleted.
    pub async fn remove(&self, domain: &str) -> Result<bool, sqlx::Error> {
        let domain = domain.to_lowercase();

        let result = sqlx::query("DELETE FROM blacklisted_domains WHERE domain = $1")
            .bind(&domain)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() > 0;

        if removed {
            if let Some(cache) = self.cache.write().await.as_mut() {
                if cache.domains.remove(&domain) {
                    cache.row_count -= 1;
                }
            }
        }

        Ok(removed)
    }

    /// List entries, optionally restricted to one category.
    pub async fn list(
        &self,
        category: Option<BlacklistCategory>,
    ) -> Result<Vec<BlacklistEntry>, sqlx::Error> {
        match category {
            Some(category) => {
                sqlx::query_as(
                    r#"SELECT domain, category, source, created_at
                       FROM blacklisted_domains WHERE category = $1 ORDER BY domain"#,
                )
                .bind(category.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    r#"SELECT domain, category, source, created_at
                       FROM blacklisted_domains ORDER BY domain"#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    /// Seed the static free-mail list with category `personal`.
    /// Returns the number of newly inserted domains.
    pub async fn seed_personal_domains(&self) -> Result<u64, sqlx::Error> {
        let domains: Vec<String> = PERSONAL_DOMAINS.iter().map(|d| d.to_string()).collect();

        let result = sqlx::query(
            r#"INSERT INTO blacklisted_domains (domain, category, source)
               SELECT domain, 'personal', 'seed'
               FROM UNNEST($1::text[]) AS t(domain)
               ON CONFLICT (domain) DO NOTHING"#,
        )
        .bind(&domains)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected();
        if inserted > 0 {
            if let Some(cache) = self.cache.write().await.as_mut() {
                for domain in &domains {
                    if cache.domains.insert(domain.clone()) {
                        cache.row_count += 1;
                    }
                }
            }
        }

        log::info!("seeded {} personal domains into blacklist", inserted);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_local_parts_are_transactional() {
        for address in [
            "noreply@acme.com",
            "no-reply@acme.com",
            "no_reply@acme.com",
            "do-not-reply@acme.com",
            "donotreply@acme.com",
            "mailer-daemon@acme.com",
            "postmaster@acme.com",
            "bounce@acme.com",
            "bounces@acme.com",
            "auto-reply@acme.com",
            "notification@acme.com",
            "notifications@acme.com",
            "notify-123@acme.com",
            "alert@acme.com",
            "news@acme.com",
            "newsletter@acme.com",
            "marketing@acme.com",
            "promo@acme.com",
            "promotions@acme.com",
            "campaign@acme.com",
            "support@acme.com",
            "info@acme.com",
            "sales@acme.com",
            "hello@acme.com",
            "billing@acme.com",
            "subscription@acme.com",
            "updates@acme.com",
            "admin@acme.com",
            "webmaster@acme.com",
        ] {
            assert!(is_transactional(address), "{address} should be excluded");
        }
    }

    #[test]
    fn marketing_subdomains_are_transactional() {
        for address in [
            "jane@email.acme.com",
            "jane@e.acme.com",
            "jane@t.acme.com",
            "jane@m.acme.com",
            "noreply@mail.promo.biz",
            "jane@news.acme.com",
            "jane@alert.acme.com",
            "jane@alerts.acme.com",
            "jane@offers.acme.com",
            "jane@messages.acme.com",
            "registrar@university.edu",
        ] {
            assert!(is_transactional(address), "{address} should be excluded");
        }
    }

    #[test]
    fn human_addresses_are_not_transactional() {
        for address in [
            "jane@beta.io",
            "information@beta.io",
            "newson@beta.io",
            "salesforce-user@beta.io",
            "jane.support.case@beta.io",
            "edu@beta.io",
        ] {
            assert!(!is_transactional(address), "{address} should be kept");
        }
    }

    #[test]
    fn whitelisted_domains_suppress_local_part_matches() {
        assert!(!is_transactional("info@gmail.com"));
        assert!(!is_transactional("hello@outlook.com"));
        assert!(!is_transactional("Team@ICloud.com"));
        // the same local parts stay excluded elsewhere
        assert!(is_transactional("info@acme.com"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_transactional("NoReply@Acme.com"));
        assert!(is_transactional("jane@MAIL.promo.biz"));
    }
}
