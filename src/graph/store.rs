//! Entity store: batched reads, insert-if-missing, and relative-delta
//! updates over the four stat-bearing tables plus the sync bookkeeping
//! tables.
//!
//! All multi-statement work for a single message commits as one transaction
//! per batch (insert batch, then update batch), so a mid-batch failure
//! leaves the store either fully committed or fully rolled back for that
//! message. Counters are updated with `current + delta` arithmetic and
//! first/last-seen with `LEAST`/`GREATEST` over `COALESCE`, which keeps
//! concurrent updates from different account workers commutative.

use crate::graph::threads::{RecentThreads, ThreadRef};
use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

/// Lookup result for one known email address.
#[derive(Debug, Clone)]
pub struct EmailRecord {
    pub contact_id: Uuid,
    pub contact_name: Option<String>,
    pub company_id: Uuid,
}

/// A not-yet-stored address staged for insertion.
#[derive(Debug, Clone)]
pub struct StagedAddress {
    pub address: String,
    pub domain: String,
    pub name: Option<String>,
}

/// Result of committing an insert batch: entity maps covering every
/// requested key (freshly created or recovered from a lost insert race)
/// plus creation counts.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub domain_map: HashMap<String, Uuid>,
    pub email_map: HashMap<String, EmailRecord>,
    pub companies_created: u64,
    pub domains_created: u64,
    pub contacts_created: u64,
    pub emails_created: u64,
}

/// Per-entity counter increments for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatDelta {
    pub emails_to: i64,
    pub emails_from: i64,
    pub emails_included: i64,
}

impl StatDelta {
    pub fn add(&mut self, other: StatDelta) {
        self.emails_to += other.emails_to;
        self.emails_from += other.emails_from;
        self.emails_included += other.emails_included;
    }
}

/// The full update batch for one message: summed deltas per entity,
/// the thread reference folded into contacts and addresses, and
/// write-once-from-null name upgrades.
#[derive(Debug)]
pub struct DeltaBatch {
    pub message_date: DateTime<Utc>,
    pub thread_ref: ThreadRef,
    pub companies: Vec<(Uuid, StatDelta)>,
    pub domains: Vec<(String, StatDelta)>,
    pub contacts: Vec<(Uuid, StatDelta)>,
    pub emails: Vec<(String, StatDelta)>,
    pub contact_name_upgrades: Vec<(Uuid, String)>,
    pub email_name_upgrades: Vec<(String, String)>,
}

/// Persisted sync cursor for one account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncStateRow {
    pub account: String,
    pub provider_cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub batch_day: Option<NaiveDate>,
    pub page_token: Option<String>,
    pub page_number: i32,
}

pub struct EntityStore {
    pool: PgPool,
}

impl EntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk lookup: which of these domains exist, and which company owns
    /// each.
    pub async fn fetch_domains(
        &self,
        domains: &[String],
    ) -> Result<HashMap<String, Uuid>, sqlx::Error> {
        if domains.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, Uuid)> =
            sqlx::query_as("SELECT domain, company_id FROM domains WHERE domain = ANY($1)")
                .bind(domains)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    /// Bulk lookup of known addresses joined with their contact.
    pub async fn fetch_emails(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, EmailRecord>, sqlx::Error> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, Uuid, Option<String>, Uuid)> = sqlx::query_as(
            r#"SELECT ea.address, ea.contact_id, c.name, c.company_id
               FROM email_addresses ea
               JOIN contacts c ON c.id = ea.contact_id
               WHERE ea.address = ANY($1)"#,
        )
        .bind(addresses)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(address, contact_id, contact_name, company_id)| {
                (
                    address,
                    EmailRecord {
                        contact_id,
                        contact_name,
                        company_id,
                    },
                )
            })
            .collect())
    }

    /// Commit all entity insertions for one message as a single batch.
    ///
    /// New domains get a fresh Company named after the domain plus a primary
    /// Domain row; new addresses get a fresh Contact bound to the domain's
    /// company plus an EmailAddress row. Insert races with other account
    /// workers are absorbed by insert-or-ignore on the natural key followed
    /// by a refetch; companies or contacts staged for a lost race are
    /// removed before commit so no orphans remain.
    pub async fn commit_insert_batch(
        &self,
        new_domains: &[String],
        new_addresses: &[StagedAddress],
    ) -> Result<InsertOutcome, sqlx::Error> {
        let mut outcome = InsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        if !new_domains.is_empty() {
            let company_ids: Vec<Uuid> = new_domains.iter().map(|_| Uuid::new_v4()).collect();

            sqlx::query(
                r#"INSERT INTO companies (id, name)
                   SELECT id, name FROM UNNEST($1::uuid[], $2::text[]) AS t(id, name)"#,
            )
            .bind(&company_ids)
            .bind(new_domains)
            .execute(&mut *tx)
            .await?;

            let inserted = sqlx::query(
                r#"INSERT INTO domains (domain, company_id, is_primary)
                   SELECT domain, company_id, TRUE
                   FROM UNNEST($1::text[], $2::uuid[]) AS t(domain, company_id)
                   ON CONFLICT (domain) DO NOTHING"#,
            )
            .bind(new_domains)
            .bind(&company_ids)
            .execute(&mut *tx)
            .await?;
            outcome.domains_created = inserted.rows_affected();

            // Companies staged for a domain another worker inserted first
            // have no Domain row pointing at them; drop them.
            let orphaned = sqlx::query(
                r#"DELETE FROM companies
                   WHERE id = ANY($1)
                   AND NOT EXISTS (SELECT 1 FROM domains d WHERE d.company_id = companies.id)"#,
            )
            .bind(&company_ids)
            .execute(&mut *tx)
            .await?;
            outcome.companies_created = company_ids.len() as u64 - orphaned.rows_affected();
        }

        // Recover the actual company id for every involved domain, whoever
        // won the insert.
        let mut involved_domains: Vec<String> = new_domains.to_vec();
        for staged in new_addresses {
            if !involved_domains.contains(&staged.domain) {
                involved_domains.push(staged.domain.clone());
            }
        }
        if !involved_domains.is_empty() {
            let rows: Vec<(String, Uuid)> =
                sqlx::query_as("SELECT domain, company_id FROM domains WHERE domain = ANY($1)")
                    .bind(&involved_domains)
                    .fetch_all(&mut *tx)
                    .await?;
            outcome.domain_map = rows.into_iter().collect();
        }

        if !new_addresses.is_empty() {
            let mut addresses = Vec::with_capacity(new_addresses.len());
            let mut domains = Vec::with_capacity(new_addresses.len());
            let mut names = Vec::with_capacity(new_addresses.len());
            let mut contact_ids = Vec::with_capacity(new_addresses.len());
            let mut company_ids = Vec::with_capacity(new_addresses.len());

            for staged in new_addresses {
                let Some(&company_id) = outcome.domain_map.get(&staged.domain) else {
                    log::error!(
                        "staged address {} references unknown domain {}",
                        staged.address,
                        staged.domain
                    );
                    continue;
                };
                addresses.push(staged.address.clone());
                domains.push(staged.domain.clone());
                names.push(staged.name.clone());
                contact_ids.push(Uuid::new_v4());
                company_ids.push(company_id);
            }

            if !addresses.is_empty() {
                sqlx::query(
                    r#"INSERT INTO contacts (id, company_id, name)
                       SELECT id, company_id, name
                       FROM UNNEST($1::uuid[], $2::uuid[], $3::text[]) AS t(id, company_id, name)"#,
                )
                .bind(&contact_ids)
                .bind(&company_ids)
                .bind(&names)
                .execute(&mut *tx)
                .await?;

                let inserted = sqlx::query(
                    r#"INSERT INTO email_addresses (address, contact_id, domain, observed_name)
                       SELECT address, contact_id, domain, observed_name
                       FROM UNNEST($1::text[], $2::uuid[], $3::text[], $4::text[])
                           AS t(address, contact_id, domain, observed_name)
                       ON CONFLICT (address) DO NOTHING"#,
                )
                .bind(&addresses)
                .bind(&contact_ids)
                .bind(&domains)
                .bind(&names)
                .execute(&mut *tx)
                .await?;
                outcome.emails_created = inserted.rows_affected();

                let orphaned = sqlx::query(
                    r#"DELETE FROM contacts
                       WHERE id = ANY($1)
                       AND NOT EXISTS
                           (SELECT 1 FROM email_addresses ea WHERE ea.contact_id = contacts.id)"#,
                )
                .bind(&contact_ids)
                .execute(&mut *tx)
                .await?;
                outcome.contacts_created = contact_ids.len() as u64 - orphaned.rows_affected();
            }

            let all_addresses: Vec<String> =
                new_addresses.iter().map(|s| s.address.clone()).collect();
            let rows: Vec<(String, Uuid, Option<String>, Uuid)> = sqlx::query_as(
                r#"SELECT ea.address, ea.contact_id, c.name, c.company_id
                   FROM email_addresses ea
                   JOIN contacts c ON c.id = ea.contact_id
                   WHERE ea.address = ANY($1)"#,
            )
            .bind(&all_addresses)
            .fetch_all(&mut *tx)
            .await?;
            outcome.email_map = rows
                .into_iter()
                .map(|(address, contact_id, contact_name, company_id)| {
                    (
                        address,
                        EmailRecord {
                            contact_id,
                            contact_name,
                            company_id,
                        },
                    )
                })
                .collect();
        }

        tx.commit().await?;

        log::trace!(
            "insert batch: {} companies, {} domains, {} contacts, {} addresses",
            outcome.companies_created,
            outcome.domains_created,
            outcome.contacts_created,
            outcome.emails_created
        );

        Ok(outcome)
    }

    /// Commit all stat updates for one message as a single batch.
    pub async fn apply_deltas(&self, batch: &DeltaBatch) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !batch.companies.is_empty() {
            let (ids, to, from, included) = unzip_uuid_deltas(&batch.companies);
            sqlx::query(
                r#"UPDATE companies AS c SET
                       emails_to = c.emails_to + u.delta_to,
                       emails_from = c.emails_from + u.delta_from,
                       emails_included = c.emails_included + u.delta_included,
                       first_seen = LEAST(COALESCE(c.first_seen, $5), $5),
                       last_seen = GREATEST(COALESCE(c.last_seen, $5), $5),
                       updated_at = NOW()
                   FROM UNNEST($1::uuid[], $2::bigint[], $3::bigint[], $4::bigint[])
                       AS u(id, delta_to, delta_from, delta_included)
                   WHERE c.id = u.id"#,
            )
            .bind(&ids)
            .bind(&to)
            .bind(&from)
            .bind(&included)
            .bind(batch.message_date)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.domains.is_empty() {
            let (keys, to, from, included) = unzip_text_deltas(&batch.domains);
            sqlx::query(
                r#"UPDATE domains AS d SET
                       emails_to = d.emails_to + u.delta_to,
                       emails_from = d.emails_from + u.delta_from,
                       emails_included = d.emails_included + u.delta_included,
                       first_seen = LEAST(COALESCE(d.first_seen, $5), $5),
                       last_seen = GREATEST(COALESCE(d.last_seen, $5), $5),
                       updated_at = NOW()
                   FROM UNNEST($1::text[], $2::bigint[], $3::bigint[], $4::bigint[])
                       AS u(domain, delta_to, delta_from, delta_included)
                   WHERE d.domain = u.domain"#,
            )
            .bind(&keys)
            .bind(&to)
            .bind(&from)
            .bind(&included)
            .bind(batch.message_date)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.contacts.is_empty() {
            let (ids, to, from, included) = unzip_uuid_deltas(&batch.contacts);
            sqlx::query(
                r#"UPDATE contacts AS c SET
                       emails_to = c.emails_to + u.delta_to,
                       emails_from = c.emails_from + u.delta_from,
                       emails_included = c.emails_included + u.delta_included,
                       first_seen = LEAST(COALESCE(c.first_seen, $5), $5),
                       last_seen = GREATEST(COALESCE(c.last_seen, $5), $5),
                       updated_at = NOW()
                   FROM UNNEST($1::uuid[], $2::bigint[], $3::bigint[], $4::bigint[])
                       AS u(id, delta_to, delta_from, delta_included)
                   WHERE c.id = u.id"#,
            )
            .bind(&ids)
            .bind(&to)
            .bind(&from)
            .bind(&included)
            .bind(batch.message_date)
            .execute(&mut *tx)
            .await?;

            self.fold_contact_threads(&mut tx, &ids, &batch.thread_ref).await?;
        }

        if !batch.emails.is_empty() {
            let (keys, to, from, included) = unzip_text_deltas(&batch.emails);
            sqlx::query(
                r#"UPDATE email_addresses AS ea SET
                       emails_to = ea.emails_to + u.delta_to,
                       emails_from = ea.emails_from + u.delta_from,
                       emails_included = ea.emails_included + u.delta_included,
                       first_seen = LEAST(COALESCE(ea.first_seen, $5), $5),
                       last_seen = GREATEST(COALESCE(ea.last_seen, $5), $5),
                       updated_at = NOW()
                   FROM UNNEST($1::text[], $2::bigint[], $3::bigint[], $4::bigint[])
                       AS u(address, delta_to, delta_from, delta_included)
                   WHERE ea.address = u.address"#,
            )
            .bind(&keys)
            .bind(&to)
            .bind(&from)
            .bind(&included)
            .bind(batch.message_date)
            .execute(&mut *tx)
            .await?;

            self.fold_email_threads(&mut tx, &keys, &batch.thread_ref).await?;
        }

        if !batch.contact_name_upgrades.is_empty() {
            let (ids, names): (Vec<Uuid>, Vec<String>) =
                batch.contact_name_upgrades.iter().cloned().unzip();
            sqlx::query(
                r#"UPDATE contacts AS c SET name = u.name, updated_at = NOW()
                   FROM UNNEST($1::uuid[], $2::text[]) AS u(id, name)
                   WHERE c.id = u.id AND c.name IS NULL"#,
            )
            .bind(&ids)
            .bind(&names)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.email_name_upgrades.is_empty() {
            let (addresses, names): (Vec<String>, Vec<String>) =
                batch.email_name_upgrades.iter().cloned().unzip();
            sqlx::query(
                r#"UPDATE email_addresses AS ea SET observed_name = u.name, updated_at = NOW()
                   FROM UNNEST($1::text[], $2::text[]) AS u(address, name)
                   WHERE ea.address = u.address AND ea.observed_name IS NULL"#,
            )
            .bind(&addresses)
            .bind(&names)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Read-modify-write of contact recent-thread cells under row locks,
    /// inside the surrounding update transaction.
    async fn fold_contact_threads(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ids: &[Uuid],
        thread_ref: &ThreadRef,
    ) -> Result<(), sqlx::Error> {
        let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
            "SELECT id, recent_threads FROM contacts WHERE id = ANY($1) FOR UPDATE",
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        let mut folded_ids = Vec::with_capacity(rows.len());
        let mut folded_cells = Vec::with_capacity(rows.len());
        for (id, cell) in rows {
            let mut threads = RecentThreads::from_value(&cell);
            threads.touch(thread_ref.clone());
            folded_ids.push(id);
            folded_cells.push(threads.to_value());
        }

        sqlx::query(
            r#"UPDATE contacts AS c SET recent_threads = u.recent_threads
               FROM UNNEST($1::uuid[], $2::jsonb[]) AS u(id, recent_threads)
               WHERE c.id = u.id"#,
        )
        .bind(&folded_ids)
        .bind(&folded_cells)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn fold_email_threads(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        addresses: &[String],
        thread_ref: &ThreadRef,
    ) -> Result<(), sqlx::Error> {
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT address, recent_threads FROM email_addresses WHERE address = ANY($1) FOR UPDATE",
        )
        .bind(addresses)
        .fetch_all(&mut **tx)
        .await?;

        let mut folded_addresses = Vec::with_capacity(rows.len());
        let mut folded_cells = Vec::with_capacity(rows.len());
        for (address, cell) in rows {
            let mut threads = RecentThreads::from_value(&cell);
            threads.touch(thread_ref.clone());
            folded_addresses.push(address);
            folded_cells.push(threads.to_value());
        }

        sqlx::query(
            r#"UPDATE email_addresses AS ea SET recent_threads = u.recent_threads
               FROM UNNEST($1::text[], $2::jsonb[]) AS u(address, recent_threads)
               WHERE ea.address = u.address"#,
        )
        .bind(&folded_addresses)
        .bind(&folded_cells)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Record a message as counted. Returns false when the row already
    /// existed (the message must be skipped).
    pub async fn mark_processed(
        &self,
        message_id: &str,
        account: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO processed_messages (message_id, account)
               VALUES ($1, $2)
               ON CONFLICT (message_id) DO NOTHING"#,
        )
        .bind(message_id)
        .bind(account)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn has_processed(&self, message_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_messages WHERE message_id = $1)")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn read_sync_state(
        &self,
        account: &str,
    ) -> Result<Option<SyncStateRow>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT account, provider_cursor, last_synced_at, batch_day, page_token, page_number
               FROM sync_states WHERE account = $1"#,
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await
    }

    /// Persist the cold-batch cursor; the provider cursor and last-sync
    /// timestamp keep their current values.
    pub async fn save_batch_progress(
        &self,
        account: &str,
        batch_day: NaiveDate,
        page_token: Option<&str>,
        page_number: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO sync_states (account, batch_day, page_token, page_number)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (account) DO UPDATE
               SET batch_day = EXCLUDED.batch_day,
                   page_token = EXCLUDED.page_token,
                   page_number = EXCLUDED.page_number,
                   updated_at = NOW()"#,
        )
        .bind(account)
        .bind(batch_day)
        .bind(page_token)
        .bind(page_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the hot-path cursor; batch fields keep their current values.
    pub async fn save_provider_cursor(
        &self,
        account: &str,
        cursor: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO sync_states (account, provider_cursor)
               VALUES ($1, $2)
               ON CONFLICT (account) DO UPDATE
               SET provider_cursor = EXCLUDED.provider_cursor,
                   updated_at = NOW()"#,
        )
        .bind(account)
        .bind(cursor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn touch_last_synced(&self, account: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO sync_states (account, last_synced_at)
               VALUES ($1, NOW())
               ON CONFLICT (account) DO UPDATE
               SET last_synced_at = NOW(), updated_at = NOW()"#,
        )
        .bind(account)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn unzip_uuid_deltas(entries: &[(Uuid, StatDelta)]) -> (Vec<Uuid>, Vec<i64>, Vec<i64>, Vec<i64>) {
    let mut ids = Vec::with_capacity(entries.len());
    let mut to = Vec::with_capacity(entries.len());
    let mut from = Vec::with_capacity(entries.len());
    let mut included = Vec::with_capacity(entries.len());
    for (id, delta) in entries {
        ids.push(*id);
        to.push(delta.emails_to);
        from.push(delta.emails_from);
        included.push(delta.emails_included);
    }
    (ids, to, from, included)
}

fn unzip_text_deltas(
    entries: &[(String, StatDelta)],
) -> (Vec<String>, Vec<i64>, Vec<i64>, Vec<i64>) {
    let mut keys = Vec::with_capacity(entries.len());
    let mut to = Vec::with_capacity(entries.len());
    let mut from = Vec::with_capacity(entries.len());
    let mut included = Vec::with_capacity(entries.len());
    for (key, delta) in entries {
        keys.push(key.clone());
        to.push(delta.emails_to);
        from.push(delta.emails_from);
        included.push(delta.emails_included);
    }
    (keys, to, from, included)
}
