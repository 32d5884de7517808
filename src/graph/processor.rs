//! Per-message processing: extract addresses, classify direction, filter,
//! and turn one provider message into the store mutations it implies.
//!
//! The counting rules are directional: on a message the account owner sent,
//! each recipient's entities gain `emails_to`; on a received message the
//! sender's entities gain `emails_from`; carbon-copied addresses gain
//! `emails_included` either way. Every surviving address also folds the
//! message timestamp into first/last-seen and the thread reference into the
//! recent-thread index, even when its counters are untouched for this
//! message (a co-recipient of an inbound message is still a tracked
//! relationship).

use crate::graph::address::{parse_header, ParsedAddress};
use crate::graph::blacklist::BlacklistEngine;
use crate::graph::store::{
    DeltaBatch, EmailRecord, EntityStore, StagedAddress, StatDelta,
};
use crate::graph::threads::ThreadRef;
use crate::graph::IngestError;
use crate::provider::{MessageHeaders, ProviderMessage};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// The position an address held in one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    From,
    To,
    Cc,
}

/// A parsed address tagged with the header it came from.
#[derive(Debug, Clone)]
pub struct TaggedAddress {
    pub role: Role,
    pub parsed: ParsedAddress,
}

/// Entity creation counts for one message (or one whole invocation; the
/// coordinator merges these).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub companies_created: u64,
    pub domains_created: u64,
    pub contacts_created: u64,
    pub emails_created: u64,
}

impl ProcessOutcome {
    pub fn merge(&mut self, other: ProcessOutcome) {
        self.companies_created += other.companies_created;
        self.domains_created += other.domains_created;
        self.contacts_created += other.contacts_created;
        self.emails_created += other.emails_created;
    }
}

/// Resolve the message timestamp: the `Date` header when it parses, the
/// provider's internal receipt time otherwise.
pub fn resolve_message_date(headers: &MessageHeaders, internal_timestamp_ms: i64) -> DateTime<Utc> {
    if let Some(raw) = headers.date.as_deref() {
        if !raw.trim().is_empty() {
            match dateparser::parse(raw) {
                Ok(parsed) => return parsed.with_timezone(&Utc),
                Err(err) => {
                    log::debug!("unparseable Date header '{}': {}", raw, err);
                }
            }
        }
    }

    Utc.timestamp_millis_opt(internal_timestamp_ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Parse the three address headers and tag each result with its role.
pub fn extract_addresses(headers: &MessageHeaders) -> Vec<TaggedAddress> {
    let mut tagged = Vec::new();
    let sources = [
        (Role::From, headers.from.as_deref()),
        (Role::To, headers.to.as_deref()),
        (Role::Cc, headers.cc.as_deref()),
    ];

    for (role, value) in sources {
        if let Some(value) = value {
            for parsed in parse_header(value) {
                tagged.push(TaggedAddress { role, parsed });
            }
        }
    }

    tagged
}

/// A message counts as sent when the account owner appears in `From`.
pub fn is_sent_by_self(tagged: &[TaggedAddress], self_address: &str) -> bool {
    tagged
        .iter()
        .any(|t| t.role == Role::From && t.parsed.address == self_address)
}

/// The counter increment one role occurrence contributes.
pub fn role_delta(role: Role, sent_by_self: bool) -> StatDelta {
    let mut delta = StatDelta::default();
    match role {
        Role::To if sent_by_self => delta.emails_to = 1,
        Role::From if !sent_by_self => delta.emails_from = 1,
        Role::Cc => delta.emails_included = 1,
        _ => {}
    }
    delta
}

/// Aggregate the update batch for one message from the surviving addresses
/// and the resolved entity maps. Two recipients at one company contribute
/// twice to the Company and Domain rows but once each to their own Contact
/// and EmailAddress rows.
pub fn build_delta_batch(
    kept: &[TaggedAddress],
    sent_by_self: bool,
    domain_map: &HashMap<String, Uuid>,
    email_map: &HashMap<String, EmailRecord>,
    message_date: DateTime<Utc>,
    thread_ref: ThreadRef,
) -> DeltaBatch {
    let mut companies: HashMap<Uuid, StatDelta> = HashMap::new();
    let mut domains: HashMap<String, StatDelta> = HashMap::new();
    let mut contacts: HashMap<Uuid, StatDelta> = HashMap::new();
    let mut emails: HashMap<String, StatDelta> = HashMap::new();
    let mut contact_names: HashMap<Uuid, String> = HashMap::new();
    let mut email_names: HashMap<String, String> = HashMap::new();

    for tagged in kept {
        let address = &tagged.parsed.address;
        let Some(record) = email_map.get(address) else {
            log::error!("address {} missing from resolved email map", address);
            continue;
        };
        let Some(&company_id) = domain_map.get(&tagged.parsed.domain) else {
            log::error!(
                "domain {} missing from resolved domain map",
                tagged.parsed.domain
            );
            continue;
        };

        let delta = role_delta(tagged.role, sent_by_self);
        companies.entry(company_id).or_default().add(delta);
        domains
            .entry(tagged.parsed.domain.clone())
            .or_default()
            .add(delta);
        contacts.entry(record.contact_id).or_default().add(delta);
        emails.entry(address.clone()).or_default().add(delta);

        if let Some(name) = &tagged.parsed.name {
            contact_names
                .entry(record.contact_id)
                .or_insert_with(|| name.clone());
            email_names
                .entry(address.clone())
                .or_insert_with(|| name.clone());
        }
    }

    let mut batch = DeltaBatch {
        message_date,
        thread_ref,
        companies: companies.into_iter().collect(),
        domains: domains.into_iter().collect(),
        contacts: contacts.into_iter().collect(),
        emails: emails.into_iter().collect(),
        contact_name_upgrades: contact_names.into_iter().collect(),
        email_name_upgrades: email_names.into_iter().collect(),
    };

    // Deterministic statement order; correctness does not depend on it.
    batch.companies.sort_by_key(|(id, _)| *id);
    batch.domains.sort_by(|(a, _), (b, _)| a.cmp(b));
    batch.contacts.sort_by_key(|(id, _)| *id);
    batch.emails.sort_by(|(a, _), (b, _)| a.cmp(b));

    batch
}

/// Consumes one fully fetched provider message and commits its mutations.
pub struct MessageProcessor<'a> {
    store: &'a EntityStore,
    blacklist: &'a BlacklistEngine,
}

impl<'a> MessageProcessor<'a> {
    pub fn new(store: &'a EntityStore, blacklist: &'a BlacklistEngine) -> Self {
        Self { store, blacklist }
    }

    /// Process one message: filter addresses, create missing entities in one
    /// insert batch, then commit the aggregated stat updates in one update
    /// batch. Returns the entity creation counts.
    pub async fn process(
        &self,
        account: &str,
        self_address: &str,
        message: &ProviderMessage,
    ) -> Result<ProcessOutcome, IngestError> {
        let message_date = resolve_message_date(&message.headers, message.internal_timestamp_ms);
        let tagged = extract_addresses(&message.headers);
        let sent_by_self = is_sent_by_self(&tagged, self_address);

        let mut kept = Vec::new();
        for tagged_address in tagged {
            if tagged_address.parsed.address == self_address {
                continue;
            }
            if self
                .blacklist
                .is_blacklisted(&tagged_address.parsed.address)
                .await?
            {
                log::trace!(
                    "message {}: excluded {}",
                    message.id,
                    tagged_address.parsed.address
                );
                continue;
            }
            kept.push(tagged_address);
        }

        if kept.is_empty() {
            return Ok(ProcessOutcome::default());
        }

        let mut unique_domains: Vec<String> = Vec::new();
        let mut unique_addresses: Vec<String> = Vec::new();
        for tagged_address in &kept {
            if !unique_domains.contains(&tagged_address.parsed.domain) {
                unique_domains.push(tagged_address.parsed.domain.clone());
            }
            if !unique_addresses.contains(&tagged_address.parsed.address) {
                unique_addresses.push(tagged_address.parsed.address.clone());
            }
        }

        let mut domain_map = self.store.fetch_domains(&unique_domains).await?;
        let mut email_map = self.store.fetch_emails(&unique_addresses).await?;

        let new_domains: Vec<String> = unique_domains
            .iter()
            .filter(|domain| !domain_map.contains_key(*domain))
            .cloned()
            .collect();
        let new_addresses: Vec<StagedAddress> = unique_addresses
            .iter()
            .filter(|address| !email_map.contains_key(*address))
            .map(|address| {
                // first occurrence carries the display name observed at
                // creation time
                let first = kept
                    .iter()
                    .find(|t| &t.parsed.address == address)
                    .expect("address came from kept");
                StagedAddress {
                    address: address.clone(),
                    domain: first.parsed.domain.clone(),
                    name: first.parsed.name.clone(),
                }
            })
            .collect();

        let insert = self
            .store
            .commit_insert_batch(&new_domains, &new_addresses)
            .await?;
        domain_map.extend(insert.domain_map);
        email_map.extend(insert.email_map);

        let thread_ref = ThreadRef {
            thread_id: message.thread_id.clone(),
            account: account.to_string(),
            timestamp: message_date,
        };
        let batch = build_delta_batch(
            &kept,
            sent_by_self,
            &domain_map,
            &email_map,
            message_date,
            thread_ref,
        );
        self.store.apply_deltas(&batch).await?;

        Ok(ProcessOutcome {
            companies_created: insert.companies_created,
            domains_created: insert.domains_created,
            contacts_created: insert.contacts_created,
            emails_created: insert.emails_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(from: &str, to: &str, cc: &str, date: &str) -> MessageHeaders {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        MessageHeaders {
            from: opt(from),
            to: opt(to),
            cc: opt(cc),
            date: opt(date),
        }
    }

    fn record(contact_id: Uuid, company_id: Uuid) -> EmailRecord {
        EmailRecord {
            contact_id,
            contact_name: None,
            company_id,
        }
    }

    fn thread_ref(date: DateTime<Utc>) -> ThreadRef {
        ThreadRef {
            thread_id: "t1".to_string(),
            account: "work".to_string(),
            timestamp: date,
        }
    }

    #[test]
    fn date_header_wins_over_internal_timestamp() {
        let h = headers("", "", "", "2024-03-01T10:00:00Z");
        let resolved = resolve_message_date(&h, 1_700_000_000_000);
        assert_eq!(resolved.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn unparseable_date_falls_back_to_internal_timestamp() {
        let h = headers("", "", "", "not a date");
        let resolved = resolve_message_date(&h, 1_709_287_200_000);
        assert_eq!(resolved.timestamp_millis(), 1_709_287_200_000);

        let h = headers("", "", "", "");
        let resolved = resolve_message_date(&h, 1_709_287_200_000);
        assert_eq!(resolved.timestamp_millis(), 1_709_287_200_000);
    }

    #[test]
    fn extracts_and_tags_all_roles() {
        let h = headers(
            "\"Jane Roe\" <jane@beta.io>",
            "me@acme.com, bob@beta.io",
            "carol@gamma.dev",
            "",
        );
        let tagged = extract_addresses(&h);

        let summary: Vec<(Role, &str)> = tagged
            .iter()
            .map(|t| (t.role, t.parsed.address.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Role::From, "jane@beta.io"),
                (Role::To, "me@acme.com"),
                (Role::To, "bob@beta.io"),
                (Role::Cc, "carol@gamma.dev"),
            ]
        );
    }

    #[test]
    fn classifies_direction_from_self_address() {
        let inbound = extract_addresses(&headers("jane@beta.io", "me@acme.com", "", ""));
        assert!(!is_sent_by_self(&inbound, "me@acme.com"));

        let outbound = extract_addresses(&headers("me@acme.com", "jane@beta.io", "", ""));
        assert!(is_sent_by_self(&outbound, "me@acme.com"));
    }

    #[test]
    fn role_deltas_follow_direction() {
        assert_eq!(
            role_delta(Role::From, false),
            StatDelta {
                emails_from: 1,
                ..Default::default()
            }
        );
        assert_eq!(role_delta(Role::From, true), StatDelta::default());
        assert_eq!(
            role_delta(Role::To, true),
            StatDelta {
                emails_to: 1,
                ..Default::default()
            }
        );
        assert_eq!(role_delta(Role::To, false), StatDelta::default());
        assert_eq!(
            role_delta(Role::Cc, true),
            StatDelta {
                emails_included: 1,
                ..Default::default()
            }
        );
        assert_eq!(
            role_delta(Role::Cc, false),
            StatDelta {
                emails_included: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn single_inbound_message_counts_one_from_everywhere() {
        // one inbound message from a named sender
        let date = "2024-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let kept = extract_addresses(&headers("\"Jane Roe\" <jane@beta.io>", "", "", ""));

        let company_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();
        let domain_map = HashMap::from([("beta.io".to_string(), company_id)]);
        let email_map =
            HashMap::from([("jane@beta.io".to_string(), record(contact_id, company_id))]);

        let batch = build_delta_batch(&kept, false, &domain_map, &email_map, date, thread_ref(date));

        let expected = StatDelta {
            emails_from: 1,
            ..Default::default()
        };
        assert_eq!(batch.companies, vec![(company_id, expected)]);
        assert_eq!(batch.domains, vec![("beta.io".to_string(), expected)]);
        assert_eq!(batch.contacts, vec![(contact_id, expected)]);
        assert_eq!(batch.emails, vec![("jane@beta.io".to_string(), expected)]);
        assert_eq!(
            batch.contact_name_upgrades,
            vec![(contact_id, "Jane Roe".to_string())]
        );
        assert_eq!(
            batch.email_name_upgrades,
            vec![("jane@beta.io".to_string(), "Jane Roe".to_string())]
        );
    }

    #[test]
    fn two_recipients_at_one_company_count_twice_at_the_rollup() {
        let date = "2024-03-02T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let kept = extract_addresses(&headers("", "a@beta.io, b@beta.io", "", ""));

        let company_id = Uuid::new_v4();
        let contact_a = Uuid::new_v4();
        let contact_b = Uuid::new_v4();
        let domain_map = HashMap::from([("beta.io".to_string(), company_id)]);
        let email_map = HashMap::from([
            ("a@beta.io".to_string(), record(contact_a, company_id)),
            ("b@beta.io".to_string(), record(contact_b, company_id)),
        ]);

        let batch = build_delta_batch(&kept, true, &domain_map, &email_map, date, thread_ref(date));

        let two_to = StatDelta {
            emails_to: 2,
            ..Default::default()
        };
        let one_to = StatDelta {
            emails_to: 1,
            ..Default::default()
        };
        assert_eq!(batch.companies, vec![(company_id, two_to)]);
        assert_eq!(batch.domains, vec![("beta.io".to_string(), two_to)]);

        let mut contact_deltas = batch.contacts.clone();
        contact_deltas.sort_by_key(|(id, _)| *id);
        let mut expected = vec![(contact_a, one_to), (contact_b, one_to)];
        expected.sort_by_key(|(id, _)| *id);
        assert_eq!(contact_deltas, expected);

        assert_eq!(
            batch.emails,
            vec![
                ("a@beta.io".to_string(), one_to),
                ("b@beta.io".to_string(), one_to),
            ]
        );
    }

    #[test]
    fn co_recipient_of_inbound_message_is_tracked_with_zero_counters() {
        let date = "2024-03-03T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        // inbound: jane sent it to me and to bob
        let kept: Vec<TaggedAddress> =
            extract_addresses(&headers("jane@beta.io", "bob@gamma.dev", "", ""));

        let beta = Uuid::new_v4();
        let gamma = Uuid::new_v4();
        let jane_contact = Uuid::new_v4();
        let bob_contact = Uuid::new_v4();
        let domain_map = HashMap::from([
            ("beta.io".to_string(), beta),
            ("gamma.dev".to_string(), gamma),
        ]);
        let email_map = HashMap::from([
            ("jane@beta.io".to_string(), record(jane_contact, beta)),
            ("bob@gamma.dev".to_string(), record(bob_contact, gamma)),
        ]);

        let batch = build_delta_batch(&kept, false, &domain_map, &email_map, date, thread_ref(date));

        // bob's entities appear with zero counters so first/last-seen and
        // the thread index still advance
        let zero = StatDelta::default();
        assert!(batch
            .emails
            .contains(&("bob@gamma.dev".to_string(), zero)));
        assert!(batch.contacts.contains(&(bob_contact, zero)));

        let one_from = StatDelta {
            emails_from: 1,
            ..Default::default()
        };
        assert!(batch
            .emails
            .contains(&("jane@beta.io".to_string(), one_from)));
    }

    #[test]
    fn address_in_to_and_cc_aggregates_both_roles() {
        let date = "2024-03-04T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let kept = extract_addresses(&headers("", "a@beta.io", "a@beta.io", ""));

        let company_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();
        let domain_map = HashMap::from([("beta.io".to_string(), company_id)]);
        let email_map = HashMap::from([("a@beta.io".to_string(), record(contact_id, company_id))]);

        let batch = build_delta_batch(&kept, true, &domain_map, &email_map, date, thread_ref(date));

        let combined = StatDelta {
            emails_to: 1,
            emails_included: 1,
            ..Default::default()
        };
        assert_eq!(batch.emails, vec![("a@beta.io".to_string(), combined)]);
        assert_eq!(batch.contacts, vec![(contact_id, combined)]);
    }
}
