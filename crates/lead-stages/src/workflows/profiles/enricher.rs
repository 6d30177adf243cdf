use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::mapper::ProfileMapper;
use super::tables::Network;
use super::ProfileError;
use crate::workflows::stages::domain::Lead;
use crate::workflows::stages::repository::LeadDirectory;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentOutcome {
    pub lead: Lead,
    pub created: bool,
    /// Existing leads that matched on a unique field and were updated.
    pub updated: usize,
}

/// Creates or updates leads from social profile payloads.
pub struct ProfileEnricher<D: ?Sized> {
    directory: Arc<D>,
    unique_fields: BTreeSet<String>,
}

impl<D> ProfileEnricher<D>
where
    D: LeadDirectory + ?Sized,
{
    pub fn new<I, S>(directory: Arc<D>, unique_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory,
            unique_fields: unique_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a raw JSON profile and upsert the lead it describes.
    pub fn upsert(&self, network: Network, raw: &str) -> Result<EnrichmentOutcome, ProfileError> {
        let profile: Value = serde_json::from_str(raw)?;
        self.upsert_value(network, &profile)
    }

    pub fn upsert_value(
        &self,
        network: Network,
        profile: &Value,
    ) -> Result<EnrichmentOutcome, ProfileError> {
        let matched = ProfileMapper::new(network).match_up(profile)?;
        let unique = self.unique_values(&matched);

        let existing = if unique.is_empty() {
            Vec::new()
        } else {
            self.directory.find_by_unique_fields(&unique)?
        };
        let updated = existing.len();

        let mut first = None;
        for mut candidate in existing {
            candidate.set_field_values(&matched);
            self.directory.save(&candidate)?;
            first.get_or_insert(candidate);
        }

        let (mut lead, created) = match first {
            Some(lead) => (lead, false),
            None => (self.directory.create()?, true),
        };

        lead.set_field_values(&matched);
        lead.last_active = Some(Utc::now());
        self.directory.save(&lead)?;

        if created {
            info!(%network, lead_id = %lead.id, "created lead from social profile");
        } else {
            debug!(%network, lead_id = %lead.id, updated, "merged social profile into existing leads");
        }

        Ok(EnrichmentOutcome {
            lead,
            created,
            updated,
        })
    }

    fn unique_values(&self, matched: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        matched
            .iter()
            .filter(|(field, value)| self.unique_fields.contains(*field) && !value.trim().is_empty())
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::stages::domain::LeadId;
    use crate::workflows::stages::memory::InMemoryStageStore;

    fn enricher(store: &InMemoryStageStore) -> ProfileEnricher<InMemoryStageStore> {
        ProfileEnricher::new(Arc::new(store.clone()), ["email"])
    }

    #[test]
    fn creates_lead_when_no_unique_field_matches() {
        let store = InMemoryStageStore::new();
        store.insert_lead(Lead::new(LeadId(3)));

        let outcome = enricher(&store)
            .upsert(
                Network::Facebook,
                r#"{"first_name":"Ada","email":"ada@example.com"}"#,
            )
            .expect("upsert");

        assert!(outcome.created);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.lead.id, LeadId(4));
        assert!(outcome.lead.last_active.is_some());
        let saved = store.lead(LeadId(4)).expect("lead saved");
        assert_eq!(saved.fields.get("firstname").map(String::as_str), Some("Ada"));
        assert!(!saved.fields.contains_key("gender"), "blank values are not stored");
    }

    #[test]
    fn updates_every_match_and_returns_the_first() {
        let store = InMemoryStageStore::new();
        for id in [1, 2] {
            let mut lead = Lead::new(LeadId(id));
            lead.fields.insert("email".to_string(), "ada@example.com".to_string());
            store.insert_lead(lead);
        }

        let outcome = enricher(&store)
            .upsert(
                Network::Facebook,
                r#"{"last_name":"Lovelace","email":"ada@example.com"}"#,
            )
            .expect("upsert");

        assert!(!outcome.created);
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.lead.id, LeadId(1));
        for id in [1, 2] {
            let lead = store.lead(LeadId(id)).expect("lead");
            assert_eq!(lead.fields.get("lastname").map(String::as_str), Some("Lovelace"));
        }
        assert!(store.lead(LeadId(1)).expect("lead").last_active.is_some());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let store = InMemoryStageStore::new();
        assert!(matches!(
            enricher(&store).upsert(Network::GooglePlus, "{not json"),
            Err(ProfileError::Parse(_))
        ));
        assert!(matches!(
            enricher(&store).upsert(Network::GooglePlus, "42"),
            Err(ProfileError::NotAnObject)
        ));
    }
}
