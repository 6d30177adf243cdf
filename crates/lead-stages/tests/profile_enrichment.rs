use std::collections::BTreeMap;
use std::sync::Arc;

use lead_stages::workflows::profiles::{social_handle, Network, ProfileEnricher, ProfileError};
use lead_stages::workflows::stages::{
    ActionDefinition, ActionId, ActionRegistration, ActionRegistry, ActionType, CatalogBuilder,
    EngineConfig, InMemoryStageStore, Lead, LeadId, MemorySession, RegistryError, SessionStore,
    StageService, TriggerEvent, TriggerOutcome, VisitorContext,
};

fn enricher(store: &InMemoryStageStore, unique: &[&str]) -> ProfileEnricher<InMemoryStageStore> {
    ProfileEnricher::new(Arc::new(store.clone()), unique.iter().copied())
}

#[test]
fn any_unique_field_identifies_the_existing_lead() {
    let store = InMemoryStageStore::new();
    let mut known = Lead::new(LeadId(5));
    known.fields.insert(
        "facebook".to_string(),
        "facebook (https://www.facebook.com/ada)".to_string(),
    );
    known
        .fields
        .insert("email".to_string(), "old@example.com".to_string());
    store.insert_lead(known);

    let outcome = enricher(&store, &["email", "facebook"])
        .upsert(
            Network::Facebook,
            r#"{
                "first_name": "Ada",
                "email": "ada@example.com",
                "link": "https://www.facebook.com/ada"
            }"#,
        )
        .expect("upsert succeeds");

    assert!(!outcome.created);
    assert_eq!(outcome.updated, 1);
    let lead = store.lead(LeadId(5)).expect("lead kept");
    assert_eq!(lead.fields["email"], "ada@example.com");
    assert_eq!(lead.fields["firstname"], "Ada");
    assert_eq!(lead.fields["profileHandle"], "ada");
    assert!(!lead.fields.contains_key("profileImage"), "payload carried no id");
}

#[test]
fn blank_unique_values_never_match() {
    let store = InMemoryStageStore::new();
    let mut blank = Lead::new(LeadId(1));
    blank.fields.insert("email".to_string(), String::new());
    store.insert_lead(blank);

    let outcome = enricher(&store, &["email"])
        .upsert(Network::GooglePlus, r#"{"displayName": "Anonymous"}"#)
        .expect("upsert succeeds");

    assert!(outcome.created);
    assert_eq!(outcome.lead.id, LeadId(2));
    assert_eq!(outcome.lead.fields["displayName"], "Anonymous");
}

#[test]
fn unknown_networks_are_rejected_before_mapping() {
    assert!(matches!(
        "orkut".parse::<Network>(),
        Err(ProfileError::UnknownNetwork(name)) if name == "orkut"
    ));
    assert_eq!(
        social_handle("https://www.linkedin.com/in/grace-hopper"),
        Some(("linkedin", "grace-hopper".to_string()))
    );
}

struct Returning {
    lead: Option<Lead>,
    session: MemorySession,
}

impl VisitorContext for Returning {
    fn is_anonymous(&self) -> bool {
        true
    }

    fn current_lead(&self) -> Option<Lead> {
        self.lead.clone()
    }

    fn origin(&self) -> Option<String> {
        None
    }

    fn session(&self) -> &dyn SessionStore {
        &self.session
    }
}

#[test]
fn enriched_lead_engages_stage_actions() {
    let store = InMemoryStageStore::new();
    let page_hit = ActionType::new("page.hit").expect("valid action type");
    store.insert_action(ActionDefinition {
        id: ActionId(1),
        action_type: page_hit.clone(),
        name: "Visited the site".to_string(),
        properties: BTreeMap::new(),
        delta: 4,
        published: true,
    });

    let outcome = enricher(&store, &["email"])
        .upsert(
            Network::GooglePlus,
            r#"{"name": {"givenName": "Grace"}, "emails": [{"type": "account", "value": "grace@example.com"}]}"#,
        )
        .expect("upsert succeeds");

    let registry = ActionRegistry::default().with_registrant(
        |builder: &mut CatalogBuilder<'_>| -> Result<(), RegistryError> {
            builder.add(ActionRegistration::new(
                ActionType::new("page.hit").map_err(|err| RegistryError::Registrant(err.to_string()))?,
                "Visits a page",
            ))
        },
    );
    let shared = Arc::new(store.clone());
    let service = StageService::new(
        Arc::new(registry),
        shared.clone(),
        shared.clone(),
        shared,
        EngineConfig::default(),
    );

    let visitor = Returning {
        lead: None,
        session: MemorySession::default(),
    };
    let result = service
        .trigger(TriggerEvent::new(page_hit), Some(outcome.lead.id), &visitor)
        .expect("trigger succeeds");

    let TriggerOutcome::Applied(report) = result else {
        panic!("expected applied outcome, got {result:?}");
    };
    assert_eq!(report.lead.stage_score, 4);
    let stored = store.lead(outcome.lead.id).expect("lead stored");
    assert_eq!(stored.fields["firstname"], "Grace");
    assert_eq!(stored.stage_score, 4);
}
