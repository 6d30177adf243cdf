use crate::infra::{seed_actions, stage_registry, EMAIL_OPEN, FORM_SUBMIT, PAGE_HIT};
use clap::Args;
use lead_stages::error::AppError;
use lead_stages::workflows::profiles::{Network, ProfileEnricher};
use lead_stages::workflows::stages::{
    ActionType, EngineConfig, EngineError, InMemoryStageStore, Lead, LeadId, MemorySession,
    RegistryError, SessionStore, StageService, TimelineFilter, TriggerEvent, TriggerOutcome,
    VisitorContext,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Lead id the scripted visitor is tracked as.
    #[arg(long, default_value_t = 1)]
    pub(crate) lead_id: u64,
    /// Skip the social profile enrichment step.
    #[arg(long)]
    pub(crate) skip_profile: bool,
    /// Print the final timeline as JSON instead of a table.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Anonymous browser session replayed by the demo.
struct DemoVisitor {
    store: InMemoryStageStore,
    lead_id: LeadId,
    session: MemorySession,
}

impl VisitorContext for DemoVisitor {
    fn is_anonymous(&self) -> bool {
        true
    }

    fn current_lead(&self) -> Option<Lead> {
        self.store.lead(self.lead_id)
    }

    fn origin(&self) -> Option<String> {
        Some("198.51.100.24".to_string())
    }

    fn session(&self) -> &dyn SessionStore {
        &self.session
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        lead_id,
        skip_profile,
        json: as_json,
    } = args;
    let lead_id = LeadId(lead_id);

    let store = InMemoryStageStore::new();
    seed_actions(&store)?;
    let mut lead = Lead::new(lead_id);
    lead.fields
        .insert("email".to_string(), "ada@example.com".to_string());
    store.insert_lead(lead);

    let shared = Arc::new(store.clone());
    let service = StageService::new(
        Arc::new(stage_registry()),
        shared.clone(),
        shared.clone(),
        shared.clone(),
        EngineConfig::default(),
    );

    println!("Stage actions");
    for choice in service.choices()? {
        println!(
            "  - {:<12} {:<16} [{}]",
            choice.action_type.as_str(),
            choice.label,
            choice.group
        );
    }

    let visitor = DemoVisitor {
        store: store.clone(),
        lead_id,
        session: MemorySession::default(),
    };

    let script = [
        ("Landing page view", PAGE_HIT, Some("hit-1"), Value::Null),
        ("Reload of the same hit", PAGE_HIT, Some("hit-1"), Value::Null),
        ("Newsletter form", FORM_SUBMIT, Some("form-1"), json!({ "form_id": 12 })),
        ("Demo request form", FORM_SUBMIT, Some("form-2"), json!({ "form_id": 42 })),
        ("Welcome email opened", EMAIL_OPEN, None, json!({ "email_id": 7 })),
    ];

    println!("\nVisitor session for lead {lead_id}");
    for (step, raw_type, correlation, context) in script {
        let action_type = ActionType::new(raw_type)
            .map_err(|err| RegistryError::Registrant(err.to_string()))?;
        let mut event = TriggerEvent::new(action_type).with_context(context);
        if let Some(correlation) = correlation {
            event = event.with_correlation(correlation);
        }

        match service.trigger(event, None, &visitor)? {
            TriggerOutcome::Skipped(reason) => {
                println!("  {step:<24} skipped ({reason:?})");
            }
            TriggerOutcome::Applied(report) if report.fired.is_empty() => {
                println!(
                    "  {step:<24} no change ({} candidate(s) evaluated)",
                    report.evaluated
                );
            }
            TriggerOutcome::Applied(report) => {
                for fired in &report.fired {
                    println!("  {step:<24} {:+} via '{}'", fired.delta, fired.name);
                }
                println!("  {:<24} stage score now {}", "", report.lead.stage_score);
            }
        }
    }

    let timeline = service
        .timeline(lead_id, &TimelineFilter::default())
        .map_err(EngineError::from)?;
    if as_json {
        match serde_json::to_string_pretty(&timeline) {
            Ok(payload) => println!("\nTimeline payload:\n{payload}"),
            Err(err) => println!("\nTimeline payload unavailable: {err}"),
        }
    } else {
        println!("\nTimeline (newest first)");
        for event in &timeline.events {
            println!(
                "  {} {:<28} {:+}",
                event.timestamp.format("%H:%M:%S"),
                event.action_name,
                event.delta
            );
        }
    }

    if skip_profile {
        return Ok(());
    }

    println!("\nSocial profile enrichment");
    let enricher = ProfileEnricher::new(shared, ["email"]);
    let outcome = enricher.upsert_value(
        Network::Facebook,
        &json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "link": "https://www.facebook.com/ada.lovelace",
            "locale": "en_GB",
        }),
    )?;
    let verb = if outcome.created { "created" } else { "updated" };
    println!("  {verb} lead {} from a facebook profile", outcome.lead.id);
    for (field, value) in &outcome.lead.fields {
        println!("    {field:<10} {value}");
    }

    Ok(())
}
