use lead_stages::config::AppConfig;
use lead_stages::workflows::profiles::ProfileEnricher;
use lead_stages::workflows::stages::{
    names, ActionDefinition, ActionId, ActionRegistration, ActionRegistry, ActionType,
    BoundArguments, CatalogBuilder, EngineConfig, FnHandler, HandlerError, HandlerTable,
    InMemoryStageStore, RegistryError, StageService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type MemoryStageService =
    StageService<InMemoryStageStore, InMemoryStageStore, InMemoryStageStore>;

pub(crate) const PAGE_HIT: &str = "page.hit";
pub(crate) const FORM_SUBMIT: &str = "form.submit";
pub(crate) const EMAIL_OPEN: &str = "email.open";

const MATCHING_ASSET: &str = "stages.matching_asset";

/// Fires when the trigger context names the asset the action is configured
/// for, or when the action is not tied to one.
fn matching_asset(key: &'static str) -> impl Fn(&BoundArguments<'_, '_>) -> Result<i64, HandlerError> {
    move |args| {
        let action = args
            .action()
            .ok_or(HandlerError::MissingArgument(names::ACTION))?;
        let Some(expected) = action.properties.get(key) else {
            return Ok(action.delta);
        };
        let actual = args.context().and_then(|context| context.get(key));
        Ok(if actual == Some(expected) { action.delta } else { 0 })
    }
}

fn action_type(raw: &str) -> Result<ActionType, RegistryError> {
    ActionType::new(raw).map_err(|err| RegistryError::Registrant(err.to_string()))
}

pub(crate) fn stage_registry() -> ActionRegistry {
    let mut handlers = HandlerTable::new();
    handlers.register(
        MATCHING_ASSET,
        FnHandler::shared(&[names::ACTION, names::CONTEXT], matching_asset("form_id")),
    );

    ActionRegistry::new(handlers)
        .with_registrant(
            |builder: &mut CatalogBuilder<'_>| -> Result<(), RegistryError> {
                builder.add(ActionRegistration::new(action_type(PAGE_HIT)?, "Visits a page"))
            },
        )
        .with_registrant(
            |builder: &mut CatalogBuilder<'_>| -> Result<(), RegistryError> {
                builder.add(
                    ActionRegistration::new(action_type(FORM_SUBMIT)?, "Submits a form")
                        .with_named_handler(MATCHING_ASSET),
                )
            },
        )
        .with_registrant(
            |builder: &mut CatalogBuilder<'_>| -> Result<(), RegistryError> {
                builder.add(
                    ActionRegistration::new(action_type(EMAIL_OPEN)?, "Opens an email")
                        .with_group("email")
                        .with_handler(FnHandler::shared(
                            &[names::ACTION, names::CONTEXT],
                            matching_asset("email_id"),
                        )),
                )
            },
        )
}

fn demo_action(
    id: u64,
    raw_type: &str,
    name: &str,
    delta: i64,
    properties: Value,
) -> Result<ActionDefinition, RegistryError> {
    let properties: BTreeMap<String, Value> = match properties {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };
    Ok(ActionDefinition {
        id: ActionId(id),
        action_type: action_type(raw_type)?,
        name: name.to_string(),
        properties,
        delta,
        published: true,
    })
}

/// Published actions the service starts with.
pub(crate) fn seed_actions(store: &InMemoryStageStore) -> Result<(), RegistryError> {
    let actions = [
        demo_action(1, PAGE_HIT, "Visited the site", 1, json!({}))?,
        demo_action(2, FORM_SUBMIT, "Requested a demo", 10, json!({ "form_id": 42 }))?,
        demo_action(3, EMAIL_OPEN, "Opened the welcome email", 3, json!({ "email_id": 7 }))?,
    ];
    for action in actions {
        store.insert_action(action);
    }
    Ok(())
}

pub(crate) fn build_stage_service(
    config: &AppConfig,
    store: &InMemoryStageStore,
) -> Arc<MemoryStageService> {
    let shared = Arc::new(store.clone());
    Arc::new(
        StageService::new(
            Arc::new(stage_registry()),
            shared.clone(),
            shared.clone(),
            shared,
            EngineConfig::from_app(config),
        )
        .with_session_idle_ttl(config.stages.session_idle_ttl),
    )
}

pub(crate) fn build_profile_enricher(
    config: &AppConfig,
    store: &InMemoryStageStore,
) -> Arc<ProfileEnricher<InMemoryStageStore>> {
    Arc::new(ProfileEnricher::new(
        Arc::new(store.clone()),
        config.profiles.unique_fields.iter().cloned(),
    ))
}
