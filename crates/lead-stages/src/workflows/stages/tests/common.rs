use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::config::AppEnvironment;
use crate::workflows::stages::binding::{names, FnHandler, HandlerError, StageActionHandler};
use crate::workflows::stages::dedup::{MemorySession, SessionStore};
use crate::workflows::stages::domain::{
    ActionDefinition, ActionId, ActionType, CompletionInsert, CompletionRecord, Lead, LeadId,
    StageLogEntry, TriggerEvent,
};
use crate::workflows::stages::engine::{EngagementEngine, EngineConfig, VisitorContext};
use crate::workflows::stages::memory::InMemoryStageStore;
use crate::workflows::stages::registry::{
    ActionRegistration, ActionRegistry, CatalogBuilder, RegistryError,
};
use crate::workflows::stages::repository::{
    ActionRepository, LeadRepository, RepositoryError, StageLogRepository,
};
use crate::workflows::stages::service::StageService;

pub(super) const PAGE_HIT: &str = "page.hit";
pub(super) const FORM_SUBMIT: &str = "form.submit";

pub(super) fn action_type(raw: &str) -> ActionType {
    ActionType::new(raw).expect("valid action type")
}

pub(super) fn action(id: u64, raw_type: &str, name: &str, delta: i64) -> ActionDefinition {
    ActionDefinition {
        id: ActionId(id),
        action_type: action_type(raw_type),
        name: name.to_string(),
        properties: BTreeMap::new(),
        delta,
        published: true,
    }
}

pub(super) fn event(raw_type: &str) -> TriggerEvent {
    TriggerEvent::new(action_type(raw_type))
}

pub(super) fn production() -> EngineConfig {
    EngineConfig::default()
}

pub(super) fn development() -> EngineConfig {
    EngineConfig {
        environment: AppEnvironment::Development,
        dedup_in_all_environments: false,
    }
}

/// Handler firing `delta` when the action's name matches, and counting calls.
pub(super) struct ScriptedHandler {
    fires_for: BTreeSet<String>,
    delta: i64,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub(super) fn new(fires_for: &[&str], delta: i64) -> Arc<Self> {
        Arc::new(Self {
            fires_for: fires_for.iter().map(|name| name.to_string()).collect(),
            delta,
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

const SCRIPTED_PARAMETERS: &[&str] = &[names::ACTION];

impl StageActionHandler for ScriptedHandler {
    fn parameters(&self) -> &[&'static str] {
        SCRIPTED_PARAMETERS
    }

    fn invoke(
        &self,
        args: &crate::workflows::stages::binding::BoundArguments<'_, '_>,
    ) -> Result<i64, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let action = args
            .action()
            .ok_or(HandlerError::MissingArgument(names::ACTION))?;
        Ok(if self.fires_for.contains(&action.name) {
            self.delta
        } else {
            0
        })
    }
}

pub(super) fn failing_handler() -> Arc<dyn StageActionHandler> {
    FnHandler::shared(&[names::ACTION], |args| match args.action() {
        Some(action) if action.name == "Broken" => {
            Err(HandlerError::Failed("scoring backend offline".to_string()))
        }
        Some(action) => Ok(action.delta),
        None => Err(HandlerError::MissingArgument(names::ACTION)),
    })
}

pub(super) fn registry_with(
    action_type_raw: &'static str,
    handler: Option<Arc<dyn StageActionHandler>>,
) -> Arc<ActionRegistry> {
    let registry = ActionRegistry::default().with_registrant(
        move |builder: &mut CatalogBuilder<'_>| -> Result<(), RegistryError> {
            let mut registration =
                ActionRegistration::new(action_type(action_type_raw), "Visits a page");
            if let Some(handler) = handler.clone() {
                registration = registration.with_handler(handler);
            }
            builder.add(registration)
        },
    );
    Arc::new(registry)
}

pub(super) type MemoryEngine =
    EngagementEngine<InMemoryStageStore, InMemoryStageStore, InMemoryStageStore>;

pub(super) fn build_engine(
    registry: Arc<ActionRegistry>,
    store: &InMemoryStageStore,
    config: EngineConfig,
) -> MemoryEngine {
    let shared = Arc::new(store.clone());
    EngagementEngine::new(registry, shared.clone(), shared.clone(), shared, config)
}

pub(super) type MemoryService =
    StageService<InMemoryStageStore, InMemoryStageStore, InMemoryStageStore>;

pub(super) fn build_service(store: &InMemoryStageStore) -> MemoryService {
    let registry = registry_with(PAGE_HIT, Some(ScriptedHandler::new(&["Pricing"], 5)));
    let shared = Arc::new(store.clone());
    StageService::new(
        registry,
        shared.clone(),
        shared.clone(),
        shared,
        production(),
    )
}

/// Seeds the `page.hit` pair used across scenarios: `Pricing` fires, `Blog` never does.
pub(super) fn seeded_store() -> InMemoryStageStore {
    let store = InMemoryStageStore::new();
    store.insert_action(action(1, PAGE_HIT, "Pricing", 5));
    store.insert_action(action(2, PAGE_HIT, "Blog", 3));
    store.insert_lead(Lead::new(LeadId(7)));
    store
}

pub(super) struct TestVisitor {
    pub(super) anonymous: bool,
    pub(super) lead: Option<Lead>,
    pub(super) origin: Option<String>,
    pub(super) session: MemorySession,
}

impl TestVisitor {
    pub(super) fn anonymous(lead: Option<Lead>) -> Self {
        Self {
            anonymous: true,
            lead,
            origin: Some("203.0.113.9".to_string()),
            session: MemorySession::default(),
        }
    }

    pub(super) fn authenticated(lead: Option<Lead>) -> Self {
        Self {
            anonymous: false,
            ..Self::anonymous(lead)
        }
    }
}

impl VisitorContext for TestVisitor {
    fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    fn current_lead(&self) -> Option<Lead> {
        self.lead.clone()
    }

    fn origin(&self) -> Option<String> {
        self.origin.clone()
    }

    fn session(&self) -> &dyn SessionStore {
        &self.session
    }
}

/// Store whose completion writes can be steered to fail or collide.
pub(super) struct SteeredCompletions {
    pub(super) inner: InMemoryStageStore,
    pub(super) mode: CompletionMode,
    pub(super) writes: Mutex<Vec<CompletionRecord>>,
}

#[derive(Debug, Clone, Copy)]
pub(super) enum CompletionMode {
    AlreadyRecorded,
    Unavailable,
}

impl SteeredCompletions {
    pub(super) fn new(inner: InMemoryStageStore, mode: CompletionMode) -> Self {
        Self {
            inner,
            mode,
            writes: Mutex::new(Vec::new()),
        }
    }
}

impl ActionRepository for SteeredCompletions {
    fn published_by_type(
        &self,
        action_type: &ActionType,
    ) -> Result<Vec<ActionDefinition>, RepositoryError> {
        self.inner.published_by_type(action_type)
    }

    fn completed_action_ids(
        &self,
        action_type: &ActionType,
        lead_id: LeadId,
    ) -> Result<BTreeSet<ActionId>, RepositoryError> {
        self.inner.completed_action_ids(action_type, lead_id)
    }

    fn record_completion(
        &self,
        record: CompletionRecord,
    ) -> Result<CompletionInsert, RepositoryError> {
        self.writes
            .lock()
            .expect("completion mutex poisoned")
            .push(record);
        match self.mode {
            CompletionMode::AlreadyRecorded => Ok(CompletionInsert::AlreadyRecorded),
            CompletionMode::Unavailable => {
                Err(RepositoryError::Unavailable("database offline".to_string()))
            }
        }
    }

    fn reassign_completions(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError> {
        self.inner.reassign_completions(from, to)
    }
}

/// Which end-of-trigger write refuses to persist.
#[derive(Debug, Clone, Copy)]
pub(super) enum FlushFailure {
    LeadSave,
    LogAppend,
}

/// Reads pass through to the inner store; one of the flush writes fails.
pub(super) struct FailingFlush {
    pub(super) inner: InMemoryStageStore,
    pub(super) failure: FlushFailure,
}

impl LeadRepository for FailingFlush {
    fn fetch(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        LeadRepository::fetch(&self.inner, id)
    }

    fn save(&self, lead: &Lead) -> Result<(), RepositoryError> {
        match self.failure {
            FlushFailure::LeadSave => {
                Err(RepositoryError::Unavailable("lead table locked".to_string()))
            }
            FlushFailure::LogAppend => LeadRepository::save(&self.inner, lead),
        }
    }
}

impl StageLogRepository for FailingFlush {
    fn append_batch(&self, entries: Vec<StageLogEntry>) -> Result<(), RepositoryError> {
        match self.failure {
            FlushFailure::LogAppend => {
                Err(RepositoryError::Unavailable("log volume full".to_string()))
            }
            FlushFailure::LeadSave => self.inner.append_batch(entries),
        }
    }

    fn for_lead(&self, lead_id: LeadId) -> Result<Vec<StageLogEntry>, RepositoryError> {
        self.inner.for_lead(lead_id)
    }

    fn reassign_lead(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError> {
        self.inner.reassign_lead(from, to)
    }
}

pub(super) fn flush_failing_engine(
    store: &InMemoryStageStore,
    failure: FlushFailure,
) -> EngagementEngine<InMemoryStageStore, FailingFlush, FailingFlush> {
    let writes = Arc::new(FailingFlush {
        inner: store.clone(),
        failure,
    });
    EngagementEngine::new(
        registry_with(PAGE_HIT, Some(ScriptedHandler::new(&["Pricing"], 5))),
        Arc::new(store.clone()),
        writes.clone(),
        writes,
        production(),
    )
}

/// Every call fails as if storage were down.
pub(super) struct UnavailableStore;

impl ActionRepository for UnavailableStore {
    fn published_by_type(
        &self,
        _action_type: &ActionType,
    ) -> Result<Vec<ActionDefinition>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn completed_action_ids(
        &self,
        _action_type: &ActionType,
        _lead_id: LeadId,
    ) -> Result<BTreeSet<ActionId>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn record_completion(
        &self,
        _record: CompletionRecord,
    ) -> Result<CompletionInsert, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn reassign_completions(&self, _from: LeadId, _to: LeadId) -> Result<usize, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl LeadRepository for UnavailableStore {
    fn fetch(&self, _id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save(&self, _lead: &Lead) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl StageLogRepository for UnavailableStore {
    fn append_batch(&self, _entries: Vec<StageLogEntry>) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn for_lead(&self, _lead_id: LeadId) -> Result<Vec<StageLogEntry>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn reassign_lead(&self, _from: LeadId, _to: LeadId) -> Result<usize, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
