//! Stage engagement: action registry, trigger engine, and session
//! de-duplication, plus the lead timeline and HTTP routes built on them.

pub mod binding;
pub mod dedup;
pub mod domain;
pub mod engine;
pub mod memory;
pub mod registry;
pub mod repository;
pub mod router;
pub mod service;
pub mod timeline;

#[cfg(test)]
mod tests;

pub use binding::{
    names, ArgumentBag, ArgumentValue, Bound, BoundArguments, DefaultEngagementHandler,
    EngagementLedger, FnHandler, HandlerError, StageActionHandler,
};
pub use dedup::{
    DeduplicationGuard, MemorySession, SessionRegistry, SessionStore,
    DEFAULT_SESSION_IDLE_TTL, TRIGGERED_ACTIONS_KEY,
};
pub use domain::{
    ActionDefinition, ActionId, ActionType, CompletionInsert, CompletionRecord,
    InvalidActionType, Lead, LeadId, StageChangeEntry, StageLogEntry, TriggerEvent,
};
pub use engine::{
    EngagementEngine, EngineConfig, EngineError, FiredAction, SkipReason, TriggerOutcome,
    TriggerReport, VisitorContext,
};
pub use memory::InMemoryStageStore;
pub use registry::{
    ActionCatalog, ActionChoice, ActionRegistrant, ActionRegistration, ActionRegistry,
    CatalogBuilder, HandlerRef, HandlerTable, RegisteredAction, RegistryError,
};
pub use repository::{
    ActionRepository, LeadDirectory, LeadRepository, RepositoryError, StageLogRepository,
};
pub use router::{stages_router, TriggerRequest};
pub use service::StageService;
pub use timeline::{
    merge_leads, LeadTimeline, MergeSummary, StageTimeline, TimelineEvent, TimelineFilter,
};
