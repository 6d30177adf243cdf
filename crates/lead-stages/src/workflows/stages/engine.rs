use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::binding::{names, ArgumentBag, ArgumentValue, EngagementLedger, HandlerError};
use super::dedup::{DeduplicationGuard, SessionStore};
use super::domain::{
    ActionDefinition, ActionId, ActionType, CompletionInsert, CompletionRecord, Lead, LeadId,
    StageChangeEntry, StageLogEntry, TriggerEvent,
};
use super::registry::{ActionRegistry, RegisteredAction, RegistryError};
use super::repository::{ActionRepository, LeadRepository, RepositoryError, StageLogRepository};
use crate::config::{AppConfig, AppEnvironment};

/// Request-scoped view of the visitor that caused a trigger.
pub trait VisitorContext {
    /// Only anonymous visitors engage stage actions.
    fn is_anonymous(&self) -> bool;
    fn current_lead(&self) -> Option<Lead>;
    /// Client address recorded on change log entries.
    fn origin(&self) -> Option<String>;
    fn session(&self) -> &dyn SessionStore;
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub environment: AppEnvironment,
    pub dedup_in_all_environments: bool,
}

impl EngineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            environment: config.environment,
            dedup_in_all_environments: config.stages.dedup_in_all_environments,
        }
    }

    fn deduplicates(&self) -> bool {
        self.dedup_in_all_environments || self.environment.is_production()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: AppEnvironment::Production,
            dedup_in_all_environments: false,
        }
    }
}

/// Why a trigger call returned without touching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Authenticated,
    DuplicateCorrelation,
    NoLead,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredAction {
    pub action_id: ActionId,
    pub name: String,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerReport {
    pub lead: Lead,
    pub fired: Vec<FiredAction>,
    pub evaluated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Applied(TriggerReport),
}

impl TriggerOutcome {
    pub fn fired(&self) -> &[FiredAction] {
        match self {
            TriggerOutcome::Skipped(_) => &[],
            TriggerOutcome::Applied(report) => &report.fired,
        }
    }
}

/// Fires published stage actions for a lead and records what changed.
pub struct EngagementEngine<A, L, G> {
    registry: Arc<ActionRegistry>,
    actions: Arc<A>,
    leads: Arc<L>,
    logs: Arc<G>,
    ledger: EngagementLedger,
    config: EngineConfig,
}

impl<A, L, G> EngagementEngine<A, L, G>
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    pub fn new(
        registry: Arc<ActionRegistry>,
        actions: Arc<A>,
        leads: Arc<L>,
        logs: Arc<G>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            actions,
            leads,
            logs,
            ledger: EngagementLedger::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Guard used by the default handler; `reset` it to forget engagements.
    pub fn ledger(&self) -> &EngagementLedger {
        &self.ledger
    }

    /// Run every matching, not yet completed, published action for the lead.
    ///
    /// Handler errors abort the remaining candidates. Progress made before the
    /// failure is flushed and kept.
    pub fn trigger(
        &self,
        event: TriggerEvent,
        lead: Option<Lead>,
        visitor: &dyn VisitorContext,
    ) -> Result<TriggerOutcome, EngineError> {
        if !visitor.is_anonymous() {
            debug!(action_type = %event.action_type, "skipping stage trigger for authenticated visitor");
            return Ok(TriggerOutcome::Skipped(SkipReason::Authenticated));
        }

        if let Some(correlation_id) = event.correlation_id.as_deref() {
            if self.config.deduplicates() {
                let guard = DeduplicationGuard::new(visitor.session());
                if guard.seen(correlation_id) {
                    debug!(action_type = %event.action_type, correlation_id, "stage trigger already handled in this session");
                    return Ok(TriggerOutcome::Skipped(SkipReason::DuplicateCorrelation));
                }
                guard.mark_seen(correlation_id);
            }
        }

        let Some(mut lead) = lead.or_else(|| visitor.current_lead()) else {
            debug!(action_type = %event.action_type, "no lead resolved for stage trigger");
            return Ok(TriggerOutcome::Skipped(SkipReason::NoLead));
        };

        let catalog = self.registry.build()?;
        let candidates = self.candidates(&event.action_type, lead.id)?;
        let origin = visitor.origin();
        let triggered_at = Utc::now();

        let mut pending: Vec<StageLogEntry> = Vec::new();
        let mut fired = Vec::new();

        for action in &candidates {
            let Some(registered) = catalog.get(&action.action_type) else {
                debug!(action_id = %action.id, action_type = %action.action_type, "stage action type is no longer registered");
                continue;
            };

            let delta = match self.invoke(
                registered,
                action,
                &lead,
                &event,
                origin.as_deref(),
                triggered_at,
            ) {
                Ok(delta) => delta,
                Err(source) => {
                    self.flush_partial(&lead, pending);
                    return Err(EngineError::Handler {
                        action_id: action.id,
                        source,
                    });
                }
            };

            if delta == 0 {
                continue;
            }

            let record = CompletionRecord {
                action_id: action.id,
                lead_id: lead.id,
            };
            match self.actions.record_completion(record) {
                Ok(CompletionInsert::Inserted) => {}
                Ok(CompletionInsert::AlreadyRecorded) => {
                    warn!(action_id = %action.id, lead_id = %lead.id, "stage action completed concurrently; not applying twice");
                    continue;
                }
                Err(err) => {
                    self.flush_partial(&lead, pending);
                    return Err(err.into());
                }
            }

            apply_change(&mut lead, action, delta, origin.as_deref(), triggered_at);
            pending.push(StageLogEntry {
                lead_id: lead.id,
                action_id: action.id,
                action_name: action.name.clone(),
                delta,
                fired_at: triggered_at,
                origin: origin.clone(),
            });
            fired.push(FiredAction {
                action_id: action.id,
                name: action.name.clone(),
                delta,
            });
            info!(action_id = %action.id, lead_id = %lead.id, delta, "stage action fired");
        }

        if !pending.is_empty() {
            self.leads.save(&lead)?;
            self.logs.append_batch(pending)?;
        }

        Ok(TriggerOutcome::Applied(TriggerReport {
            lead,
            fired,
            evaluated: candidates.len(),
        }))
    }

    /// Published actions of exactly this type minus the ones already
    /// completed for the lead, in repository order.
    fn candidates(
        &self,
        action_type: &ActionType,
        lead_id: LeadId,
    ) -> Result<Vec<ActionDefinition>, EngineError> {
        let published = self.actions.published_by_type(action_type)?;
        let completed = self.actions.completed_action_ids(action_type, lead_id)?;
        Ok(published
            .into_iter()
            .filter(|action| action.published && &action.action_type == action_type)
            .filter(|action| !completed.contains(&action.id))
            .collect())
    }

    fn invoke(
        &self,
        registered: &RegisteredAction,
        action: &ActionDefinition,
        lead: &Lead,
        event: &TriggerEvent,
        origin: Option<&str>,
        triggered_at: DateTime<Utc>,
    ) -> Result<i64, HandlerError> {
        let mut bag = ArgumentBag::new()
            .with(names::ACTION, ArgumentValue::Action(action))
            .with(names::LEAD, ArgumentValue::Lead(lead))
            .with(names::CONTEXT, ArgumentValue::Context(&event.context))
            .with(names::LEDGER, ArgumentValue::Ledger(&self.ledger))
            .with(names::TRIGGERED_AT, ArgumentValue::Timestamp(triggered_at));
        if let Some(origin) = origin {
            bag.insert(names::ORIGIN, ArgumentValue::Origin(origin));
        }

        let handler = registered.handler();
        handler.invoke(&bag.bind(handler.parameters()))
    }

    fn flush_partial(&self, lead: &Lead, pending: Vec<StageLogEntry>) {
        if pending.is_empty() {
            return;
        }
        if let Err(err) = self.leads.save(lead) {
            error!(lead_id = %lead.id, error = %err, "failed to persist lead after aborted stage trigger");
            return;
        }
        if let Err(err) = self.logs.append_batch(pending) {
            error!(lead_id = %lead.id, error = %err, "failed to persist stage logs after aborted stage trigger");
        }
    }
}

fn apply_change(
    lead: &mut Lead,
    action: &ActionDefinition,
    delta: i64,
    origin: Option<&str>,
    recorded_at: DateTime<Utc>,
) {
    lead.add_to_score(delta);
    lead.record_change(StageChangeEntry {
        group: action.action_type.group().to_string(),
        event_name: action.action_type.event().to_string(),
        action_label: action.label(),
        delta,
        origin: origin.map(str::to_string),
        recorded_at,
    });
}

/// Error raised by the engagement engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("handler for stage action {action_id} failed: {source}")]
    Handler {
        action_id: ActionId,
        #[source]
        source: HandlerError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
