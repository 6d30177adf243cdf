use std::sync::Arc;
use std::time::Duration;

use super::dedup::SessionRegistry;
use super::domain::{Lead, LeadId, TriggerEvent};
use super::engine::{EngagementEngine, EngineConfig, EngineError, TriggerOutcome, VisitorContext};
use super::registry::{ActionChoice, ActionRegistry, RegistryError};
use super::repository::{ActionRepository, LeadRepository, RepositoryError, StageLogRepository};
use super::timeline::{merge_leads, LeadTimeline, MergeSummary, StageTimeline, TimelineFilter};

/// Service composing the engine, timeline, and lead lookups for the router.
pub struct StageService<A, L, G> {
    engine: EngagementEngine<A, L, G>,
    timeline: StageTimeline<G>,
    actions: Arc<A>,
    leads: Arc<L>,
    logs: Arc<G>,
    sessions: SessionRegistry,
}

impl<A, L, G> StageService<A, L, G>
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
        let engine = EngagementEngine::new(
            registry,
            actions.clone(),
            leads.clone(),
            logs.clone(),
            config,
        );
        let timeline = StageTimeline::new(logs.clone());

        Self {
            engine,
            timeline,
            actions,
            leads,
            logs,
            sessions: SessionRegistry::default(),
        }
    }

    /// Replace the session registry with one expiring idle sessions after `idle_ttl`.
    pub fn with_session_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.sessions = SessionRegistry::with_idle_ttl(idle_ttl);
        self
    }

    pub fn engine(&self) -> &EngagementEngine<A, L, G> {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn choices(&self) -> Result<Vec<ActionChoice>, RegistryError> {
        Ok(self.engine.registry().build()?.choices().to_vec())
    }

    pub fn lead(&self, lead_id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        self.leads.fetch(lead_id)
    }

    /// Trigger for an explicit lead id when given; an unknown id falls back
    /// to the visitor's current lead.
    pub fn trigger(
        &self,
        event: TriggerEvent,
        lead_id: Option<LeadId>,
        visitor: &dyn VisitorContext,
    ) -> Result<TriggerOutcome, EngineError> {
        let lead = match lead_id {
            Some(id) => self.leads.fetch(id)?,
            None => None,
        };
        self.engine.trigger(event, lead, visitor)
    }

    pub fn timeline(
        &self,
        lead_id: LeadId,
        filter: &TimelineFilter,
    ) -> Result<LeadTimeline, RepositoryError> {
        self.timeline.for_lead(lead_id, filter)
    }

    pub fn merge_leads(
        &self,
        loser: LeadId,
        victor: LeadId,
    ) -> Result<MergeSummary, RepositoryError> {
        merge_leads(&*self.actions, &*self.logs, loser, victor)
    }
}
