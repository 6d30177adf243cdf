use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ActionId, LeadId};
use super::repository::{ActionRepository, RepositoryError, StageLogRepository};

pub const STAGE_GAINED: &str = "stage.gained";
pub const STAGE_GAINED_LABEL: &str = "Stage gained";

/// Caller-side filter for a lead timeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineFilter {
    /// Event types the caller wants; `None` means all.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

impl TimelineFilter {
    fn is_applicable(&self, event_type: &str) -> bool {
        match &self.event_types {
            Some(types) => types.iter().any(|ty| ty == event_type),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEventType {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub event: &'static str,
    pub event_label: &'static str,
    pub timestamp: DateTime<Utc>,
    pub action_id: ActionId,
    pub action_name: String,
    pub delta: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadTimeline {
    pub event_types: Vec<TimelineEventType>,
    pub events: Vec<TimelineEvent>,
}

/// Builds `stage.gained` timeline entries from persisted stage logs.
pub struct StageTimeline<G> {
    logs: Arc<G>,
}

impl<G> StageTimeline<G>
where
    G: StageLogRepository + 'static,
{
    pub fn new(logs: Arc<G>) -> Self {
        Self { logs }
    }

    pub fn event_types() -> Vec<TimelineEventType> {
        vec![TimelineEventType {
            key: STAGE_GAINED,
            label: STAGE_GAINED_LABEL,
        }]
    }

    /// Newest first. The event type is always advertised, even when the
    /// filter excludes it.
    pub fn for_lead(
        &self,
        lead_id: LeadId,
        filter: &TimelineFilter,
    ) -> Result<LeadTimeline, RepositoryError> {
        let event_types = Self::event_types();
        if !filter.is_applicable(STAGE_GAINED) {
            return Ok(LeadTimeline {
                event_types,
                events: Vec::new(),
            });
        }

        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase);

        let mut events: Vec<TimelineEvent> = self
            .logs
            .for_lead(lead_id)?
            .into_iter()
            .filter(|entry| filter.date_from.map_or(true, |from| entry.fired_at >= from))
            .filter(|entry| filter.date_to.map_or(true, |to| entry.fired_at <= to))
            .filter(|entry| match &search {
                Some(term) => entry.action_name.to_lowercase().contains(term),
                None => true,
            })
            .map(|entry| TimelineEvent {
                event: STAGE_GAINED,
                event_label: STAGE_GAINED_LABEL,
                timestamp: entry.fired_at,
                action_id: entry.action_id,
                action_name: entry.action_name,
                delta: entry.delta,
                origin: entry.origin,
            })
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(LeadTimeline {
            event_types,
            events,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub logs_moved: usize,
    pub completions_moved: usize,
}

/// Fold a duplicate lead's stage history into the surviving lead.
pub fn merge_leads<A, G>(
    actions: &A,
    logs: &G,
    loser: LeadId,
    victor: LeadId,
) -> Result<MergeSummary, RepositoryError>
where
    A: ActionRepository + ?Sized,
    G: StageLogRepository + ?Sized,
{
    if loser == victor {
        return Ok(MergeSummary {
            logs_moved: 0,
            completions_moved: 0,
        });
    }
    let logs_moved = logs.reassign_lead(loser, victor)?;
    let completions_moved = actions.reassign_completions(loser, victor)?;
    Ok(MergeSummary {
        logs_moved,
        completions_moved,
    })
}
