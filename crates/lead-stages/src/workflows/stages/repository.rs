use std::collections::{BTreeMap, BTreeSet};

use super::domain::{
    ActionDefinition, ActionId, ActionType, CompletionInsert, CompletionRecord, Lead, LeadId,
    StageLogEntry,
};

/// Query layer over persisted stage action definitions and completions.
pub trait ActionRepository: Send + Sync {
    fn published_by_type(
        &self,
        action_type: &ActionType,
    ) -> Result<Vec<ActionDefinition>, RepositoryError>;

    fn completed_action_ids(
        &self,
        action_type: &ActionType,
        lead_id: LeadId,
    ) -> Result<BTreeSet<ActionId>, RepositoryError>;

    /// Insert-or-skip: implementations must treat `(action_id, lead_id)` as
    /// unique and report an existing row instead of writing a second one.
    fn record_completion(
        &self,
        record: CompletionRecord,
    ) -> Result<CompletionInsert, RepositoryError>;

    /// Move completions from one lead to another, dropping ones the target
    /// already holds. Returns how many rows moved.
    fn reassign_completions(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError>;
}

/// Lead persistence.
pub trait LeadRepository: Send + Sync {
    fn fetch(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError>;
    fn save(&self, lead: &Lead) -> Result<(), RepositoryError>;
}

/// Append-only storage for fired stage logs.
pub trait StageLogRepository: Send + Sync {
    fn append_batch(&self, entries: Vec<StageLogEntry>) -> Result<(), RepositoryError>;
    fn for_lead(&self, lead_id: LeadId) -> Result<Vec<StageLogEntry>, RepositoryError>;
    fn reassign_lead(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError>;
}

/// Lead lookup used by profile enrichment.
pub trait LeadDirectory: Send + Sync {
    /// Leads matching any of the given `(field, value)` pairs, oldest first.
    fn find_by_unique_fields(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<Vec<Lead>, RepositoryError>;

    /// Allocate a fresh, unsaved lead.
    fn create(&self) -> Result<Lead, RepositoryError>;

    fn save(&self, lead: &Lead) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
