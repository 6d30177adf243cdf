//! Mutex-backed store implementing every stage repository trait, used by the
//! demo service and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::domain::{
    ActionDefinition, ActionId, ActionType, CompletionInsert, CompletionRecord, Lead, LeadId,
    StageLogEntry,
};
use super::repository::{
    ActionRepository, LeadDirectory, LeadRepository, RepositoryError, StageLogRepository,
};

#[derive(Debug, Default)]
struct StoreState {
    actions: BTreeMap<ActionId, ActionDefinition>,
    completions: BTreeSet<CompletionRecord>,
    leads: BTreeMap<LeadId, Lead>,
    logs: Vec<StageLogEntry>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStageStore {
    state: Arc<Mutex<StoreState>>,
    lead_sequence: Arc<AtomicU64>,
}

impl InMemoryStageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_action(&self, action: ActionDefinition) {
        self.lock().actions.insert(action.id, action);
    }

    pub fn insert_lead(&self, lead: Lead) {
        self.lead_sequence.fetch_max(lead.id.0, Ordering::Relaxed);
        self.lock().leads.insert(lead.id, lead);
    }

    pub fn lead(&self, id: LeadId) -> Option<Lead> {
        self.lock().leads.get(&id).cloned()
    }

    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.lock().completions.iter().copied().collect()
    }

    pub fn logs(&self) -> Vec<StageLogEntry> {
        self.lock().logs.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("stage store mutex poisoned")
    }
}

impl ActionRepository for InMemoryStageStore {
    fn published_by_type(
        &self,
        action_type: &ActionType,
    ) -> Result<Vec<ActionDefinition>, RepositoryError> {
        Ok(self
            .lock()
            .actions
            .values()
            .filter(|action| action.published && &action.action_type == action_type)
            .cloned()
            .collect())
    }

    fn completed_action_ids(
        &self,
        action_type: &ActionType,
        lead_id: LeadId,
    ) -> Result<BTreeSet<ActionId>, RepositoryError> {
        let state = self.lock();
        Ok(state
            .completions
            .iter()
            .filter(|record| record.lead_id == lead_id)
            .filter(|record| {
                state
                    .actions
                    .get(&record.action_id)
                    .map(|action| &action.action_type == action_type)
                    .unwrap_or(false)
            })
            .map(|record| record.action_id)
            .collect())
    }

    fn record_completion(
        &self,
        record: CompletionRecord,
    ) -> Result<CompletionInsert, RepositoryError> {
        if self.lock().completions.insert(record) {
            Ok(CompletionInsert::Inserted)
        } else {
            Ok(CompletionInsert::AlreadyRecorded)
        }
    }

    fn reassign_completions(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError> {
        let mut state = self.lock();
        let moving: Vec<CompletionRecord> = state
            .completions
            .iter()
            .filter(|record| record.lead_id == from)
            .copied()
            .collect();

        let mut moved = 0;
        for record in moving {
            state.completions.remove(&record);
            let reassigned = CompletionRecord {
                action_id: record.action_id,
                lead_id: to,
            };
            if state.completions.insert(reassigned) {
                moved += 1;
            }
        }
        Ok(moved)
    }
}

impl LeadRepository for InMemoryStageStore {
    fn fetch(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.lead(id))
    }

    fn save(&self, lead: &Lead) -> Result<(), RepositoryError> {
        self.lock().leads.insert(lead.id, lead.clone());
        Ok(())
    }
}

impl StageLogRepository for InMemoryStageStore {
    fn append_batch(&self, entries: Vec<StageLogEntry>) -> Result<(), RepositoryError> {
        self.lock().logs.extend(entries);
        Ok(())
    }

    fn for_lead(&self, lead_id: LeadId) -> Result<Vec<StageLogEntry>, RepositoryError> {
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|entry| entry.lead_id == lead_id)
            .cloned()
            .collect())
    }

    fn reassign_lead(&self, from: LeadId, to: LeadId) -> Result<usize, RepositoryError> {
        let mut state = self.lock();
        let mut moved = 0;
        for entry in state.logs.iter_mut().filter(|entry| entry.lead_id == from) {
            entry.lead_id = to;
            moved += 1;
        }
        Ok(moved)
    }
}

impl LeadDirectory for InMemoryStageStore {
    fn find_by_unique_fields(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<Vec<Lead>, RepositoryError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .lock()
            .leads
            .values()
            .filter(|lead| {
                fields
                    .iter()
                    .any(|(field, value)| lead.fields.get(field) == Some(value))
            })
            .cloned()
            .collect())
    }

    fn create(&self) -> Result<Lead, RepositoryError> {
        let id = self.lead_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Lead::new(LeadId(id)))
    }

    fn save(&self, lead: &Lead) -> Result<(), RepositoryError> {
        LeadRepository::save(self, lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: u64, raw_type: &str, published: bool) -> ActionDefinition {
        ActionDefinition {
            id: ActionId(id),
            action_type: ActionType::new(raw_type).expect("valid type"),
            name: format!("action {id}"),
            properties: BTreeMap::new(),
            delta: 1,
            published,
        }
    }

    #[test]
    fn published_by_type_filters_type_and_publication() {
        let store = InMemoryStageStore::new();
        store.insert_action(action(1, "page.hit", true));
        store.insert_action(action(2, "page.hit", false));
        store.insert_action(action(3, "form.submit", true));

        let ty = ActionType::new("page.hit").expect("valid type");
        let found = store.published_by_type(&ty).expect("query succeeds");
        assert_eq!(
            found.iter().map(|action| action.id).collect::<Vec<_>>(),
            vec![ActionId(1)]
        );
    }

    #[test]
    fn completion_insert_is_unique_per_action_and_lead() {
        let store = InMemoryStageStore::new();
        let record = CompletionRecord {
            action_id: ActionId(1),
            lead_id: LeadId(1),
        };
        assert_eq!(
            store.record_completion(record).expect("insert"),
            CompletionInsert::Inserted
        );
        assert_eq!(
            store.record_completion(record).expect("insert"),
            CompletionInsert::AlreadyRecorded
        );
        assert_eq!(store.completions().len(), 1);
    }

    #[test]
    fn created_leads_do_not_collide_with_seeded_ids() {
        let store = InMemoryStageStore::new();
        store.insert_lead(Lead::new(LeadId(41)));
        let lead = LeadDirectory::create(&store).expect("allocate lead");
        assert_eq!(lead.id, LeadId(42));
    }
}
