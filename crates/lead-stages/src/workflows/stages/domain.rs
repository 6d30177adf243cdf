use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier for a lead (the actor whose stage score is mutated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub u64);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted stage action definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dot-namespaced action type such as `page.hit` or `form.submit`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionType(String);

impl ActionType {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidActionType> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && !raw.chars().any(char::is_whitespace)
            && raw.split('.').all(|segment| !segment.is_empty());
        if valid {
            Ok(Self(raw))
        } else {
            Err(InvalidActionType(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace before the first dot (`page` for `page.hit`).
    pub fn group(&self) -> &str {
        match self.0.split_once('.') {
            Some((group, _)) => group,
            None => &self.0,
        }
    }

    /// Remainder after the first dot; empty for un-namespaced types.
    pub fn event(&self) -> &str {
        match self.0.split_once('.') {
            Some((_, event)) => event,
            None => "",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ActionType {
    type Error = InvalidActionType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid action type (expected dot-separated, non-empty segments)")]
pub struct InvalidActionType(pub String);

/// Lead snapshot carried through a trigger call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub stage_score: i64,
    #[serde(default)]
    pub change_log: Vec<StageChangeEntry>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

impl Lead {
    pub fn new(id: LeadId) -> Self {
        Self {
            id,
            stage_score: 0,
            change_log: Vec::new(),
            fields: BTreeMap::new(),
            last_active: None,
        }
    }

    pub fn add_to_score(&mut self, delta: i64) {
        self.stage_score = self.stage_score.saturating_add(delta);
    }

    pub fn record_change(&mut self, entry: StageChangeEntry) {
        self.change_log.push(entry);
    }

    /// Copy non-blank values onto the lead; blanks never erase existing data.
    pub fn set_field_values(&mut self, values: &BTreeMap<String, String>) {
        for (field, value) in values {
            if value.trim().is_empty() {
                continue;
            }
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

/// Per-lead change history entry appended when an action fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageChangeEntry {
    pub group: String,
    pub event_name: String,
    pub action_label: String,
    pub delta: i64,
    pub origin: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Published rule mapping a trigger type to a score delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    pub delta: i64,
    pub published: bool,
}

impl ActionDefinition {
    pub fn label(&self) -> String {
        format!("{}: {}", self.id, self.name)
    }
}

/// Durable fact that an action already fired for a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub action_id: ActionId,
    pub lead_id: LeadId,
}

/// Result of an insert-or-skip completion write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionInsert {
    Inserted,
    AlreadyRecorded,
}

/// Immutable log row flushed in a batch at the end of a trigger call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub lead_id: LeadId,
    pub action_id: ActionId,
    pub action_name: String,
    pub delta: i64,
    pub fired_at: DateTime<Utc>,
    pub origin: Option<String>,
}

/// Transient trigger occurrence; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub action_type: ActionType,
    pub correlation_id: Option<String>,
    pub context: Value,
}

impl TriggerEvent {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            correlation_id: None,
            context: Value::Null,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}
