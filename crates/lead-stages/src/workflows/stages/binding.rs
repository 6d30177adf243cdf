//! Named-argument binding for stage action handlers.
//!
//! The engine fills an [`ArgumentBag`] for each candidate action. Handlers
//! declare the names they want through [`StageActionHandler::parameters`] and
//! receive a [`BoundArguments`] holding exactly those slots, in declaration
//! order. Names the bag does not carry bind to [`Bound::Absent`].

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::domain::{ActionDefinition, ActionType, Lead, LeadId};

/// Argument names the engine populates.
pub mod names {
    pub const ACTION: &str = "action";
    pub const LEAD: &str = "lead";
    pub const CONTEXT: &str = "context";
    pub const ORIGIN: &str = "origin";
    pub const LEDGER: &str = "ledger";
    pub const TRIGGERED_AT: &str = "triggered_at";
}

/// Pre-typed value stored under a name in the bag.
#[derive(Debug, Clone, Copy)]
pub enum ArgumentValue<'a> {
    Action(&'a ActionDefinition),
    Lead(&'a Lead),
    Context(&'a Value),
    Origin(&'a str),
    Ledger(&'a EngagementLedger),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Default)]
pub struct ArgumentBag<'a> {
    values: BTreeMap<&'static str, ArgumentValue<'a>>,
}

impl<'a> ArgumentBag<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: ArgumentValue<'a>) -> Self {
        self.values.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &'static str, value: ArgumentValue<'a>) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<ArgumentValue<'a>> {
        self.values.get(name).copied()
    }

    /// Resolve `declared` against the bag by name.
    pub fn bind<'p>(&self, declared: &'p [&'static str]) -> BoundArguments<'a, 'p> {
        let slots = declared
            .iter()
            .map(|name| match self.get(name) {
                Some(value) => Bound::Present(value),
                None => Bound::Absent,
            })
            .collect();
        BoundArguments {
            names: declared,
            slots,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Bound<'a> {
    Present(ArgumentValue<'a>),
    Absent,
}

impl<'a> Bound<'a> {
    pub fn value(&self) -> Option<ArgumentValue<'a>> {
        match self {
            Bound::Present(value) => Some(*value),
            Bound::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Bound::Absent)
    }
}

/// The slots a handler asked for, nothing else.
#[derive(Debug)]
pub struct BoundArguments<'a, 'p> {
    names: &'p [&'static str],
    slots: Vec<Bound<'a>>,
}

impl<'a, 'p> BoundArguments<'a, 'p> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> &[&'static str] {
        self.names
    }

    pub fn slot(&self, name: &str) -> Option<Bound<'a>> {
        self.names
            .iter()
            .position(|declared| *declared == name)
            .map(|index| self.slots[index])
    }

    pub fn get(&self, name: &str) -> Option<ArgumentValue<'a>> {
        self.slot(name).and_then(|bound| bound.value())
    }

    pub fn action(&self) -> Option<&'a ActionDefinition> {
        match self.get(names::ACTION) {
            Some(ArgumentValue::Action(action)) => Some(action),
            _ => None,
        }
    }

    pub fn lead(&self) -> Option<&'a Lead> {
        match self.get(names::LEAD) {
            Some(ArgumentValue::Lead(lead)) => Some(lead),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&'a Value> {
        match self.get(names::CONTEXT) {
            Some(ArgumentValue::Context(context)) => Some(context),
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<&'a str> {
        match self.get(names::ORIGIN) {
            Some(ArgumentValue::Origin(origin)) => Some(origin),
            _ => None,
        }
    }

    pub fn ledger(&self) -> Option<&'a EngagementLedger> {
        match self.get(names::LEDGER) {
            Some(ArgumentValue::Ledger(ledger)) => Some(ledger),
            _ => None,
        }
    }

    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        match self.get(names::TRIGGERED_AT) {
            Some(ArgumentValue::Timestamp(at)) => Some(at),
            _ => None,
        }
    }
}

/// Failure raised from inside a handler; aborts the rest of the trigger call.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("required argument '{0}' was not supplied")]
    MissingArgument(&'static str),
    #[error("{0}")]
    Failed(String),
}

/// Callable resolved once when the registry is built.
///
/// A non-zero return value means the action fired and is the score delta to
/// apply; zero means it did not fire.
pub trait StageActionHandler: Send + Sync {
    fn parameters(&self) -> &[&'static str];
    fn invoke(&self, args: &BoundArguments<'_, '_>) -> Result<i64, HandlerError>;
}

type HandlerFn = dyn Fn(&BoundArguments<'_, '_>) -> Result<i64, HandlerError> + Send + Sync;

/// Closure-backed handler.
pub struct FnHandler {
    parameters: Vec<&'static str>,
    call: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F>(parameters: &[&'static str], call: F) -> Self
    where
        F: Fn(&BoundArguments<'_, '_>) -> Result<i64, HandlerError> + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.to_vec(),
            call: Box::new(call),
        }
    }

    pub fn shared<F>(parameters: &[&'static str], call: F) -> Arc<dyn StageActionHandler>
    where
        F: Fn(&BoundArguments<'_, '_>) -> Result<i64, HandlerError> + Send + Sync + 'static,
    {
        Arc::new(Self::new(parameters, call))
    }
}

impl StageActionHandler for FnHandler {
    fn parameters(&self) -> &[&'static str] {
        &self.parameters
    }

    fn invoke(&self, args: &BoundArguments<'_, '_>) -> Result<i64, HandlerError> {
        (self.call)(args)
    }
}

/// Process-scoped record of `(lead, type)` pairs the default handler has
/// already engaged. Not persisted and weaker than completion records.
#[derive(Debug, Default)]
pub struct EngagementLedger {
    engaged: Mutex<HashSet<(LeadId, ActionType)>>,
}

impl EngagementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a pair is seen.
    pub fn first_engagement(&self, lead: LeadId, action_type: &ActionType) -> bool {
        self.engaged
            .lock()
            .expect("engagement ledger mutex poisoned")
            .insert((lead, action_type.clone()))
    }

    pub fn reset(&self) {
        self.engaged
            .lock()
            .expect("engagement ledger mutex poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.engaged
            .lock()
            .expect("engagement ledger mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fallback for registered types without their own handler: yields the
/// action's static delta on the first engagement of a `(lead, type)` pair.
#[derive(Debug, Default)]
pub struct DefaultEngagementHandler;

const DEFAULT_PARAMETERS: &[&str] = &[names::LEAD, names::ACTION, names::LEDGER];

impl StageActionHandler for DefaultEngagementHandler {
    fn parameters(&self) -> &[&'static str] {
        DEFAULT_PARAMETERS
    }

    fn invoke(&self, args: &BoundArguments<'_, '_>) -> Result<i64, HandlerError> {
        let (Some(lead), Some(action)) = (args.lead(), args.action()) else {
            return Ok(0);
        };

        let first = match args.ledger() {
            Some(ledger) => ledger.first_engagement(lead.id, &action.action_type),
            None => true,
        };

        Ok(if first { action.delta } else { 0 })
    }
}
