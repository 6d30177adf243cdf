use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::dedup::{MemorySession, SessionStore};
use super::domain::{ActionType, Lead, LeadId, TriggerEvent};
use super::engine::{EngineError, TriggerOutcome, VisitorContext};
use super::repository::{ActionRepository, LeadRepository, StageLogRepository};
use super::service::StageService;
use super::timeline::TimelineFilter;

pub const SESSION_HEADER: &str = "x-session-id";
pub const LEAD_HEADER: &str = "x-lead-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Router builder exposing the stage catalog, trigger, and lead timeline.
pub fn stages_router<A, L, G>(service: Arc<StageService<A, L, G>>) -> Router
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    Router::new()
        .route("/api/v1/stages/actions", get(choices_handler::<A, L, G>))
        .route("/api/v1/stages/trigger", post(trigger_handler::<A, L, G>))
        .route(
            "/api/v1/leads/:lead_id/timeline",
            get(timeline_handler::<A, L, G>),
        )
        .route(
            "/api/v1/leads/:lead_id/merge",
            post(merge_handler::<A, L, G>),
        )
        .with_state(service)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineQuery {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

impl From<TimelineQuery> for TimelineFilter {
    fn from(query: TimelineQuery) -> Self {
        TimelineFilter {
            event_types: query.event_type.map(|ty| vec![ty]),
            search: query.search,
            date_from: query.date_from,
            date_to: query.date_to,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub into: LeadId,
}

/// Visitor reconstructed from request headers.
struct HttpVisitor {
    anonymous: bool,
    lead: Option<Lead>,
    origin: Option<String>,
    session: Arc<MemorySession>,
}

impl VisitorContext for HttpVisitor {
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
        &*self.session
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn choices_handler<A, L, G>(
    State(service): State<Arc<StageService<A, L, G>>>,
) -> Response
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    match service.choices() {
        Ok(choices) => (StatusCode::OK, axum::Json(choices)).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub(crate) async fn trigger_handler<A, L, G>(
    State(service): State<Arc<StageService<A, L, G>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<TriggerRequest>,
) -> Response
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    let action_type = match ActionType::new(request.action_type) {
        Ok(action_type) => action_type,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
    };

    let current_lead = match header_str(&headers, LEAD_HEADER)
        .and_then(|raw| raw.parse::<u64>().ok())
    {
        Some(id) => match service.lead(LeadId(id)) {
            Ok(lead) => lead,
            Err(err) => return error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        },
        None => None,
    };

    let session = match header_str(&headers, SESSION_HEADER) {
        Some(session_id) => service.sessions().session(session_id),
        None => Arc::new(MemorySession::default()),
    };

    let visitor = HttpVisitor {
        anonymous: headers.get(axum::http::header::AUTHORIZATION).is_none(),
        lead: current_lead,
        origin: header_str(&headers, FORWARDED_FOR_HEADER)
            .and_then(|raw| raw.split(',').next())
            .map(|first| first.trim().to_string()),
        session,
    };

    let mut event = TriggerEvent::new(action_type).with_context(request.context);
    event.correlation_id = request.correlation_id;

    match service.trigger(event, request.lead_id, &visitor) {
        Ok(TriggerOutcome::Skipped(reason)) => {
            let payload = json!({ "status": "skipped", "reason": reason });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(TriggerOutcome::Applied(report)) => {
            let payload = json!({
                "status": "applied",
                "lead_id": report.lead.id,
                "stage_score": report.lead.stage_score,
                "evaluated": report.evaluated,
                "fired": report.fired,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(EngineError::Repository(err)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(other) => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub(crate) async fn timeline_handler<A, L, G>(
    State(service): State<Arc<StageService<A, L, G>>>,
    Path(lead_id): Path<u64>,
    Query(query): Query<TimelineQuery>,
) -> Response
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    let filter = TimelineFilter::from(query);
    match service.timeline(LeadId(lead_id), &filter) {
        Ok(timeline) => (StatusCode::OK, axum::Json(timeline)).into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub(crate) async fn merge_handler<A, L, G>(
    State(service): State<Arc<StageService<A, L, G>>>,
    Path(lead_id): Path<u64>,
    axum::Json(request): axum::Json<MergeRequest>,
) -> Response
where
    A: ActionRepository + 'static,
    L: LeadRepository + 'static,
    G: StageLogRepository + 'static,
{
    match service.merge_leads(LeadId(lead_id), request.into) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}
