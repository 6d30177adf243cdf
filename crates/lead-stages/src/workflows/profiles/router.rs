use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::{json, Value};

use super::enricher::ProfileEnricher;
use super::tables::Network;
use super::ProfileError;
use crate::workflows::stages::repository::LeadDirectory;

/// Router accepting already-fetched social profiles.
pub fn profiles_router<D>(enricher: Arc<ProfileEnricher<D>>) -> Router
where
    D: LeadDirectory + 'static,
{
    Router::new()
        .route("/api/v1/profiles/:network", post(upsert_handler::<D>))
        .with_state(enricher)
}

pub(crate) async fn upsert_handler<D>(
    State(enricher): State<Arc<ProfileEnricher<D>>>,
    Path(network): Path<String>,
    axum::Json(profile): axum::Json<Value>,
) -> Response
where
    D: LeadDirectory + 'static,
{
    let result = network
        .parse::<Network>()
        .and_then(|network| enricher.upsert_value(network, &profile));

    match result {
        Ok(outcome) => {
            let status = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, axum::Json(outcome)).into_response()
        }
        Err(err) => {
            let status = match &err {
                ProfileError::UnknownNetwork(_) => StatusCode::NOT_FOUND,
                ProfileError::NotAnObject | ProfileError::Parse(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ProfileError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, axum::Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
