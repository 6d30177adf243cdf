use crate::infra::{AppState, MemoryStageService};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use lead_stages::workflows::profiles::{profiles_router, ProfileEnricher};
use lead_stages::workflows::stages::{stages_router, InMemoryStageStore};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) fn with_service_routes(
    stages: Arc<MemoryStageService>,
    profiles: Arc<ProfileEnricher<InMemoryStageStore>>,
) -> Router {
    stages_router(stages)
        .merge(profiles_router(profiles))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Acquire);
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing")
    };

    (status, Json(json!({ "status": label })))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_profile_enricher, build_stage_service, seed_actions};
    use axum::body::Body;
    use axum::http::Request;
    use lead_stages::config::{
        AppConfig, AppEnvironment, ProfilesConfig, ServerConfig, StagesConfig, TelemetryConfig,
    };
    use lead_stages::workflows::stages::{Lead, LeadId};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            telemetry: TelemetryConfig {
                log_level: "debug".to_string(),
            },
            stages: StagesConfig {
                dedup_in_all_environments: true,
                ..StagesConfig::default()
            },
            profiles: ProfilesConfig {
                unique_fields: vec!["email".to_string()],
            },
        }
    }

    fn app(ready: bool) -> (Router, InMemoryStageStore) {
        let config = test_config();
        let store = InMemoryStageStore::new();
        seed_actions(&store).expect("seed actions");
        store.insert_lead(Lead::new(LeadId(1)));

        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_service_routes(
            build_stage_service(&config, &store),
            build_profile_enricher(&config, &store),
        )
        .layer(Extension(state));
        (router, store)
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    #[tokio::test]
    async fn readiness_reflects_flag() {
        let (router, _) = app(false);
        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(response).await["status"], "initializing");

        let (router, _) = app(true);
        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn form_submission_scores_matching_form_only() {
        let (router, store) = app(true);
        let submit = |form_id: u64, correlation: &str| {
            Request::post("/api/v1/stages/trigger")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-lead-id", "1")
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "type": "form.submit",
                        "correlation_id": correlation,
                        "context": { "form_id": form_id },
                    }))
                    .unwrap(),
                ))
                .unwrap()
        };

        let other_form = router.clone().oneshot(submit(9, "sub-1")).await.unwrap();
        assert_eq!(read_json(other_form).await["fired"], json!([]));

        let demo_form = router.oneshot(submit(42, "sub-2")).await.unwrap();
        let body = read_json(demo_form).await;
        assert_eq!(body["stage_score"], 10);
        assert_eq!(store.lead(LeadId(1)).expect("lead").stage_score, 10);
    }

    #[tokio::test]
    async fn health_and_catalog_are_served_together() {
        let (router, _) = app(true);
        let health = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(read_json(health).await, json!({ "status": "ok" }));

        let catalog = router
            .oneshot(
                Request::get("/api/v1/stages/actions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = read_json(catalog).await;
        assert_eq!(body.as_array().map(Vec::len), Some(3));
    }
}
