use crate::cli::ServeArgs;
use crate::infra::{build_profile_enricher, build_stage_service, seed_actions, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use lead_stages::config::AppConfig;
use lead_stages::error::AppError;
use lead_stages::telemetry;
use lead_stages::workflows::stages::InMemoryStageStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = InMemoryStageStore::new();
    seed_actions(&store)?;
    let stage_service = build_stage_service(&config, &store);
    // Unresolvable handler names fail startup rather than the first trigger.
    stage_service.choices()?;
    let profile_enricher = build_profile_enricher(&config, &store);

    let app = with_service_routes(stage_service, profile_enricher)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "stage engagement service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
