use crate::cli::ServeArgs;
use crate::infra::{build_engine, refresh_interval, AppState, InMemoryContextStore, InMemoryFeedbackStore};
use crate::routes::with_insight_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use insight_engine::config::AppConfig;
use insight_engine::error::AppError;
use insight_engine::insights::InsightService;
use insight_engine::telemetry;
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
    if let Some(rules) = args.rules.take() {
        config.engine.rules_path = Some(rules);
    }

    telemetry::init(&config.telemetry)?;

    let engine = build_engine(&config.engine, None)?;
    let rule_count = engine.catalog().len();

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let contexts = Arc::new(InMemoryContextStore::default());
    let feedback = Arc::new(InMemoryFeedbackStore::default());
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        contexts: contexts.clone(),
        feedback: feedback.clone(),
    };

    let insight_service = Arc::new(InsightService::new(
        engine,
        contexts,
        feedback,
        refresh_interval(&config.engine),
    ));

    let app = with_insight_routes(insight_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, rules = rule_count, "insight engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
