use crate::infra::{AppState, InMemoryContextStore, InMemoryFeedbackStore};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use chrono::{DateTime, Utc};
use insight_engine::insights::{
    insight_router, ContextSnapshot, FeedbackRecord, InsightService, UserId,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub(crate) type AppInsightService = InsightService<InMemoryContextStore, InMemoryFeedbackStore>;

#[derive(Debug, Deserialize)]
pub(crate) struct FeedbackSubmission {
    #[serde(alias = "ruleOrInsightId", alias = "insightId", alias = "ruleId")]
    pub(crate) rule_id: String,
    pub(crate) helpful: bool,
    #[serde(default)]
    pub(crate) reason: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub(crate) created_at: Option<DateTime<Utc>>,
}

pub(crate) fn with_insight_routes(service: Arc<AppInsightService>) -> axum::Router {
    insight_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/users/:user_id/context",
            axum::routing::put(store_context_endpoint),
        )
        .route(
            "/api/v1/users/:user_id/feedback",
            axum::routing::post(record_feedback_endpoint),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn store_context_endpoint(
    Extension(state): Extension<AppState>,
    Path(user_id): Path<String>,
    Json(snapshot): Json<ContextSnapshot>,
) -> StatusCode {
    state.contexts.put(UserId(user_id), snapshot);
    StatusCode::NO_CONTENT
}

pub(crate) async fn record_feedback_endpoint(
    Extension(state): Extension<AppState>,
    Path(user_id): Path<String>,
    Json(submission): Json<FeedbackSubmission>,
) -> impl IntoResponse {
    let rule_id = submission.rule_id.trim().to_string();
    if rule_id.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "rule_id must not be empty" })),
        );
    }

    let record = FeedbackRecord {
        rule_id,
        helpful: submission.helpful,
        reason: submission.reason,
        created_at: submission.created_at.unwrap_or_else(Utc::now),
    };
    info!(user = %user_id, rule_id = %record.rule_id, verdict = ?record.verdict(), "feedback recorded");
    state.feedback.record(UserId(user_id), record.clone());

    (StatusCode::CREATED, Json(json!(record)))
}
