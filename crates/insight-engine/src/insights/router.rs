use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::context::ContextSnapshot;
use super::feedback::FeedbackBatch;
use super::scope::Scope;
use super::selector::ScreenRequest;
use super::service::{InsightService, InsightServiceError, RefreshTrigger};
use super::sources::{ContextSource, FeedbackSource, UserId};

/// Router builder exposing evaluation, per-screen selection and the rule listing.
pub fn insight_router<C, F>(service: Arc<InsightService<C, F>>) -> Router
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    Router::new()
        .route("/api/v1/insights/evaluate", post(evaluate_handler::<C, F>))
        .route("/api/v1/insights/pick", post(pick_handler::<C, F>))
        .route(
            "/api/v1/insights/users/:user_id",
            get(screen_handler::<C, F>),
        )
        .route("/api/v1/rules", get(rules_handler::<C, F>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub context: ContextSnapshot,
    #[serde(default)]
    pub feedback: Option<FeedbackBatch>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PickRequest {
    pub context: ContextSnapshot,
    #[serde(default)]
    pub feedback: Option<FeedbackBatch>,
    /// Named preset; explicit `scopes` take precedence when non-empty.
    #[serde(default)]
    pub screen: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub allow_global_fallback: bool,
    #[serde(default)]
    pub dashboard_first: bool,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl PickRequest {
    /// Explicit scopes win over the preset; the flags layer on top of either.
    pub fn screen_request(&self) -> Result<ScreenRequest, String> {
        let base = match &self.screen {
            Some(screen) if self.scopes.is_empty() => ScreenRequest::for_screen(screen),
            _ => {
                let preferred = self
                    .scopes
                    .iter()
                    .map(|raw| Scope::parse(raw).ok_or_else(|| format!("unknown scope '{raw}'")))
                    .collect::<Result<Vec<_>, _>>()?;
                ScreenRequest::new(preferred)
            }
        };
        let allow_global = base.allow_global_fallback || self.allow_global_fallback;
        let dashboard_first = base.dashboard_first || self.dashboard_first;
        Ok(base
            .with_global_fallback(allow_global)
            .with_dashboard_first(dashboard_first))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScreenQuery {
    #[serde(default)]
    pub screen: Option<String>,
    #[serde(default)]
    pub refresh: Option<RefreshTrigger>,
}

pub(crate) async fn evaluate_handler<C, F>(
    State(service): State<Arc<InsightService<C, F>>>,
    axum::Json(request): axum::Json<EvaluateRequest>,
) -> Response
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    let now = request.now.unwrap_or_else(Utc::now);
    let feedback = request.feedback.map(FeedbackBatch::into_index);
    let matches = service
        .engine()
        .evaluate(&request.context, feedback.as_ref(), now);

    let payload = json!({
        "matches": matches,
        "evaluated_at": now,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn pick_handler<C, F>(
    State(service): State<Arc<InsightService<C, F>>>,
    axum::Json(request): axum::Json<PickRequest>,
) -> Response
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    let screen = match request.screen_request() {
        Ok(screen) => screen,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": "invalid_scope", "message": message })),
            )
                .into_response();
        }
    };
    let now = request.now.unwrap_or_else(Utc::now);
    let feedback = request.feedback.map(FeedbackBatch::into_index);
    let insight = service
        .engine()
        .pick(&request.context, feedback.as_ref(), now, &screen);

    (StatusCode::OK, axum::Json(json!({ "insight": insight }))).into_response()
}

pub(crate) async fn screen_handler<C, F>(
    State(service): State<Arc<InsightService<C, F>>>,
    Path(user_id): Path<String>,
    Query(query): Query<ScreenQuery>,
) -> Response
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    let user = UserId(user_id);
    let request = ScreenRequest::for_screen(query.screen.as_deref().unwrap_or_default());
    let trigger = query.refresh.unwrap_or(RefreshTrigger::SessionStart);

    match service
        .insight_for_screen(&user, &request, trigger, Utc::now())
        .await
    {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(InsightServiceError::ContextUnavailable(error)) => {
            warn!(%user, %error, "serving neutral state; context unavailable");
            let payload = json!({
                "user_id": user.0,
                "error": "insight_unavailable",
                "message": "We can't load an insight right now.",
            });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn rules_handler<C, F>(
    State(service): State<Arc<InsightService<C, F>>>,
) -> Response
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    let catalog = service.engine().catalog();
    let payload = json!({
        "count": catalog.len(),
        "rules": catalog.rules(),
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}
