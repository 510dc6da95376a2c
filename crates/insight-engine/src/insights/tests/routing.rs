use super::common::*;
use crate::insights::router::PickRequest;
use crate::insights::Scope;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn json_request(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&payload).expect("serialize payload")))
        .expect("request")
}

fn memory_router() -> axum::Router {
    let contexts = MemoryContexts::with("u-1", context(json!({"sleep": {"lastNightHours": 5}})));
    router_with_service(service(
        Arc::new(contexts),
        Arc::new(MemoryFeedback::default()),
    ))
}

#[tokio::test]
async fn evaluate_route_returns_ranked_matches() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/evaluate",
            json!({
                "context": {"mood": {"latest": 2}},
                "feedback": [],
                "now": "2025-03-01T08:00:00Z"
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["evaluated_at"], "2025-03-01T08:00:00Z");
    assert_eq!(body["matches"][0]["rule_id"], "stress_mood");
    assert_eq!(body["matches"][0]["reasons"][0], "mood_latest_low");
    assert_eq!(body["matches"][0]["matched"][0]["op"], "lt");
}

#[tokio::test]
async fn evaluate_route_applies_inline_feedback() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/evaluate",
            json!({
                "context": {"mood": {"latest": 2}},
                "feedback": {"stress_mood": {"helpful": false, "createdAt": "2025-02-28T08:00:00Z"}},
                "now": "2025-03-01T08:00:00Z"
            }),
        ))
        .await
        .expect("response");

    let body = read_json_body(response).await;
    assert_eq!(body["matches"], json!([]));
}

#[tokio::test]
async fn pick_route_honors_scope_order() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/pick",
            json!({
                "context": {"meds": {"adherencePct7d": 60, "missedDoses3d": 0}},
                "scopes": ["sleep", "medication", "mood", "dashboard", "global"]
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["insight"]["rule_id"], "meds_adherence");
    assert_eq!(body["insight"]["is_fallback"], false);
}

#[tokio::test]
async fn pick_route_falls_back_universally_for_unknown_screens() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/pick",
            json!({"context": {}, "screen": "journal"}),
        ))
        .await
        .expect("response");

    let body = read_json_body(response).await;
    assert_eq!(body["insight"]["rule_id"], "fallback_universal");
    assert_eq!(body["insight"]["message"], "Keep logging for better guidance.");
}

#[tokio::test]
async fn pick_route_rejects_unknown_scopes() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/pick",
            json!({"context": {}, "scopes": ["sleep", "journal"]}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], "invalid_scope");
    assert_eq!(body["message"], "unknown scope 'journal'");
}

#[test]
fn pick_flags_layer_on_the_screen_preset() {
    let request: PickRequest = serde_json::from_value(json!({
        "context": {},
        "screen": "sleep",
        "allow_global_fallback": true,
        "dashboard_first": true
    }))
    .expect("pick request");

    let screen = request.screen_request().expect("known preset");
    assert_eq!(screen.preferred_scopes[0], Scope::Sleep);
    assert!(screen.allow_global_fallback);
    assert!(screen.dashboard_first);

    let dashboard: PickRequest =
        serde_json::from_value(json!({"context": {}, "screen": "dashboard"})).expect("pick request");
    assert!(dashboard.screen_request().expect("known preset").dashboard_first);
}

#[tokio::test]
async fn screen_route_serves_the_user_session() {
    let response = memory_router()
        .oneshot(
            Request::get("/api/v1/insights/users/u-1?screen=sleep&refresh=manual")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["insight"]["rule_id"], "sleep");
    assert_eq!(body["feedback_applied"], true);
    assert!(body["evaluated_at"].is_string());
}

#[tokio::test]
async fn screen_handler_returns_neutral_state_when_context_is_unavailable() {
    let service = Arc::new(service(
        Arc::new(UnavailableContexts::default()),
        Arc::new(MemoryFeedback::default()),
    ));

    let response = crate::insights::router::screen_handler::<UnavailableContexts, MemoryFeedback>(
        State(service),
        axum::extract::Path("u-1".to_string()),
        axum::extract::Query(crate::insights::router::ScreenQuery::default()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], "insight_unavailable");
    assert_eq!(body["user_id"], "u-1");
}

#[tokio::test]
async fn rules_route_lists_the_catalog() {
    let response = memory_router()
        .oneshot(
            Request::get("/api/v1/rules")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["count"], 6);
    assert_eq!(body["rules"][0]["id"], "stress_mood");
    assert_eq!(body["rules"][1]["triggers"][0]["all_of"][0]["op"], "lt");
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let response = memory_router()
        .oneshot(json_request(
            "/api/v1/insights/evaluate",
            json!({"context": 5}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
