use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::insights::feedback::{parse_timestamp, FeedbackBatch, FeedbackRecord};
use crate::insights::{
    insight_router, ContextSnapshot, ContextSource, EngineSettings, FeedbackSource,
    InsightEngine, InsightService, RuleCatalog, SourceError, UserId,
};

pub(super) fn builtin_catalog() -> Arc<RuleCatalog> {
    Arc::new(RuleCatalog::builtin().expect("builtin catalog loads"))
}

pub(super) fn engine() -> InsightEngine {
    InsightEngine::new(builtin_catalog(), EngineSettings::default())
}

pub(super) fn context(raw: Value) -> ContextSnapshot {
    serde_json::from_value(raw).expect("context snapshot")
}

pub(super) fn at(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).expect("valid timestamp")
}

pub(super) fn feedback(rule_id: &str, helpful: bool, reason: Option<&str>, created_at: &str) -> FeedbackRecord {
    FeedbackRecord {
        rule_id: rule_id.to_string(),
        helpful,
        reason: reason.map(str::to_string),
        created_at: at(created_at),
    }
}

pub(super) fn ids(matches: &[crate::insights::Match]) -> Vec<&str> {
    matches.iter().map(|m| m.rule_id.as_str()).collect()
}

/// Context that fires every builtin rule family except `meds_unlogged`.
pub(super) fn busy_context() -> ContextSnapshot {
    context(serde_json::json!({
        "mood": {"latest": 2},
        "sleep": {"lastNightHours": 5},
        "meds": {"adherencePct7d": 60, "missedDoses3d": 1},
        "flags": {"lateScreenTime": true}
    }))
}

#[derive(Default)]
pub(super) struct MemoryContexts {
    snapshots: Mutex<HashMap<UserId, ContextSnapshot>>,
    fetches: AtomicUsize,
}

impl MemoryContexts {
    pub(super) fn with(user: &str, snapshot: ContextSnapshot) -> Self {
        let contexts = Self::default();
        contexts.put(user, snapshot);
        contexts
    }

    pub(super) fn put(&self, user: &str, snapshot: ContextSnapshot) {
        self.snapshots
            .lock()
            .expect("context mutex poisoned")
            .insert(UserId::from(user), snapshot);
    }

    pub(super) fn remove(&self, user: &str) {
        self.snapshots
            .lock()
            .expect("context mutex poisoned")
            .remove(&UserId::from(user));
    }

    pub(super) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ContextSource for MemoryContexts {
    async fn fetch_context(&self, user: &UserId) -> Result<ContextSnapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up behind this fetch.
        tokio::task::yield_now().await;
        self.snapshots
            .lock()
            .expect("context mutex poisoned")
            .get(user)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(user.clone()))
    }
}

#[derive(Default)]
pub(super) struct UnavailableContexts {
    fetches: AtomicUsize,
}

impl UnavailableContexts {
    pub(super) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ContextSource for UnavailableContexts {
    async fn fetch_context(&self, _user: &UserId) -> Result<ContextSnapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Unavailable("aggregator offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryFeedback {
    rows: Mutex<Vec<FeedbackRecord>>,
}

impl MemoryFeedback {
    pub(super) fn with(rows: Vec<FeedbackRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }
}

impl FeedbackSource for MemoryFeedback {
    async fn fetch_feedback(&self, _user: &UserId) -> Result<FeedbackBatch, SourceError> {
        let rows = self.rows.lock().expect("feedback mutex poisoned").clone();
        Ok(FeedbackBatch::Rows(rows))
    }
}

pub(super) struct UnavailableFeedback;

impl FeedbackSource for UnavailableFeedback {
    async fn fetch_feedback(&self, _user: &UserId) -> Result<FeedbackBatch, SourceError> {
        Err(SourceError::Unavailable("feedback store timeout".to_string()))
    }
}

pub(super) fn service<C, F>(contexts: Arc<C>, feedback: Arc<F>) -> InsightService<C, F>
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    InsightService::new(Arc::new(engine()), contexts, feedback, Duration::minutes(5))
}

pub(super) fn router_with_service<C, F>(service: InsightService<C, F>) -> axum::Router
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    insight_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
