use chrono::{DateTime, Duration, Utc};
use insight_engine::config::EngineConfig;
use insight_engine::error::AppError;
use insight_engine::insights::feedback::parse_timestamp as parse_feedback_timestamp;
use insight_engine::insights::{
    ContextSnapshot, ContextSource, EngineSettings, FeedbackBatch, FeedbackIndex, FeedbackRecord,
    FeedbackSource, InsightEngine, RuleCatalog, SourceError, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) contexts: Arc<InMemoryContextStore>,
    pub(crate) feedback: Arc<InMemoryFeedbackStore>,
}

/// Latest context snapshot pushed per user.
#[derive(Default, Clone)]
pub(crate) struct InMemoryContextStore {
    snapshots: Arc<Mutex<HashMap<UserId, ContextSnapshot>>>,
}

impl InMemoryContextStore {
    pub(crate) fn put(&self, user: UserId, snapshot: ContextSnapshot) {
        self.snapshots
            .lock()
            .expect("context store mutex poisoned")
            .insert(user, snapshot);
    }
}

impl ContextSource for InMemoryContextStore {
    async fn fetch_context(&self, user: &UserId) -> Result<ContextSnapshot, SourceError> {
        let guard = self.snapshots.lock().expect("context store mutex poisoned");
        guard
            .get(user)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(user.clone()))
    }
}

/// Append-only feedback log per user.
#[derive(Default, Clone)]
pub(crate) struct InMemoryFeedbackStore {
    rows: Arc<Mutex<HashMap<UserId, Vec<FeedbackRecord>>>>,
}

impl InMemoryFeedbackStore {
    pub(crate) fn record(&self, user: UserId, record: FeedbackRecord) {
        self.rows
            .lock()
            .expect("feedback store mutex poisoned")
            .entry(user)
            .or_default()
            .push(record);
    }
}

impl FeedbackSource for InMemoryFeedbackStore {
    async fn fetch_feedback(&self, user: &UserId) -> Result<FeedbackBatch, SourceError> {
        let guard = self.rows.lock().expect("feedback store mutex poisoned");
        Ok(FeedbackBatch::Rows(
            guard.get(user).cloned().unwrap_or_default(),
        ))
    }
}

/// Bundled rules unless a catalog file is given.
pub(crate) fn load_catalog(path: Option<&Path>) -> Result<Arc<RuleCatalog>, AppError> {
    let Some(path) = path else {
        return Ok(Arc::new(RuleCatalog::builtin()?));
    };

    let load = RuleCatalog::from_path(path)?;
    if load.catalog.is_empty() {
        warn!(path = %path.display(), "rule catalog has no usable rules; only fallbacks will be served");
    }
    Ok(Arc::new(load.catalog))
}

pub(crate) fn build_engine(
    config: &EngineConfig,
    rules: Option<&Path>,
) -> Result<Arc<InsightEngine>, AppError> {
    let catalog = load_catalog(rules.or(config.rules_path.as_deref()))?;
    Ok(Arc::new(InsightEngine::new(
        catalog,
        EngineSettings::from(config),
    )))
}

pub(crate) fn refresh_interval(config: &EngineConfig) -> Duration {
    Duration::try_seconds(config.min_refresh_secs).unwrap_or(Duration::MAX)
}

pub(crate) fn read_context(path: &Path) -> Result<ContextSnapshot, AppError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Feedback export as CSV (by extension) or as JSON rows / latest-by-id map.
pub(crate) fn read_feedback(path: &Path) -> Result<FeedbackIndex, AppError> {
    let is_csv = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("csv"));

    if is_csv {
        let file = File::open(path)?;
        return Ok(FeedbackIndex::from_csv_reader(file)?);
    }

    let raw = fs::read_to_string(path)?;
    let batch: FeedbackBatch = serde_json::from_str(&raw)?;
    Ok(batch.into_index())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_feedback_timestamp(raw)
        .ok_or_else(|| format!("failed to parse '{raw}' as RFC 3339 or YYYY-MM-DD"))
}
