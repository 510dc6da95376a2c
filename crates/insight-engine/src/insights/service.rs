use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::InsightEngine;
use super::matcher::Match;
use super::selector::ScreenRequest;
use super::sources::{ContextSource, FeedbackSource, SourceError, UserId};

/// What prompted a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    SessionStart,
    FeatureToggle,
    /// User-initiated; bypasses the minimum refresh interval.
    Manual,
}

impl RefreshTrigger {
    pub fn is_automatic(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Published evaluation result for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSnapshot {
    pub matches: Vec<Match>,
    pub evaluated_at: DateTime<Utc>,
    /// False when the feedback store failed and suppression was skipped.
    pub feedback_applied: bool,
}

/// The match chosen for one screen plus the evaluation it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenInsight {
    pub insight: Match,
    pub evaluated_at: DateTime<Utc>,
    pub feedback_applied: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InsightServiceError {
    #[error("insight context unavailable: {0}")]
    ContextUnavailable(#[source] SourceError),
}

#[derive(Default)]
struct UserSession {
    /// Refresh requests issued so far.
    requests: AtomicU64,
    state: tokio::sync::Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    snapshot: Option<Arc<InsightSnapshot>>,
    /// Requests issued up to this number are answered by `snapshot`.
    answered_through: u64,
}

/// Per-user evaluation sessions over external context and feedback stores.
///
/// Evaluations for one user are serialized: a request that arrives while another is in
/// flight waits for it and returns its result without fetching again.
pub struct InsightService<C, F> {
    engine: Arc<InsightEngine>,
    contexts: Arc<C>,
    feedback: Arc<F>,
    min_refresh_interval: Duration,
    sessions: Mutex<HashMap<UserId, Arc<UserSession>>>,
}

impl<C, F> InsightService<C, F>
where
    C: ContextSource + 'static,
    F: FeedbackSource + 'static,
{
    pub fn new(
        engine: Arc<InsightEngine>,
        contexts: Arc<C>,
        feedback: Arc<F>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            engine,
            contexts,
            feedback,
            min_refresh_interval,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<InsightEngine> {
        &self.engine
    }

    pub async fn refresh(
        &self,
        user: &UserId,
        trigger: RefreshTrigger,
        now: DateTime<Utc>,
    ) -> Result<Arc<InsightSnapshot>, InsightServiceError> {
        let session = self.session(user);
        let ticket = session.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = session.state.lock().await;

        if let Some(snapshot) = &state.snapshot {
            if state.answered_through >= ticket {
                debug!(%user, ticket, "joined in-flight evaluation");
                return Ok(Arc::clone(snapshot));
            }
            if trigger.is_automatic() && now - snapshot.evaluated_at < self.min_refresh_interval {
                debug!(%user, ?trigger, "within minimum refresh interval; serving cached insights");
                return Ok(Arc::clone(snapshot));
            }
        }

        let context = match self.contexts.fetch_context(user).await {
            Ok(context) => context,
            Err(error) => {
                if state.snapshot.is_none() {
                    self.forget(user, &session);
                }
                return Err(InsightServiceError::ContextUnavailable(error));
            }
        };

        let feedback = match self.feedback.fetch_feedback(user).await {
            Ok(batch) => Some(batch.into_index()),
            Err(error) => {
                warn!(%user, %error, "feedback unavailable; evaluating without suppression");
                None
            }
        };

        let matches = self.engine.evaluate(&context, feedback.as_ref(), now);
        let snapshot = Arc::new(InsightSnapshot {
            matches,
            evaluated_at: now,
            feedback_applied: feedback.is_some(),
        });

        state.snapshot = Some(Arc::clone(&snapshot));
        state.answered_through = session.requests.load(Ordering::SeqCst);

        info!(
            %user,
            ?trigger,
            matches = snapshot.matches.len(),
            feedback_applied = snapshot.feedback_applied,
            "insights refreshed"
        );
        Ok(snapshot)
    }

    /// Single insight for a screen; always yields a match once the context is available.
    pub async fn insight_for_screen(
        &self,
        user: &UserId,
        request: &ScreenRequest,
        trigger: RefreshTrigger,
        now: DateTime<Utc>,
    ) -> Result<ScreenInsight, InsightServiceError> {
        let snapshot = self.refresh(user, trigger, now).await?;
        Ok(ScreenInsight {
            insight: self.engine.selector().pick(&snapshot.matches, request),
            evaluated_at: snapshot.evaluated_at,
            feedback_applied: snapshot.feedback_applied,
        })
    }

    fn session(&self, user: &UserId) -> Arc<UserSession> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(user.clone()).or_default())
    }

    /// Drops a session that never produced a snapshot, unless it was already replaced.
    fn forget(&self, user: &UserId, session: &Arc<UserSession>) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions
            .get(user)
            .is_some_and(|tracked| Arc::ptr_eq(tracked, session))
        {
            sessions.remove(user);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
