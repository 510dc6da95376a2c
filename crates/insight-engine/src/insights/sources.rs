use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use super::context::ContextSnapshot;
use super::feedback::FeedbackBatch;

/// Identifier of the user a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Aggregator that assembles context snapshots outside the engine.
pub trait ContextSource: Send + Sync {
    fn fetch_context(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<ContextSnapshot, SourceError>> + Send;
}

/// Store holding helpful/not-helpful feedback per rule.
pub trait FeedbackSource: Send + Sync {
    fn fetch_feedback(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<FeedbackBatch, SourceError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("no data recorded for user {0}")]
    NotFound(UserId),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}
