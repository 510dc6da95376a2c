//! Rule-based insight engine: scores a context snapshot against a declarative rule catalog,
//! suppresses rules the user pushed back on, and picks one piece of guidance per screen.

pub mod catalog;
pub mod context;
pub mod engine;
pub mod feedback;
pub mod matcher;
pub mod router;
pub mod scope;
pub mod selector;
pub mod service;
pub mod sources;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogError, CatalogLoad, RejectedRule, Rule, RuleCatalog, RuleDefect};
pub use context::{ContextSnapshot, FieldPath, MedsContext, MoodContext, SleepContext};
pub use engine::{EngineSettings, InsightEngine};
pub use feedback::{
    FeedbackBatch, FeedbackError, FeedbackIndex, FeedbackRecord, FeedbackSuppressor,
    FeedbackVerdict,
};
pub use matcher::{ConfidenceScorer, ConfidenceTuning, Match, MatchedCondition, RuleMatcher};
pub use router::insight_router;
pub use scope::Scope;
pub use selector::{ScopeSelector, ScreenRequest};
pub use service::{
    InsightService, InsightServiceError, InsightSnapshot, RefreshTrigger, ScreenInsight,
};
pub use sources::{ContextSource, FeedbackSource, SourceError, UserId};
