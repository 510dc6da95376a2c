use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::catalog::RuleCatalog;
use super::context::ContextSnapshot;
use super::feedback::{FeedbackIndex, FeedbackSuppressor};
use super::matcher::{ConfidenceScorer, ConfidenceTuning, Match, RuleMatcher};
use super::selector::{ScopeSelector, ScreenRequest};
use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_matches: usize,
    pub cooldown: Duration,
    pub not_relevant_window: Duration,
    pub tuning: ConfidenceTuning,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_matches: config.max_matches,
            cooldown: Duration::try_days(config.cooldown_days).unwrap_or(Duration::MAX),
            not_relevant_window: Duration::try_hours(config.not_relevant_hours)
                .unwrap_or(Duration::MAX),
            tuning: ConfidenceTuning::default(),
        }
    }
}

/// Runs the full pipeline: match, suppress, cap, then select per screen.
#[derive(Debug, Clone)]
pub struct InsightEngine {
    catalog: Arc<RuleCatalog>,
    matcher: RuleMatcher,
    suppressor: FeedbackSuppressor,
    selector: ScopeSelector,
}

impl InsightEngine {
    pub fn new(catalog: Arc<RuleCatalog>, settings: EngineSettings) -> Self {
        let scorer = ConfidenceScorer::new(settings.tuning);
        let selector = ScopeSelector::new(scorer.floor());
        Self {
            catalog,
            matcher: RuleMatcher::new(scorer, settings.max_matches),
            suppressor: FeedbackSuppressor::new(settings.cooldown, settings.not_relevant_window),
            selector,
        }
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    pub fn selector(&self) -> &ScopeSelector {
        &self.selector
    }

    /// Suppression runs before the cap so a suppressed rule frees its slot.
    pub fn evaluate(
        &self,
        context: &ContextSnapshot,
        feedback: Option<&FeedbackIndex>,
        now: DateTime<Utc>,
    ) -> Vec<Match> {
        let ranked = self.matcher.rank(context, &self.catalog);
        let mut matches = match feedback {
            Some(index) => self.suppressor.suppress(ranked, index, now),
            None => ranked,
        };
        matches.truncate(self.matcher.max_matches());
        matches
    }

    pub fn pick(
        &self,
        context: &ContextSnapshot,
        feedback: Option<&FeedbackIndex>,
        now: DateTime<Utc>,
        request: &ScreenRequest,
    ) -> Match {
        let matches = self.evaluate(context, feedback, now);
        self.selector.pick(&matches, request)
    }
}
