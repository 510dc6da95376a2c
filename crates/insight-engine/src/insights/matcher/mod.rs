mod conditions;
mod confidence;

pub use confidence::{
    ConfidenceScore, ConfidenceScorer, ConfidenceTuning, QualityFinding, SignalTally,
};

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::{Condition, Rule, RuleCatalog, SignalStrength, Trigger};
use super::context::ContextSnapshot;
use super::scope::Scope;
use conditions::condition_holds;

/// Field/operator/value descriptor of a condition that held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedCondition {
    pub field: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl From<&Condition> for MatchedCondition {
    fn from(condition: &Condition) -> Self {
        Self {
            field: condition.field.to_string(),
            op: condition.operator.label().to_string(),
            value: condition.operator.value(),
        }
    }
}

/// A rule that fired against a context snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub rule_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub priority: i32,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub matched: Vec<MatchedCondition>,
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub is_fallback: bool,
}

/// Evaluates catalog rules against a snapshot and ranks what fired.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    scorer: ConfidenceScorer,
    max_matches: usize,
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new(ConfidenceScorer::default(), Self::DEFAULT_MAX_MATCHES)
    }
}

impl RuleMatcher {
    pub const DEFAULT_MAX_MATCHES: usize = 3;

    /// `max_matches` is clamped to `1..=DEFAULT_MAX_MATCHES`.
    pub fn new(scorer: ConfidenceScorer, max_matches: usize) -> Self {
        Self {
            scorer,
            max_matches: max_matches.clamp(1, Self::DEFAULT_MAX_MATCHES),
        }
    }

    pub fn max_matches(&self) -> usize {
        self.max_matches
    }

    /// Ranked matches, capped at `max_matches`.
    pub fn evaluate(&self, context: &ContextSnapshot, catalog: &RuleCatalog) -> Vec<Match> {
        let mut matches = self.rank(context, catalog);
        matches.truncate(self.max_matches);
        matches
    }

    /// Every match, ordered by priority, then confidence, then rule id.
    pub fn rank(&self, context: &ContextSnapshot, catalog: &RuleCatalog) -> Vec<Match> {
        if context.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<Match> = catalog
            .rules()
            .iter()
            .filter_map(|rule| self.match_rule(rule, context))
            .collect();
        sort_matches(&mut matches);
        matches
    }

    pub fn match_rule(&self, rule: &Rule, context: &ContextSnapshot) -> Option<Match> {
        let evidence = Evidence::collect(rule, context)?;

        let findings: Vec<QualityFinding> = rule
            .quality
            .iter()
            .filter(|check| condition_holds(&check.condition, context))
            .map(|check| QualityFinding {
                penalty: check.penalty,
                reason: check.condition.reason.clone(),
            })
            .collect();

        let score = self.scorer.score(rule, evidence.tally, &findings);

        let mut reasons = evidence.reasons;
        for reason in score.reasons {
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }

        Some(Match {
            rule_id: rule.id.clone(),
            message: rule.message.clone(),
            action: rule.action.clone(),
            priority: rule.priority,
            confidence: score.value,
            reasons,
            matched: evidence.matched,
            scopes: rule.scopes.clone(),
            source_tag: rule.source_tag.clone(),
            is_fallback: false,
        })
    }
}

pub(crate) fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(|left, right| {
        right
            .priority
            .cmp(&left.priority)
            .then_with(|| {
                right
                    .confidence
                    .partial_cmp(&left.confidence)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| left.rule_id.cmp(&right.rule_id))
    });
}

struct Evidence {
    reasons: Vec<String>,
    matched: Vec<MatchedCondition>,
    tally: SignalTally,
}

impl Evidence {
    /// Disjunctive over triggers; `None` when nothing held.
    fn collect(rule: &Rule, context: &ContextSnapshot) -> Option<Self> {
        let mut evidence = Self {
            reasons: Vec::new(),
            matched: Vec::new(),
            tally: SignalTally::default(),
        };

        for trigger in &rule.triggers {
            match trigger {
                Trigger::Single(condition) => {
                    if condition_holds(condition, context) {
                        evidence.record(&condition.reason, condition.signal, [condition]);
                    }
                }
                Trigger::Group(group) => {
                    if group
                        .all_of
                        .iter()
                        .all(|condition| condition_holds(condition, context))
                    {
                        evidence.record(&group.reason, group.signal(), group.all_of.iter());
                    }
                }
            }
        }

        (evidence.tally.strong + evidence.tally.weak > 0).then_some(evidence)
    }

    fn record<'a>(
        &mut self,
        reason: &str,
        signal: SignalStrength,
        conditions: impl IntoIterator<Item = &'a Condition>,
    ) {
        match signal {
            SignalStrength::Strong => self.tally.strong += 1,
            SignalStrength::Weak => self.tally.weak += 1,
        }
        if !self.reasons.iter().any(|existing| existing == reason) {
            self.reasons.push(reason.to_string());
        }
        for condition in conditions {
            let descriptor = MatchedCondition::from(condition);
            if !self.matched.contains(&descriptor) {
                self.matched.push(descriptor);
            }
        }
    }
}
