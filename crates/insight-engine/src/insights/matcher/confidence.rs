use crate::insights::catalog::{PenaltyKind, Rule};

/// Tunable constants for confidence scoring.
///
/// The defaults keep the penalty ordering numeric-signal-missing > single-weak-signal-only >
/// sparse sample > unknown status; the exact values are empirical.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceTuning {
    pub base: f64,
    pub numeric_missing_penalty: f64,
    pub weak_only_cap: f64,
    pub single_weak_penalty: f64,
    pub corroboration_bonus: f64,
    pub sparse_sample_penalty: f64,
    pub unknown_status_penalty: f64,
    pub missing_count_penalty: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for ConfidenceTuning {
    fn default() -> Self {
        Self {
            base: 0.8,
            numeric_missing_penalty: 0.2,
            weak_only_cap: 0.6,
            single_weak_penalty: 0.15,
            corroboration_bonus: 0.05,
            sparse_sample_penalty: 0.12,
            unknown_status_penalty: 0.1,
            missing_count_penalty: 0.1,
            floor: 0.2,
            ceiling: 0.9,
        }
    }
}

impl ConfidenceTuning {
    pub fn penalty(&self, kind: PenaltyKind) -> f64 {
        match kind {
            PenaltyKind::SparseSample => self.sparse_sample_penalty,
            PenaltyKind::UnknownStatus => self.unknown_status_penalty,
            PenaltyKind::MissingCount => self.missing_count_penalty,
        }
    }
}

/// Count of fired signals by strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalTally {
    pub strong: usize,
    pub weak: usize,
}

/// Data-quality finding raised by a rule's quality check.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityFinding {
    pub penalty: PenaltyKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceScore {
    pub value: f64,
    /// Reason codes the scorer adds on top of the fired conditions.
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    tuning: ConfidenceTuning,
}

impl ConfidenceScorer {
    pub fn new(tuning: ConfidenceTuning) -> Self {
        Self { tuning }
    }

    /// Scores a fired rule. The result is clamped to `[floor, ceiling]` and rounded to two
    /// decimals so equal inputs always yield bit-identical output.
    pub fn score(
        &self,
        rule: &Rule,
        tally: SignalTally,
        findings: &[QualityFinding],
    ) -> ConfidenceScore {
        let tuning = &self.tuning;
        let mut reasons = Vec::new();
        let mut value = rule.base_confidence.unwrap_or(tuning.base);

        if tally.strong == 0 {
            value = (value - tuning.numeric_missing_penalty).min(tuning.weak_only_cap);
            reasons.push(rule.sparse_reason());
            if tally.weak <= 1 {
                value -= tuning.single_weak_penalty;
            }
        } else {
            value += tuning.corroboration_bonus * (tally.strong - 1) as f64;
        }

        for finding in findings {
            value -= tuning.penalty(finding.penalty);
            if !reasons.contains(&finding.reason) {
                reasons.push(finding.reason.clone());
            }
        }

        let value = value.clamp(tuning.floor, tuning.ceiling);
        ConfidenceScore {
            value: (value * 100.0).round() / 100.0,
            reasons,
        }
    }

    /// Confidence reported for synthesized fallbacks.
    pub fn floor(&self) -> f64 {
        self.tuning.floor
    }
}
