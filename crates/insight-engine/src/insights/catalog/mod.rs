//! Declarative rule catalog: loading, validation and the typed rule model.
//!
//! A catalog is a JSON document `{ "rules": [...] }`. Each rule is validated on its own so a
//! single malformed entry is logged and skipped instead of rejecting the whole catalog. Only
//! document-level problems (unreadable file, invalid JSON, missing `rules` array) are errors.

mod schema;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::context::FieldPath;
use super::scope::Scope;
use schema::{CatalogDocument, ConditionSpec, OperatorSpec, RuleSpec, TriggerSpec};

const BUILTIN_RULES: &str = include_str!("builtin_rules.json");

/// How strongly a fired condition supports a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    /// A numeric threshold crossing or an explicit flag.
    Strong,
    /// Free-text or presence evidence that needs corroboration.
    Weak,
}

/// Data-quality issue a quality check reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    SparseSample,
    UnknownStatus,
    MissingCount,
}

/// Literal compared by `eq`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Operator {
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    Eq(Literal),
    /// Normalized needles; any needle contained in any tag satisfies the condition.
    Contains(Vec<String>),
    Present,
    Absent,
}

impl Operator {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Eq(_) => "eq",
            Self::Contains(_) => "contains",
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }

    /// Threshold or comparison value as it appears in match descriptors.
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::Lt(threshold) | Self::Lte(threshold) | Self::Gt(threshold) | Self::Gte(threshold) => {
                Some(Value::from(*threshold))
            }
            Self::Eq(Literal::Bool(flag)) => Some(Value::from(*flag)),
            Self::Eq(Literal::Number(number)) => Some(Value::from(*number)),
            Self::Eq(Literal::Text(text)) => Some(Value::from(text.clone())),
            Self::Contains(needles) => Some(Value::from(needles.clone())),
            Self::Present | Self::Absent => None,
        }
    }
}

/// One field/operator/value test carrying its reason code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub field: FieldPath,
    #[serde(flatten)]
    pub operator: Operator,
    pub reason: String,
    pub signal: SignalStrength,
}

/// Explicit conjunctive group; holds only when every member holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionGroup {
    pub all_of: Vec<Condition>,
    pub reason: String,
}

impl ConditionGroup {
    pub fn signal(&self) -> SignalStrength {
        if self
            .all_of
            .iter()
            .any(|condition| condition.signal == SignalStrength::Strong)
        {
            SignalStrength::Strong
        } else {
            SignalStrength::Weak
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Trigger {
    Group(ConditionGroup),
    Single(Condition),
}

/// Condition that lowers confidence when it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityCheck {
    #[serde(flatten)]
    pub condition: Condition,
    pub penalty: PenaltyKind,
}

/// Validated, immutable rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub priority: i32,
    pub scopes: Vec<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_confidence: Option<f64>,
    pub triggers: Vec<Trigger>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quality: Vec<QualityCheck>,
}

impl Rule {
    /// Reason appended when the rule fired on weak evidence only.
    pub fn sparse_reason(&self) -> String {
        format!("{}_sparse_data", self.domain.as_deref().unwrap_or(&self.id))
    }
}

/// Why a catalog entry was skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleDefect {
    #[error("rule is not a valid rule object: {0}")]
    Malformed(String),
    #[error("rule is missing an id")]
    MissingId,
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),
    #[error("rule has an empty message")]
    EmptyMessage,
    #[error("rule is missing a priority")]
    MissingPriority,
    #[error("priority {0} is out of range")]
    PriorityOutOfRange(i64),
    #[error("rule has no trigger conditions")]
    NoTriggers,
    #[error("unknown field path '{0}'")]
    UnknownField(String),
    #[error("operator '{op}' on '{field}' requires {expected}")]
    InvalidValue {
        field: String,
        op: &'static str,
        expected: &'static str,
    },
    #[error("base confidence {0} must be within (0, 1]")]
    BaseConfidenceOutOfRange(f64),
    #[error("trigger on '{0}' uses 'absent', which cannot be evidence on its own")]
    AbsentTrigger(String),
    #[error("all_of group is empty")]
    EmptyGroup,
    #[error("all_of group needs at least one condition on a present value")]
    GroupWithoutEvidence,
}

/// Catalog entry that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRule {
    pub index: usize,
    pub id: Option<String>,
    pub defect: RuleDefect,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unable to read rule catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rule catalog is not a valid document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result of loading a catalog: the accepted rules plus the skipped entries.
#[derive(Debug, Clone)]
pub struct CatalogLoad {
    pub catalog: RuleCatalog,
    pub rejected: Vec<RejectedRule>,
}

/// Immutable list of validated rules, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
}

impl RuleCatalog {
    /// Catalog bundled with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_RULES).map(|load| load.catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<CatalogLoad, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let load = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            accepted = load.catalog.len(),
            rejected = load.rejected.len(),
            "rule catalog loaded"
        );
        Ok(load)
    }

    pub fn from_json_str(raw: &str) -> Result<CatalogLoad, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(raw)?;

        let mut rules = Vec::with_capacity(document.rules.len());
        let mut rejected = Vec::new();
        let mut seen_ids = HashSet::new();

        for (index, entry) in document.rules.into_iter().enumerate() {
            let declared_id = entry
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);

            let outcome = serde_json::from_value::<RuleSpec>(entry)
                .map_err(|err| RuleDefect::Malformed(err.to_string()))
                .and_then(validate_rule)
                .and_then(|rule| {
                    if seen_ids.insert(rule.id.clone()) {
                        Ok(rule)
                    } else {
                        Err(RuleDefect::DuplicateId(rule.id))
                    }
                });

            match outcome {
                Ok(rule) => rules.push(rule),
                Err(defect) => {
                    warn!(index, id = ?declared_id, %defect, "skipping malformed rule");
                    rejected.push(RejectedRule {
                        index,
                        id: declared_id,
                        defect,
                    });
                }
            }
        }

        Ok(CatalogLoad {
            catalog: Self { rules },
            rejected,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn validate_rule(spec: RuleSpec) -> Result<Rule, RuleDefect> {
    let id = spec
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(RuleDefect::MissingId)?;

    let message = spec
        .message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .ok_or(RuleDefect::EmptyMessage)?;

    let priority = spec.priority.ok_or(RuleDefect::MissingPriority)?;
    let priority = i32::try_from(priority).map_err(|_| RuleDefect::PriorityOutOfRange(priority))?;

    if let Some(base) = spec.base_confidence {
        if !(base > 0.0 && base <= 1.0) {
            return Err(RuleDefect::BaseConfidenceOutOfRange(base));
        }
    }

    if spec.triggers.is_empty() {
        return Err(RuleDefect::NoTriggers);
    }

    let mut triggers = Vec::with_capacity(spec.triggers.len());
    for trigger in spec.triggers {
        triggers.push(match trigger {
            TriggerSpec::Single(condition) => {
                let condition = build_condition(condition)?;
                if condition.operator == Operator::Absent {
                    return Err(RuleDefect::AbsentTrigger(condition.field.to_string()));
                }
                Trigger::Single(condition)
            }
            TriggerSpec::Group(group) => {
                if group.all_of.is_empty() {
                    return Err(RuleDefect::EmptyGroup);
                }
                let all_of = group
                    .all_of
                    .into_iter()
                    .map(build_condition)
                    .collect::<Result<Vec<_>, _>>()?;
                if all_of
                    .iter()
                    .all(|condition| condition.operator == Operator::Absent)
                {
                    return Err(RuleDefect::GroupWithoutEvidence);
                }
                let reason = group.reason.unwrap_or_else(|| {
                    all_of
                        .iter()
                        .map(|condition| condition.reason.as_str())
                        .collect::<Vec<_>>()
                        .join("_and_")
                });
                Trigger::Group(ConditionGroup { all_of, reason })
            }
        });
    }

    let quality = spec
        .quality
        .into_iter()
        .map(|check| {
            build_condition(check.condition).map(|condition| QualityCheck {
                condition,
                penalty: check.penalty,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut scopes = Vec::with_capacity(spec.scopes.len());
    for scope in spec.scopes {
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }

    Ok(Rule {
        id,
        message,
        action: spec.action.filter(|action| !action.trim().is_empty()),
        priority,
        scopes,
        domain: spec.domain.filter(|domain| !domain.trim().is_empty()),
        source_tag: spec.source_tag.filter(|tag| !tag.trim().is_empty()),
        base_confidence: spec.base_confidence,
        triggers,
        quality,
    })
}

fn build_condition(spec: ConditionSpec) -> Result<Condition, RuleDefect> {
    let field = FieldPath::parse(&spec.field).ok_or_else(|| RuleDefect::UnknownField(spec.field.clone()))?;
    let op = spec.op;
    let invalid = |expected: &'static str| RuleDefect::InvalidValue {
        field: field.to_string(),
        op: op.label(),
        expected,
    };

    let operator = match op {
        OperatorSpec::Lt | OperatorSpec::Lte | OperatorSpec::Gt | OperatorSpec::Gte => {
            let threshold = spec
                .value
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| invalid("a numeric value"))?;
            match op {
                OperatorSpec::Lt => Operator::Lt(threshold),
                OperatorSpec::Lte => Operator::Lte(threshold),
                OperatorSpec::Gt => Operator::Gt(threshold),
                _ => Operator::Gte(threshold),
            }
        }
        OperatorSpec::Eq => match spec.value {
            Some(Value::Bool(flag)) => Operator::Eq(Literal::Bool(flag)),
            Some(Value::Number(number)) => Operator::Eq(Literal::Number(
                number.as_f64().ok_or_else(|| invalid("a finite number"))?,
            )),
            Some(Value::String(text)) => Operator::Eq(Literal::Text(text)),
            _ => return Err(invalid("a boolean, number or string value")),
        },
        OperatorSpec::Contains => {
            let needles: Vec<String> = match spec.value {
                Some(Value::String(text)) => vec![text],
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(text) => Ok(text),
                        _ => Err(invalid("strings")),
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err(invalid("a string or list of strings")),
            };
            let needles: Vec<String> = needles
                .iter()
                .map(|needle| normalize_text(needle))
                .filter(|needle| !needle.is_empty())
                .collect();
            if needles.is_empty() {
                return Err(invalid("at least one non-empty string"));
            }
            Operator::Contains(needles)
        }
        OperatorSpec::Present => Operator::Present,
        OperatorSpec::Absent => Operator::Absent,
    };

    let signal = spec.signal.unwrap_or(match operator {
        Operator::Contains(_) | Operator::Present | Operator::Absent => SignalStrength::Weak,
        _ => SignalStrength::Strong,
    });

    let reason = spec
        .reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| format!("{}_{}", field.as_str().replace('.', "_"), op.label()));

    Ok(Condition {
        field,
        operator,
        reason,
        signal,
    })
}

/// Lowercases and collapses whitespace, hyphens and underscores to single spaces.
pub(crate) fn normalize_text(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads_without_rejections() {
        let load = RuleCatalog::from_json_str(BUILTIN_RULES).expect("builtin parses");
        assert!(load.rejected.is_empty(), "rejected: {:?}", load.rejected);
        assert!(load.catalog.get("stress_mood").is_some());
        assert!(load.catalog.get("sleep").is_some());
        assert!(load.catalog.get("meds_adherence").is_some());
    }

    #[test]
    fn skips_malformed_rules_and_keeps_the_rest() {
        let raw = r#"{
            "rules": [
                {"id": "ok", "message": "fine", "priority": 1, "scopes": ["mood"],
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 3}]},
                {"id": "no_priority", "message": "x",
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 3}]},
                {"id": "no_triggers", "message": "x", "priority": 1, "triggers": []},
                {"id": "bad_field", "message": "x", "priority": 1,
                 "triggers": [{"field": "mood.energy", "op": "lt", "value": 3}]},
                {"id": "bad_value", "message": "x", "priority": 1,
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": "low"}]},
                {"id": "ok", "message": "duplicate", "priority": 1,
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 2}]},
                {"id": "  ", "message": "x", "priority": 1,
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 2}]},
                {"id": "empty_message", "message": " ", "priority": 1,
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 2}]},
                {"id": "bad_scope", "message": "x", "priority": 1, "scopes": ["journal"],
                 "triggers": [{"field": "mood.latest", "op": "lt", "value": 2}]},
                "not an object"
            ]
        }"#;

        let load = RuleCatalog::from_json_str(raw).expect("document parses");

        assert_eq!(load.catalog.len(), 1);
        assert_eq!(load.catalog.rules()[0].message, "fine");
        let defects: Vec<&RuleDefect> = load.rejected.iter().map(|r| &r.defect).collect();
        assert_eq!(defects.len(), 9);
        assert!(matches!(defects[0], RuleDefect::MissingPriority));
        assert!(matches!(defects[1], RuleDefect::NoTriggers));
        assert!(matches!(defects[2], RuleDefect::UnknownField(_)));
        assert!(matches!(defects[3], RuleDefect::InvalidValue { .. }));
        assert!(matches!(defects[4], RuleDefect::DuplicateId(id) if id == "ok"));
        assert!(matches!(defects[5], RuleDefect::MissingId));
        assert!(matches!(defects[6], RuleDefect::EmptyMessage));
        assert!(matches!(defects[7], RuleDefect::Malformed(_)));
        assert!(matches!(defects[8], RuleDefect::Malformed(_)));
        assert_eq!(load.rejected[0].id.as_deref(), Some("no_priority"));
    }

    #[test]
    fn rejects_absent_only_evidence() {
        let raw = r#"{
            "rules": [
                {"id": "absent_trigger", "message": "x", "priority": 1,
                 "triggers": [{"field": "mood.latest", "op": "absent"}]},
                {"id": "absent_group", "message": "x", "priority": 1,
                 "triggers": [{"all_of": [{"field": "mood.latest", "op": "absent"}]}]},
                {"id": "empty_group", "message": "x", "priority": 1,
                 "triggers": [{"all_of": []}]},
                {"id": "mixed_group", "message": "x", "priority": 1,
                 "triggers": [{"all_of": [
                    {"field": "mood.latest", "op": "absent"},
                    {"field": "mood.tags", "op": "contains", "value": "tired"}
                 ]}]}
            ]
        }"#;

        let load = RuleCatalog::from_json_str(raw).expect("document parses");

        assert_eq!(load.catalog.len(), 1);
        assert!(load.catalog.get("mixed_group").is_some());
        assert!(matches!(load.rejected[0].defect, RuleDefect::AbsentTrigger(_)));
        assert!(matches!(load.rejected[1].defect, RuleDefect::GroupWithoutEvidence));
        assert!(matches!(load.rejected[2].defect, RuleDefect::EmptyGroup));
    }

    #[test]
    fn document_without_rules_array_is_an_error() {
        assert!(matches!(
            RuleCatalog::from_json_str(r#"{"version": 2}"#),
            Err(CatalogError::Parse(_))
        ));
        assert!(matches!(
            RuleCatalog::from_json_str("not json"),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn infers_signal_strength_and_default_reasons() {
        let raw = r#"{
            "rules": [
                {"id": "r", "message": "x", "priority": 1, "triggers": [
                    {"field": "mood.latest", "op": "lt", "value": 3},
                    {"field": "mood.tags", "op": "contains", "value": ["Burned-Out", " "]},
                    {"field": "flags.stress", "op": "eq", "value": true, "signal": "weak", "reason": "stress_flag"}
                ]}
            ]
        }"#;

        let load = RuleCatalog::from_json_str(raw).expect("document parses");
        let rule = load.catalog.get("r").expect("rule kept");

        let conditions: Vec<&Condition> = rule
            .triggers
            .iter()
            .filter_map(|trigger| match trigger {
                Trigger::Single(condition) => Some(condition),
                Trigger::Group(_) => None,
            })
            .collect();
        assert_eq!(conditions[0].signal, SignalStrength::Strong);
        assert_eq!(conditions[0].reason, "mood_latest_lt");
        assert_eq!(conditions[1].signal, SignalStrength::Weak);
        assert_eq!(
            conditions[1].operator,
            Operator::Contains(vec!["burned out".to_string()])
        );
        assert_eq!(conditions[2].signal, SignalStrength::Weak);
        assert_eq!(conditions[2].reason, "stress_flag");
        assert_eq!(rule.sparse_reason(), "r_sparse_data");
    }

    #[test]
    fn normalizes_case_whitespace_and_hyphens() {
        assert_eq!(normalize_text("  Burned-out\tand   Tired "), "burned out and tired");
        assert_eq!(normalize_text("over_whelmed"), "over whelmed");
    }
}
