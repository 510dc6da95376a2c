//! Wire shapes of the catalog document before validation.

use serde::Deserialize;
use serde_json::Value;

use super::{PenaltyKind, SignalStrength};
use crate::insights::scope::Scope;

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogDocument {
    pub rules: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RuleSpec {
    pub id: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    pub priority: Option<i64>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, alias = "explanation")]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub base_confidence: Option<f64>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub quality: Vec<QualitySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TriggerSpec {
    Group(GroupSpec),
    Single(ConditionSpec),
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupSpec {
    pub all_of: Vec<ConditionSpec>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConditionSpec {
    pub field: String,
    pub op: OperatorSpec,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub signal: Option<SignalStrength>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QualitySpec {
    #[serde(flatten)]
    pub condition: ConditionSpec,
    pub penalty: PenaltyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OperatorSpec {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Contains,
    Present,
    Absent,
}

impl OperatorSpec {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
            Self::Contains => "contains",
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}
