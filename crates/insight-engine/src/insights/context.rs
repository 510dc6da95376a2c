//! Point-in-time view of a user's recent mood, sleep and medication data.
//!
//! Snapshots are assembled by an external aggregator and treated as read-only input. Every
//! group and every field is optional; rule conditions address fields through dotted
//! [`FieldPath`]s such as `mood.latest` or `flags.stress`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated context evaluated by the rule matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<MoodContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepContext>,
    #[serde(default, alias = "medication", skip_serializing_if = "Option::is_none")]
    pub meds: Option<MedsContext>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodContext {
    /// Most recent rating on the 1-5 scale.
    #[serde(default)]
    pub latest: Option<f64>,
    /// Short-term trend as a signed percentage.
    #[serde(default)]
    pub trend_pct: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepContext {
    #[serde(default)]
    pub last_night_hours: Option<f64>,
    #[serde(default)]
    pub avg7d_hours: Option<f64>,
    /// Set when the 7-day window holds too few nights to trust the average.
    #[serde(default)]
    pub sparse: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedsContext {
    #[serde(default)]
    pub adherence_pct7d: Option<f64>,
    #[serde(default)]
    pub missed_doses3d: Option<u32>,
    #[serde(default)]
    pub unknown_status: Option<bool>,
}

/// Value resolved from a snapshot for one field path.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Number(f64),
    Bool(bool),
    Tags(&'a [String]),
}

/// Dotted address of a snapshot field, validated against the known schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldPath(String);

/// Fields a rule may reference besides `flags.<name>`.
pub const KNOWN_FIELDS: [&str; 9] = [
    "mood.latest",
    "mood.trendPct",
    "mood.tags",
    "sleep.lastNightHours",
    "sleep.avg7dHours",
    "sleep.sparse",
    "meds.adherencePct7d",
    "meds.missedDoses3d",
    "meds.unknownStatus",
];

const FLAG_PREFIX: &str = "flags.";

impl FieldPath {
    /// Returns `None` for paths outside the snapshot schema.
    pub fn parse(raw: &str) -> Option<Self> {
        let path = raw.trim();
        if KNOWN_FIELDS.contains(&path) {
            return Some(Self(path.to_string()));
        }
        match path.strip_prefix(FLAG_PREFIX) {
            Some(flag) if !flag.is_empty() && !flag.contains('.') => Some(Self(path.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group name, e.g. `mood` for `mood.latest`.
    pub fn group(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ContextSnapshot {
    /// Resolves a field, treating absent groups, absent fields and empty tag lists alike.
    pub fn lookup(&self, path: &FieldPath) -> Option<FieldValue<'_>> {
        if let Some(flag) = path.as_str().strip_prefix(FLAG_PREFIX) {
            return self.flags.get(flag).copied().map(FieldValue::Bool);
        }

        match path.as_str() {
            "mood.latest" => self.mood.as_ref()?.latest.map(FieldValue::Number),
            "mood.trendPct" => self.mood.as_ref()?.trend_pct.map(FieldValue::Number),
            "mood.tags" => {
                let tags = &self.mood.as_ref()?.tags;
                (!tags.is_empty()).then_some(FieldValue::Tags(tags.as_slice()))
            }
            "sleep.lastNightHours" => self.sleep.as_ref()?.last_night_hours.map(FieldValue::Number),
            "sleep.avg7dHours" => self.sleep.as_ref()?.avg7d_hours.map(FieldValue::Number),
            "sleep.sparse" => self.sleep.as_ref()?.sparse.map(FieldValue::Bool),
            "meds.adherencePct7d" => self.meds.as_ref()?.adherence_pct7d.map(FieldValue::Number),
            "meds.missedDoses3d" => self
                .meds
                .as_ref()?
                .missed_doses3d
                .map(|count| FieldValue::Number(f64::from(count))),
            "meds.unknownStatus" => self.meds.as_ref()?.unknown_status.map(FieldValue::Bool),
            _ => None,
        }
    }

    /// True when no field would resolve for any known path or flag.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
            && KNOWN_FIELDS
                .iter()
                .filter_map(|raw| FieldPath::parse(raw))
                .all(|path| self.lookup(&path).is_none())
    }
}
