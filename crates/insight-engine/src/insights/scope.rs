use std::fmt;

use serde::{Deserialize, Serialize};

/// Screen/context a piece of guidance is relevant to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Sleep,
    Mood,
    Meds,
    Dashboard,
    Global,
}

impl Scope {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Sleep,
            Self::Mood,
            Self::Meds,
            Self::Dashboard,
            Self::Global,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Mood => "mood",
            Self::Meds => "meds",
            Self::Dashboard => "dashboard",
            Self::Global => "global",
        }
    }

    /// Lenient parse used for caller-supplied preference lists.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sleep" => Some(Self::Sleep),
            "mood" => Some(Self::Mood),
            "meds" | "med" | "medication" | "medications" => Some(Self::Meds),
            "dashboard" | "home" | "today" => Some(Self::Dashboard),
            "global" => Some(Self::Global),
            _ => None,
        }
    }

    /// Classifies a free-text source tag when a rule carries no scope metadata.
    pub fn infer_from_tag(tag: &str) -> Self {
        let lowered = tag.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect();

        if ["sleep", "circadian", "bedtime"]
            .iter()
            .any(|keyword| lowered.contains(keyword))
            || tokens.iter().any(|token| *token == "nap" || *token == "naps")
        {
            Self::Sleep
        } else if tokens.iter().any(|token| {
            (token.contains("med") && !token.contains("meditat"))
                || token.contains("adherence")
                || token.contains("pill")
                || token.starts_with("dose")
                || token.starts_with("dosage")
        }) {
            Self::Meds
        } else if ["mood", "anxiety", "anxious", "stress"]
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            Self::Mood
        } else if ["dashboard", "today"]
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            Self::Dashboard
        } else {
            Self::Global
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
