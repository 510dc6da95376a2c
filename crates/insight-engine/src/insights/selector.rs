use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::matcher::Match;
use super::scope::Scope;

/// What a screen asks of the selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRequest {
    #[serde(default)]
    pub preferred_scopes: Vec<Scope>,
    #[serde(default)]
    pub allow_global_fallback: bool,
    #[serde(default)]
    pub dashboard_first: bool,
}

impl ScreenRequest {
    pub fn new(preferred_scopes: Vec<Scope>) -> Self {
        Self {
            preferred_scopes,
            allow_global_fallback: false,
            dashboard_first: false,
        }
    }

    pub fn with_global_fallback(mut self, allow: bool) -> Self {
        self.allow_global_fallback = allow;
        self
    }

    pub fn with_dashboard_first(mut self, dashboard_first: bool) -> Self {
        self.dashboard_first = dashboard_first;
        self
    }

    /// Preset preference order for a named screen. Unknown names get no preferred scope
    /// and accept global guidance.
    pub fn for_screen(name: &str) -> Self {
        use Scope::*;

        match Scope::parse(name) {
            Some(Sleep) => Self::new(vec![Sleep, Meds, Mood, Dashboard, Global]),
            Some(Mood) => Self::new(vec![Mood, Sleep, Meds, Dashboard, Global]),
            Some(Meds) => Self::new(vec![Meds, Sleep, Mood, Dashboard, Global]),
            Some(Dashboard) => {
                Self::new(vec![Dashboard, Mood, Sleep, Meds, Global]).with_dashboard_first(true)
            }
            Some(Global) | None => Self::new(Vec::new()).with_global_fallback(true),
        }
    }
}

/// Picks exactly one match for a screen, synthesizing a fallback when nothing fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSelector {
    fallback_confidence: f64,
}

impl Default for ScopeSelector {
    fn default() -> Self {
        Self::new(0.2)
    }
}

pub const UNIVERSAL_FALLBACK_ID: &str = "fallback_universal";
const CONTEXTUAL_FALLBACK_PRIORITY: i32 = -1;
const UNIVERSAL_FALLBACK_PRIORITY: i32 = -100;

impl ScopeSelector {
    pub fn new(fallback_confidence: f64) -> Self {
        Self {
            fallback_confidence,
        }
    }

    pub fn pick(&self, matches: &[Match], request: &ScreenRequest) -> Match {
        let tagged = |scope: Scope| {
            matches
                .iter()
                .find(|candidate| effective_scopes(candidate).contains(&scope))
        };

        if request.dashboard_first {
            let dashboard = matches.iter().find(|candidate| {
                let scopes = effective_scopes(candidate);
                scopes.contains(&Scope::Dashboard)
                    || (request.allow_global_fallback && scopes.contains(&Scope::Global))
            });
            if let Some(found) = dashboard {
                return found.clone();
            }
        }

        if let Some(found) = request.preferred_scopes.iter().find_map(|scope| tagged(*scope)) {
            return found.clone();
        }

        if request.allow_global_fallback {
            if let Some(found) = tagged(Scope::Global) {
                return found.clone();
            }
        }

        self.fallback(request)
    }

    /// Universal when global guidance is allowed or no scope is known, contextual otherwise.
    pub fn fallback(&self, request: &ScreenRequest) -> Match {
        match request.preferred_scopes.first() {
            Some(scope) if !request.allow_global_fallback => self.contextual_fallback(*scope),
            _ => self.universal_fallback(),
        }
    }

    pub fn contextual_fallback(&self, scope: Scope) -> Match {
        let message = match scope {
            Scope::Mood => {
                "Check in with how you're feeling today. Small notes add up to clearer patterns."
            }
            Scope::Sleep => "A steady wind-down routine tonight sets up better rest.",
            Scope::Meds => "Logging doses as you take them keeps your routine on track.",
            Scope::Dashboard => {
                "You're building a helpful picture of your week. Keep checking in."
            }
            Scope::Global => "Small, consistent check-ins make your guidance sharper.",
        };
        self.synthesize(
            format!("fallback_{scope}"),
            message,
            CONTEXTUAL_FALLBACK_PRIORITY,
            scope,
        )
    }

    pub fn universal_fallback(&self) -> Match {
        self.synthesize(
            UNIVERSAL_FALLBACK_ID.to_string(),
            "Keep logging for better guidance.",
            UNIVERSAL_FALLBACK_PRIORITY,
            Scope::Global,
        )
    }

    fn synthesize(&self, rule_id: String, message: &str, priority: i32, scope: Scope) -> Match {
        Match {
            rule_id,
            message: message.to_string(),
            action: None,
            priority,
            confidence: self.fallback_confidence,
            reasons: Vec::new(),
            matched: Vec::new(),
            scopes: vec![scope],
            source_tag: None,
            is_fallback: true,
        }
    }
}

/// Scope tags of a match, inferred from its source tag and then its rule id when the rule
/// carried none.
pub fn effective_scopes(candidate: &Match) -> Cow<'_, [Scope]> {
    if !candidate.scopes.is_empty() {
        return Cow::Borrowed(candidate.scopes.as_slice());
    }

    let inferred = candidate
        .source_tag
        .as_deref()
        .map(Scope::infer_from_tag)
        .filter(|scope| *scope != Scope::Global)
        .unwrap_or_else(|| Scope::infer_from_tag(&candidate.rule_id));
    Cow::Owned(vec![inferred])
}
