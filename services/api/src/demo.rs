use chrono::{DateTime, Duration, Utc};
use clap::Args;
use insight_engine::error::AppError;
use insight_engine::insights::{
    ContextSnapshot, EngineSettings, FeedbackIndex, FeedbackRecord, InsightEngine, Match,
    RuleCatalog, Scope, ScreenRequest,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Evaluation time (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Skip the feedback suppression walkthrough.
    #[arg(long)]
    pub(crate) skip_feedback: bool,
}

struct Scenario {
    title: &'static str,
    context: serde_json::Value,
}

fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            title: "Low mood rating",
            context: json!({"mood": {"latest": 2}}),
        },
        Scenario {
            title: "Stress tag without ratings",
            context: json!({"mood": {"tags": ["stressed"]}}),
        },
        Scenario {
            title: "Short nights",
            context: json!({"sleep": {"lastNightHours": 5.5, "avg7dHours": 6.0}}),
        },
        Scenario {
            title: "Healthy week",
            context: json!({
                "mood": {"latest": 4},
                "sleep": {"lastNightHours": 7.5},
                "meds": {"adherencePct7d": 90}
            }),
        },
        Scenario {
            title: "Only medication guidance available",
            context: json!({"meds": {"adherencePct7d": 60, "missedDoses3d": 2}}),
        },
    ]
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { now, skip_feedback } = args;
    let now = now.unwrap_or_else(Utc::now);

    let engine = InsightEngine::new(Arc::new(RuleCatalog::builtin()?), EngineSettings::default());
    println!(
        "Insight engine demo ({} bundled rules, evaluated at {})",
        engine.catalog().len(),
        now.to_rfc3339()
    );

    for scenario in scenarios() {
        let context: ContextSnapshot = serde_json::from_value(scenario.context)?;
        let matches = engine.evaluate(&context, None, now);

        println!("\n{}", scenario.title);
        if matches.is_empty() {
            println!("- no rule matched");
        }
        for matched in &matches {
            render_match(matched);
        }

        println!("  Per screen:");
        for scope in Scope::ordered() {
            let request = ScreenRequest::for_screen(scope.label());
            let picked = engine.selector().pick(&matches, &request);
            println!(
                "    - {:<9} -> {}{}",
                scope.label(),
                picked.rule_id,
                if picked.is_fallback { " (fallback)" } else { "" }
            );
        }
    }

    if skip_feedback {
        return Ok(());
    }

    println!("\nFeedback suppression walkthrough");
    let context: ContextSnapshot = serde_json::from_value(json!({
        "mood": {"latest": 2},
        "sleep": {"lastNightHours": 5}
    }))?;
    let mood_screen = ScreenRequest::for_screen("mood");
    let feedback = FeedbackIndex::from_rows(vec![FeedbackRecord {
        rule_id: "stress_mood".to_string(),
        helpful: false,
        reason: Some("not relevant".to_string()),
        created_at: now,
    }]);

    let checkpoints = [
        ("before feedback", None, now),
        ("right after 'not relevant'", Some(&feedback), now),
        ("one day later", Some(&feedback), now + Duration::hours(24)),
    ];
    for (label, index, at) in checkpoints {
        let picked = engine.pick(&context, index, at, &mood_screen);
        println!(
            "- {:<28} mood screen shows {} ({:.2})",
            label, picked.rule_id, picked.confidence
        );
    }

    Ok(())
}

fn render_match(matched: &Match) {
    println!(
        "- {} | priority {} | confidence {:.2}",
        matched.rule_id, matched.priority, matched.confidence
    );
    println!("  {}", matched.message);
    println!("  reasons: {}", matched.reasons.join(", "));
}
