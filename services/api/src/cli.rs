use crate::demo::{run_demo, DemoArgs};
use crate::infra::{build_engine, read_context, read_feedback};
use crate::server;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use insight_engine::config::{AppConfig, EngineConfig};
use insight_engine::error::AppError;
use insight_engine::insights::{
    ContextSnapshot, FeedbackIndex, InsightEngine, RuleCatalog, Scope, ScreenRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "Insight Engine",
    about = "Evaluate wellness insight rules and serve them over HTTP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Evaluate a context file and print the ranked matches
    Evaluate(EvaluateArgs),
    /// Pick the single insight a screen would show for a context file
    Pick(PickArgs),
    /// Inspect rule catalogs
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Walk through the bundled scenarios end to end
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Load a catalog and report every rejected entry
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Rule catalog to serve instead of the bundled rules
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    /// Context snapshot (JSON)
    #[arg(long)]
    context: PathBuf,
    /// Feedback export (CSV, JSON rows or JSON latest-by-id map)
    #[arg(long)]
    feedback: Option<PathBuf>,
    /// Rule catalog overriding INSIGHT_RULES_PATH
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Evaluation time (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    now: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub(crate) struct PickArgs {
    #[command(flatten)]
    evaluation: EvaluateArgs,
    /// Screen preset (sleep, mood, meds, dashboard)
    #[arg(long, conflicts_with = "scopes")]
    screen: Option<String>,
    /// Explicit preferred scopes, in order
    #[arg(long = "scope", value_delimiter = ',')]
    scopes: Vec<String>,
    /// Accept global guidance when no preferred scope matches
    #[arg(long)]
    allow_global: bool,
    /// Prefer dashboard-tagged matches
    #[arg(long)]
    dashboard_first: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    /// Catalog to validate. Defaults to INSIGHT_RULES_PATH, then the bundled rules.
    #[arg(long)]
    rules: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Evaluate(args) => run_evaluate(args),
        Command::Pick(args) => run_pick(args),
        Command::Rules {
            command: RulesCommand::Validate(args),
        } => run_validate(args),
        Command::Demo(args) => run_demo(args),
    }
}

struct Loaded {
    engine: Arc<InsightEngine>,
    context: ContextSnapshot,
    feedback: Option<FeedbackIndex>,
    now: DateTime<Utc>,
}

fn load(args: &EvaluateArgs) -> Result<Loaded, AppError> {
    let config = AppConfig::load()?;
    load_with(&config.engine, args)
}

fn load_with(config: &EngineConfig, args: &EvaluateArgs) -> Result<Loaded, AppError> {
    let engine = build_engine(config, args.rules.as_deref())?;
    let context = read_context(&args.context)?;
    let feedback = args.feedback.as_deref().map(read_feedback).transpose()?;

    Ok(Loaded {
        engine,
        context,
        feedback,
        now: args.now.unwrap_or_else(Utc::now),
    })
}

fn run_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let loaded = load(&args)?;
    let matches = loaded
        .engine
        .evaluate(&loaded.context, loaded.feedback.as_ref(), loaded.now);
    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}

fn run_pick(args: PickArgs) -> Result<(), AppError> {
    let request = screen_request(&args)?;
    let loaded = load(&args.evaluation)?;
    let insight = loaded.engine.pick(
        &loaded.context,
        loaded.feedback.as_ref(),
        loaded.now,
        &request,
    );
    println!("{}", serde_json::to_string_pretty(&insight)?);
    Ok(())
}

fn screen_request(args: &PickArgs) -> Result<ScreenRequest, AppError> {
    if let Some(screen) = &args.screen {
        let preset = ScreenRequest::for_screen(screen);
        let allow_global = preset.allow_global_fallback || args.allow_global;
        let dashboard_first = preset.dashboard_first || args.dashboard_first;
        return Ok(preset
            .with_global_fallback(allow_global)
            .with_dashboard_first(dashboard_first));
    }

    let scopes = args
        .scopes
        .iter()
        .map(|raw| {
            Scope::parse(raw).ok_or_else(|| AppError::Input(format!("unknown scope '{raw}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ScreenRequest::new(scopes)
        .with_global_fallback(args.allow_global)
        .with_dashboard_first(args.dashboard_first))
}

fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let Some(path) = args.rules.or(config.engine.rules_path) else {
        let catalog = RuleCatalog::builtin()?;
        println!("Bundled catalog: {} rules accepted", catalog.len());
        return Ok(());
    };

    validate_file(&path)
}

fn validate_file(path: &Path) -> Result<(), AppError> {
    let load = RuleCatalog::from_path(path)?;
    println!(
        "{}: {} accepted, {} rejected",
        path.display(),
        load.catalog.len(),
        load.rejected.len()
    );
    for rule in load.catalog.rules() {
        println!("  ok   {} (priority {})", rule.id, rule.priority);
    }
    for rejected in &load.rejected {
        println!(
            "  skip #{} {}: {}",
            rejected.index,
            rejected.id.as_deref().unwrap_or("<no id>"),
            rejected.defect
        );
    }

    if load.rejected.is_empty() {
        Ok(())
    } else {
        Err(AppError::Input(format!(
            "{} rule(s) rejected in {}",
            load.rejected.len(),
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick_args(argv: &[&str]) -> PickArgs {
        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            pick: PickArgs,
        }
        Harness::parse_from(std::iter::once("pick").chain(argv.iter().copied())).pick
    }

    #[test]
    fn explicit_scopes_keep_their_order() {
        let args = pick_args(&["--context", "ctx.json", "--scope", "meds,sleep", "--allow-global"]);
        let request = screen_request(&args).expect("valid scopes");
        assert_eq!(request.preferred_scopes, vec![Scope::Meds, Scope::Sleep]);
        assert!(request.allow_global_fallback);
    }

    #[test]
    fn unknown_scope_is_an_input_error() {
        let args = pick_args(&["--context", "ctx.json", "--scope", "weather"]);
        assert!(matches!(screen_request(&args), Err(AppError::Input(_))));
    }

    #[test]
    fn screen_preset_is_used_when_given() {
        let args = pick_args(&["--context", "ctx.json", "--screen", "sleep"]);
        let request = screen_request(&args).expect("preset");
        assert_eq!(request, ScreenRequest::for_screen("sleep"));
    }

    #[test]
    fn preset_keeps_explicit_flags() {
        let args = pick_args(&["--context", "ctx.json", "--screen", "sleep", "--allow-global"]);
        let request = screen_request(&args).expect("preset");
        assert_eq!(request.preferred_scopes[0], Scope::Sleep);
        assert!(request.allow_global_fallback);
        assert!(!request.dashboard_first);
    }

    #[test]
    fn evaluation_follows_engine_config() {
        let dir = std::env::temp_dir();
        let context_path = dir.join(format!("insight-cli-{}-context.json", std::process::id()));
        let rules_path = dir.join(format!("insight-cli-{}-configured.json", std::process::id()));
        std::fs::write(
            &context_path,
            r#"{"mood": {"latest": 2}, "sleep": {"lastNightHours": 5}}"#,
        )
        .expect("write context");
        std::fs::write(
            &rules_path,
            r#"{"rules": [
                {"id": "low_mood", "priority": 5, "message": "low", "triggers": [{"field": "mood.latest", "op": "lt", "value": 3}]},
                {"id": "short_sleep", "priority": 4, "message": "short", "triggers": [{"field": "sleep.lastNightHours", "op": "lt", "value": 6}]}
            ]}"#,
        )
        .expect("write catalog");

        let args = EvaluateArgs {
            context: context_path.clone(),
            feedback: None,
            rules: None,
            now: None,
        };
        let config = EngineConfig {
            rules_path: Some(rules_path.clone()),
            max_matches: 1,
            ..EngineConfig::default()
        };
        let outcome = load_with(&config, &args).map(|loaded| {
            loaded
                .engine
                .evaluate(&loaded.context, None, loaded.now)
                .into_iter()
                .map(|found| found.rule_id)
                .collect::<Vec<_>>()
        });

        std::fs::remove_file(&context_path).ok();
        std::fs::remove_file(&rules_path).ok();
        assert_eq!(outcome.expect("configured engine"), vec!["low_mood".to_string()]);
    }

    #[test]
    fn validation_fails_when_a_rule_is_rejected() {
        let path = std::env::temp_dir().join(format!("insight-cli-{}-rules.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"rules": [
                {"id": "ok", "priority": 1, "message": "fine", "triggers": [{"field": "mood.latest", "op": "lt", "value": 3}]},
                {"id": "bad", "priority": 1, "message": "broken", "triggers": []}
            ]}"#,
        )
        .expect("write catalog");

        let outcome = validate_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(outcome, Err(AppError::Input(_))));
    }
}
