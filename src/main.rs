//! pattern-advisor CLI
//!
//! Recommend automation patterns for a business process description.
//!
//! Run with: cargo run -- recommend "Route supplier invoices to approvers"
//! Logs go to stderr; set RUST_LOG=pattern_advisor=debug for detail.

use anyhow::{bail, Context, Result};
use pattern_advisor::{
    advisor::{Advisor, AdvisorReport},
    config::AdvisorConfig,
    decision::DecisionAction,
    decision_log,
    store::PatternStore,
    types::Requirement,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let config_path = take_option(&mut args, "--config");
    let config = AdvisorConfig::load(config_path.as_deref())?;

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }
    let command = args[1].clone();
    let rest = args[2..].to_vec();

    // The pipeline is blocking (SQLite, blocking HTTP); keep it off the runtime threads
    tokio::task::spawn_blocking(move || run_command(&command, &rest, config)).await?
}

fn run_command(command: &str, args: &[String], config: AdvisorConfig) -> Result<()> {
    let json_output = args.iter().any(|a| a == "--json");
    match command {
        "recommend" => {
            // recommend <text> [--json] [--domain=X] [--session=ID]
            let domain = flag_value(args, "--domain=");
            let session = flag_value(args, "--session=");
            let text = description(args);
            if text.trim().is_empty() {
                bail!("Usage: recommend <description> [--json] [--domain=X] [--session=ID]");
            }
            let mut requirement = Requirement::new(text);
            requirement.domain = domain;
            run_recommend(config, &requirement, session, json_output)
        }
        "--requirement" => {
            let Some(path) = first_positional(args) else {
                bail!("Usage: --requirement <file.json> [--json]");
            };
            let requirement = read_requirement(Path::new(path))?;
            run_recommend(config, &requirement, flag_value(args, "--session="), json_output)
        }
        "--batch" => {
            let Some(dir) = first_positional(args) else {
                bail!("Usage: --batch <dir> [--json]");
            };
            run_batch(config, Path::new(dir), json_output)
        }
        "--validate" => {
            let dir = first_positional(args)
                .map(PathBuf::from)
                .unwrap_or_else(|| config.pattern_dir.clone());
            run_validate(&dir, json_output)
        }
        "--reindex" => {
            let mut advisor = Advisor::open(config)?;
            let count = advisor.reindex()?;
            println!("Indexed {} pattern descriptions", count);
            Ok(())
        }
        "--stats" => run_stats(config, json_output),
        "--verify-log" => run_verify_log(&config),
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        s if !s.starts_with("--") => {
            // One-shot: the whole command line is the description
            let text = std::iter::once(s)
                .chain(positional(args))
                .collect::<Vec<_>>()
                .join(" ");
            run_recommend(config, &Requirement::new(text), None, json_output)
        }
        other => bail!("Unknown command {}. Try --help.", other),
    }
}

fn print_usage() {
    println!("pattern-advisor - automation pattern recommendations\n");
    println!("USAGE:");
    println!("  pattern-advisor recommend <description> [--json] [--domain=X] [--session=ID]");
    println!("  pattern-advisor --requirement <file.json> [--json] [--session=ID]");
    println!("  pattern-advisor --batch <dir> [--json]");
    println!("  pattern-advisor --validate [dir] [--json]");
    println!("  pattern-advisor --reindex");
    println!("  pattern-advisor --stats [--json]");
    println!("  pattern-advisor --verify-log");
    println!("\nGLOBAL OPTIONS:");
    println!("  --config <file>   JSON configuration (PATTERN_ADVISOR_* env vars override)");
}

/// Remove `--name <value>` or `--name=<value>` from `args`.
fn take_option(args: &mut Vec<String>, name: &str) -> Option<PathBuf> {
    let prefix = format!("{}=", name);
    if let Some(i) = args.iter().position(|a| a.starts_with(&prefix)) {
        let value = args.remove(i);
        return value.strip_prefix(&prefix).map(PathBuf::from);
    }
    let i = args.iter().position(|a| a == name)?;
    args.remove(i);
    (i < args.len()).then(|| PathBuf::from(args.remove(i)))
}

fn flag_value(args: &[String], prefix: &str) -> Option<String> {
    args.iter()
        .find_map(|a| a.strip_prefix(prefix))
        .map(String::from)
}

fn positional(args: &[String]) -> Vec<&str> {
    args.iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with("--"))
        .collect()
}

/// Free text left after removing flags
fn description(args: &[String]) -> String {
    positional(args).join(" ")
}

fn first_positional(args: &[String]) -> Option<&String> {
    args.iter().find(|a| !a.starts_with("--"))
}

fn read_requirement(path: &Path) -> Result<Requirement> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read requirement {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid requirement {:?}", path))
}

fn new_session() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn run_recommend(
    config: AdvisorConfig,
    requirement: &Requirement,
    session: Option<String>,
    json_output: bool,
) -> Result<()> {
    use std::time::Instant;
    let start = Instant::now();

    let mut advisor = Advisor::open(config)?;
    let session = session.unwrap_or_else(new_session);
    match advisor.recommend(requirement, &session) {
        Ok(report) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(requirement, &report, start.elapsed());
            }
        }
        Err(e) => {
            if json_output {
                let error = serde_json::json!({"error": e.to_string()});
                println!("{}", serde_json::to_string_pretty(&error)?);
            } else {
                eprintln!("Error: {}", e);
            }
        }
    }
    Ok(())
}

fn run_batch(config: AdvisorConfig, dir: &Path, json_output: bool) -> Result<()> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("No requirement files (*.json) under {:?}", dir);
    }

    let mut advisor = Advisor::open(config)?;
    let session = format!("batch-{}", new_session());
    let mut reports = Vec::new();
    let mut failures = 0;

    for path in &files {
        let outcome = read_requirement(path)
            .and_then(|req| advisor.recommend(&req, &session).map_err(anyhow::Error::from));
        match outcome {
            Ok(report) => {
                if !json_output {
                    let top = report
                        .recommendations
                        .first()
                        .map(|r| format!("{} {} ({:.0}%)", r.pattern_id, r.feasibility, r.confidence * 100.0))
                        .unwrap_or_else(|| "no recommendation".to_string());
                    println!("{:<40} {:<10} {}", display_name(path), action_label(&report.decision.action), top);
                }
                reports.push(serde_json::json!({"file": path, "report": report}));
            }
            Err(e) => {
                failures += 1;
                if json_output {
                    reports.push(serde_json::json!({"file": path, "error": e.to_string()}));
                } else {
                    eprintln!("{:<40} error: {:#}", display_name(path), e);
                }
            }
        }
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("\n{} requirements, {} failed", files.len(), failures);
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn run_validate(dir: &Path, json_output: bool) -> Result<()> {
    let mut store = PatternStore::new(dir);
    let loaded = store.load()?.len();
    let rejected = store.rejected();

    if json_output {
        let out = serde_json::json!({
            "dir": dir,
            "loaded": loaded,
            "rejected": rejected,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Pattern repository: {}", dir.display());
        println!("  Valid documents:   {}", loaded);
        println!("  Invalid documents: {}", rejected.len());
        for r in rejected {
            println!("   ✗ {}: {}", display_name(&r.path), r.reason);
        }
    }

    if !rejected.is_empty() {
        bail!("{} invalid pattern documents", rejected.len());
    }
    Ok(())
}

fn run_stats(config: AdvisorConfig, json_output: bool) -> Result<()> {
    let advisor = Advisor::open(config)?;
    let stats = advisor.stats();
    if json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ PATTERN LIBRARY STATISTICS                                  │");
    println!("└─────────────────────────────────────────────────────────────┘\n");
    println!("Patterns: {}", stats.store.total);
    println!("Rejected documents: {}", stats.store.rejected);
    println!("Indexed descriptions: {} ({})", stats.indexed, stats.embedder);

    println!("\nBY KIND:");
    for (kind, count) in &stats.store.by_kind {
        println!("   {:<6} {}", kind, count);
    }
    println!("\nBY FEASIBILITY:");
    for (feasibility, count) in &stats.store.by_feasibility {
        println!("   {:<24} {}", feasibility, count);
    }
    println!("\nTOP DOMAINS:");
    let mut domains: Vec<_> = stats.store.by_domain.iter().collect();
    domains.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (domain, count) in domains.into_iter().take(10) {
        let bar = "█".repeat((*count).min(30));
        println!("   {:<20} {:>4} {}", domain, count, bar);
    }
    Ok(())
}

fn run_verify_log(config: &AdvisorConfig) -> Result<()> {
    let Some(path) = &config.decision_log else {
        bail!("Decision log is disabled in the configuration");
    };
    if !path.exists() {
        println!("No decisions recorded yet at {:?}", path);
        return Ok(());
    }
    let verification = decision_log::verify_log(path)?;
    println!("Decision log: {:?}", path);
    println!("  Entries: {}", verification.chain_length);
    if verification.valid {
        println!("  Chain intact ✓");
        Ok(())
    } else {
        for error in &verification.errors {
            println!("   ✗ {}", error);
        }
        bail!("{} integrity errors", verification.errors.len())
    }
}

fn action_label(action: &DecisionAction) -> &'static str {
    match action {
        DecisionAction::Create { .. } => "create",
        DecisionAction::Enhance { .. } => "enhance",
        DecisionAction::Reuse { .. } => "reuse",
        DecisionAction::Hold { .. } => "hold",
    }
}

fn print_report(requirement: &Requirement, report: &AdvisorReport, elapsed: std::time::Duration) {
    println!("\n╔═════════════════════════════════════════════════════════════╗");
    println!("║ AUTOMATION RECOMMENDATIONS                                  ║");
    println!("╠═════════════════════════════════════════════════════════════╣");
    println!("║ Process: {}", truncate(&requirement.description, 50));
    println!("║ Session: {}", report.session_id);
    println!("╚═════════════════════════════════════════════════════════════╝\n");

    println!("Decision: {}", action_label(&report.decision.action));
    println!("   {}", wrap_text(&report.decision.rationale, 60, "   "));
    if let Some(id) = &report.created_pattern {
        println!("   New pattern: {}", id);
    }
    if let Some(reason) = &report.creation_blocked {
        println!("   Creation blocked: {}", reason);
    }
    println!();

    if report.recommendations.is_empty() {
        println!("No recommendations.");
    }
    for (i, rec) in report.recommendations.iter().enumerate() {
        let bar = "█".repeat((rec.confidence * 10.0).round() as usize);
        println!("{}. {} - {}", i + 1, rec.pattern_id, rec.feasibility);
        println!("   [{:.<10}] {:.0}% confidence", bar, rec.confidence * 100.0);
        println!("   Stack: {}", rec.tech_stack.join(", "));
        println!("   {}", wrap_text(&rec.rationale, 60, "   "));
        println!();
    }

    println!("─────────────────────────────────────────────────────────────");
    println!(
        "{} candidates considered in {:.0}ms",
        report.candidates.len(),
        elapsed.as_secs_f64() * 1000.0
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    }
}

fn wrap_text(s: &str, width: usize, prefix: &str) -> String {
    let mut result = String::new();
    let mut line = String::new();

    for word in s.split_whitespace() {
        if !line.is_empty() && line.len() + word.len() + 1 > width {
            if !result.is_empty() {
                result.push('\n');
                result.push_str(prefix);
            }
            result.push_str(&line);
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }

    if !line.is_empty() {
        if !result.is_empty() {
            result.push('\n');
            result.push_str(prefix);
        }
        result.push_str(&line);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_description_skips_flags() {
        let a = args(&["Route", "--json", "supplier", "invoices", "--domain=finance"]);
        assert_eq!(description(&a), "Route supplier invoices");
        assert_eq!(flag_value(&a, "--domain="), Some("finance".to_string()));
        assert_eq!(first_positional(&a).map(String::as_str), Some("Route"));
    }

    #[test]
    fn test_take_option_both_forms() {
        let mut a = args(&["bin", "--config", "cfg.json", "--stats"]);
        assert_eq!(take_option(&mut a, "--config"), Some(PathBuf::from("cfg.json")));
        assert_eq!(a, args(&["bin", "--stats"]));

        let mut b = args(&["bin", "--config=other.json", "--stats"]);
        assert_eq!(take_option(&mut b, "--config"), Some(PathBuf::from("other.json")));
        assert_eq!(b, args(&["bin", "--stats"]));
    }
}
