use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use itertools::Itertools;
use log::{info, warn, Level};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::commit::{from_github_event, local_commit};
use crate::config::{evaluation_section, read_hierarchical_config, store_section, ConfigSources};
use crate::data::CommitReference;
use crate::evaluate::{annotate, evaluate};
use crate::evaluation_config::EvaluationConfig;
use crate::ingest::read_result;
use crate::store::{HistoryQuery, JsonFileStore};
use crate::summary::{append_to_file, render_markdown, render_plain};
use bench_gate_cli_types::{Cli, CliDataFile, Commands, EvaluationMethod, FailingCondition};

pub fn handle_calls() -> Result<()> {
    let cli = Cli::parse();
    let logger_level = match cli.verbose {
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(logger_level.as_str())).init();

    match cli.command {
        Commands::Evaluate {
            name,
            results,
            data_file,
            config,
            method,
            failing_condition,
            compare_to,
            stable_commit,
            save,
            summary,
            event_path,
            commit_id,
        } => evaluate_results(EvaluateRequest {
            name,
            results,
            data_file,
            config,
            method,
            failing_condition,
            compare_to,
            stable_commit,
            save,
            summary,
            event_path,
            commit_id,
        }),
        Commands::History {
            name,
            max_count,
            successful_only,
            data_file,
            config,
        } => show_history(
            &name,
            max_count,
            successful_only,
            &data_file,
            config.as_deref(),
        ),
        Commands::Config { config } => show_config_info(config.as_deref()),
    }
}

struct EvaluateRequest {
    name: String,
    results: PathBuf,
    data_file: CliDataFile,
    config: Option<PathBuf>,
    method: Option<EvaluationMethod>,
    failing_condition: Option<FailingCondition>,
    compare_to: Option<String>,
    stable_commit: Option<String>,
    save: bool,
    summary: Option<PathBuf>,
    event_path: Option<PathBuf>,
    commit_id: Option<String>,
}

fn evaluate_results(request: EvaluateRequest) -> Result<()> {
    let config = read_hierarchical_config(request.config.as_deref())
        .context("Failed to load configuration")?;

    // Command line options take precedence over the configuration file.
    let mut raw = evaluation_section(&config).context("Invalid [evaluation] section")?;
    if let Some(method) = request.method {
        raw.method = Some(method.to_string());
    }
    if let Some(group) = request.compare_to {
        raw.benchmark_group_to_compare = Some(group);
    }
    if let Some(commit) = request.stable_commit {
        raw.stable_commit_id = Some(commit);
    }

    let data_file = resolve_data_file(&request.data_file, &config)?;

    let result = read_result(&request.results)?;
    let mut evaluation_config = EvaluationConfig::from_raw(&raw, result.metrics.len())?;
    if let Some(condition) = request.failing_condition {
        evaluation_config.failing_condition = condition;
    }

    let commit = resolve_commit(request.event_path.as_deref(), request.commit_id.as_deref())?;
    let now = Utc::now();
    let mut snapshot = result.into_snapshot(&request.name, commit, now);

    let store = JsonFileStore::new(data_file);
    let history = store.load();
    let evaluation = evaluate(&snapshot, &history, &evaluation_config, now).with_context(|| {
        format!(
            "Failed to evaluate '{}' with method {}",
            request.name,
            evaluation_config.method()
        )
    })?;

    let condition = evaluation_config.failing_condition;
    let should_fail = evaluation.should_fail(&condition);

    print!(
        "{}",
        render_plain(&snapshot, &evaluation, condition, should_fail, now)
    );
    let markdown = request
        .summary
        .as_ref()
        .map(|path| (path, render_markdown(&snapshot, &evaluation, condition, should_fail, now)));

    if request.save {
        annotate(&mut snapshot, &evaluation, should_fail);
        store
            .append(snapshot)
            .context("Failed to save the benchmark result")?;
        info!("Saved result of '{}' to {}", request.name, store.path().display());
    }

    // Summary write failures do not fail the run.
    if let Some((summary_path, markdown)) = markdown {
        if let Err(e) = append_to_file(summary_path, &markdown) {
            warn!(
                "Failed to write job summary to {}: {e}",
                summary_path.display()
            );
        }
    }

    if should_fail {
        bail!(
            "Benchmark '{}' failed its evaluation (failing condition: {:?})",
            request.name,
            condition
        );
    }

    Ok(())
}

fn resolve_data_file(cli: &CliDataFile, config: &::config::Config) -> Result<PathBuf> {
    match &cli.data_file {
        Some(path) => Ok(path.clone()),
        None => Ok(store_section(config)
            .context("Invalid [store] section")?
            .data_file()),
    }
}

/// Determine the commit with proper precedence:
/// 1. GitHub event payload (if available and supported)
/// 2. `--commit-id`
fn resolve_commit(event_path: Option<&Path>, commit_id: Option<&str>) -> Result<CommitReference> {
    if let Some(event_path) = event_path {
        let payload = fs::read_to_string(event_path)
            .with_context(|| format!("Failed to read event payload {}", event_path.display()))?;
        let payload: serde_json::Value =
            serde_json::from_str(&payload).context("Malformed event payload")?;
        let event_name = env::var("GITHUB_EVENT_NAME").unwrap_or_default();
        let run_id = env::var("GITHUB_RUN_ID").ok();

        match from_github_event(&event_name, &payload, run_id.as_deref()) {
            Ok(commit) => return Ok(commit),
            Err(e) if commit_id.is_some() => warn!("{e}. Falling back to --commit-id."),
            Err(e) => return Err(e.into()),
        }
    }

    match commit_id {
        Some(id) => Ok(local_commit(id)),
        None => bail!("No commit information. Provide --event-path or --commit-id."),
    }
}

fn show_history(
    name: &str,
    max_count: usize,
    successful_only: bool,
    data_file: &CliDataFile,
    explicit_config: Option<&Path>,
) -> Result<()> {
    let config =
        read_hierarchical_config(explicit_config).context("Failed to load configuration")?;
    let store = JsonFileStore::new(resolve_data_file(data_file, &config)?);
    let history = store.load();
    let snapshots = history.latest_n(name, max_count, successful_only)?;

    println!("{} snapshot(s) of '{name}':", snapshots.len());
    for snapshot in snapshots {
        let metrics = snapshot
            .metrics
            .iter()
            .map(|m| format!("{}={}{}", m.name, m.value, m.unit))
            .join(" ");
        println!(
            "{} {} {} {}",
            if snapshot.successful { "✅" } else { "❌" },
            snapshot.commit.short_id(),
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
            metrics
        );
    }
    Ok(())
}

/// Show configuration sources and the parsed settings
fn show_config_info(explicit: Option<&Path>) -> Result<()> {
    println!("bench-gate Configuration Information");
    println!("====================================");

    let sources = ConfigSources::discover(explicit);
    for (label, path) in [
        ("System config", &sources.system),
        ("Local config", &sources.local),
        ("Explicit config", &sources.explicit),
    ] {
        match path {
            Some(path) if path.is_file() => println!("{label}: {} (exists)", path.display()),
            Some(path) => println!("{label}: {} (not found)", path.display()),
            None => println!("{label}: -"),
        }
    }

    let merged = sources.existing();
    if merged.is_empty() {
        println!("No configuration files found, using defaults");
    } else {
        println!(
            "Merged in order: {}",
            merged.iter().map(|p| p.display()).join(" -> ")
        );
    }

    match sources.build() {
        Ok(config) => {
            println!("\nConfiguration loaded successfully");
            let store = store_section(&config)?;
            println!("  History document: {}", store.data_file().display());

            let evaluation = evaluation_section(&config)?;
            println!(
                "  Method: {}",
                evaluation.method.as_deref().unwrap_or("<not set>")
            );
            println!(
                "  Failing condition: {}",
                evaluation.failing_condition.as_deref().unwrap_or("any")
            );
            if let Some(group) = &evaluation.benchmark_group_to_compare {
                println!("  Compared group: {group}");
            }
            println!("  Settings: {evaluation:#?}");
        }
        Err(e) => {
            println!("\nConfiguration: Error loading - {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_commit_from_local_id() {
        let commit = resolve_commit(None, Some("abc123")).unwrap();
        assert_eq!(commit.id, "abc123");
        assert!(resolve_commit(None, None).is_err());
    }

    #[test]
    fn test_resolve_commit_from_push_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("event.json");
        fs::write(
            &path,
            r#"{"head_commit": {"author": {"name": "a"}, "committer": {"name": "c"}, "id": "deadbeef"}}"#,
        )
        .unwrap();
        let commit = resolve_commit(Some(&path), None).unwrap();
        assert_eq!(commit.id, "deadbeef");
    }

    #[test]
    fn test_resolve_commit_falls_back_to_commit_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("event.json");
        fs::write(&path, r#"{"issue": {}}"#).unwrap();
        let commit = resolve_commit(Some(&path), Some("fallback")).unwrap();
        assert_eq!(commit.id, "fallback");
    }

    #[test]
    fn test_result_is_saved_when_job_summary_cannot_be_written() {
        let dir = TempDir::new().unwrap();
        let results = dir.path().join("results.json");
        fs::write(
            &results,
            r#"{"results": [{"name": "latency_ms", "value": 90, "unit": "ms"}]}"#,
        )
        .unwrap();
        let config = dir.path().join("bench-gate.toml");
        fs::write(
            &config,
            r#"
[evaluation]
method = "threshold"
comparison_operators = ["smaller"]
comparison_margins = [0]
threshold_values = [100]
"#,
        )
        .unwrap();
        let data_file = dir.path().join("data.json");
        // A directory cannot be appended to.
        let summary = dir.path().join("summary");
        fs::create_dir(&summary).unwrap();

        evaluate_results(EvaluateRequest {
            name: "bench".to_string(),
            results,
            data_file: CliDataFile {
                data_file: Some(data_file.clone()),
            },
            config: Some(config),
            method: None,
            failing_condition: None,
            compare_to: None,
            stable_commit: None,
            save: true,
            summary: Some(summary),
            event_path: None,
            commit_id: Some("abc123".to_string()),
        })
        .unwrap();

        let history = JsonFileStore::new(data_file).load();
        let saved = history.latest("bench", 1, false).unwrap();
        assert_eq!(saved.commit.id, "abc123");
        assert!(saved.successful);
    }

    #[test]
    fn test_resolve_data_file_prefers_cli() {
        let config = ConfigSources::default().build().unwrap();
        let cli = CliDataFile {
            data_file: Some(PathBuf::from("custom/history.json")),
        };
        assert_eq!(
            resolve_data_file(&cli, &config).unwrap(),
            PathBuf::from("custom/history.json")
        );
        let cli = CliDataFile { data_file: None };
        assert_eq!(
            resolve_data_file(&cli, &config).unwrap(),
            PathBuf::from("benchmark_data/data.json")
        );
    }
}
