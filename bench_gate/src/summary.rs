//! Rendering of evaluation results for the console and the CI job summary.

use std::{
    fmt::Write as _,
    fs::OpenOptions,
    io::{self, Write},
    iter,
    path::Path,
};

use chrono::{DateTime, Utc};
use human_repr::HumanDuration;
use itertools::Itertools;
use sparklines::spark;

use bench_gate_cli_types::FailingCondition;

use crate::{
    data::BenchmarkSnapshot,
    evaluate::EvaluationResult,
    verdict::{tally, ReferenceValue},
};

/// Formats a metric value for display with the given unit, if any.
fn fmt_value(value: f64, unit: &str) -> String {
    if unit.is_empty() {
        format!("{value}")
    } else {
        format!("{value} {unit}")
    }
}

fn fmt_age(snapshot: &BenchmarkSnapshot, now: DateTime<Utc>) -> String {
    match (now - snapshot.timestamp).to_std() {
        Ok(age) => format!("{} ago", age.human_duration()),
        Err(_) => "in the future".to_string(),
    }
}

fn caption(label: &str, snapshot: &BenchmarkSnapshot, now: DateTime<Utc>) -> String {
    format!(
        "{label}: `{}` ({})",
        snapshot.commit.short_id(),
        fmt_age(snapshot, now)
    )
}

fn reference_captions(result: &EvaluationResult, now: DateTime<Utc>) -> Vec<String> {
    let refs = &result.references;
    let mut captions = [
        ("previous", refs.previous.as_ref()),
        ("week ago", refs.week_ago.as_ref()),
        ("last stable", refs.last_stable.as_ref()),
    ]
    .into_iter()
    .filter_map(|(label, snapshot)| snapshot.map(|s| caption(label, s, now)))
    .collect_vec();

    if let Some(newest) = refs.window.first() {
        captions.push(format!(
            "moving average over {} snapshot(s), newest {}",
            refs.window.len(),
            caption("commit", newest, now)
        ));
    }
    captions
}

/// Sparkline of the averaged samples followed by the current value.
fn trend_sparkline(reference: &ReferenceValue, current: f64) -> Option<String> {
    match reference {
        ReferenceValue::Average { samples, .. } if !samples.is_empty() => {
            let values = samples
                .iter()
                .copied()
                .chain(iter::once(current))
                .collect_vec();
            Some(spark(&values))
        }
        _ => None,
    }
}

fn overall_line(condition: FailingCondition, verdicts: (usize, usize, usize), should_fail: bool) -> String {
    let (passed, failed, no_data) = verdicts;
    format!(
        "{} {passed} passed, {failed} failed, {no_data} without data (failing condition: {})",
        if should_fail { "❌ Failed" } else { "✅ Passed" },
        format!("{condition:?}").to_lowercase(),
    )
}

/// Markdown section for the job summary.
pub fn render_markdown(
    current: &BenchmarkSnapshot,
    result: &EvaluationResult,
    condition: FailingCondition,
    should_fail: bool,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "## Benchmark `{}` ({})\n",
        current.group, result.method
    );
    let _ = writeln!(
        out,
        "Commit `{}` compared against group `{}`.\n",
        current.commit.short_id(),
        result.reference_group
    );

    let _ = writeln!(out, "| Metric | Unit | Value | Comparator | Reference | Result |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for metric in &result.metrics {
        let trend = trend_sparkline(&metric.reference, metric.value)
            .map(|s| format!(" {s}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {}{trend} | {} {} |",
            metric.name,
            metric.unit,
            metric.value,
            metric.comparator,
            metric.reference,
            metric.verdict.symbol(),
            metric.verdict,
        );
    }

    let explanations = result
        .metrics
        .iter()
        .filter_map(|m| m.explanation.as_ref().map(|e| format!("- **{}**: {e}", m.name)))
        .collect_vec();
    if !explanations.is_empty() {
        let _ = writeln!(out, "\n{}", explanations.join("\n"));
    }

    let captions = reference_captions(result, now);
    if !captions.is_empty() {
        let _ = writeln!(out, "\nReferences: {}", captions.join(", "));
    }

    let _ = writeln!(
        out,
        "\n**{}**",
        overall_line(condition, tally(&result.verdicts()), should_fail)
    );
    out
}

/// Plain text for the console.
pub fn render_plain(
    current: &BenchmarkSnapshot,
    result: &EvaluationResult,
    condition: FailingCondition,
    should_fail: bool,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Benchmark '{}' at {} ({})",
        current.group,
        current.commit.short_id(),
        result.method
    );
    for metric in &result.metrics {
        let _ = writeln!(
            out,
            "{} '{}': {} {} {}",
            metric.verdict.symbol(),
            metric.name,
            fmt_value(metric.value, &metric.unit),
            metric.comparator,
            metric.reference,
        );
        if let Some(trend) = trend_sparkline(&metric.reference, metric.value) {
            let _ = writeln!(out, "    {trend}");
        }
        if let Some(explanation) = &metric.explanation {
            let _ = writeln!(out, "    {explanation}");
        }
    }
    for caption in reference_captions(result, now) {
        let _ = writeln!(out, "  {caption}");
    }
    let _ = writeln!(
        out,
        "{}",
        overall_line(condition, tally(&result.verdicts()), should_fail)
    );
    out
}

/// Appends `markdown` to the job summary file, creating it if needed.
pub fn append_to_file(path: &Path, markdown: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{markdown}")
}
