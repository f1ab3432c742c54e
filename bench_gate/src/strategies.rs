//! Per-metric arithmetic of the evaluation strategies.
//!
//! Every function here is pure: it receives the current snapshot, the
//! already resolved reference data and the per-metric parameters (in the
//! order of the current snapshot's metrics) and returns one
//! [`MetricEvaluation`] per metric.

use itertools::Itertools;

use crate::{
    data::{BenchmarkSnapshot, MetricValue},
    evaluation_config::{ComparisonRule, ThresholdRange},
    stats::{mean_of, relative_deviation_percent, signed_change_percent},
    verdict::{MetricEvaluation, ReferenceValue, Verdict},
};

const NOT_AVAILABLE: &str = "N/A";

fn evaluation(
    metric: &MetricValue,
    comparator: String,
    reference: ReferenceValue,
    verdict: Verdict,
    explanation: Option<String>,
) -> MetricEvaluation {
    MetricEvaluation {
        name: metric.name.clone(),
        unit: metric.unit.clone(),
        value: metric.value,
        comparator,
        reference,
        verdict,
        explanation,
    }
}

fn missing_metric(metric: &MetricValue, source: &str) -> MetricEvaluation {
    evaluation(
        metric,
        NOT_AVAILABLE.to_string(),
        ReferenceValue::Missing,
        Verdict::NoData,
        Some(format!("'{}' not found in {source}", metric.name)),
    )
}

fn zero_reference(metric: &MetricValue, comparator: String, reference: ReferenceValue) -> MetricEvaluation {
    evaluation(
        metric,
        comparator,
        reference,
        Verdict::NoData,
        Some("reference value is zero, percentage undefined".to_string()),
    )
}

fn rule_comparator(rule: &ComparisonRule) -> String {
    format!("{} ({} margin)", rule.operator.comparator_text(), rule.margin)
}

/// Fixed threshold per metric.
pub fn threshold(
    current: &BenchmarkSnapshot,
    rules: &[ComparisonRule],
    thresholds: &[f64],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(rules.iter().zip(thresholds))
        .map(|(metric, (rule, &threshold))| {
            evaluation(
                metric,
                rule_comparator(rule),
                ReferenceValue::Single { value: threshold },
                Verdict::from_passed(rule.passes(metric.value, threshold)),
                None,
            )
        })
        .collect()
}

/// Same arithmetic as [`threshold`], with the previous value as threshold.
pub fn previous(
    current: &BenchmarkSnapshot,
    reference: &BenchmarkSnapshot,
    rules: &[ComparisonRule],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(rules)
        .map(|(metric, rule)| match reference.metric_value(&metric.name) {
            Some(previous) => evaluation(
                metric,
                rule_comparator(rule),
                ReferenceValue::Single { value: previous },
                Verdict::from_passed(rule.passes(metric.value, previous)),
                None,
            ),
            None => missing_metric(metric, "the previous benchmark"),
        })
        .collect()
}

pub fn threshold_range(
    current: &BenchmarkSnapshot,
    ranges: &[ThresholdRange],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(ranges)
        .map(|(metric, range)| {
            evaluation(
                metric,
                "in range".to_string(),
                ReferenceValue::Range {
                    lower: range.lower,
                    upper: range.upper,
                },
                Verdict::from_passed(range.contains(metric.value)),
                None,
            )
        })
        .collect()
}

/// Passes while `|current / previous - 1| * 100` stays below the threshold.
pub fn jump_detection(
    current: &BenchmarkSnapshot,
    previous: &BenchmarkSnapshot,
    thresholds: &[f64],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(thresholds)
        .map(|(metric, &limit)| {
            let comparator = format!("jump smaller than {limit}% from");
            let Some(reference) = previous.metric_value(&metric.name) else {
                return missing_metric(metric, "the previous benchmark");
            };
            let reference_value = ReferenceValue::Single { value: reference };
            match relative_deviation_percent(metric.value, reference) {
                Some(ratio) => evaluation(
                    metric,
                    comparator,
                    reference_value,
                    Verdict::from_passed(ratio < limit),
                    Some(format!("jump of {ratio:.2}% (limit {limit}%)")),
                ),
                None => zero_reference(metric, comparator, reference_value),
            }
        })
        .collect()
}

/// Compares against the mean over `window`. Snapshots without the metric
/// do not count, so the mean is taken over the values actually found.
pub fn moving_average(
    current: &BenchmarkSnapshot,
    window: &[&BenchmarkSnapshot],
    thresholds: &[f64],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(thresholds)
        .map(|(metric, &limit)| {
            let comparator = format!("within ±{limit}% of");
            // Oldest first, for display.
            let samples = window
                .iter()
                .rev()
                .filter_map(|s| s.metric_value(&metric.name))
                .collect_vec();
            let Some(summary) = mean_of(samples.iter().copied()) else {
                return missing_metric(metric, "any snapshot of the moving average window");
            };
            let reference = ReferenceValue::Average {
                mean: summary.mean,
                samples,
            };
            match relative_deviation_percent(metric.value, summary.mean) {
                Some(deviation) => evaluation(
                    metric,
                    comparator,
                    reference,
                    Verdict::from_passed(deviation <= limit),
                    Some(format!(
                        "deviation of {deviation:.2}% from {summary} over a window of {}",
                        window.len()
                    )),
                ),
                None => zero_reference(metric, comparator, reference),
            }
        })
        .collect()
}

/// The three reference horizons of the delta trend detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendLegs<'a> {
    pub previous: Option<&'a BenchmarkSnapshot>,
    pub week_ago: Option<&'a BenchmarkSnapshot>,
    pub last_stable: Option<&'a BenchmarkSnapshot>,
}

impl<'a> TrendLegs<'a> {
    fn labelled(&self) -> [(&'static str, Option<&'a BenchmarkSnapshot>); 3] {
        [
            ("previous", self.previous),
            ("week ago", self.week_ago),
            ("last stable", self.last_stable),
        ]
    }
}

/// A metric passes only if every available leg changed by at most the
/// threshold. Unavailable legs pass on their own and are named in the
/// explanation. A leg with a zero reference is undefined and left to the
/// other legs; the metric has no data only when no leg could be computed.
pub fn trend_deltas(
    current: &BenchmarkSnapshot,
    legs: &TrendLegs<'_>,
    thresholds: &[f64],
) -> Vec<MetricEvaluation> {
    current
        .metrics
        .iter()
        .zip(thresholds)
        .map(|(metric, &limit)| {
            let comparator = format!("within ±{limit}% of");
            let leg_values = legs
                .labelled()
                .map(|(label, snapshot)| (label, snapshot.and_then(|s| s.metric_value(&metric.name))));
            let reference = ReferenceValue::Trend {
                previous: leg_values[0].1,
                week_ago: leg_values[1].1,
                last_stable: leg_values[2].1,
            };

            let mut notes = Vec::new();
            let mut missing = Vec::new();
            let mut computed = 0;
            let mut undefined = 0;
            let mut passed = true;
            for (label, value) in leg_values {
                let Some(reference_value) = value else {
                    missing.push(label);
                    continue;
                };
                let Some(change) = signed_change_percent(metric.value, reference_value) else {
                    undefined += 1;
                    notes.push(format!("{label}: undefined (zero reference)"));
                    continue;
                };
                computed += 1;
                let leg_passed = change.abs() <= limit;
                passed &= leg_passed;
                notes.push(format!(
                    "{label}: {change:+.2}%{}",
                    if leg_passed { "" } else { " (exceeded)" }
                ));
            }
            if computed == 0 && undefined > 0 {
                return zero_reference(metric, comparator, reference);
            }
            if !missing.is_empty() {
                notes.push(format!("no data for {}", missing.join(", ")));
            }

            evaluation(
                metric,
                comparator,
                reference,
                Verdict::from_passed(passed),
                Some(notes.join("; ")),
            )
        })
        .collect()
}
