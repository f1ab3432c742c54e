//! Evaluation of a fresh benchmark snapshot against the stored history.
//!
//! Evaluation happens in two phases. [`resolve_references`] performs every
//! history lookup the configured strategy needs. The per-metric arithmetic in
//! [`crate::strategies`] then runs on the resolved references only.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info, warn};

use bench_gate_cli_types::EvaluationMethod;

use crate::{
    data::BenchmarkSnapshot,
    defaults,
    evaluation_config::{EvaluationConfig, InsufficientDataPolicy, Strategy},
    store::{HistoryQuery, StoreError},
    strategies::{self, TrendLegs},
    verdict::{EvaluationAudit, FailDecision, MetricEvaluation, Verdict},
};

/// Reference snapshots a strategy compared against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct References {
    /// Most recent snapshot, restricted to successful ones for
    /// `previous_successful`.
    pub previous: Option<BenchmarkSnapshot>,
    pub week_ago: Option<BenchmarkSnapshot>,
    pub last_stable: Option<BenchmarkSnapshot>,
    /// Moving average window, newest first.
    pub window: Vec<BenchmarkSnapshot>,
    /// Number of snapshots the moving average was asked to use after
    /// applying the insufficient data policy.
    pub effective_window: Option<usize>,
}

impl References {
    /// The previous snapshot of strategies that cannot run without one.
    fn required_previous(&self, group: &str) -> Result<&BenchmarkSnapshot, StoreError> {
        self.previous.as_ref().ok_or_else(|| StoreError::EmptyGroup {
            group: group.to_string(),
        })
    }

    fn trend_legs(&self) -> TrendLegs<'_> {
        TrendLegs {
            previous: self.previous.as_ref(),
            week_ago: self.week_ago.as_ref(),
            last_stable: self.last_stable.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub method: EvaluationMethod,
    /// Group the references were taken from.
    pub reference_group: String,
    pub metrics: Vec<MetricEvaluation>,
    pub references: References,
}

impl EvaluationResult {
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.metrics.iter().map(|m| m.verdict).collect()
    }

    pub fn should_fail(&self, condition: &impl FailDecision) -> bool {
        condition.should_fail(&self.verdicts())
    }

    /// Details stored alongside the snapshot. Only delta trend runs keep them.
    pub fn audit(&self) -> Option<EvaluationAudit> {
        (self.method == EvaluationMethod::TrendDeltas).then(|| EvaluationAudit {
            evaluation_method: self.method.to_string(),
            results: self.metrics.clone(),
        })
    }
}

/// Collects the reference snapshots `strategy` needs from `group`.
pub fn resolve_references(
    strategy: &Strategy,
    store: &impl HistoryQuery,
    group: &str,
    now: DateTime<Utc>,
) -> Result<References, StoreError> {
    let references = match strategy {
        Strategy::Threshold { .. } | Strategy::ThresholdRange { .. } => References::default(),
        Strategy::Previous {
            successful_only, ..
        } => References {
            previous: Some(store.latest(group, 1, *successful_only)?.clone()),
            ..Default::default()
        },
        Strategy::JumpDetection { .. } => References {
            previous: Some(store.latest(group, 1, false)?.clone()),
            ..Default::default()
        },
        Strategy::TrendMovingAverage {
            window,
            insufficient_data,
            ..
        } => {
            let effective = effective_window(store, group, *window, *insufficient_data);
            if !store.has_minimum_history(group, effective) {
                let available = store.latest_n(group, effective, false)?.len();
                return Err(StoreError::InsufficientData {
                    group: group.to_string(),
                    requested: effective,
                    available,
                });
            }
            let snapshots = store.latest_n(group, effective, false)?;
            References {
                window: snapshots.into_iter().cloned().collect(),
                effective_window: Some(effective),
                ..Default::default()
            }
        }
        Strategy::TrendDeltas { stable_commit, .. } => {
            let previous = optional_leg("previous", store.latest(group, 1, false))?;
            let week_ago = optional_leg(
                "week ago",
                store.closest_to_age(group, defaults::week_ago_target_age(), now),
            )?;
            let last_stable = match stable_commit {
                Some(id) => optional_leg("last stable", store.by_commit_id(group, id))?,
                None => {
                    info!("No stable commit configured, skipping the last stable comparison");
                    None
                }
            };
            References {
                previous: previous.cloned(),
                week_ago: week_ago.cloned(),
                last_stable: last_stable.cloned(),
                ..Default::default()
            }
        }
    };

    debug!(
        "Resolved references in group '{group}': previous={:?} week_ago={:?} last_stable={:?} window=[{}]",
        references.previous.as_ref().map(|s| s.commit.short_id()),
        references.week_ago.as_ref().map(|s| s.commit.short_id()),
        references.last_stable.as_ref().map(|s| s.commit.short_id()),
        references.window.iter().map(|s| s.commit.short_id()).join(", "),
    );

    Ok(references)
}

fn effective_window(
    store: &impl HistoryQuery,
    group: &str,
    window: usize,
    policy: InsufficientDataPolicy,
) -> usize {
    if store.has_minimum_history(group, window) {
        return window;
    }
    match (policy, store.group_entries(group)) {
        (InsufficientDataPolicy::UseAvailable, Some(entries)) if !entries.is_empty() => {
            warn!(
                "Only {} snapshot(s) in group '{group}', shrinking the moving average window from {window}",
                entries.len()
            );
            entries.len()
        }
        _ => window,
    }
}

/// A missing reference only disables its leg. Other errors propagate.
fn optional_leg<'a>(
    label: &str,
    lookup: Result<&'a BenchmarkSnapshot, StoreError>,
) -> Result<Option<&'a BenchmarkSnapshot>, StoreError> {
    match lookup {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) if e.is_data_availability() => {
            info!("No {label} reference: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Evaluates `current` against the history in `store`.
///
/// `current` must not be part of `store` yet.
pub fn evaluate(
    current: &BenchmarkSnapshot,
    store: &impl HistoryQuery,
    config: &EvaluationConfig,
    now: DateTime<Utc>,
) -> Result<EvaluationResult, StoreError> {
    let group = config.reference_group(&current.group);
    info!(
        "Evaluating {} metric(s) of '{}' with method {} against group '{group}'",
        current.metrics.len(),
        current.group,
        config.method()
    );

    let references = resolve_references(&config.strategy, store, group, now)?;

    let metrics = match &config.strategy {
        Strategy::Threshold { rules, thresholds } => {
            strategies::threshold(current, rules, thresholds)
        }
        Strategy::Previous { rules, .. } => {
            strategies::previous(current, references.required_previous(group)?, rules)
        }
        Strategy::ThresholdRange { ranges } => strategies::threshold_range(current, ranges),
        Strategy::JumpDetection { thresholds } => strategies::jump_detection(
            current,
            references.required_previous(group)?,
            thresholds,
        ),
        Strategy::TrendMovingAverage { thresholds, .. } => {
            let window = references.window.iter().collect_vec();
            strategies::moving_average(current, &window, thresholds)
        }
        Strategy::TrendDeltas { thresholds, .. } => {
            strategies::trend_deltas(current, &references.trend_legs(), thresholds)
        }
    };

    Ok(EvaluationResult {
        method: config.method(),
        reference_group: group.to_string(),
        metrics,
        references,
    })
}

/// Records the outcome on the snapshot about to be stored.
pub fn annotate(snapshot: &mut BenchmarkSnapshot, result: &EvaluationResult, should_fail: bool) {
    snapshot.successful = !should_fail;
    snapshot.evaluation = result.audit();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::evaluation_config::{ComparisonOperator, ComparisonRule, Margin};
    use crate::test_helpers::{history, reference_time, snapshot_at, SnapshotBuilder};
    use crate::verdict::ReferenceValue;
    use bench_gate_cli_types::FailingCondition;
    use chrono::Duration;

    fn current(metrics: &[(&str, f64)]) -> BenchmarkSnapshot {
        snapshot_at("bench", "head", reference_time(), metrics)
    }

    fn hours_ago(h: i64) -> DateTime<Utc> {
        reference_time() - Duration::hours(h)
    }

    fn config(strategy: Strategy) -> EvaluationConfig {
        EvaluationConfig::new(strategy, FailingCondition::Any)
    }

    #[test]
    fn scenario_threshold() {
        let config = config(Strategy::Threshold {
            rules: vec![ComparisonRule::new(
                ComparisonOperator::Smaller,
                Margin::Percent(10.0),
            )],
            thresholds: vec![120.0],
        });
        // Thresholds need no history at all.
        let result = evaluate(
            &current(&[("latency_ms", 100.0)]),
            &history(vec![]),
            &config,
            reference_time(),
        )
        .unwrap();
        assert_eq!(result.verdicts(), [Verdict::Passed]);
        assert!(!result.should_fail(&FailingCondition::Any));
        assert_eq!(result.references, References::default());
    }

    #[test]
    fn scenario_previous_successful() {
        let store = history(vec![
            snapshot_at("bench", "good", hours_ago(2), &[("latency_ms", 90.0)]),
            SnapshotBuilder::new("bench", "broken")
                .at(hours_ago(1))
                .metric("latency_ms", 50.0, "ms")
                .failed()
                .build(),
        ]);
        let config = config(Strategy::Previous {
            rules: vec![ComparisonRule::new(
                ComparisonOperator::Smaller,
                Margin::Strict,
            )],
            successful_only: true,
        });
        let result = evaluate(&current(&[("latency_ms", 100.0)]), &store, &config, reference_time())
            .unwrap();
        assert_eq!(result.method, EvaluationMethod::PreviousSuccessful);
        assert_eq!(result.verdicts(), [Verdict::Failed]);
        assert_eq!(result.metrics[0].reference, ReferenceValue::Single { value: 90.0 });
        assert_eq!(result.references.previous.unwrap().commit.id, "good");
    }

    #[test]
    fn previous_without_history_is_an_error() {
        let config = config(Strategy::Previous {
            rules: vec![ComparisonRule::new(
                ComparisonOperator::Smaller,
                Margin::Strict,
            )],
            successful_only: false,
        });
        let err = evaluate(&current(&[("m", 1.0)]), &history(vec![]), &config, reference_time())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownGroup { .. }));
    }

    #[test]
    fn scenario_jump_detection() {
        let store = history(vec![snapshot_at("bench", "prev", hours_ago(1), &[("m", 50.0)])]);
        let config = config(Strategy::JumpDetection {
            thresholds: vec![20.0],
        });
        let result = evaluate(&current(&[("m", 80.0)]), &store, &config, reference_time()).unwrap();
        assert_eq!(result.verdicts(), [Verdict::Failed]);
        assert!(result.should_fail(&FailingCondition::Any));
        assert!(!result.should_fail(&FailingCondition::None));
    }

    #[test]
    fn scenario_moving_average() {
        let store = history(vec![
            snapshot_at("bench", "c0", hours_ago(4), &[("m", 1000.0)]),
            snapshot_at("bench", "c1", hours_ago(3), &[("m", 10.0)]),
            snapshot_at("bench", "c2", hours_ago(2), &[("m", 20.0)]),
            snapshot_at("bench", "c3", hours_ago(1), &[("m", 30.0)]),
        ]);
        let config = config(Strategy::TrendMovingAverage {
            window: 3,
            thresholds: vec![50.0],
            insufficient_data: InsufficientDataPolicy::Fail,
        });
        let result = evaluate(&current(&[("m", 100.0)]), &store, &config, reference_time()).unwrap();
        assert_eq!(result.verdicts(), [Verdict::Failed]);
        assert_eq!(result.references.effective_window, Some(3));
        assert_eq!(
            result
                .references
                .window
                .iter()
                .map(|s| s.commit.id.as_str())
                .collect_vec(),
            ["c3", "c2", "c1"]
        );
        match &result.metrics[0].reference {
            ReferenceValue::Average { mean, .. } => assert_eq!(*mean, 20.0),
            other => panic!("unexpected reference {other:?}"),
        }
    }

    #[test]
    fn moving_average_insufficient_data_policy() {
        let store = history(vec![
            snapshot_at("bench", "c1", hours_ago(2), &[("m", 10.0)]),
            snapshot_at("bench", "c2", hours_ago(1), &[("m", 30.0)]),
        ]);
        let strict = config(Strategy::TrendMovingAverage {
            window: 5,
            thresholds: vec![10.0],
            insufficient_data: InsufficientDataPolicy::Fail,
        });
        match evaluate(&current(&[("m", 20.0)]), &store, &strict, reference_time()) {
            Err(StoreError::InsufficientData {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }

        let lenient = config(Strategy::TrendMovingAverage {
            window: 5,
            thresholds: vec![10.0],
            insufficient_data: InsufficientDataPolicy::UseAvailable,
        });
        let result = evaluate(&current(&[("m", 20.0)]), &store, &lenient, reference_time()).unwrap();
        assert_eq!(result.references.effective_window, Some(2));
        assert_eq!(result.verdicts(), [Verdict::Passed]);

        assert!(matches!(
            evaluate(&current(&[("m", 20.0)]), &history(vec![]), &lenient, reference_time()),
            Err(StoreError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn missing_previous_reference_is_an_error() {
        let references = References::default();
        assert!(matches!(
            references.required_previous("bench"),
            Err(StoreError::EmptyGroup { group }) if group == "bench"
        ));
    }

    #[test]
    fn moving_average_window_is_kept_with_enough_history() {
        let store = history(vec![
            snapshot_at("bench", "c1", hours_ago(3), &[("m", 10.0)]),
            snapshot_at("bench", "c2", hours_ago(2), &[("m", 20.0)]),
            snapshot_at("bench", "c3", hours_ago(1), &[("m", 30.0)]),
        ]);
        for window in [1, 3] {
            assert_eq!(
                effective_window(&store, "bench", window, InsufficientDataPolicy::UseAvailable),
                window
            );
        }
        assert_eq!(
            effective_window(&store, "bench", 4, InsufficientDataPolicy::UseAvailable),
            3
        );
        assert_eq!(
            effective_window(&store, "bench", 4, InsufficientDataPolicy::Fail),
            4
        );
        assert_eq!(
            effective_window(&store, "other", 4, InsufficientDataPolicy::UseAvailable),
            4
        );
    }

    #[test]
    fn delta_trend_with_all_legs_missing_passes_vacuously() {
        let config = config(Strategy::TrendDeltas {
            thresholds: vec![5.0],
            stable_commit: Some("v1.0".to_string()),
        });
        let result = evaluate(&current(&[("m", 1.0)]), &history(vec![]), &config, reference_time())
            .unwrap();
        assert_eq!(result.verdicts(), [Verdict::Passed]);
        assert_eq!(result.references, References::default());
        assert!(!result.should_fail(&FailingCondition::Any));
    }

    #[test]
    fn delta_trend_uses_three_horizons() {
        let now = reference_time();
        let store = history(vec![
            snapshot_at("bench", "stable", now - Duration::days(30), &[("m", 100.0)]),
            snapshot_at("bench", "week", now - Duration::days(7), &[("m", 100.0)]),
            snapshot_at("bench", "prev", now - Duration::hours(1), &[("m", 104.0)]),
        ]);
        let config = config(Strategy::TrendDeltas {
            thresholds: vec![5.0],
            stable_commit: Some("stable".to_string()),
        });

        let result = evaluate(&current(&[("m", 103.0)]), &store, &config, now).unwrap();
        assert_eq!(result.verdicts(), [Verdict::Passed]);
        assert_eq!(
            result.metrics[0].reference,
            ReferenceValue::Trend {
                previous: Some(104.0),
                week_ago: Some(100.0),
                last_stable: Some(100.0)
            }
        );
        assert_eq!(result.references.week_ago.as_ref().unwrap().commit.id, "week");

        let result = evaluate(&current(&[("m", 106.0)]), &store, &config, now).unwrap();
        assert_eq!(result.verdicts(), [Verdict::Failed]);

        let audit = result.audit().unwrap();
        assert_eq!(audit.evaluation_method, "trend_detection_deltas");
        assert_eq!(audit.results, result.metrics);
    }

    #[test]
    fn delta_trend_with_unknown_stable_commit_skips_that_leg() {
        let now = reference_time();
        let store = history(vec![snapshot_at("bench", "prev", now - Duration::hours(1), &[("m", 100.0)])]);
        let config = config(Strategy::TrendDeltas {
            thresholds: vec![5.0],
            stable_commit: Some("v9".to_string()),
        });
        let result = evaluate(&current(&[("m", 102.0)]), &store, &config, now).unwrap();
        assert_eq!(result.verdicts(), [Verdict::Passed]);
        assert!(result.references.last_stable.is_none());
        let explanation = result.metrics[0].explanation.as_deref().unwrap();
        assert!(explanation.contains("no data for last stable"), "{explanation}");
    }

    #[test]
    fn compares_against_configured_group() {
        let store = history(vec![snapshot_at("nightly", "n1", hours_ago(1), &[("m", 50.0)])]);
        let mut config = config(Strategy::JumpDetection {
            thresholds: vec![20.0],
        });
        config.compare_group = Some("nightly".to_string());
        let result = evaluate(&current(&[("m", 55.0)]), &store, &config, reference_time()).unwrap();
        assert_eq!(result.reference_group, "nightly");
        assert_eq!(result.verdicts(), [Verdict::Passed]);
    }

    #[test]
    fn annotate_marks_outcome() {
        let store = history(vec![snapshot_at("bench", "prev", hours_ago(1), &[("m", 50.0)])]);
        let config = config(Strategy::JumpDetection {
            thresholds: vec![20.0],
        });
        let mut snapshot = current(&[("m", 80.0)]);
        let result = evaluate(&snapshot, &store, &config, reference_time()).unwrap();
        let should_fail = result.should_fail(&config.failing_condition);
        annotate(&mut snapshot, &result, should_fail);
        assert!(!snapshot.successful);
        // Only delta trend runs keep an audit block.
        assert!(snapshot.evaluation.is_none());
    }

    #[test]
    fn all_condition_keeps_build_green_with_one_pass() {
        let config = EvaluationConfig::new(
            Strategy::Threshold {
                rules: vec![
                    ComparisonRule::new(ComparisonOperator::Smaller, Margin::Strict),
                    ComparisonRule::new(ComparisonOperator::Smaller, Margin::Strict),
                ],
                thresholds: vec![10.0, 10.0],
            },
            FailingCondition::All,
        );
        let result = evaluate(
            &current(&[("fast", 5.0), ("slow", 50.0)]),
            &history(vec![]),
            &config,
            reference_time(),
        )
        .unwrap();
        assert_eq!(result.verdicts(), [Verdict::Passed, Verdict::Failed]);
        assert!(!result.should_fail(&config.failing_condition));
    }
}
