use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use bench_gate_cli_types::FailingCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    NoData,
}

impl Verdict {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::NoData => "no_data",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Verdict::Passed => "✅",
            Verdict::Failed => "❌",
            Verdict::NoData => "❔",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a metric was compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceValue {
    Missing,
    Single {
        value: f64,
    },
    Range {
        lower: f64,
        upper: f64,
    },
    Average {
        mean: f64,
        samples: Vec<f64>,
    },
    Trend {
        previous: Option<f64>,
        week_ago: Option<f64>,
        last_stable: Option<f64>,
    },
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v}"))
}

impl Display for ReferenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceValue::Missing => f.write_str("N/A"),
            ReferenceValue::Single { value } => write!(f, "{value}"),
            ReferenceValue::Range { lower, upper } => write!(f, "[{lower}, {upper}]"),
            ReferenceValue::Average { mean, samples } => {
                write!(f, "{mean:.3} (avg of {})", samples.len())
            }
            ReferenceValue::Trend {
                previous,
                week_ago,
                last_stable,
            } => write!(
                f,
                "{} / {} / {}",
                fmt_optional(*previous),
                fmt_optional(*week_ago),
                fmt_optional(*last_stable)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEvaluation {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub comparator: String,
    pub reference: ReferenceValue,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Evaluation details embedded into a stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationAudit {
    pub evaluation_method: String,
    pub results: Vec<MetricEvaluation>,
}

/// Reduction of all metric verdicts to a single build verdict.
pub trait FailDecision {
    fn should_fail(&self, verdicts: &[Verdict]) -> bool;
}

impl FailDecision for FailingCondition {
    /// * `Any`: fails as soon as one metric failed.
    /// * `All`: fails only if *every* metric failed. One passing or
    ///   unevaluable metric keeps the build green. This is not "all must
    ///   pass".
    /// * `None`: never fails.
    fn should_fail(&self, verdicts: &[Verdict]) -> bool {
        match self {
            FailingCondition::Any => verdicts.iter().any(|v| *v == Verdict::Failed),
            FailingCondition::All => {
                !verdicts.is_empty() && verdicts.iter().all(|v| *v == Verdict::Failed)
            }
            FailingCondition::None => false,
        }
    }
}

/// Counts of each verdict, in the order passed, failed, no data.
pub fn tally(verdicts: &[Verdict]) -> (usize, usize, usize) {
    let counts = verdicts.iter().counts();
    let get = |v: Verdict| counts.get(&v).copied().unwrap_or(0);
    (
        get(Verdict::Passed),
        get(Verdict::Failed),
        get(Verdict::NoData),
    )
}
