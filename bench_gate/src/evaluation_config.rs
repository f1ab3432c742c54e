//! Typed evaluation settings.
//!
//! [`RawEvaluationConfig`] mirrors the `[evaluation]` section of the
//! configuration file. It is turned into an [`EvaluationConfig`] once the
//! number of metrics of the current result is known, so every per-metric
//! array is checked against it before the history is touched.

use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;

use bench_gate_cli_types::{EvaluationMethod, FailingCondition};

use crate::defaults;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("No evaluation method configured. Set evaluation.method or pass --method.")]
    MissingMethod,

    #[error("{0}")]
    InvalidChoice(String),

    #[error("Invalid comparison operator: {0}. Valid operators are: smaller, bigger, tolerance.")]
    UnknownOperator(String),

    #[error("{field} must be provided for the {method} evaluation method.")]
    MissingField {
        field: &'static str,
        method: EvaluationMethod,
    },

    #[error("The number of {field} ({actual}) must match the number of metrics ({expected}).")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Comparison margins must be -1 or in the range [0, 100], got {0}.")]
    InvalidMargin(f64),

    #[error("{field} must be within the range [0, 100], got {value}.")]
    ThresholdOutOfRange { field: &'static str, value: f64 },

    #[error("Lower threshold {lower} exceeds upper threshold {upper} for metric #{index}.")]
    InvertedRange { index: usize, lower: f64, upper: f64 },

    #[error("The moving average window size must be at least 1.")]
    EmptyWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Smaller,
    Bigger,
    Tolerance,
}

impl ComparisonOperator {
    /// Human-readable relation used in result tables.
    pub fn comparator_text(&self) -> &'static str {
        match self {
            ComparisonOperator::Smaller => "smaller",
            ComparisonOperator::Bigger => "bigger",
            ComparisonOperator::Tolerance => "in symmetric range to",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = ConfigValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "smaller" => Ok(ComparisonOperator::Smaller),
            "bigger" => Ok(ComparisonOperator::Bigger),
            "tolerance" => Ok(ComparisonOperator::Tolerance),
            other => Err(ConfigValidationError::UnknownOperator(other.to_string())),
        }
    }
}

/// Allowed deviation from the reference value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Margin {
    /// Configured as `-1`: strict comparison without tolerance.
    Strict,
    /// Percentage in `[0, 100]`.
    Percent(f64),
}

impl TryFrom<f64> for Margin {
    type Error = ConfigValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == defaults::STRICT_MARGIN {
            Ok(Margin::Strict)
        } else if (0.0..=100.0).contains(&value) {
            Ok(Margin::Percent(value))
        } else {
            Err(ConfigValidationError::InvalidMargin(value))
        }
    }
}

impl Display for Margin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Margin::Strict => f.write_str("strict"),
            Margin::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// Operator and margin applied to one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonRule {
    pub operator: ComparisonOperator,
    pub margin: Margin,
}

impl ComparisonRule {
    pub fn new(operator: ComparisonOperator, margin: Margin) -> Self {
        ComparisonRule { operator, margin }
    }

    /// Whether `value` satisfies the rule relative to `reference`.
    pub fn passes(&self, value: f64, reference: f64) -> bool {
        match (self.operator, self.margin) {
            (ComparisonOperator::Smaller, Margin::Strict) => value < reference,
            (ComparisonOperator::Smaller, Margin::Percent(m)) => {
                value <= reference - reference * m / 100.0
            }
            (ComparisonOperator::Bigger, Margin::Strict) => value > reference,
            (ComparisonOperator::Bigger, Margin::Percent(m)) => {
                value >= reference + reference * m / 100.0
            }
            (ComparisonOperator::Tolerance, Margin::Strict) => value == reference,
            (ComparisonOperator::Tolerance, Margin::Percent(m)) => {
                let a = reference - reference * m / 100.0;
                let b = reference + reference * m / 100.0;
                a.min(b) <= value && value <= a.max(b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRange {
    pub lower: f64,
    pub upper: f64,
}

impl ThresholdRange {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// What to do when the moving average window exceeds the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsufficientDataPolicy {
    #[default]
    Fail,
    UseAvailable,
}

impl FromStr for InsufficientDataPolicy {
    type Err = ConfigValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(InsufficientDataPolicy::Fail),
            "use_available" => Ok(InsufficientDataPolicy::UseAvailable),
            _ => Err(ConfigValidationError::InvalidChoice(format!(
                "Invalid insufficient data strategy: {s}. Valid values are: fail, use_available"
            ))),
        }
    }
}

/// One variant per evaluation method, holding exactly the parameters it uses.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Threshold {
        rules: Vec<ComparisonRule>,
        thresholds: Vec<f64>,
    },
    Previous {
        rules: Vec<ComparisonRule>,
        successful_only: bool,
    },
    ThresholdRange {
        ranges: Vec<ThresholdRange>,
    },
    JumpDetection {
        thresholds: Vec<f64>,
    },
    TrendMovingAverage {
        window: usize,
        thresholds: Vec<f64>,
        insufficient_data: InsufficientDataPolicy,
    },
    TrendDeltas {
        thresholds: Vec<f64>,
        stable_commit: Option<String>,
    },
}

impl Strategy {
    pub fn method(&self) -> EvaluationMethod {
        match self {
            Strategy::Threshold { .. } => EvaluationMethod::Threshold,
            Strategy::Previous {
                successful_only: false,
                ..
            } => EvaluationMethod::Previous,
            Strategy::Previous {
                successful_only: true,
                ..
            } => EvaluationMethod::PreviousSuccessful,
            Strategy::ThresholdRange { .. } => EvaluationMethod::ThresholdRange,
            Strategy::JumpDetection { .. } => EvaluationMethod::JumpDetection,
            Strategy::TrendMovingAverage { .. } => EvaluationMethod::TrendMovingAverage,
            Strategy::TrendDeltas { .. } => EvaluationMethod::TrendDeltas,
        }
    }
}

/// The `[evaluation]` section as written by the user.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawEvaluationConfig {
    pub method: Option<String>,
    pub failing_condition: Option<String>,
    pub benchmark_group_to_compare: Option<String>,
    pub comparison_operators: Option<Vec<String>>,
    pub comparison_margins: Option<Vec<f64>>,
    pub threshold_values: Option<Vec<f64>>,
    pub threshold_lower: Option<Vec<f64>>,
    pub threshold_upper: Option<Vec<f64>>,
    pub jump_detection_thresholds: Option<Vec<f64>>,
    pub moving_ave_window_size: Option<usize>,
    pub moving_ave_thresholds: Option<Vec<f64>>,
    pub trend_thresholds: Option<Vec<f64>>,
    pub stable_commit_id: Option<String>,
    pub insufficient_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    pub strategy: Strategy,
    pub failing_condition: FailingCondition,
    /// Group whose history is used as reference. `None` means the current group.
    pub compare_group: Option<String>,
}

impl EvaluationConfig {
    pub fn new(strategy: Strategy, failing_condition: FailingCondition) -> Self {
        EvaluationConfig {
            strategy,
            failing_condition,
            compare_group: None,
        }
    }

    pub fn method(&self) -> EvaluationMethod {
        self.strategy.method()
    }

    pub fn reference_group<'a>(&'a self, current_group: &'a str) -> &'a str {
        self.compare_group.as_deref().unwrap_or(current_group)
    }

    /// Validates `raw` against a result holding `metric_count` metrics.
    pub fn from_raw(
        raw: &RawEvaluationConfig,
        metric_count: usize,
    ) -> Result<Self, ConfigValidationError> {
        let method = raw
            .method
            .as_deref()
            .ok_or(ConfigValidationError::MissingMethod)?
            .parse::<EvaluationMethod>()
            .map_err(|e| ConfigValidationError::InvalidChoice(e.to_string()))?;

        let failing_condition = match raw.failing_condition.as_deref() {
            Some(s) => s
                .parse::<FailingCondition>()
                .map_err(|e| ConfigValidationError::InvalidChoice(e.to_string()))?,
            None => FailingCondition::Any,
        };

        let fields = FieldReader {
            method,
            metric_count,
        };

        let strategy = match method {
            EvaluationMethod::Threshold => Strategy::Threshold {
                rules: fields.rules(raw)?,
                thresholds: fields.per_metric("threshold_values", &raw.threshold_values)?,
            },
            EvaluationMethod::Previous | EvaluationMethod::PreviousSuccessful => {
                Strategy::Previous {
                    rules: fields.rules(raw)?,
                    successful_only: method == EvaluationMethod::PreviousSuccessful,
                }
            }
            EvaluationMethod::ThresholdRange => {
                let lower = fields.per_metric("threshold_lower", &raw.threshold_lower)?;
                let upper = fields.per_metric("threshold_upper", &raw.threshold_upper)?;
                let ranges = lower
                    .into_iter()
                    .zip(upper)
                    .enumerate()
                    .map(|(index, (lower, upper))| {
                        if lower > upper {
                            Err(ConfigValidationError::InvertedRange {
                                index,
                                lower,
                                upper,
                            })
                        } else {
                            Ok(ThresholdRange { lower, upper })
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Strategy::ThresholdRange { ranges }
            }
            EvaluationMethod::JumpDetection => Strategy::JumpDetection {
                thresholds: fields
                    .percentages("jump_detection_thresholds", &raw.jump_detection_thresholds)?,
            },
            EvaluationMethod::TrendMovingAverage => {
                let window = raw
                    .moving_ave_window_size
                    .unwrap_or(defaults::DEFAULT_MOVING_AVE_WINDOW_SIZE);
                if window == 0 {
                    return Err(ConfigValidationError::EmptyWindow);
                }
                let insufficient_data = raw
                    .insufficient_data
                    .as_deref()
                    .map(str::parse::<InsufficientDataPolicy>)
                    .transpose()?
                    .unwrap_or_default();
                Strategy::TrendMovingAverage {
                    window,
                    thresholds: fields
                        .percentages("moving_ave_thresholds", &raw.moving_ave_thresholds)?,
                    insufficient_data,
                }
            }
            EvaluationMethod::TrendDeltas => Strategy::TrendDeltas {
                thresholds: fields.percentages("trend_thresholds", &raw.trend_thresholds)?,
                stable_commit: raw
                    .stable_commit_id
                    .clone()
                    .filter(|id| !id.trim().is_empty()),
            },
        };

        Ok(EvaluationConfig {
            strategy,
            failing_condition,
            compare_group: raw
                .benchmark_group_to_compare
                .clone()
                .filter(|g| !g.trim().is_empty()),
        })
    }
}

struct FieldReader {
    method: EvaluationMethod,
    metric_count: usize,
}

impl FieldReader {
    fn per_metric<T: Clone>(
        &self,
        field: &'static str,
        values: &Option<Vec<T>>,
    ) -> Result<Vec<T>, ConfigValidationError> {
        let values = values
            .as_ref()
            .ok_or(ConfigValidationError::MissingField {
                field,
                method: self.method,
            })?;
        if values.len() != self.metric_count {
            return Err(ConfigValidationError::LengthMismatch {
                field,
                expected: self.metric_count,
                actual: values.len(),
            });
        }
        Ok(values.clone())
    }

    fn percentages(
        &self,
        field: &'static str,
        values: &Option<Vec<f64>>,
    ) -> Result<Vec<f64>, ConfigValidationError> {
        let values = self.per_metric(field, values)?;
        if let Some(&value) = values
            .iter()
            .find(|v| !(0.0..=defaults::MAX_PERCENTAGE_THRESHOLD).contains(*v))
        {
            return Err(ConfigValidationError::ThresholdOutOfRange { field, value });
        }
        Ok(values)
    }

    fn rules(&self, raw: &RawEvaluationConfig) -> Result<Vec<ComparisonRule>, ConfigValidationError> {
        let operators = self.per_metric("comparison_operators", &raw.comparison_operators)?;
        let margins = self.per_metric("comparison_margins", &raw.comparison_margins)?;
        operators
            .iter()
            .zip(margins)
            .map(|(operator, margin)| -> Result<ComparisonRule, ConfigValidationError> {
                Ok(ComparisonRule::new(
                    operator.parse::<ComparisonOperator>()?,
                    Margin::try_from(margin)?,
                ))
            })
            .collect()
    }
}
