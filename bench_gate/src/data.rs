use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::verdict::EvaluationAudit;

/// A non-numeric metric value was encountered.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Value '{value}' of metric '{metric}' is not numeric")]
pub struct ValueParseError {
    pub metric: String,
    pub value: String,
}

/// Coerces a JSON value into a metric value.
/// Numbers are taken as-is, strings are parsed, everything else is rejected.
pub fn coerce_numeric(metric: &str, value: &Value) -> Result<f64, ValueParseError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValueParseError {
            metric: metric.to_string(),
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    #[serde(deserialize_with = "deserialize_metric_value")]
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

fn deserialize_metric_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    coerce_numeric("<stored>", &raw).map_err(serde::de::Error::custom)
}

impl MetricValue {
    pub fn new(name: &str, value: f64, unit: &str) -> Self {
        MetricValue {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    #[serde(default)]
    pub execution_time: Option<String>,
    #[serde(default)]
    pub parametrization: BTreeMap<String, Value>,
    #[serde(default)]
    pub other_info: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReference {
    pub author: CommitUser,
    pub committer: CommitUser,
    /// Commit sha, or a run identifier surrogate for scheduled runs.
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub url: String,
}

impl CommitReference {
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(crate::defaults::DEFAULT_COMMIT_HASH_DISPLAY_LENGTH)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// One benchmark run. Immutable once it is part of the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSnapshot {
    /// Restored from the enclosing group key when a history document is loaded.
    #[serde(skip)]
    pub group: String,
    pub commit: CommitReference,
    #[serde(rename = "date", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub bench_info: ExecutionInfo,
    pub metrics: Vec<MetricValue>,
    #[serde(rename = "benchSuccessful", default)]
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationAudit>,
}

impl BenchmarkSnapshot {
    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metric(name).map(|m| m.value)
    }
}
