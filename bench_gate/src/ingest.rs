//! Reading the benchmark result produced by the current CI run.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::data::{
    coerce_numeric, BenchmarkSnapshot, CommitReference, ExecutionInfo, MetricValue,
    ValueParseError,
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    ValueParse(#[from] ValueParseError),

    #[error("Metric '{0}' is reported more than once")]
    DuplicateMetric(String),

    #[error("Result document holds no metrics. Expected a non-empty 'results' array or object.")]
    MissingResults,

    #[error("Malformed result document")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read result document {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultDocument {
    #[serde(default)]
    bench_info: ExecutionInfo,
    #[serde(default)]
    results: Value,
}

#[derive(Deserialize)]
struct ReportedMetric {
    name: String,
    value: Value,
    #[serde(default)]
    unit: String,
}

/// Metrics and execution details of the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub bench_info: ExecutionInfo,
    pub metrics: Vec<MetricValue>,
}

impl BenchmarkResult {
    pub fn into_snapshot(
        self,
        group: &str,
        commit: CommitReference,
        timestamp: DateTime<Utc>,
    ) -> BenchmarkSnapshot {
        BenchmarkSnapshot {
            group: group.to_string(),
            commit,
            timestamp,
            bench_info: self.bench_info,
            metrics: self.metrics,
            successful: true,
            evaluation: None,
        }
    }
}

pub fn parse_result(json: &str) -> Result<BenchmarkResult, IngestError> {
    let document: ResultDocument = serde_json::from_str(json)?;

    let reported: Vec<ReportedMetric> = match document.results {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value::<ReportedMetric>)
            .collect::<Result<Vec<_>, _>>()?,
        single @ Value::Object(_) => vec![serde_json::from_value(single)?],
        _ => return Err(IngestError::MissingResults),
    };
    if reported.is_empty() {
        return Err(IngestError::MissingResults);
    }

    let mut seen = HashSet::new();
    let metrics = reported
        .into_iter()
        .map(|metric| {
            if !seen.insert(metric.name.clone()) {
                return Err(IngestError::DuplicateMetric(metric.name));
            }
            let value = coerce_numeric(&metric.name, &metric.value)?;
            Ok(MetricValue {
                name: metric.name,
                value,
                unit: metric.unit,
            })
        })
        .collect::<Result<Vec<_>, IngestError>>()?;

    Ok(BenchmarkResult {
        bench_info: document.bench_info,
        metrics,
    })
}

pub fn read_result(path: &Path) -> Result<BenchmarkResult, IngestError> {
    let content = fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_result(&content)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{commit, reference_time};

    #[test]
    fn parses_result_array() {
        let result = parse_result(
            r#"{
                "benchInfo": {"executionTime": "0s 12ms", "parametrization": {"threads": 4}},
                "results": [
                    {"name": "latency_ms", "value": 100, "unit": "ms"},
                    {"name": "throughput", "value": "2500.5", "unit": "req/s"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            result.metrics,
            vec![
                MetricValue::new("latency_ms", 100.0, "ms"),
                MetricValue::new("throughput", 2500.5, "req/s"),
            ]
        );
        assert_eq!(result.bench_info.execution_time.as_deref(), Some("0s 12ms"));
        assert_eq!(result.bench_info.parametrization["threads"], 4);
    }

    #[test]
    fn parses_single_result_object() {
        let result = parse_result(r#"{"results": {"name": "size", "value": 12}}"#).unwrap();
        assert_eq!(result.metrics, vec![MetricValue::new("size", 12.0, "")]);
        assert_eq!(result.bench_info, ExecutionInfo::default());
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = parse_result(r#"{"results": [{"name": "m", "value": "fast"}]}"#).unwrap_err();
        match err {
            IngestError::ValueParse(e) => assert_eq!(e.metric, "m"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = parse_result(
            r#"{"results": [{"name": "m", "value": 1}, {"name": "m", "value": 2}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateMetric(name) if name == "m"));
    }

    #[test]
    fn rejects_missing_or_empty_results() {
        assert!(matches!(
            parse_result(r#"{"benchInfo": {}}"#),
            Err(IngestError::MissingResults)
        ));
        assert!(matches!(
            parse_result(r#"{"results": []}"#),
            Err(IngestError::MissingResults)
        ));
        assert!(matches!(
            parse_result(r#"{"results": [{"value": 1}]}"#),
            Err(IngestError::Json(_))
        ));
        assert!(matches!(parse_result("not json"), Err(IngestError::Json(_))));
    }

    #[test]
    fn builds_snapshot() {
        let result = parse_result(r#"{"results": {"name": "m", "value": 1}}"#).unwrap();
        let snapshot = result.into_snapshot("bench", commit("abc"), reference_time());
        assert_eq!(snapshot.group, "bench");
        assert_eq!(snapshot.commit.id, "abc");
        assert!(snapshot.successful);
        assert_eq!(snapshot.metric_value("m"), Some(1.0));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            read_result(&dir.path().join("missing.json")),
            Err(IngestError::Io { .. })
        ));
    }
}
