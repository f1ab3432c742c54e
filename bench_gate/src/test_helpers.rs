//! Shared builders for unit tests and benchmarks.

use chrono::{DateTime, TimeZone, Utc};

use crate::data::{BenchmarkSnapshot, CommitReference, CommitUser, ExecutionInfo, MetricValue};
use crate::store::HistoryDocument;

/// Fixed point in time used as the default capture timestamp.
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

pub fn commit(id: &str) -> CommitReference {
    let user = CommitUser {
        name: "testuser".to_string(),
        email: Some("testuser@example.com".to_string()),
        username: Some("testuser".to_string()),
    };
    CommitReference {
        author: user.clone(),
        committer: user,
        id: id.to_string(),
        message: format!("commit {id}"),
        timestamp: "2024-05-01T12:00:00Z".to_string(),
        url: format!("https://example.com/commit/{id}"),
    }
}

pub struct SnapshotBuilder {
    snapshot: BenchmarkSnapshot,
}

impl SnapshotBuilder {
    pub fn new(group: &str, commit_id: &str) -> Self {
        SnapshotBuilder {
            snapshot: BenchmarkSnapshot {
                group: group.to_string(),
                commit: commit(commit_id),
                timestamp: reference_time(),
                bench_info: ExecutionInfo::default(),
                metrics: Vec::new(),
                successful: true,
                evaluation: None,
            },
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.snapshot.timestamp = timestamp;
        self
    }

    pub fn metric(mut self, name: &str, value: f64, unit: &str) -> Self {
        self.snapshot.metrics.push(MetricValue::new(name, value, unit));
        self
    }

    pub fn failed(mut self) -> Self {
        self.snapshot.successful = false;
        self
    }

    pub fn build(self) -> BenchmarkSnapshot {
        self.snapshot
    }
}

/// Successful snapshot captured at `timestamp` with unit-less metrics.
pub fn snapshot_at(
    group: &str,
    commit_id: &str,
    timestamp: DateTime<Utc>,
    metrics: &[(&str, f64)],
) -> BenchmarkSnapshot {
    metrics
        .iter()
        .fold(
            SnapshotBuilder::new(group, commit_id).at(timestamp),
            |builder, (name, value)| builder.metric(name, *value, ""),
        )
        .build()
}

/// History document holding `snapshots` in the given append order.
pub fn history(snapshots: Vec<BenchmarkSnapshot>) -> HistoryDocument {
    let mut document = HistoryDocument::default();
    for snapshot in snapshots {
        document.push(snapshot, reference_time());
    }
    document
}
