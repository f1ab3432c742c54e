//! Append-only benchmark history kept in a single JSON document.
//!
//! The document groups snapshots by benchmark group name. Queries are served
//! from the fully loaded document through [`HistoryQuery`]; only
//! [`JsonFileStore::append`] touches the disk for writing.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Value};
use tempfile::NamedTempFile;

use crate::{data::BenchmarkSnapshot, defaults};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No benchmark group '{group}' in the history")]
    UnknownGroup { group: String },

    #[error("Benchmark group '{group}' holds {available} matching snapshot(s), {requested} required")]
    InsufficientData {
        group: String,
        requested: usize,
        available: usize,
    },

    #[error("Benchmark group '{group}' has no snapshots")]
    EmptyGroup { group: String },

    #[error("No snapshot for commit '{commit_id}' in benchmark group '{group}'")]
    NotFound { group: String, commit_id: String },

    #[error("Failed to access benchmark history at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to (de)serialize benchmark history")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error only signals missing history (as opposed to I/O trouble).
    pub fn is_data_availability(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownGroup { .. }
                | StoreError::InsufficientData { .. }
                | StoreError::EmptyGroup { .. }
                | StoreError::NotFound { .. }
        )
    }
}

/// The benchmark history, grouped by benchmark group name.
///
/// Records that fail to deserialize are kept verbatim at their original
/// position and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryDocument {
    pub last_update: DateTime<Utc>,
    pub entries: BTreeMap<String, Vec<BenchmarkSnapshot>>,
    unreadable: BTreeMap<String, Vec<(usize, Value)>>,
}

impl HistoryDocument {
    pub fn push(&mut self, snapshot: BenchmarkSnapshot, now: DateTime<Utc>) {
        self.last_update = now;
        self.entries
            .entry(snapshot.group.clone())
            .or_default()
            .push(snapshot);
    }

    /// Number of stored records that could not be read as snapshots.
    pub fn unreadable_count(&self) -> usize {
        self.unreadable.values().map(Vec::len).sum()
    }

    fn from_stored(stored: StoredDocument) -> Self {
        let mut document = HistoryDocument {
            last_update: stored
                .last_update
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_default(),
            ..Default::default()
        };

        for (group, records) in stored.entries {
            let mut snapshots = Vec::with_capacity(records.len());
            for (position, record) in records.into_iter().enumerate() {
                match BenchmarkSnapshot::deserialize(&record) {
                    Ok(mut snapshot) => {
                        snapshot.group.clone_from(&group);
                        snapshots.push(snapshot);
                    }
                    Err(e) => {
                        warn!(
                            "Ignoring unreadable record #{position} of benchmark group '{group}': {e}"
                        );
                        document
                            .unreadable
                            .entry(group.clone())
                            .or_default()
                            .push((position, record));
                    }
                }
            }
            document.entries.insert(group, snapshots);
        }
        document
    }

    /// Interleaves unreadable records back into their original positions.
    fn to_stored(&self) -> StoredDocumentRef<'_> {
        let groups = self.entries.keys().chain(self.unreadable.keys()).unique();
        let entries = groups
            .map(|group| {
                let mut snapshots = self.entries.get(group).into_iter().flatten();
                let mut unreadable = self.unreadable.get(group).into_iter().flatten().peekable();
                let mut records = Vec::new();
                loop {
                    let record = if let Some((_, raw)) =
                        unreadable.next_if(|(position, _)| *position == records.len())
                    {
                        StoredRecord::Unreadable(raw)
                    } else if let Some(snapshot) = snapshots.next() {
                        StoredRecord::Snapshot(snapshot)
                    } else if let Some((_, raw)) = unreadable.next() {
                        StoredRecord::Unreadable(raw)
                    } else {
                        break;
                    };
                    records.push(record);
                }
                (group.as_str(), records)
            })
            .collect();

        StoredDocumentRef {
            last_update: self.last_update,
            entries,
        }
    }
}

/// On-disk layout. Records are parsed one by one in [`HistoryDocument::from_stored`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    #[serde(default)]
    last_update: Value,
    #[serde(default)]
    entries: BTreeMap<String, Vec<Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocumentRef<'a> {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_update: DateTime<Utc>,
    entries: BTreeMap<&'a str, Vec<StoredRecord<'a>>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StoredRecord<'a> {
    Snapshot(&'a BenchmarkSnapshot),
    Unreadable(&'a Value),
}

/// Read access to the benchmark history.
///
/// Implementors only provide [`HistoryQuery::group_entries`]; the queries
/// operate on the entries of one group in append order.
pub trait HistoryQuery {
    /// All snapshots of `group` in chronological append order.
    fn group_entries(&self, group: &str) -> Option<&[BenchmarkSnapshot]>;

    /// The `n`-th (1-indexed) most recent snapshot.
    fn latest(
        &self,
        group: &str,
        n: usize,
        success_only: bool,
    ) -> Result<&BenchmarkSnapshot, StoreError> {
        let entries = known_group(self, group)?;
        let candidates = newest_first(entries, success_only);
        let available = candidates.len();

        n.checked_sub(1)
            .and_then(|index| candidates.into_iter().nth(index))
            .ok_or_else(|| StoreError::InsufficientData {
                group: group.to_string(),
                requested: n,
                available,
            })
    }

    /// Up to `n` of the most recent snapshots, newest first.
    fn latest_n(
        &self,
        group: &str,
        n: usize,
        success_only: bool,
    ) -> Result<Vec<&BenchmarkSnapshot>, StoreError> {
        let entries = known_group(self, group)?;
        Ok(newest_first(entries, success_only)
            .into_iter()
            .take(n)
            .collect())
    }

    /// The snapshot whose age at `now` is closest to `target_age`.
    /// Ties go to the snapshot appended first.
    fn closest_to_age(
        &self,
        group: &str,
        target_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<&BenchmarkSnapshot, StoreError> {
        let entries = known_group(self, group)?;
        let target_ms = target_age.num_milliseconds();

        entries
            .iter()
            .min_by_key(|s| {
                let age_ms = (now - s.timestamp).num_milliseconds();
                age_ms.saturating_sub(target_ms).saturating_abs()
            })
            .ok_or_else(|| StoreError::EmptyGroup {
                group: group.to_string(),
            })
    }

    /// The most recent snapshot recorded for `commit_id`.
    fn by_commit_id(&self, group: &str, commit_id: &str) -> Result<&BenchmarkSnapshot, StoreError> {
        let entries = known_group(self, group)?;
        newest_first(entries, false)
            .into_iter()
            .find(|s| s.commit.id == commit_id)
            .ok_or_else(|| StoreError::NotFound {
                group: group.to_string(),
                commit_id: commit_id.to_string(),
            })
    }

    fn has_minimum_history(&self, group: &str, n: usize) -> bool {
        self.group_entries(group)
            .map_or(n == 0, |entries| entries.len() >= n)
    }
}

fn known_group<'a, Q>(store: &'a Q, group: &str) -> Result<&'a [BenchmarkSnapshot], StoreError>
where
    Q: HistoryQuery + ?Sized,
{
    store
        .group_entries(group)
        .ok_or_else(|| StoreError::UnknownGroup {
            group: group.to_string(),
        })
}

/// Newest first by timestamp. Among equal timestamps the later append wins.
fn newest_first(entries: &[BenchmarkSnapshot], success_only: bool) -> Vec<&BenchmarkSnapshot> {
    entries
        .iter()
        .rev()
        .filter(|s| !success_only || s.successful)
        .sorted_by(|a, b| b.timestamp.cmp(&a.timestamp))
        .collect()
}

impl HistoryQuery for HistoryDocument {
    fn group_entries(&self, group: &str) -> Option<&[BenchmarkSnapshot]> {
        self.entries.get(group).map(Vec::as_slice)
    }
}

/// History document persisted as JSON at `path`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the history. A missing document, or one that is not valid JSON,
    /// yields an empty history so that the very first run can proceed.
    /// Individual unreadable records are kept aside, not dropped.
    pub fn load(&self) -> HistoryDocument {
        match self.try_load() {
            Ok(document) => document,
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "No benchmark history at {}. Initializing an empty history.",
                    self.path.display()
                );
                HistoryDocument::default()
            }
            Err(e) => {
                warn!(
                    "Could not read benchmark history at {}: {e:#}. Initializing an empty history.",
                    self.path.display()
                );
                HistoryDocument::default()
            }
        }
    }

    fn try_load(&self) -> Result<HistoryDocument, StoreError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let stored: StoredDocument = serde_json::from_reader(BufReader::new(file))?;
        Ok(HistoryDocument::from_stored(stored))
    }

    /// Appends `snapshot` to its group and rewrites the document.
    pub fn append(&self, snapshot: BenchmarkSnapshot) -> Result<(), StoreError> {
        let mut document = self.load();
        debug!(
            "Appending snapshot for commit {} to group '{}'",
            snapshot.commit.id, snapshot.group
        );
        document.push(snapshot, Utc::now());
        self.write(&document)
    }

    /// Writes into a temporary sibling file that replaces the document only
    /// once it is complete. The temporary file is removed on every error path.
    fn write(&self, document: &HistoryDocument) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let formatter = PrettyFormatter::with_indent(defaults::JSON_INDENT);
            let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
            document.to_stored().serialize(&mut serializer)?;
            writer.write_all(b"\n").map_err(|e| self.io_error(e))?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
