use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::error::CollectError;
use crate::record::Record;

/// An ordered, fingerprint-unique collection of records. Insertion
/// order reflects completion order, not input order.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Dataset {
    rows: Vec<Record>,
}

impl Dataset {
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    /// Column names across all rows: metadata columns first, then the
    /// union of field names, sorted for stability.
    pub fn columns(&self) -> Vec<String> {
        let mut fields = BTreeSet::new();
        for row in &self.rows {
            for name in row.fields.keys() {
                fields.insert(name.clone());
            }
        }
        let mut columns = vec!["collected_at".to_string(), "source_url".to_string()];
        columns.extend(fields);
        columns
    }

    /// Write the dataset as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), CollectError> {
        let columns = self.columns();
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&columns)
            .map_err(|e| CollectError::Export(format!("csv write failed: {e}")))?;
        for row in &self.rows {
            let cells: Vec<String> = columns
                .iter()
                .map(|col| match col.as_str() {
                    "collected_at" => row.collected_at.to_rfc3339(),
                    "source_url" => row.source_url.clone(),
                    name => row
                        .fields
                        .get(name)
                        .map(|v| v.display())
                        .unwrap_or_default(),
                })
                .collect();
            out.write_record(&cells)
                .map_err(|e| CollectError::Export(format!("csv write failed: {e}")))?;
        }
        out.flush()
            .map_err(|e| CollectError::Export(format!("csv flush failed: {e}")))?;
        Ok(())
    }

    /// Write the dataset as JSON lines, one record object per line.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> Result<(), CollectError> {
        for row in &self.rows {
            let line = serde_json::to_string(row)
                .map_err(|e| CollectError::Export(format!("json write failed: {e}")))?;
            writeln!(writer, "{line}")
                .map_err(|e| CollectError::Export(format!("json write failed: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    rows: Vec<Record>,
    fingerprints: HashSet<String>,
}

/// Write-shared accumulation point for completed records.
///
/// `admit` is an atomic insert-if-absent: the fingerprint check and
/// the append happen under one lock, so two workers racing the same
/// fingerprint resolve to exactly one acceptance. The lock is never
/// held across an await.
#[derive(Debug, Clone, Default)]
pub struct DatasetSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl DatasetSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the record unless its fingerprint is already present.
    /// Returns whether the record was accepted; rejection is the
    /// expected dedup outcome, not an error.
    pub fn admit(&self, record: Record) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.fingerprints.insert(record.fingerprint.clone()) {
            return false;
        }
        inner.rows.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-consistent copy, safe to hand downstream while collection
    /// continues.
    pub fn snapshot(&self) -> Dataset {
        let inner = self.inner.lock().unwrap();
        Dataset {
            rows: inner.rows.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::record::FieldValue;

    fn record(player: &str, kills: f64) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("player".to_string(), FieldValue::Text(player.into()));
        fields.insert("kills".to_string(), FieldValue::Number(kills));
        Record::normalize(
            fields,
            &["player".to_string(), "kills".to_string()],
            "https://example.com/match/1",
        )
    }

    #[test]
    fn admit_accepts_then_rejects_duplicate() {
        let sink = DatasetSink::new();
        assert!(sink.admit(record("aspas", 24.0)));
        assert!(!sink.admit(record("aspas", 24.0)));
        assert!(sink.admit(record("less", 18.0)));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let sink = DatasetSink::new();
        sink.admit(record("zekken", 30.0));
        sink.admit(record("aspas", 24.0));
        let snapshot = sink.snapshot();
        let players: Vec<String> = snapshot
            .iter()
            .map(|r| r.fields["player"].display())
            .collect();
        assert_eq!(players, vec!["zekken", "aspas"]);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let sink = DatasetSink::new();
        sink.admit(record("aspas", 24.0));
        let snapshot = sink.snapshot();
        sink.admit(record("less", 18.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn admit_races_resolve_to_one_acceptance() {
        let sink = DatasetSink::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let sink = sink.clone();
            handles.push(tokio::spawn(
                async move { sink.admit(record("aspas", 24.0)) },
            ));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn csv_export_has_header_and_cells() {
        let sink = DatasetSink::new();
        sink.admit(record("aspas", 24.0));
        let mut buf = Vec::new();
        sink.snapshot().write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "collected_at,source_url,kills,player");
        let row = lines.next().unwrap();
        assert!(row.contains("aspas"));
        assert!(row.contains("24"));
    }

    #[test]
    fn json_lines_export_one_object_per_row() {
        let sink = DatasetSink::new();
        sink.admit(record("aspas", 24.0));
        sink.admit(record("less", 18.0));
        let mut buf = Vec::new();
        sink.snapshot().write_json_lines(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["fields"]["player"], "aspas");
    }

    #[test]
    fn empty_dataset_exports_header_only() {
        let dataset = Dataset::default();
        let mut buf = Vec::new();
        dataset.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim(), "collected_at,source_url");
    }
}
