use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A typed field value in a normalized record.
///
/// Untagged serde representation: numbers, RFC 3339 strings, plain
/// strings, and `null` round-trip to the natural JSON forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Stable textual form used for fingerprinting and CSV cells.
    /// Null uses a sentinel so "missing" and "empty string" differ.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Null => "\u{0}".to_string(),
            FieldValue::Number(n) => format!("{n}"),
            FieldValue::Timestamp(ts) => ts.to_rfc3339(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Cell text for tabular export; null renders empty.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            other => other.canonical(),
        }
    }
}

/// A normalized, immutable record: canonical fields, a content
/// fingerprint over the identity fields, and a collection timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub fields: BTreeMap<String, FieldValue>,
    pub fingerprint: String,
    pub source_url: String,
    pub collected_at: DateTime<Utc>,
}

impl Record {
    /// Map an extracted field mapping into a record, fingerprinting
    /// the named identity fields. `collected_at` is assigned here and
    /// deliberately excluded from the fingerprint.
    pub fn normalize(
        fields: BTreeMap<String, FieldValue>,
        identity_fields: &[String],
        source_url: impl Into<String>,
    ) -> Self {
        let fingerprint = fingerprint(&fields, identity_fields);
        Self {
            fields,
            fingerprint,
            source_url: source_url.into(),
            collected_at: Utc::now(),
        }
    }

    /// True when every field is null; such extractions yield no record.
    pub fn is_vacant(fields: &BTreeMap<String, FieldValue>) -> bool {
        fields.values().all(FieldValue::is_null)
    }
}

/// SHA-256 hex over the identity fields, sorted by field name. A field
/// absent from the mapping hashes as null, so schema evolution that
/// adds identity fields changes fingerprints predictably.
pub fn fingerprint(fields: &BTreeMap<String, FieldValue>, identity_fields: &[String]) -> String {
    let mut names: Vec<&String> = identity_fields.iter().collect();
    names.sort();
    names.dedup();

    let mut hasher = Sha256::new();
    for name in names {
        let value = fields.get(name.as_str()).unwrap_or(&FieldValue::Null);
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.canonical().as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn identity(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fingerprint_is_idempotent() {
        let fields = mapping(&[
            ("player", FieldValue::Text("aspas".into())),
            ("kills", FieldValue::Number(24.0)),
        ]);
        let ids = identity(&["player", "kills"]);
        assert_eq!(fingerprint(&fields, &ids), fingerprint(&fields, &ids));
        assert_eq!(fingerprint(&fields, &ids).len(), 64);
    }

    #[test]
    fn fingerprint_ignores_non_identity_fields() {
        let a = mapping(&[
            ("player", FieldValue::Text("aspas".into())),
            ("acs", FieldValue::Number(280.0)),
        ]);
        let b = mapping(&[
            ("player", FieldValue::Text("aspas".into())),
            ("acs", FieldValue::Number(190.0)),
        ]);
        let ids = identity(&["player"]);
        assert_eq!(fingerprint(&a, &ids), fingerprint(&b, &ids));
    }

    #[test]
    fn fingerprint_distinguishes_null_from_empty() {
        let with_null = mapping(&[("agent", FieldValue::Null)]);
        let with_empty = mapping(&[("agent", FieldValue::Text(String::new()))]);
        let ids = identity(&["agent"]);
        assert_ne!(fingerprint(&with_null, &ids), fingerprint(&with_empty, &ids));
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let fields = mapping(&[
            ("a", FieldValue::Text("1".into())),
            ("b", FieldValue::Text("2".into())),
        ]);
        assert_eq!(
            fingerprint(&fields, &identity(&["a", "b"])),
            fingerprint(&fields, &identity(&["b", "a"]))
        );
    }

    #[test]
    fn normalize_excludes_timestamp_from_fingerprint() {
        let fields = mapping(&[("player", FieldValue::Text("less".into()))]);
        let ids = identity(&["player"]);
        let first = Record::normalize(fields.clone(), &ids, "https://example.com");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Record::normalize(fields, &ids, "https://example.com");
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(second.collected_at >= first.collected_at);
    }

    #[test]
    fn vacant_mapping_detected() {
        assert!(Record::is_vacant(&mapping(&[
            ("a", FieldValue::Null),
            ("b", FieldValue::Null)
        ])));
        assert!(!Record::is_vacant(&mapping(&[
            ("a", FieldValue::Null),
            ("b", FieldValue::Number(1.0))
        ])));
    }

    #[test]
    fn field_value_serde_forms() {
        assert_eq!(
            serde_json::to_string(&FieldValue::Number(2.5)).unwrap(),
            "2.5"
        );
        assert_eq!(serde_json::to_string(&FieldValue::Null).unwrap(), "null");
        let text: FieldValue = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, FieldValue::Text("hello".into()));
    }
}
