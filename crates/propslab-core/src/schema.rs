use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CollectError;
use crate::record::FieldValue;

/// Declarative extraction schema: canonical field name → selection
/// rule. Authored externally as JSON, shared read-only by every
/// extraction for a target type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub name: String,
    pub fields: Vec<FieldRule>,
}

/// Selection rule for a single canonical field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// CSS selector; the first match wins.
    pub selector: String,
    /// Read this attribute instead of the element text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// A miss on a required field fails the whole extraction; a miss
    /// on an optional field yields null.
    #[serde(default)]
    pub required: bool,
    /// Identity fields feed the dedup fingerprint.
    #[serde(default)]
    pub identity: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<Transform>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: None,
            required: false,
            identity: false,
            transforms: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn attribute(mut self, attr: impl Into<String>) -> Self {
        self.attribute = Some(attr.into());
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }
}

/// Deterministic per-field post-processing, applied in order.
///
/// Serialized form: unit variants as plain strings (`"trim"`), data
/// variants as single-key objects (`{"strip_suffix": "%"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lowercase,
    /// Remove the given suffix if present (e.g. `%` on stat cells).
    StripSuffix(String),
    /// Coerce to a number; failure degrades to null.
    Number,
    /// Parse with the given chrono format into a UTC timestamp;
    /// failure degrades to null.
    Date(String),
}

/// Apply a rule's transform chain to a raw extracted string.
///
/// Text-level transforms run on the string; `Number`/`Date` convert it
/// into a typed value. A coercion that fails yields [`FieldValue::Null`]
/// rather than an error; required-field enforcement happens in the
/// extractor after the chain runs.
pub fn apply_transforms(raw: &str, transforms: &[Transform]) -> FieldValue {
    let mut text = raw.to_string();
    for transform in transforms {
        match transform {
            Transform::Trim => text = text.trim().to_string(),
            Transform::Lowercase => text = text.to_lowercase(),
            Transform::StripSuffix(suffix) => {
                if let Some(stripped) = text.strip_suffix(suffix.as_str()) {
                    text = stripped.to_string();
                }
            }
            Transform::Number => {
                return match text.trim().parse::<f64>() {
                    Ok(n) => FieldValue::Number(n),
                    Err(_) => FieldValue::Null,
                };
            }
            Transform::Date(format) => {
                return parse_date(text.trim(), format);
            }
        }
    }
    if text.is_empty() {
        FieldValue::Null
    } else {
        FieldValue::Text(text)
    }
}

fn parse_date(text: &str, format: &str) -> FieldValue {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_str(text, format) {
        return FieldValue::Timestamp(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
        return FieldValue::Timestamp(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return FieldValue::Timestamp(Utc.from_utc_datetime(&naive));
        }
    }
    FieldValue::Null
}

impl ExtractionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldRule>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Names of the fields that define record identity for dedup.
    pub fn identity_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.identity)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Sanity checks a schema before use: non-empty name, at least one
    /// field, unique field names, and at least one identity field so
    /// the fingerprint has something to hash.
    pub fn validate(&self) -> Result<(), CollectError> {
        if self.name.is_empty() {
            return Err(CollectError::Schema("schema name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(CollectError::Schema(format!(
                "schema '{}' defines no fields",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(CollectError::Schema(format!(
                    "schema '{}' has duplicate field '{}'",
                    self.name, field.name
                )));
            }
        }
        if !self.fields.iter().any(|f| f.identity) {
            return Err(CollectError::Schema(format!(
                "schema '{}' marks no identity fields",
                self.name
            )));
        }
        Ok(())
    }
}

/// Resolves opaque schema references to loaded, validated schemas.
///
/// A reference is either a direct file path or a bare name looked up
/// as `{schemas_dir}/{name}.json`.
pub struct SchemaResolver {
    schemas_dir: PathBuf,
}

impl SchemaResolver {
    pub fn new(schemas_dir: impl Into<PathBuf>) -> Self {
        Self {
            schemas_dir: schemas_dir.into(),
        }
    }

    pub fn resolve(&self, schema_ref: &str) -> Result<ExtractionSchema, CollectError> {
        let candidate = PathBuf::from(schema_ref);
        let path = if candidate.exists() {
            candidate
        } else {
            let named = self.schemas_dir.join(format!("{schema_ref}.json"));
            if !named.exists() {
                return Err(CollectError::Schema(format!(
                    "schema not found: {schema_ref} (looked for {})",
                    named.display()
                )));
            }
            named
        };
        load_schema_file(&path)
    }
}

/// Load and validate a schema from a JSON file.
pub fn load_schema_file(path: &Path) -> Result<ExtractionSchema, CollectError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CollectError::Schema(format!("failed to read schema {}: {e}", path.display()))
    })?;
    let schema: ExtractionSchema = serde_json::from_str(&raw).map_err(|e| {
        CollectError::Schema(format!("invalid JSON in schema {}: {e}", path.display()))
    })?;
    schema.validate()?;
    Ok(schema)
}
