use std::collections::BTreeMap;

use scraper::{Html, Selector};

use propslab_core::schema::{apply_transforms, ExtractionSchema};
use propslab_core::{CollectError, Extractor, FieldValue};

/// CSS-selector extractor over raw markup.
///
/// Strategy-agnostic: both fetchers hand it the same kind of HTML.
/// Each rule selects the first matching element, reads the configured
/// attribute (or the concatenated text), and runs the rule's transform
/// chain. A required field that ends up null fails the whole page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorExtractor;

impl SelectorExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for SelectorExtractor {
    fn extract(
        &self,
        html: &str,
        schema: &ExtractionSchema,
    ) -> Result<BTreeMap<String, FieldValue>, CollectError> {
        let document = Html::parse_document(html);
        let mut fields = BTreeMap::new();

        for rule in &schema.fields {
            let selector = Selector::parse(&rule.selector).map_err(|e| {
                CollectError::Schema(format!(
                    "invalid selector '{}' for field '{}': {e}",
                    rule.selector, rule.name
                ))
            })?;

            let raw = document.select(&selector).next().and_then(|element| {
                match &rule.attribute {
                    Some(attribute) => element.value().attr(attribute).map(str::to_string),
                    // Text node whitespace is layout noise; attributes
                    // are taken verbatim.
                    None => Some(element.text().collect::<String>().trim().to_string()),
                }
            });

            let value = match raw {
                Some(raw) => apply_transforms(&raw, &rule.transforms),
                None => FieldValue::Null,
            };

            if rule.required && matches!(value, FieldValue::Null) {
                return Err(CollectError::ExtractionFailure {
                    field: rule.name.clone(),
                });
            }
            fields.insert(rule.name.clone(), value);
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propslab_core::schema::{FieldRule, Transform};

    const PAGE: &str = r#"
        <html><body>
            <div class="stat-row">
                <span class="player">  TenZ  </span>
                <span class="kills"> 23 </span>
                <span class="hs-pct">31.4%</span>
                <a class="match-link" href="/match/4821">details</a>
            </div>
            <div class="stat-row">
                <span class="player">yay</span>
            </div>
        </body></html>
    "#;

    fn schema(fields: Vec<FieldRule>) -> ExtractionSchema {
        ExtractionSchema::new("match", fields)
    }

    #[test]
    fn extracts_first_match_with_trimmed_text() {
        let schema = schema(vec![
            FieldRule::new("player", ".player").identity().required()
        ]);
        let fields = SelectorExtractor::new().extract(PAGE, &schema).unwrap();
        assert_eq!(fields["player"], FieldValue::Text("TenZ".into()));
    }

    #[test]
    fn reads_attributes_instead_of_text() {
        let schema = schema(vec![
            FieldRule::new("link", ".match-link").attribute("href").identity()
        ]);
        let fields = SelectorExtractor::new().extract(PAGE, &schema).unwrap();
        assert_eq!(fields["link"], FieldValue::Text("/match/4821".into()));
    }

    #[test]
    fn transform_chain_strips_suffix_and_coerces() {
        let schema = schema(vec![FieldRule::new("hs", ".hs-pct")
            .identity()
            .transform(Transform::StripSuffix("%".into()))
            .transform(Transform::Number)]);
        let fields = SelectorExtractor::new().extract(PAGE, &schema).unwrap();
        assert_eq!(fields["hs"], FieldValue::Number(31.4));
    }

    #[test]
    fn optional_missing_field_is_null() {
        let schema = schema(vec![
            FieldRule::new("player", ".player").identity(),
            FieldRule::new("agent", ".agent"),
        ]);
        let fields = SelectorExtractor::new().extract(PAGE, &schema).unwrap();
        assert_eq!(fields["agent"], FieldValue::Null);
    }

    #[test]
    fn required_missing_field_fails_the_page() {
        let schema = schema(vec![
            FieldRule::new("agent", ".agent").required().identity()
        ]);
        let err = SelectorExtractor::new().extract(PAGE, &schema).unwrap_err();
        assert_eq!(err.classification(), "extraction_failure");
    }

    #[test]
    fn unparseable_selector_is_a_schema_error() {
        let schema = schema(vec![FieldRule::new("broken", ":::nope").identity()]);
        let err = SelectorExtractor::new().extract(PAGE, &schema).unwrap_err();
        assert_eq!(err.classification(), "schema");
    }

    #[test]
    fn unparseable_number_becomes_null_when_optional() {
        let schema = schema(vec![
            FieldRule::new("player", ".player").identity(),
            FieldRule::new("kills_text", ".player").transform(Transform::Number),
        ]);
        let fields = SelectorExtractor::new().extract(PAGE, &schema).unwrap();
        assert_eq!(fields["kills_text"], FieldValue::Null);
    }
}
