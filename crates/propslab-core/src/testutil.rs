//! Test utilities: mock implementations of the fetch and extraction
//! seams, with scripted per-URL behavior.
//!
//! All mocks use `Arc<Mutex<_>>` interior mutability so tests can
//! assert on recorded calls after the run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::CollectError;
use crate::record::FieldValue;
use crate::schema::{ExtractionSchema, FieldRule};
use crate::target::{FetchResult, Strategy, Target};
use crate::traits::{Extractor, Fetcher};

const DEFAULT_HTML: &str = "<html><body>default</body></html>";

#[derive(Default)]
struct FetcherScripts {
    /// Per-URL response queues; each call pops the front.
    queued: HashMap<String, VecDeque<Result<String, CollectError>>>,
    /// Per-URL sticky errors, used once the queue is exhausted.
    sticky: HashMap<String, CollectError>,
}

/// Mock fetcher with per-URL scripted responses.
///
/// Resolution order per call: queued response → sticky error →
/// `Ok(DEFAULT_HTML)`. Every call is recorded.
#[derive(Clone)]
pub struct MockFetcher {
    strategy: Strategy,
    delay: Duration,
    scripts: Arc<Mutex<FetcherScripts>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            delay: Duration::ZERO,
            scripts: Arc::new(Mutex::new(FetcherScripts::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue responses for one URL, consumed in order.
    pub fn script(
        self,
        url: impl Into<String>,
        responses: Vec<Result<String, CollectError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .queued
            .insert(url.into(), responses.into());
        self
    }

    /// Make a URL fail with this error forever (after any queued
    /// responses run out).
    pub fn sticky_error(self, url: impl Into<String>, error: CollectError) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .sticky
            .insert(url.into(), error);
        self
    }

    /// Add latency to every fetch, for cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchResult, CollectError> {
        self.calls.lock().unwrap().push(target.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.queued.get_mut(&target.url) {
                Some(queue) if !queue.is_empty() => queue.pop_front().unwrap(),
                _ => match scripts.sticky.get(&target.url) {
                    Some(error) => Err(error.clone()),
                    None => Ok(DEFAULT_HTML.to_string()),
                },
            }
        };

        response.map(|html| FetchResult {
            html,
            status: 200,
            elapsed: Duration::from_millis(1),
            strategy: self.strategy,
        })
    }
}

enum ExtractorMode {
    /// Map the whole markup into a single text field.
    Passthrough(String),
    /// Return a fixed mapping for every call.
    Fixed(BTreeMap<String, FieldValue>),
    /// Return an all-null mapping.
    Vacant,
    /// Fail every call.
    Error(CollectError),
}

/// Mock extractor with a fixed behavior per instance.
#[derive(Clone)]
pub struct MockExtractor {
    mode: Arc<ExtractorMode>,
}

impl MockExtractor {
    /// Produces `{field: Text(html)}`, so identical markup yields
    /// identical fingerprints.
    pub fn passthrough(field: impl Into<String>) -> Self {
        Self {
            mode: Arc::new(ExtractorMode::Passthrough(field.into())),
        }
    }

    pub fn fixed(fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            mode: Arc::new(ExtractorMode::Fixed(fields)),
        }
    }

    pub fn vacant() -> Self {
        Self {
            mode: Arc::new(ExtractorMode::Vacant),
        }
    }

    pub fn with_error(error: CollectError) -> Self {
        Self {
            mode: Arc::new(ExtractorMode::Error(error)),
        }
    }
}

impl Extractor for MockExtractor {
    fn extract(
        &self,
        html: &str,
        schema: &ExtractionSchema,
    ) -> Result<BTreeMap<String, FieldValue>, CollectError> {
        match self.mode.as_ref() {
            ExtractorMode::Passthrough(field) => {
                let mut fields = BTreeMap::new();
                fields.insert(field.clone(), FieldValue::Text(html.to_string()));
                Ok(fields)
            }
            ExtractorMode::Fixed(fields) => Ok(fields.clone()),
            ExtractorMode::Vacant => Ok(schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), FieldValue::Null))
                .collect()),
            ExtractorMode::Error(error) => Err(error.clone()),
        }
    }
}

/// A minimal schema with one required identity field named `title`.
pub fn test_schema(name: &str) -> ExtractionSchema {
    ExtractionSchema::new(
        name,
        vec![FieldRule::new("title", ".title").required().identity()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> Target {
        Target::new(url, "match")
    }

    #[tokio::test]
    async fn scripted_responses_pop_in_order_then_default() {
        let fetcher = MockFetcher::new(Strategy::Http).script(
            "https://a",
            vec![
                Err(CollectError::Timeout(1)),
                Ok("<html>second</html>".to_string()),
            ],
        );
        assert!(fetcher.fetch(&target("https://a")).await.is_err());
        let second = fetcher.fetch(&target("https://a")).await.unwrap();
        assert_eq!(second.html, "<html>second</html>");
        let third = fetcher.fetch(&target("https://a")).await.unwrap();
        assert_eq!(third.html, DEFAULT_HTML);
        assert_eq!(fetcher.calls_for("https://a"), 3);
    }

    #[tokio::test]
    async fn sticky_error_repeats_forever() {
        let fetcher = MockFetcher::new(Strategy::Browser)
            .sticky_error("https://b", CollectError::BlockedByDefense("https://b".into()));
        for _ in 0..3 {
            let err = fetcher.fetch(&target("https://b")).await.unwrap_err();
            assert!(err.is_blocked());
        }
    }

    #[test]
    fn passthrough_extractor_mirrors_markup() {
        let extractor = MockExtractor::passthrough("title");
        let fields = extractor.extract("<html>x</html>", &test_schema("m")).unwrap();
        assert_eq!(fields["title"], FieldValue::Text("<html>x</html>".into()));
    }
}
