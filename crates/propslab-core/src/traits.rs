use std::collections::BTreeMap;
use std::future::Future;

use crate::error::CollectError;
use crate::record::FieldValue;
use crate::schema::ExtractionSchema;
use crate::target::{FetchResult, Target};

/// Fetches raw markup for a target. Implementations classify their
/// own failures into the [`CollectError`] taxonomy; the orchestrator
/// never inspects transport-level errors directly.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<FetchResult, CollectError>> + Send;
}

/// Parses raw markup into canonical field values per the schema.
/// Strategy-agnostic: it never knows how the markup was obtained.
pub trait Extractor: Send + Sync + Clone {
    fn extract(
        &self,
        html: &str,
        schema: &ExtractionSchema,
    ) -> Result<BTreeMap<String, FieldValue>, CollectError>;
}

/// A fetcher for a disabled strategy; every fetch fails terminally so
/// the orchestrator falls straight over to the other strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFetcher;

impl Fetcher for NullFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchResult, CollectError> {
        let _ = target;
        Err(CollectError::Browser("strategy disabled".into()))
    }
}
