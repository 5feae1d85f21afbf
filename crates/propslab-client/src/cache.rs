use moka::future::Cache;

use propslab_core::{CollectError, FetchResult, Fetcher, Target};

/// Memoizes successful fetches by URL.
///
/// Useful when a target list revisits the same pages across runs of a
/// session, or when several targets share a listing page. Failures are
/// never cached: a blocked or timed-out URL should be retried fresh.
#[derive(Clone)]
pub struct CachedFetcher<F> {
    inner: F,
    cache: Cache<String, FetchResult>,
}

impl<F: Fetcher> CachedFetcher<F> {
    pub fn new(inner: F, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
        }
    }
}

impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    async fn fetch(&self, target: &Target) -> Result<FetchResult, CollectError> {
        if let Some(hit) = self.cache.get(&target.url).await {
            tracing::debug!(url = %target.url, "markup cache hit");
            return Ok(hit);
        }
        let result = self.inner.fetch(target).await?;
        self.cache.insert(target.url.clone(), result.clone()).await;
        Ok(result)
    }
}
