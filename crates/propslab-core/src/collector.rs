use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::attempt::{AttemptState, NextStep};
use crate::dataset::{Dataset, DatasetSink};
use crate::error::CollectError;
use crate::record::Record;
use crate::schema::ExtractionSchema;
use crate::target::{FetchResult, RunConfig, Strategy, Target};
use crate::throttle::RateLimiter;
use crate::traits::{Extractor, Fetcher};

/// One permanently failed target in the run's failure report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TargetFailure {
    pub url: String,
    /// The strategy in use when the target was given up on.
    pub strategy: Strategy,
    pub classification: String,
    pub error: String,
    /// Retries consumed across both strategies.
    pub retries: u32,
}

/// What a collection run produced: the deduplicated dataset and the
/// failure report. Both are populated even when the run was cancelled.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub dataset: Dataset,
    pub failures: Vec<TargetFailure>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn write_report<W: std::io::Write>(&self, writer: W) -> Result<(), CollectError> {
        serde_json::to_writer_pretty(writer, &self.failures)
            .map_err(|e| CollectError::Export(format!("report write failed: {e}")))
    }
}

/// The strategy selector / orchestrator.
///
/// Drives every target through fetch → extract → normalize → admit,
/// concurrently across targets, with the hinted strategy first and one
/// fallback to the alternate strategy after retries are exhausted.
/// This is the only component aware of both fetch strategies.
pub struct Collector<H, B, E>
where
    H: Fetcher,
    B: Fetcher,
    E: Extractor,
{
    http: H,
    browser: B,
    extractor: E,
    schemas: Arc<HashMap<String, ExtractionSchema>>,
    config: Arc<RunConfig>,
}

struct RunContext<H, B, E> {
    http: H,
    browser: B,
    extractor: E,
    schemas: Arc<HashMap<String, ExtractionSchema>>,
    config: Arc<RunConfig>,
    sink: DatasetSink,
    failures: Arc<Mutex<Vec<TargetFailure>>>,
    limiter: RateLimiter,
    http_pool: Arc<Semaphore>,
    browser_pool: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<H: Clone, B: Clone, E: Clone> Clone for RunContext<H, B, E> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            browser: self.browser.clone(),
            extractor: self.extractor.clone(),
            schemas: Arc::clone(&self.schemas),
            config: Arc::clone(&self.config),
            sink: self.sink.clone(),
            failures: Arc::clone(&self.failures),
            limiter: self.limiter.clone(),
            http_pool: Arc::clone(&self.http_pool),
            browser_pool: Arc::clone(&self.browser_pool),
            cancel: self.cancel.clone(),
        }
    }
}

/// Outcome of a single guarded operation: either it produced a value,
/// or cancellation (plus the grace period) abandoned it.
enum Flow<T> {
    Done(T),
    Abandoned,
}

impl<H, B, E> Collector<H, B, E>
where
    H: Fetcher + 'static,
    B: Fetcher + 'static,
    E: Extractor + 'static,
{
    pub fn new(
        http: H,
        browser: B,
        extractor: E,
        schemas: HashMap<String, ExtractionSchema>,
        config: RunConfig,
    ) -> Self {
        Self {
            http,
            browser,
            extractor,
            schemas: Arc::new(schemas),
            config: Arc::new(config),
        }
    }

    /// Run a collection without external cancellation.
    pub async fn collect(&self, targets: Vec<Target>) -> RunOutcome {
        self.collect_with_cancel(targets, CancellationToken::new())
            .await
    }

    /// Run a collection. A cancelled token ends the run early but
    /// still returns the partial dataset and failure log.
    pub async fn collect_with_cancel(
        &self,
        targets: Vec<Target>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let ctx = RunContext {
            http: self.http.clone(),
            browser: self.browser.clone(),
            extractor: self.extractor.clone(),
            schemas: Arc::clone(&self.schemas),
            config: Arc::clone(&self.config),
            sink: DatasetSink::new(),
            failures: Arc::new(Mutex::new(Vec::new())),
            limiter: RateLimiter::new(self.config.rate_limit.clone()),
            http_pool: Arc::new(Semaphore::new(self.config.http_concurrency)),
            browser_pool: Arc::new(Semaphore::new(self.config.browser_concurrency)),
            cancel,
        };

        tracing::info!(targets = targets.len(), "collection run started");

        let mut tasks = JoinSet::new();
        for target in targets {
            let ctx = ctx.clone();
            tasks.spawn(async move { run_target(ctx, target).await });
        }
        while tasks.join_next().await.is_some() {}

        let failures = ctx.failures.lock().unwrap().clone();
        let dataset = ctx.sink.snapshot();
        let cancelled = ctx.cancel.is_cancelled();
        tracing::info!(
            records = dataset.len(),
            failures = failures.len(),
            cancelled,
            "collection run finished"
        );
        RunOutcome {
            dataset,
            failures,
            cancelled,
        }
    }
}

async fn run_target<H, B, E>(ctx: RunContext<H, B, E>, target: Target)
where
    H: Fetcher,
    B: Fetcher,
    E: Extractor,
{
    let Some(schema) = ctx.schemas.get(&target.schema) else {
        let err = CollectError::InvalidTarget(format!(
            "unknown schema reference '{}'",
            target.schema
        ));
        tracing::warn!(url = %target.url, error = %err, "target rejected");
        record_failure(&ctx, &target, target.strategy, 0, &err);
        return;
    };
    let identity = schema.identity_fields();
    let mut state = AttemptState::new(target.strategy, &ctx.config);

    loop {
        if ctx.cancel.is_cancelled() {
            tracing::debug!(url = %target.url, "cancelled before attempt");
            return;
        }

        let attempt = state.begin_attempt();
        let strategy = state.strategy();
        tracing::debug!(url = %target.url, %strategy, attempt, "fetching");

        let fetched = match fetch_once(&ctx, &target, strategy).await {
            Flow::Done(result) => result,
            Flow::Abandoned => {
                tracing::debug!(url = %target.url, "fetch abandoned on cancellation");
                return;
            }
        };

        let error = match fetched {
            Ok(result) => {
                match ctx.extractor.extract(&result.html, schema) {
                    Ok(fields) => {
                        if Record::is_vacant(&fields) {
                            tracing::debug!(url = %target.url, "extraction yielded no values");
                            state.on_success();
                            return;
                        }
                        let record = Record::normalize(fields, &identity, &target.url);
                        if ctx.sink.admit(record) {
                            tracing::info!(url = %target.url, %strategy, "record collected");
                        } else {
                            tracing::debug!(url = %target.url, "duplicate record rejected");
                        }
                        state.on_success();
                        return;
                    }
                    Err(e) => {
                        // Page structure is presumed stable, so a schema
                        // mismatch is final for this target: no retry, no
                        // fallback.
                        tracing::warn!(url = %target.url, error = %e, "extraction failed");
                        let _ = state.on_failure(&e);
                        record_failure(&ctx, &target, strategy, state.retries_consumed(), &e);
                        return;
                    }
                }
            }
            Err(e) => e,
        };

        match state.on_failure(&error) {
            NextStep::RetryAfter(delay) => {
                tracing::debug!(
                    url = %target.url,
                    %strategy,
                    delay_ms = %delay.as_millis(),
                    error = %error,
                    "retrying after backoff"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ctx.cancel.cancelled() => return,
                }
            }
            NextStep::FallBack(next) => {
                tracing::info!(
                    url = %target.url,
                    from = %strategy,
                    to = %next,
                    error = %error,
                    "falling back to alternate strategy"
                );
            }
            NextStep::GiveUp => {
                tracing::warn!(
                    url = %target.url,
                    %strategy,
                    retries = state.retries_consumed(),
                    error = %error,
                    "target failed permanently"
                );
                record_failure(&ctx, &target, strategy, state.retries_consumed(), &error);
                return;
            }
        }
    }
}

/// One rate-limited, pool-bounded fetch with the strategy's fetcher.
async fn fetch_once<H, B, E>(
    ctx: &RunContext<H, B, E>,
    target: &Target,
    strategy: Strategy,
) -> Flow<Result<FetchResult, CollectError>>
where
    H: Fetcher,
    B: Fetcher,
    E: Extractor,
{
    let pool = match strategy {
        Strategy::Http => &ctx.http_pool,
        Strategy::Browser => &ctx.browser_pool,
    };
    let permit = tokio::select! {
        permit = Arc::clone(pool).acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return Flow::Done(Err(CollectError::Cancelled)),
        },
        () = ctx.cancel.cancelled() => return Flow::Abandoned,
    };

    tokio::select! {
        () = ctx.limiter.acquire() => {}
        () = ctx.cancel.cancelled() => return Flow::Abandoned,
    }

    let result = match strategy {
        Strategy::Http => {
            with_grace(ctx.http.fetch(target), &ctx.cancel, ctx.config.grace_period).await
        }
        Strategy::Browser => {
            with_grace(
                ctx.browser.fetch(target),
                &ctx.cancel,
                ctx.config.grace_period,
            )
            .await
        }
    };
    drop(permit);
    result
}

/// Drive the fetch to completion; on cancellation give it the grace
/// period to finish cleanly, then abandon it.
async fn with_grace<F>(fut: F, cancel: &CancellationToken, grace: Duration) -> Flow<F::Output>
where
    F: Future,
{
    let mut fut = std::pin::pin!(fut);
    tokio::select! {
        result = &mut fut => Flow::Done(result),
        () = cancel.cancelled() => match tokio::time::timeout(grace, &mut fut).await {
            Ok(result) => Flow::Done(result),
            Err(_) => Flow::Abandoned,
        },
    }
}

fn record_failure<H, B, E>(
    ctx: &RunContext<H, B, E>,
    target: &Target,
    strategy: Strategy,
    retries: u32,
    error: &CollectError,
) {
    ctx.failures.lock().unwrap().push(TargetFailure {
        url: target.url.clone(),
        strategy,
        classification: error.classification().to_string(),
        error: error.to_string(),
        retries,
    });
}
