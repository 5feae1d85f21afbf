use std::time::{Duration, Instant};

use propslab_core::{CollectError, FetchResult, Strategy, Target};
use reqwest::Client;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use url::Url;

use crate::defense::looks_like_challenge;
use crate::identity::{self, IdentityPool};

/// Lightweight HTTP fetcher using reqwest.
///
/// One GET per fetch, with a fresh identity drawn from the pool and a
/// hard timeout. Responses are classified into the [`CollectError`]
/// taxonomy here, including challenge pages delivered with a 200.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    identities: IdentityPool,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(identities: IdentityPool) -> Result<Self, CollectError> {
        Self::with_timeout(identities, Duration::from_secs(30))
    }

    pub fn with_timeout(
        identities: IdentityPool,
        timeout: Duration,
    ) -> Result<Self, CollectError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectError::Connection(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            identities,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl propslab_core::Fetcher for HttpFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchResult, CollectError> {
        validate_url(&target.url)?;

        let agent = self.identities.pick();
        let started = Instant::now();
        let response = self
            .client
            .get(&target.url)
            .header(USER_AGENT, agent.as_str())
            .header(ACCEPT_LANGUAGE, identity::ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollectError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    CollectError::Connection(format!("connection failed: {e}"))
                } else {
                    CollectError::Connection(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        // A body that won't read or decode is malformed content, not a
        // transport hiccup: retrying the same strategy won't help.
        let html = response
            .text()
            .await
            .map_err(|e| CollectError::ParseFailure(format!("failed to read body: {e}")))?;

        // A challenge interstitial can arrive as a 200 or a 403; both
        // mean the defense fired, not that the page is gone.
        if looks_like_challenge(&html) {
            tracing::debug!(url = %target.url, status, "challenge page detected");
            return Err(CollectError::BlockedByDefense(target.url.clone()));
        }
        if !(200..300).contains(&status) {
            return Err(CollectError::HttpStatus {
                status,
                url: target.url.clone(),
            });
        }

        Ok(FetchResult {
            html,
            status,
            elapsed: started.elapsed(),
            strategy: Strategy::Http,
        })
    }
}

fn validate_url(url: &str) -> Result<(), CollectError> {
    let parsed =
        Url::parse(url).map_err(|e| CollectError::InvalidTarget(format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(CollectError::InvalidTarget(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}
