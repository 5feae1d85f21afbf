use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;

use propslab_core::{CollectError, FetchResult, Strategy, Target};

use crate::defense::looks_like_challenge;
use crate::identity::IdentityPool;

/// Evasion scripts injected before any page script runs. Based on the
/// puppeteer-extra stealth technique set.
const STEALTH_SCRIPTS: &[&str] = &[
    // Headless Chromium reports webdriver=true; real Chrome does not.
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    // Headless builds omit the window.chrome object entirely.
    r#"
    window.chrome = {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    "#,
    // An empty plugin list is a strong automation signal.
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });
    "#,
    // Must agree with the Accept-Language header the HTTP strategy sends.
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
    // Driver-injected globals some defenses probe for.
    r#"
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
    "#,
];

/// Browser-driven fetcher: headless Chromium over the Chrome DevTools
/// Protocol, with stealth configuration applied per page.
///
/// One Chromium process is shared by all clones; each fetch opens a
/// fresh tab, waits for the page to render, and closes the tab. Keep
/// the orchestrator's browser pool small: every open tab costs real
/// memory in the browser process.
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Mutex<Browser>>,
    identities: IdentityPool,
    timeout: Duration,
    /// Settle delay after navigation when no readiness selector is set.
    settle: Duration,
    /// Wait for this selector to appear before reading the DOM.
    wait_selector: Option<String>,
}

impl BrowserFetcher {
    /// Launch a stealth-configured headless Chromium. Fails when no
    /// usable Chrome binary is found or the process won't start; the
    /// caller decides whether that is fatal for the run.
    pub async fn launch(
        identities: IdentityPool,
        timeout: Duration,
    ) -> Result<Self, CollectError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .build()
            .map_err(|e| CollectError::Browser(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CollectError::Browser(format!("failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the
        // connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            identities,
            timeout,
            settle: Duration::from_millis(500),
            wait_selector: None,
        })
    }

    pub fn with_wait_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_selector = Some(selector.into());
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Close the Chromium process. Best-effort: a browser that died on
    /// its own is not an error worth surfacing at teardown.
    pub async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "browser close failed");
        }
        let _ = browser.wait().await;
    }

    async fn fetch_page(&self, target: &Target) -> Result<String, CollectError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| CollectError::Browser(format!("failed to open tab: {e}")))?
        };

        // The deadline covers navigation and rendering only, never the
        // close: a timed-out tab must still be closed, or tabs
        // accumulate in the shared browser process.
        let outcome = with_deadline(self.timeout, self.drive_page(&page, target)).await;
        let _ = page.close().await;
        outcome
    }

    async fn drive_page(&self, page: &Page, target: &Target) -> Result<String, CollectError> {
        // Identity and evasion must be in place before navigation.
        let agent = self.identities.pick();
        page.execute(SetUserAgentOverrideParams::new(agent))
            .await
            .map_err(|e| CollectError::Browser(format!("failed to set user agent: {e}")))?;
        page.execute(SetTimezoneOverrideParams::new("UTC"))
            .await
            .map_err(|e| CollectError::Browser(format!("failed to set timezone: {e}")))?;
        for script in STEALTH_SCRIPTS {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(*script))
                .await
                .map_err(|e| CollectError::Browser(format!("stealth injection failed: {e}")))?;
        }

        page.goto(target.url.as_str())
            .await
            .map_err(|e| CollectError::Browser(format!("navigation failed: {e}")))?;
        let _ = page.wait_for_navigation().await;

        match &self.wait_selector {
            Some(selector) => self.await_selector(page, selector).await,
            None => tokio::time::sleep(self.settle).await,
        }

        page.content()
            .await
            .map_err(|e| CollectError::Browser(format!("failed to read page content: {e}")))
    }

    /// Poll for the readiness selector. A page that never produces it
    /// is still read; the extractor decides whether the DOM is usable.
    async fn await_selector(&self, page: &Page, selector: &str) {
        for _ in 0..20 {
            if page.find_element(selector).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        tracing::warn!(selector, "readiness selector never appeared");
    }
}

/// Run a page operation under the strategy timeout, mapping an elapsed
/// deadline into the error taxonomy instead of dropping the caller's
/// surrounding cleanup.
async fn with_deadline<F, T>(limit: Duration, operation: F) -> Result<T, CollectError>
where
    F: Future<Output = Result<T, CollectError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(CollectError::Timeout(limit.as_secs())),
    }
}

impl propslab_core::Fetcher for BrowserFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchResult, CollectError> {
        let started = std::time::Instant::now();
        let html = self.fetch_page(target).await?;

        if looks_like_challenge(&html) {
            tracing::debug!(url = %target.url, "challenge page survived rendering");
            return Err(CollectError::BlockedByDefense(target.url.clone()));
        }

        Ok(FetchResult {
            html,
            // CDP does not expose the navigation status code cheaply.
            status: 200,
            elapsed: started.elapsed(),
            strategy: Strategy::Browser,
        })
    }
}

/// Locate a Chrome/Chromium binary, honouring an explicit `CHROME_BIN`
/// override first. Snap's wrapper script strips the CLI flags headless
/// mode needs, so the real binary inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/opt/google/chrome/google-chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_maps_to_timeout_error() {
        let result: Result<(), CollectError> =
            with_deadline(Duration::from_millis(10), std::future::pending()).await;
        match result {
            Err(CollectError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_after_deadline_still_runs() {
        // Mirrors the fetch_page shape: a stalled page operation must
        // not skip the tab close that follows it.
        let mut steps = Vec::new();
        let outcome: Result<(), CollectError> =
            with_deadline(Duration::from_millis(10), std::future::pending()).await;
        steps.push("close");
        assert!(outcome.is_err());
        assert_eq!(steps, ["close"]);
    }

    #[tokio::test]
    async fn deadline_passes_through_completed_operations() {
        let result = with_deadline(Duration::from_secs(1), async {
            Ok::<_, CollectError>("rendered".to_string())
        })
        .await
        .unwrap();
        assert_eq!(result, "rendered");
    }
}
