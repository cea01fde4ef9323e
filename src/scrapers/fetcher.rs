use crate::error::{Result, ScrapeError};
use crate::models::Zone;
use crate::scrapers::traits::FetchProfile;
use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fully rendered HTML of a zone's listing page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// Drives a browser or HTTP client to obtain a listing page.
///
/// One fetcher belongs to exactly one zone task and is dropped when that
/// task ends, so any session it holds is released with it.
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch(&mut self, zone: &Zone, profile: &FetchProfile) -> Result<RenderedPage>;

    /// Stops work left behind by an abandoned `fetch` and waits until it is
    /// gone. Called after a fetch was cut short by the zone timeout.
    async fn release(&mut self) {}
}

/// Hands out a fresh fetcher per zone task
pub trait FetcherFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn PageFetcher>>;
}

impl<F> FetcherFactory for F
where
    F: Fn() -> Result<Box<dyn PageFetcher>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn PageFetcher>> {
        self()
    }
}

/// Headless Chrome fetcher for pages that build their cards client-side
#[derive(Debug)]
pub struct BrowserFetcher {
    headless: bool,
    debug_dir: Option<PathBuf>,
    budget: Duration,
    cancel: Arc<AtomicBool>,
    render: Option<JoinHandle<anyhow::Result<String>>>,
}

impl BrowserFetcher {
    /// `budget` bounds one render: every wait inside it is clamped to the
    /// time left.
    pub fn new(headless: bool, debug_dir: Option<PathBuf>, budget: Duration) -> Self {
        Self {
            headless,
            debug_dir,
            budget,
            cancel: Arc::new(AtomicBool::new(false)),
            render: None,
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, zone: &Zone, profile: &FetchProfile) -> Result<RenderedPage> {
        let url = zone.url.clone();
        let profile = profile.clone();
        let headless = self.headless;
        let budget = RenderBudget::new(Arc::clone(&self.cancel), self.budget);

        // headless_chrome is blocking; the browser lives and dies inside this task
        let render = self
            .render
            .insert(tokio::task::spawn_blocking(move || render_page(&url, &profile, headless, &budget)));
        let rendered = render.await;
        self.render = None;

        let html = rendered
            .map_err(|e| ScrapeError::fetch(&zone.url, e))?
            .map_err(|e| ScrapeError::fetch(&zone.url, format!("{:#}", e)))?;

        if let Some(dir) = &self.debug_dir {
            save_debug_html(dir, zone, &html).await;
        }

        Ok(RenderedPage {
            url: zone.url.clone(),
            html,
        })
    }

    async fn release(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(render) = self.render.take() {
            match render.await {
                Ok(Ok(_)) => debug!("Abandoned render finished anyway"),
                Ok(Err(e)) => debug!("Abandoned render stopped: {:#}", e),
                Err(e) => warn!("Abandoned render panicked: {}", e),
            }
        }
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        // Aborted zone tasks never reach `release`; at least stop the render early
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Cancellation flag plus deadline shared with a blocking render
#[derive(Debug)]
struct RenderBudget {
    cancel: Arc<AtomicBool>,
    deadline: Instant,
}

impl RenderBudget {
    const POLL: Duration = Duration::from_millis(100);

    fn new(cancel: Arc<AtomicBool>, budget: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + budget,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `wait` or whatever is left of the budget, whichever is shorter
    fn clamp(&self, wait: Duration) -> Duration {
        wait.min(self.remaining())
    }

    fn check(&self, step: &str) -> anyhow::Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            anyhow::bail!("render cancelled before {}", step);
        }
        if self.remaining().is_zero() {
            anyhow::bail!("render budget spent before {}", step);
        }
        Ok(())
    }

    /// Sleeps for `pause`, waking regularly to notice a cancellation.
    fn pause(&self, pause: Duration) -> anyhow::Result<()> {
        let until = Instant::now() + self.clamp(pause);
        loop {
            self.check("end of pause")?;
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            thread::sleep(left.min(Self::POLL));
        }
    }
}

fn render_page(
    url: &str,
    profile: &FetchProfile,
    headless: bool,
    budget: &RenderBudget,
) -> anyhow::Result<String> {
    debug!("Launching headless Chrome for {}", url);
    budget.check("launch")?;

    let options = LaunchOptions::default_builder()
        .headless(headless)
        .idle_browser_timeout(profile.wait_timeout * 4)
        .build()
        .context("Failed to build launch options")?;

    let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
    let tab = browser.new_tab().context("Failed to open tab")?;

    budget.check("navigation")?;
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;

    // Consent dialogs are optional: not finding one is fine
    if let Some(consent) = profile.consent_selector {
        budget.check("consent")?;
        match tab.wait_for_element_with_custom_timeout(consent, budget.clamp(profile.wait_timeout)) {
            Ok(button) => {
                if let Err(e) = button.click() {
                    debug!("Consent button found but not clickable: {}", e);
                }
            }
            Err(_) => debug!("No consent dialog on {}", url),
        }
    }

    if let Some(ready) = profile.ready_selector {
        budget.check("ready wait")?;
        tab.wait_for_element_with_custom_timeout(ready, budget.clamp(profile.wait_timeout))
            .with_context(|| format!("'{}' never appeared", ready))?;
    }

    for round in 0..profile.scroll_rounds {
        budget.check(&format!("scroll {}", round + 1))?;
        tab.evaluate("window.scrollTo(0, document.body.scrollHeight);", false)?;
        budget.pause(profile.scroll_pause)?;
    }

    budget.check("capture")?;
    let result = tab.evaluate("document.documentElement.outerHTML", false)?;
    let html = result
        .value
        .as_ref()
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .context("Could not get HTML from page")?;

    info!("Rendered {} ({} bytes)", url, html.len());
    Ok(html)
}

async fn save_debug_html(dir: &Path, zone: &Zone, html: &str) {
    let filename = dir.join(format!(
        "{}_{}.html",
        zone.source.as_str().to_lowercase(),
        zone.city.to_lowercase().replace(' ', "-")
    ));
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&filename, html).await
    };
    match written.await {
        Ok(()) => debug!("Saved page HTML to {}", filename.display()),
        Err(e) => warn!("Could not save debug HTML to {}: {}", filename.display(), e),
    }
}

/// Plain HTTP fetcher for server-rendered listing pages.
/// Consent and scroll steps of the profile do not apply here.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ScrapeError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&mut self, zone: &Zone, _profile: &FetchProfile) -> Result<RenderedPage> {
        debug!("Fetching URL: {}", zone.url);

        let response = self
            .client
            .get(&zone.url)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(&zone.url, e))?;

        if !response.status().is_success() {
            return Err(ScrapeError::fetch(
                &zone.url,
                format!("status {}", response.status()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ScrapeError::fetch(&zone.url, e))?;

        debug!("Downloaded {} bytes of HTML", html.len());

        Ok(RenderedPage {
            url: zone.url.clone(),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    #[tokio::test]
    async fn debug_html_is_named_after_zone() {
        let dir = tempfile::tempdir().unwrap();
        let zone = Zone::new("https://www.immojeune.com/x.html", "Saint Etienne", Source::ImmoJeune);

        save_debug_html(&dir.path().join("debug"), &zone, "<html></html>").await;

        let saved = dir.path().join("debug").join("immojeune_saint-etienne.html");
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "<html></html>");
    }

    #[test]
    fn render_budget_clamps_waits_to_time_left() {
        let budget = RenderBudget::new(Arc::new(AtomicBool::new(false)), Duration::from_millis(300));
        assert!(budget.clamp(Duration::from_secs(20)) <= Duration::from_millis(300));
        assert_eq!(budget.clamp(Duration::ZERO), Duration::ZERO);
        assert!(budget.check("consent").is_ok());

        let spent = RenderBudget::new(Arc::new(AtomicBool::new(false)), Duration::ZERO);
        assert!(spent.check("consent").is_err());
    }

    #[test]
    fn cancelled_pause_returns_early() {
        let cancel = Arc::new(AtomicBool::new(false));
        let budget = RenderBudget::new(Arc::clone(&cancel), Duration::from_secs(60));

        let flag = Arc::clone(&cancel);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        assert!(budget.pause(Duration::from_secs(30)).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[tokio::test]
    async fn release_without_pending_render_is_a_no_op() {
        let mut fetcher = BrowserFetcher::new(true, None, Duration::from_secs(1));
        fetcher.release().await;
        assert!(fetcher.render.is_none());
        assert!(fetcher.cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn http_fetcher_reports_unreachable_host_as_fetch_fault() {
        let mut fetcher = HttpFetcher::new().unwrap();
        let zone = Zone::new("http://127.0.0.1:9/listings", "Lyon", Source::Studapart);
        let profile = crate::scrapers::adapter_for(Source::Studapart).fetch_profile();

        let err = fetcher.fetch(&zone, &profile).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { .. }));
    }
}
