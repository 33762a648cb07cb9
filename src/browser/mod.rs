//! Headless browser pool for scraping article pages.
//!
//! One Chromium process hosts `N` isolated browser contexts. Every
//! [`BrowserPool::extract`] call takes one of `M` page slots (a global
//! ceiling, not per context), opens a page in the requested context,
//! resolves the landing URL, pulls the text and closes the page. Per-page
//! failures and timeouts come back as `Ok(None)`; only misuse of the pool
//! itself is an error.
//!
//! # Submodules
//!
//! - [`redirect`]: landing URL resolution
//! - [`extract`]: visible text extraction
//! - [`page`]: page handle that always closes

pub mod extract;
pub mod page;
pub mod redirect;

use crate::config::ScrapingConfig;
use crate::error::PoolError;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use extract::TextRules;
use futures::StreamExt;
use page::PageGuard;
use redirect::ResolveTiming;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

const LAUNCH_ARGS: [&str; 8] = [
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-background-networking",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-sync",
    "--no-first-run",
];

/// Text pulled from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// Where the page ended up after redirects.
    pub final_url: String,
    pub text: String,
}

/// Anything that can turn a URL into page text using one of its contexts.
pub trait PageFetcher {
    /// Number of contexts; valid indexes are `0..contexts()`.
    fn contexts(&self) -> usize;

    async fn extract(&self, url: &str, context_index: usize) -> Result<Option<PageText>, PoolError>;
}

impl<T: PageFetcher> PageFetcher for &T {
    fn contexts(&self) -> usize {
        (**self).contexts()
    }

    async fn extract(&self, url: &str, context_index: usize) -> Result<Option<PageText>, PoolError> {
        (**self).extract(url, context_index).await
    }
}

struct Running {
    browser: Browser,
    contexts: Vec<BrowserContextId>,
    handler: JoinHandle<()>,
}

/// `N` browser contexts behind an `M`-slot semaphore.
pub struct BrowserPool {
    settings: ScrapingConfig,
    rules: TextRules,
    slots: Semaphore,
    running: RwLock<Option<Running>>,
}

impl BrowserPool {
    pub fn new(settings: ScrapingConfig) -> Self {
        Self {
            rules: TextRules::from_config(&settings),
            slots: Semaphore::new(settings.max_tabs),
            running: RwLock::new(None),
            settings,
        }
    }

    /// Launch the browser and create the contexts. A second call is a no-op.
    #[instrument(level = "info", skip_all, fields(contexts = self.settings.browser_contexts, max_tabs = self.settings.max_tabs))]
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut guard = self.running.write().await;
        if guard.is_some() {
            debug!("Browser pool already started");
            return Ok(());
        }

        let (mut browser, mut handler) = Browser::launch(launch_config(&self.settings)?)
            .await
            .map_err(|e| PoolError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            debug!("Browser event loop exited");
        });

        let mut contexts = Vec::with_capacity(self.settings.browser_contexts);
        for _ in 0..self.settings.browser_contexts {
            match browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await
            {
                Ok(id) => contexts.push(id),
                Err(e) => {
                    let _ = browser.close().await;
                    handler.abort();
                    return Err(PoolError::Launch(format!("failed to create context: {e}")));
                }
            }
        }

        info!("Browser pool started");
        *guard = Some(Running {
            browser,
            contexts,
            handler,
        });
        Ok(())
    }

    /// Scrape one URL in the given context.
    #[instrument(level = "info", skip_all, fields(%url, context = context_index))]
    pub async fn extract(&self, url: &str, context_index: usize) -> Result<Option<PageText>, PoolError> {
        let size = self.settings.browser_contexts;
        if context_index >= size {
            return Err(PoolError::InvalidArgument {
                index: context_index,
                size,
            });
        }

        let context_id = {
            let guard = self.running.read().await;
            let running = guard.as_ref().ok_or(PoolError::NotStarted)?;
            running.contexts[context_index].clone()
        };

        let slot_wait = self.settings.slot_wait_secs.map(Duration::from_secs);
        let budget = Duration::from_secs(self.settings.page_timeout_secs);
        Ok(bounded(&self.slots, slot_wait, budget, self.visit(url, context_id)).await)
    }

    /// Dispose every context and close the browser.
    #[instrument(level = "info", skip_all)]
    pub async fn stop(&self) {
        let mut guard = self.running.write().await;
        let Some(mut running) = guard.take() else {
            return;
        };

        for id in running.contexts.drain(..) {
            if let Err(e) = running.browser.dispose_browser_context(id).await {
                warn!(error = %e, "Failed to dispose browser context");
            }
        }
        if let Err(e) = running.browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        if timeout(Duration::from_secs(5), running.browser.wait()).await.is_err() {
            warn!("Browser process did not exit in time");
        }
        running.handler.abort();
        info!("Browser pool stopped");
    }

    async fn visit(&self, url: &str, context_id: BrowserContextId) -> Option<PageText> {
        let page = PageGuard::new(self.open_page(context_id).await?, url);
        let timing = ResolveTiming {
            settle: Duration::from_millis(self.settings.settle_timeout_ms),
            redirect_wait: Duration::from_secs(self.settings.redirect_wait_secs),
        };

        let final_url = redirect::resolve(&page, url, timing).await;
        let text = extract::extract_text(&page, &self.rules).await;
        page.close().await;

        match text {
            Some(text) => {
                debug!(%final_url, chars = text.len(), "Extracted page text");
                Some(PageText { final_url, text })
            }
            None => {
                debug!(%final_url, "No usable text on page");
                None
            }
        }
    }

    async fn open_page(&self, context_id: BrowserContextId) -> Option<Page> {
        let guard = self.running.read().await;
        let running = guard.as_ref()?;
        let params = match CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
        {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Invalid page parameters");
                return None;
            }
        };
        match running.browser.new_page(params).await {
            Ok(page) => Some(page),
            Err(e) => {
                debug!(error = %e, "Failed to open page");
                None
            }
        }
    }
}

impl PageFetcher for BrowserPool {
    fn contexts(&self) -> usize {
        self.settings.browser_contexts
    }

    async fn extract(&self, url: &str, context_index: usize) -> Result<Option<PageText>, PoolError> {
        BrowserPool::extract(self, url, context_index).await
    }
}

/// Run `work` holding one of `slots` for at most `budget`.
///
/// The permit is released when this returns, whether `work` finished or was
/// cut off. A timed-out `work` is dropped in place, which closes any
/// [`PageGuard`] it held.
async fn bounded<T>(
    slots: &Semaphore,
    slot_wait: Option<Duration>,
    budget: Duration,
    work: impl Future<Output = Option<T>>,
) -> Option<T> {
    let _permit = acquire_slot(slots, slot_wait).await?;
    match timeout(budget, work).await {
        Ok(found) => found,
        Err(_) => {
            warn!(?budget, "Page task timed out");
            None
        }
    }
}

async fn acquire_slot(slots: &Semaphore, wait: Option<Duration>) -> Option<SemaphorePermit<'_>> {
    let acquired = match wait {
        Some(wait) => match timeout(wait, slots.acquire()).await {
            Ok(acquired) => acquired,
            Err(_) => {
                warn!(?wait, "Timed out waiting for a page slot");
                return None;
            }
        },
        None => slots.acquire().await,
    };
    acquired.ok()
}

fn launch_config(settings: &ScrapingConfig) -> Result<BrowserConfig, PoolError> {
    let mut builder = BrowserConfig::builder().args(LAUNCH_ARGS);
    if !settings.headless {
        builder = builder.with_head();
    }
    if let Ok(bin) = std::env::var("CHROME_BIN") {
        builder = builder.chrome_executable(bin);
    }
    builder.build().map_err(PoolError::Launch)
}
