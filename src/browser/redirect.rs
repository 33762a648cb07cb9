//! Final landing URL resolution.
//!
//! Search hits usually point at a `news.google.com/rss/articles/...` link
//! that only forwards to the publisher from client-side script. After the
//! page has loaded and gone quiet we poll the page URL until it leaves that
//! pattern or the redirect wait runs out. Resolution never fails: on any
//! navigation error the original URL is returned.

use chromiumoxide::Page;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Consecutive unchanged resource counts that count as "network idle".
const IDLE_POLLS: u32 = 2;
const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";

/// Waits applied while resolving one page.
#[derive(Debug, Clone, Copy)]
pub struct ResolveTiming {
    pub settle: Duration,
    pub redirect_wait: Duration,
}

/// True for Google News article indirection links.
pub fn is_indirection(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let google_news = parsed
        .host_str()
        .is_some_and(|host| host == "news.google.com");
    let path = parsed.path();
    google_news && (path.starts_with("/rss/articles/") || path.starts_with("/articles/"))
}

/// Navigate `page` to `url` and return the URL it settles on.
#[instrument(level = "debug", skip_all, fields(%url))]
pub async fn resolve(page: &Page, url: &str, timing: ResolveTiming) -> String {
    if let Err(e) = page.goto(url).await {
        debug!(error = %e, "Navigation failed; keeping original URL");
        return url.to_string();
    }
    wait_for_network_idle(page, timing.settle).await;

    let current = current_url(page).await.unwrap_or_else(|| url.to_string());
    if !is_indirection(&current) {
        return current;
    }

    let current = follow_redirect(current, timing.redirect_wait, || current_url(page)).await;
    if is_indirection(&current) {
        debug!(%current, "Redirect wait expired");
    } else {
        debug!(%current, "Followed client-side redirect");
        wait_for_network_idle(page, timing.settle).await;
    }
    current
}

/// Re-read the URL every poll interval until it stops being an indirection
/// link or `wait` has passed. A failed read keeps the last known URL.
async fn follow_redirect<F, Fut>(mut current: String, wait: Duration, mut read_url: F) -> String
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let deadline = Instant::now() + wait;
    while is_indirection(&current) && Instant::now() < deadline {
        sleep(POLL_INTERVAL).await;
        if let Some(next) = read_url().await {
            current = next;
        }
    }
    current
}

async fn current_url(page: &Page) -> Option<String> {
    match page.url().await {
        Ok(url) => url,
        Err(e) => {
            debug!(error = %e, "Could not read page URL");
            None
        }
    }
}

/// Poll the resource-timing buffer until it stops growing, up to `limit`.
async fn wait_for_network_idle(page: &Page, limit: Duration) {
    let deadline = Instant::now() + limit;
    let mut last: Option<u64> = None;
    let mut unchanged = 0;

    while Instant::now() < deadline {
        let count = match page.evaluate(RESOURCE_COUNT_JS).await {
            Ok(result) => result.into_value::<u64>().ok(),
            Err(_) => None,
        };
        let Some(count) = count else {
            return;
        };
        if last == Some(count) {
            unchanged += 1;
            if unchanged >= IDLE_POLLS {
                return;
            }
        } else {
            unchanged = 0;
            last = Some(count);
        }
        sleep(POLL_INTERVAL).await;
    }
}
