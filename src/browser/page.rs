//! Scoped page handle.

use chromiumoxide::Page;
use std::ops::Deref;
use tracing::{debug, trace, warn};

/// Closes the wrapped page when the guard goes away.
///
/// [`PageGuard::close`] is the normal path. If the guard is dropped instead
/// (a timeout cancelled the task, or an early return) the close is spawned on
/// the runtime captured at construction.
pub struct PageGuard {
    page: Page,
    url: String,
    closed: bool,
    runtime: tokio::runtime::Handle,
}

impl PageGuard {
    pub fn new(page: Page, url: impl Into<String>) -> Self {
        Self {
            page,
            url: url.into(),
            closed: false,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    pub async fn close(mut self) {
        self.closed = true;
        match self.page.clone().close().await {
            Ok(()) => debug!(url = %self.url, "Page closed"),
            Err(e) => warn!(url = %self.url, error = %e, "Failed to close page"),
        }
    }
}

impl Deref for PageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = self.page.clone();
        let url = std::mem::take(&mut self.url);
        self.runtime.spawn(async move {
            match page.close().await {
                Ok(()) => trace!(%url, "Dropped page closed"),
                Err(e) => warn!(%url, error = %e, "Dropped page failed to close"),
            }
        });
    }
}
