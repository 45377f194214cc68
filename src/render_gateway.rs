use async_trait::async_trait;

use crate::error::RenderError;

/// A loaded results page: its browser tab plus the DOM snapshot taken once
/// content settled. Consumed by [`RenderGateway::release`].
#[derive(Debug)]
pub struct RenderedPage {
    url: String,
    tab: String,
    html: String,
}

impl RenderedPage {
    pub fn new(url: impl Into<String>, tab: impl Into<String>, html: impl Into<String>) -> Self {
        RenderedPage {
            url: url.into(),
            tab: tab.into(),
            html: html.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

#[async_trait]
pub trait RenderGateway: Send + Sync {
    /// Loads `url`, waits for the main content landmark, then lets the page
    /// settle before snapshotting it.
    ///
    /// On error no tab is left open.
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;

    /// Closes the page's tab. Failures are logged, never raised: the page is
    /// gone from the caller's point of view either way.
    async fn release(&self, page: RenderedPage);
}
