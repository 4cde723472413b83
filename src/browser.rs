//! Headless browser access.
//!
//! The crawler only ever needs four things from a browser page, so that is
//! all [`PageDriver`] exposes. Extraction runs on the rendered HTML, which
//! keeps DOM handles from leaking past this module.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, info};

use crate::error::ScrapeError;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A single browser page the crawler drives.
#[async_trait]
pub trait PageDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError>;

    /// Wait until `selector` matches, failing after `timeout`.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
    -> Result<(), ScrapeError>;

    /// Rendered DOM of the current page.
    async fn content(&mut self) -> Result<String, ScrapeError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), ScrapeError>;
}

/// [`PageDriver`] backed by a WebDriver session (chromedriver).
pub struct WebDriverPage {
    driver: WebDriver,
}

impl WebDriverPage {
    /// Start a Chrome session against the WebDriver server at `server_url`.
    pub async fn connect(server_url: &str, headless: bool) -> Result<Self, ScrapeError> {
        let mut caps = DesiredCapabilities::chrome();
        if headless {
            caps.add_arg("--headless=new")?;
        }
        caps.add_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_arg("--window-size=1366,900")?;
        caps.add_arg(&format!("--user-agent={}", USER_AGENT))?;

        let driver = WebDriver::new(server_url, caps).await?;
        info!(server_url, headless, "browser session started");
        Ok(Self { driver })
    }

    /// End the browser session.
    pub async fn close(self) -> Result<(), ScrapeError> {
        self.driver.quit().await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError> {
        debug!(url, "navigating");
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        self.driver
            .query(By::Css(selector))
            .wait(timeout, Duration::from_millis(250))
            .first()
            .await
            .map_err(|_| ScrapeError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            })?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        Ok(self.driver.source().await?)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), ScrapeError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.driver.screenshot(path).await?;
        Ok(())
    }
}
