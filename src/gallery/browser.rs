use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{GalleryBrowser, GallerySession};
use crate::config::Settings;
use crate::error::WalkError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a fresh Chrome process for every product session.
#[derive(Debug, Clone)]
pub struct ChromeBrowser {
    headless: bool,
    chrome_path: Option<PathBuf>,
    request_timeout: Duration,
}

impl ChromeBrowser {
    pub fn from_settings(settings: &Settings) -> Self {
        ChromeBrowser {
            headless: settings.headless,
            chrome_path: settings.chrome_path.clone(),
            request_timeout: settings.navigation_timeout(),
        }
    }

    fn config(&self) -> Result<BrowserConfig, WalkError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.request_timeout)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(WalkError::Launch)
    }
}

impl GalleryBrowser for ChromeBrowser {
    type Session = ChromeSession;

    async fn open_session(&self) -> Result<ChromeSession, WalkError> {
        let (browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| WalkError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = browser.new_page("about:blank").await;
        let mut session = ChromeSession {
            browser: Some(browser),
            page: None,
            handler: Some(handler),
        };
        match page {
            Ok(page) => {
                session.page = Some(page);
                Ok(session)
            }
            Err(e) => {
                let _ = session.shutdown().await;
                Err(WalkError::Launch(format!("failed to open page: {}", e)))
            }
        }
    }
}

/// One browser process and its single page.
///
/// `close` is the normal release path. If the session is dropped without it
/// (a panic mid-walk), `Drop` stops the event handler and chromiumoxide kills
/// the child process.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, WalkError> {
        self.page
            .as_ref()
            .ok_or_else(|| WalkError::Page("session already closed".into()))
    }

    async fn shutdown(&mut self) -> Result<(), WalkError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }
        let mut result = Ok(());
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                result = Err(WalkError::Page(format!("failed to close browser: {}", e)));
            }
            if let Err(e) = browser.wait().await {
                debug!("Failed to reap browser process: {}", e);
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        result
    }
}

impl GallerySession for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), WalkError> {
        let page = self.page()?;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(WalkError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(WalkError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }

    async fn wait_for_image_src(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<String>, WalkError> {
        let page = self.page()?;
        let deadline = Instant::now() + timeout;
        loop {
            // A lookup error means the element is not in the DOM yet.
            if let Ok(element) = page.find_element(selector).await {
                let src = element
                    .attribute("src")
                    .await
                    .map_err(|e| WalkError::Page(e.to_string()))?;
                if let Some(src) = src.filter(|s| !s.trim().is_empty()) {
                    return Ok(Some(src));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(mut self) -> Result<(), WalkError> {
        self.shutdown().await
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        if self.browser.is_some() {
            warn!("Browser session dropped without close, killing browser");
        }
    }
}
