//! Headless Chrome/Chromium over the DevTools protocol.

use super::{EngineError, EngineSession, RenderEngine};
use crate::config::PageSetup;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Launches a fresh headless browser per request.
#[derive(Debug, Clone, Default)]
pub struct ChromeEngine {
    executable: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl ChromeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this browser binary instead of searching `PATH`.
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Extra command-line switch passed to the browser.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        // Concurrent browsers must not share a profile directory.
        let profile = tempfile::Builder::new()
            .prefix("sheet2pdf-chrome-")
            .tempdir()
            .map_err(|e| EngineError::Launch(format!("profile dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .user_data_dir(profile.path());
        if let Some(ref exe) = self.executable {
            builder = builder.chrome_executable(exe);
        }
        for arg in &self.extra_args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(EngineError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("chrome handler: {e}");
                }
            }
        });

        debug!("Chrome launched (profile {})", profile.path().display());
        Ok(Box::new(ChromeSession {
            browser,
            handler_task,
            _profile: profile,
        }))
    }

    fn name(&self) -> &str {
        "chrome"
    }
}

struct ChromeSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    _profile: TempDir,
}

fn print_params(page: &PageSetup) -> PrintToPdfParams {
    PrintToPdfParams {
        print_background: Some(page.print_background),
        paper_width: Some(PageSetup::inches(page.width_mm)),
        paper_height: Some(PageSetup::inches(page.height_mm)),
        margin_top: Some(PageSetup::inches(page.margin_top_mm)),
        margin_bottom: Some(PageSetup::inches(page.margin_bottom_mm)),
        margin_left: Some(PageSetup::inches(page.margin_left_mm)),
        margin_right: Some(PageSetup::inches(page.margin_right_mm)),
        prefer_css_page_size: Some(false),
        ..Default::default()
    }
}

#[async_trait]
impl EngineSession for ChromeSession {
    async fn print_pdf(&mut self, markup: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError> {
        let tab = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Print(format!("new page: {e}")))?;

        tab.set_content(markup)
            .await
            .map_err(|e| EngineError::Print(format!("set content: {e}")))?;
        tab.wait_for_navigation()
            .await
            .map_err(|e| EngineError::Print(format!("load: {e}")))?;

        let bytes = tab
            .pdf(print_params(page))
            .await
            .map_err(|e| EngineError::Print(format!("print: {e}")))?;

        if let Err(e) = tab.close().await {
            debug!("closing tab: {e}");
        }
        Ok(bytes)
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        let ChromeSession {
            mut browser,
            handler_task,
            _profile,
        } = *self;

        let result = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Close(e.to_string()));
        if let Err(e) = browser.wait().await {
            warn!("waiting for chrome to exit: {e}");
        }
        handler_task.abort();
        result
    }
}
