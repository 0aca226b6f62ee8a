//! Browser session management
//!
//! Acquires one Chrome process and one page per build, and exposes them to
//! the pipeline through the [`BrowserLauncher`], [`BrowserSession`] and
//! [`RenderPage`] traits. The chromiumoxide-backed implementations live here
//! as well; tests substitute in-memory ones.

use crate::{
    create_browser_config, is_in_container, managed_browser_dir, BuildError, BuildOptions,
    PdfCaptureOptions,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetEmulatedMediaParams;
use chromiumoxide::cdp::browser_protocol::network::{self, EventResponseReceived};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, PrintToPdfParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EvaluateParams, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::Page;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Console message category, as reported by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Log,
    Debug,
    Info,
    Warning,
    Error,
    Other,
}

/// Page-level signal delivered while a build is running
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Uncaught error thrown inside the document
    PageError(String),
    Console {
        kind: ConsoleKind,
        text: String,
        /// Script that emitted the message, when the page reports one
        source_url: Option<String>,
    },
    Response {
        url: String,
        status: i64,
        /// Generic success flag; the only signal for `file:` loads
        ok: bool,
    },
}

impl PageEvent {
    pub fn response(url: impl Into<String>, status: i64) -> Self {
        PageEvent::Response {
            url: url.into(),
            status,
            ok: status == 0 || (200..300).contains(&status),
        }
    }
}

/// Merged, in-order page event stream
pub type PageEventStream = BoxStream<'static, PageEvent>;

/// The single page a build drives
#[async_trait]
pub trait RenderPage: Send + Sync {
    /// Subscribe to page errors, console output and network responses.
    async fn events(&self) -> Result<PageEventStream, BuildError>;

    /// Navigate and wait for the network to go idle, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BuildError>;

    /// Evaluate a script in the page, awaiting any returned promise.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BuildError>;

    async fn emulate_print_media(&self) -> Result<(), BuildError>;

    async fn print_to_pdf(&self, options: &PdfCaptureOptions) -> Result<Vec<u8>, BuildError>;
}

/// One browser process plus its page, owned by a single build
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> &dyn RenderPage;

    /// Browser product string, e.g. `HeadlessChrome/120.0.6099.109`
    fn version(&self) -> &str;

    async fn close(self: Box<Self>) -> Result<(), BuildError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &BuildOptions) -> Result<Box<dyn BrowserSession>, BuildError>;
}

/// What to do about a requested browser executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    UseLocal,
    Fetch { into: PathBuf },
    Unavailable,
}

/// Decide how to obtain `path`: use it, download it into the managed directory, or give up.
pub fn plan_acquisition(path: &Path, exists: bool, managed_dir: Option<&Path>) -> Acquisition {
    if exists {
        return Acquisition::UseLocal;
    }
    match managed_dir {
        Some(dir) if path.starts_with(dir) => Acquisition::Fetch {
            into: dir.to_path_buf(),
        },
        _ => Acquisition::Unavailable,
    }
}

/// Verify that `path` can be launched, downloading a browser when it points into the managed directory.
pub async fn ensure_executable(path: &Path) -> Result<PathBuf, BuildError> {
    let exists = tokio::fs::metadata(path).await.is_ok();
    let managed = managed_browser_dir();

    match plan_acquisition(path, exists, managed.as_deref()) {
        Acquisition::UseLocal => Ok(path.to_path_buf()),
        Acquisition::Unavailable => Err(BuildError::BrowserUnavailable(path.display().to_string())),
        Acquisition::Fetch { into } => {
            info!("Browser not found, downloading into {}", into.display());
            tokio::fs::create_dir_all(&into).await?;

            let fetcher_options = BrowserFetcherOptions::builder()
                .with_path(&into)
                .build()
                .map_err(|e| BuildError::BrowserLaunchFailed(e.to_string()))?;
            let installation = BrowserFetcher::new(fetcher_options)
                .fetch()
                .await
                .map_err(|e| BuildError::BrowserLaunchFailed(e.to_string()))?;

            info!("Browser downloaded: {}", installation.executable_path.display());
            Ok(installation.executable_path)
        }
    }
}

/// Launches Chrome through chromiumoxide
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &BuildOptions) -> Result<Box<dyn BrowserSession>, BuildError> {
        let executable = match &options.executable_path {
            Some(path) => Some(ensure_executable(path).await?),
            None => None,
        };

        let config = create_browser_config(options, executable.as_deref(), is_in_container())?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BuildError::BrowserLaunchFailed(e.to_string()))?;

        // The handler implements Stream and must be polled for CDP traffic to flow
        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        tracing::debug!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        let version = browser.version().await?.product;
        debug!("Launched {}", version);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BuildError::BrowserLaunchFailed(e.to_string()))?;

        Ok(Box::new(ChromiumSession {
            browser,
            handler: handler_task,
            page: ChromiumPage { page },
            version,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    page: ChromiumPage,
    version: String,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> &dyn RenderPage {
        &self.page
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn close(self: Box<Self>) -> Result<(), BuildError> {
        let mut this = *self;
        let closed = this.browser.close().await;
        debug!("Browser exit: {}", exit_summary(&this.browser.wait().await));
        this.handler.abort();
        closed.map(|_| ()).map_err(BuildError::from)
    }
}

pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl RenderPage for ChromiumPage {
    async fn events(&self) -> Result<PageEventStream, BuildError> {
        self.page.execute(network::EnableParams::default()).await?;

        let errors = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await?
            .map(|event| PageEvent::PageError(exception_message(&event)));
        let console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await?
            .map(|event| console_event(&event));
        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await?
            .map(|event| PageEvent::response(event.response.url.clone(), event.response.status));

        Ok(futures::stream::select_all(vec![errors.boxed(), console.boxed(), responses.boxed()]).boxed())
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BuildError> {
        self.page
            .execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;
        let mut lifecycle = self.page.event_listener::<EventLifecycleEvent>().await?;
        let main_frame = self.page.mainframe().await?;

        let navigate = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BuildError::NavigationFailed(e.to_string()))?;

            // Only count idleness reported for the new document of the main frame
            let mut new_document = false;
            while let Some(event) = lifecycle.next().await {
                if main_frame.as_ref().is_some_and(|id| *id != event.frame_id) {
                    continue;
                }
                match event.name.as_str() {
                    "init" => new_document = true,
                    "networkIdle" if new_document => return Ok(()),
                    _ => {}
                }
            }
            Ok::<(), BuildError>(())
        };

        tokio::time::timeout(timeout, navigate)
            .await
            .map_err(|_| BuildError::NavigationTimeout(timeout))?
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BuildError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BuildError::EvaluationFailed)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| BuildError::EvaluationFailed(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn emulate_print_media(&self) -> Result<(), BuildError> {
        let params = SetEmulatedMediaParams {
            media: Some("print".to_string()),
            ..Default::default()
        };
        self.page.execute(params).await?;
        Ok(())
    }

    async fn print_to_pdf(&self, options: &PdfCaptureOptions) -> Result<Vec<u8>, BuildError> {
        let params = PrintToPdfParams {
            print_background: Some(options.print_background),
            prefer_css_page_size: Some(options.prefer_css_page_size),
            margin_top: Some(options.margin),
            margin_bottom: Some(options.margin),
            margin_left: Some(options.margin),
            margin_right: Some(options.margin),
            ..Default::default()
        };

        self.page
            .pdf(params)
            .await
            .map_err(|e| BuildError::CaptureFailed(e.to_string()))
    }
}

fn exception_message(event: &EventExceptionThrown) -> String {
    event
        .exception_details
        .exception
        .as_ref()
        .and_then(|exception| exception.description.clone())
        .unwrap_or_else(|| event.exception_details.text.clone())
}

fn console_event(event: &EventConsoleApiCalled) -> PageEvent {
    let kind = match event.r#type {
        ConsoleApiCalledType::Log => ConsoleKind::Log,
        ConsoleApiCalledType::Debug => ConsoleKind::Debug,
        ConsoleApiCalledType::Info => ConsoleKind::Info,
        ConsoleApiCalledType::Warning => ConsoleKind::Warning,
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleKind::Error,
        _ => ConsoleKind::Other,
    };

    let text = event
        .args
        .iter()
        .filter_map(|arg| match &arg.value {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(value) => Some(value.to_string()),
            None => arg.description.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ");

    let source_url = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first())
        .map(|frame| frame.url.clone());

    PageEvent::Console {
        kind,
        text,
        source_url,
    }
}

/// Describe the result of waiting on the browser process.
fn exit_summary(waited: &std::io::Result<Option<std::process::ExitStatus>>) -> String {
    match waited {
        Ok(Some(status)) => status.to_string(),
        Ok(None) => "no child process".to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}
