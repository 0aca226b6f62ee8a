//! Build orchestration
//!
//! One build drives one browser session through a fixed sequence: launch,
//! navigate, wait for typesetting, extract document data, capture, and hand
//! the PDF to the post-processor. The timeout budget starts before launch.

use crate::{
    capture_pdf, format_duration, validate_options, BrowserLauncher, BuildError, BuildOptions, BuildPhase,
    ChromiumLauncher, ContentServer, EntryProgress, EventMonitor, ExtractedDocumentData, Navigator,
    PageSignal, PdfPostProcessor, PostProcessRequest, PostProcessor, RenderPage, TimeoutBudget, Viewer,
    ViewerUrlServer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a finished build
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub path: PathBuf,
    /// Entry transitions in the order they were reported
    pub progress: Vec<EntryProgress>,
    /// Non-fatal page conditions seen while typesetting
    pub signals: Vec<PageSignal>,
}

struct Rendered {
    pdf: Vec<u8>,
    data: ExtractedDocumentData,
    progress: Vec<EntryProgress>,
    signals: Vec<PageSignal>,
}

/// Typesets a document in a headless browser and writes it as PDF
///
/// # Examples
///
/// ```rust,no_run
/// use pagepress::{BuildOptions, PdfBuilder};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = BuildOptions {
///         input: "dist/index.html".to_string(),
///         ..Default::default()
///     };
///     let path = PdfBuilder::default().build(&options).await?;
///     println!("Wrote {}", path.display());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PdfBuilder {
    launcher: Arc<dyn BrowserLauncher>,
    server: Arc<dyn ContentServer>,
    post_processor: Arc<dyn PostProcessor>,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new(
            Arc::new(ChromiumLauncher),
            Arc::new(ViewerUrlServer),
            Arc::new(PdfPostProcessor),
        )
    }
}

impl PdfBuilder {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        server: Arc<dyn ContentServer>,
        post_processor: Arc<dyn PostProcessor>,
    ) -> Self {
        Self {
            launcher,
            server,
            post_processor,
        }
    }

    /// Run one build and return the path of the written PDF.
    pub async fn build(&self, options: &BuildOptions) -> Result<PathBuf, BuildError> {
        self.build_with_report(options).await.map(|report| report.path)
    }

    /// Run one build and report entry progress and page signals along with the PDF path.
    pub async fn build_with_report(&self, options: &BuildOptions) -> Result<BuildReport, BuildError> {
        validate_options(options)?;
        let options = &options.with_absolute_dirs()?;
        let budget = TimeoutBudget::start(options.timeout());

        info!("{}", BuildPhase::Launching);
        let session = self.launcher.launch(options).await?;
        let browser_version = session.version().to_string();
        debug!("Browser: {}", browser_version);

        let rendered = self.render(session.page(), options, &budget).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close browser: {}", e);
        }
        let Rendered {
            pdf,
            data,
            progress,
            signals,
        } = rendered?;

        if let Some(parent) = options.target.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("{}", BuildPhase::PostProcessing);
        let disable_creator_option = options.uses_custom_viewer() && data.core_version.is_none();
        let path = self
            .post_processor
            .process(PostProcessRequest {
                pdf,
                data,
                browser_version,
                disable_creator_option,
                target: options.target.clone(),
                image: options.image.clone(),
            })
            .await?;

        info!("{} ({})", BuildPhase::Done, format_duration(budget.elapsed()));
        Ok(BuildReport {
            path,
            progress,
            signals,
        })
    }

    async fn render(
        &self,
        page: &dyn RenderPage,
        options: &BuildOptions,
        budget: &TimeoutBudget,
    ) -> Result<Rendered, BuildError> {
        let mut monitor = EventMonitor::new(options);
        let mut events = page.events().await?;
        let url = self.server.viewer_url(options).await?;

        let navigator = Navigator::new(page, options.timeout());
        tokio::select! {
            fatal = monitor.watch(&mut events) => return Err(fatal),
            loaded = navigator.load(url.as_str()) => loaded?,
        }
        monitor.finish();
        if !monitor.signals().is_empty() {
            debug!("{} non-fatal page errors", monitor.signals().len());
        }

        info!("{}", BuildPhase::Extracting);
        let data = Viewer::new(page).extract(budget).await?;

        let remaining = budget.checkpoint()?;
        info!("{}", BuildPhase::Capturing);
        let pdf = capture_pdf(page, remaining).await?;

        Ok(Rendered {
            pdf,
            data,
            progress: monitor.progress().to_vec(),
            signals: monitor.signals().to_vec(),
        })
    }
}

/// Build with the Chromium launcher, the viewer URL server and the lopdf post-processor.
pub async fn build_pdf(options: &BuildOptions) -> Result<PathBuf, BuildError> {
    PdfBuilder::default().build(options).await
}
