//! Print-to-PDF under the remaining build budget

use crate::{format_bytes, BuildError, RenderPage};
use std::time::Duration;
use tracing::{debug, info};

/// Print settings handed to the browser
#[derive(Debug, Clone, PartialEq)]
pub struct PdfCaptureOptions {
    /// Page margin on every side, in inches
    pub margin: f64,
    pub print_background: bool,
    /// Prefer `@page { size }` over the viewport size
    pub prefer_css_page_size: bool,
}

impl Default for PdfCaptureOptions {
    fn default() -> Self {
        Self {
            margin: 0.0,
            print_background: true,
            prefer_css_page_size: true,
        }
    }
}

/// Capture the page as PDF, failing with `CaptureTimeout` once `timeout` elapses.
pub async fn capture_pdf(page: &dyn RenderPage, timeout: Duration) -> Result<Vec<u8>, BuildError> {
    let options = PdfCaptureOptions::default();
    debug!("Capturing PDF with {:?} (timeout {:?})", options, timeout);

    let pdf = tokio::time::timeout(timeout, page.print_to_pdf(&options))
        .await
        .map_err(|_| BuildError::CaptureTimeout(timeout))??;

    info!("PDF captured: {}", format_bytes(pdf.len()));
    Ok(pdf)
}
