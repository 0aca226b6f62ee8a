//! Typed request/response boundary to the in-page viewer
//!
//! Every interaction with the renderer running in the browser goes through
//! [`ViewerRequest`]: each request is a fixed script evaluated in the page,
//! and its JSON answer is decoded into a Rust type. Unit conversion and
//! string parsing happen on this side of the boundary.

use crate::{parse_css_number, BuildError, RenderPage, TimeoutBudget};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// CSS pixels to PDF points.
pub const PX_TO_PT: f64 = 0.75;

/// `readyState` the viewer reports once every page is laid out.
pub const READY_STATE_COMPLETE: &str = "complete";

/// Fixed capability set of the in-page viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRequest {
    /// Whether `window.coreViewer` exists yet
    ViewerPresent,
    ReadyState,
    /// Raw page-progression attribute of the viewport root
    PageProgression,
    /// Text of the settings panel's version label
    CoreVersion,
    Metadata,
    /// Opens the TOC panel, waits for it to be realized, reads it, closes it
    TableOfContents,
    /// Raw inline sizes of every page container, in DOM order
    PageSizes,
}

impl ViewerRequest {
    pub const ALL: [ViewerRequest; 7] = [
        ViewerRequest::ViewerPresent,
        ViewerRequest::ReadyState,
        ViewerRequest::PageProgression,
        ViewerRequest::CoreVersion,
        ViewerRequest::Metadata,
        ViewerRequest::TableOfContents,
        ViewerRequest::PageSizes,
    ];

    pub fn script(self) -> &'static str {
        match self {
            ViewerRequest::ViewerPresent => "!!window.coreViewer",
            ViewerRequest::ReadyState => "window.coreViewer ? window.coreViewer.readyState : null",
            ViewerRequest::PageProgression => {
                r#"(() => {
                    const viewport = document.querySelector('#vivliostyle-viewer-viewport');
                    return viewport ? viewport.getAttribute('data-vivliostyle-page-progression') : null;
                })()"#
            }
            ViewerRequest::CoreVersion => {
                r#"(() => {
                    const label = document.querySelector('#vivliostyle-menu_settings .version');
                    return label ? label.textContent : null;
                })()"#
            }
            ViewerRequest::Metadata => "window.coreViewer.getMetadata()",
            ViewerRequest::TableOfContents => {
                r#"new Promise((resolve) => {
                    const viewer = window.coreViewer;
                    function listener(payload) {
                        if (!payload || payload.a !== 'toc') return;
                        viewer.removeListener('done', listener);
                        viewer.showTOC(false);
                        resolve(viewer.getTOC());
                    }
                    viewer.addListener('done', listener);
                    viewer.showTOC(true);
                })"#
            }
            ViewerRequest::PageSizes => {
                r#"Array.from(document.querySelectorAll(
                    '#vivliostyle-viewer-viewport > div > div > div[data-vivliostyle-page-container]'
                )).map((container) => {
                    const bleedBox = container.querySelector('div[data-vivliostyle-bleed-box]');
                    return {
                        width: container.style.width,
                        height: container.style.height,
                        bleedLeft: bleedBox ? bleedBox.style.left : null,
                        bleedPadding: bleedBox ? bleedBox.style.paddingLeft : null,
                    };
                })"#
            }
        }
    }

    /// Reverse lookup, used by in-memory pages.
    pub fn from_script(script: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|request| request.script() == script)
    }
}

/// Reading direction of the paginated output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageProgression {
    #[default]
    Ltr,
    Rtl,
}

impl PageProgression {
    /// `"rtl"` is right-to-left; anything else, including no attribute, is left-to-right.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("rtl") => PageProgression::Rtl,
            _ => PageProgression::Ltr,
        }
    }
}

/// Pull the version token out of the viewer's settings label, e.g. `"Vivliostyle Core: 2.25.0"`.
pub fn extract_core_version(label: Option<&str>) -> Option<String> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let re = VERSION_RE
        .get_or_init(|| Regex::new(r"^.*?: (\d[-+.\w]+).*$").expect("version regex compiles"));
    re.captures(label?.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// One value of a metadata property, with its refinements kept opaque
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetadataValue {
    #[serde(rename = "v")]
    pub value: String,
    #[serde(flatten)]
    pub refinements: serde_json::Map<String, serde_json::Value>,
}

/// Property IRI to its values, in document order
pub type DocumentMetadata = BTreeMap<String, Vec<MetadataValue>>;

/// Entry of the rendered document's table of contents
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TocItem {
    #[serde(default)]
    pub title: String,
    /// Named destination (element id) the entry points to
    #[serde(rename = "id", default)]
    pub destination: String,
    #[serde(default)]
    pub children: Vec<TocItem>,
}

/// Inline size strings of one page container, as read from the DOM
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPageBox {
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub bleed_left: Option<String>,
    #[serde(default)]
    pub bleed_padding: Option<String>,
}

/// Media and bleed geometry of one rendered page, in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageSizeData {
    /// Zero when the container has no usable inline width
    pub media_width: f64,
    pub media_height: f64,
    /// `None` when the page has no bleed box
    pub bleed_offset: Option<f64>,
    pub bleed_size: Option<f64>,
}

impl From<&RawPageBox> for PageSizeData {
    fn from(raw: &RawPageBox) -> Self {
        let to_pt = |v: &Option<String>| v.as_deref().and_then(parse_css_number).map(|px| px * PX_TO_PT);
        Self {
            media_width: to_pt(&raw.width).unwrap_or(0.0),
            media_height: to_pt(&raw.height).unwrap_or(0.0),
            bleed_offset: to_pt(&raw.bleed_left),
            bleed_size: to_pt(&raw.bleed_padding),
        }
    }
}

/// Everything post-processing needs from the rendered page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDocumentData {
    pub page_progression: PageProgression,
    pub core_version: Option<String>,
    pub metadata: DocumentMetadata,
    pub table_of_contents: Vec<TocItem>,
    pub page_size_data: Vec<PageSizeData>,
}

/// Client side of the viewer protocol, bound to one page
pub struct Viewer<'a> {
    page: &'a dyn RenderPage,
}

impl<'a> Viewer<'a> {
    pub fn new(page: &'a dyn RenderPage) -> Self {
        Self { page }
    }

    async fn request<T: DeserializeOwned>(&self, request: ViewerRequest) -> Result<T, BuildError> {
        let value = self.page.evaluate(request.script()).await?;
        serde_json::from_value(value)
            .map_err(|e| BuildError::EvaluationFailed(format!("{request:?}: {e}")))
    }

    pub async fn is_present(&self) -> Result<bool, BuildError> {
        self.request(ViewerRequest::ViewerPresent).await
    }

    pub async fn ready_state(&self) -> Result<Option<String>, BuildError> {
        self.request(ViewerRequest::ReadyState).await
    }

    pub async fn page_progression(&self) -> Result<PageProgression, BuildError> {
        let attribute: Option<String> = self.request(ViewerRequest::PageProgression).await?;
        Ok(PageProgression::from_attribute(attribute.as_deref()))
    }

    pub async fn core_version(&self) -> Result<Option<String>, BuildError> {
        let label: Option<String> = self.request(ViewerRequest::CoreVersion).await?;
        Ok(extract_core_version(label.as_deref()))
    }

    pub async fn metadata(&self) -> Result<DocumentMetadata, BuildError> {
        let metadata: Option<DocumentMetadata> = self.request(ViewerRequest::Metadata).await?;
        Ok(metadata.unwrap_or_default())
    }

    pub async fn table_of_contents(&self) -> Result<Vec<TocItem>, BuildError> {
        let toc: Option<Vec<TocItem>> = self.request(ViewerRequest::TableOfContents).await?;
        Ok(toc.unwrap_or_default())
    }

    pub async fn page_sizes(&self) -> Result<Vec<PageSizeData>, BuildError> {
        let boxes: Vec<RawPageBox> = self.request(ViewerRequest::PageSizes).await?;
        Ok(boxes.iter().map(PageSizeData::from).collect())
    }

    /// Run the extraction protocols in order; the TOC round trip must follow metadata.
    ///
    /// The TOC wait depends on a viewer event, so it is bounded by whatever
    /// remains of `budget`.
    pub async fn extract(&self, budget: &TimeoutBudget) -> Result<ExtractedDocumentData, BuildError> {
        let page_progression = self.page_progression().await?;
        let core_version = self.core_version().await?;
        let metadata = self.metadata().await?;

        let toc_timeout = budget.remaining().ok_or(BuildError::TimeoutBudgetExhausted)?;
        let table_of_contents = tokio::time::timeout(toc_timeout, self.table_of_contents())
            .await
            .map_err(|_| BuildError::TimeoutBudgetExhausted)??;

        let page_size_data = self.page_sizes().await?;

        debug!(
            "Extracted {:?} progression, viewer {:?}, {} metadata properties, {} TOC entries, {} pages",
            page_progression,
            core_version,
            metadata.len(),
            table_of_contents.len(),
            page_size_data.len()
        );

        Ok(ExtractedDocumentData {
            page_progression,
            core_version,
            metadata,
            table_of_contents,
            page_size_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_progression_mapping() {
        assert_eq!(PageProgression::from_attribute(Some("rtl")), PageProgression::Rtl);
        assert_eq!(PageProgression::from_attribute(Some("ltr")), PageProgression::Ltr);
        assert_eq!(PageProgression::from_attribute(Some("RTL")), PageProgression::Ltr);
        assert_eq!(PageProgression::from_attribute(None), PageProgression::Ltr);
    }

    #[test]
    fn test_page_without_bleed_box() {
        let raw = RawPageBox {
            width: Some("800px".to_string()),
            height: Some("1000px".to_string()),
            ..Default::default()
        };
        let size = PageSizeData::from(&raw);
        assert_eq!(size.media_width, 600.0);
        assert_eq!(size.media_height, 750.0);
        assert!(size.bleed_offset.is_none());
        assert!(size.bleed_size.is_none());
    }

    #[test]
    fn test_page_with_bleed_box() {
        let raw: RawPageBox = serde_json::from_value(json!({
            "width": "600px",
            "height": "840px",
            "bleedLeft": "40px",
            "bleedPadding": "12px"
        }))
        .unwrap();
        let size = PageSizeData::from(&raw);
        assert_eq!(size.media_width, 450.0);
        assert_eq!(size.media_height, 630.0);
        assert_eq!(size.bleed_offset, Some(30.0));
        assert_eq!(size.bleed_size, Some(9.0));
    }

    #[test]
    fn test_empty_bleed_styles_are_not_numeric() {
        let raw: RawPageBox = serde_json::from_value(json!({
            "width": "100px", "height": "100px", "bleedLeft": "", "bleedPadding": ""
        }))
        .unwrap();
        let size = PageSizeData::from(&raw);
        assert!(size.bleed_offset.is_none());
        assert!(size.bleed_size.is_none());
    }

    #[test]
    fn test_extract_core_version() {
        assert_eq!(
            extract_core_version(Some("Vivliostyle Core Version: 2.25.1")),
            Some("2.25.1".to_string())
        );
        assert_eq!(
            extract_core_version(Some("Core: 2.26.0-pre.3 (build)")),
            Some("2.26.0-pre.3".to_string())
        );
        assert_eq!(extract_core_version(Some("no version here")), None);
        assert_eq!(
            extract_core_version(Some("  Vivliostyle Core: 2.30.0 ")),
            Some("2.30.0".to_string())
        );
        // The whole label must match, so a second line rules it out
        assert_eq!(
            extract_core_version(Some("Vivliostyle Core: 2.30.0\nVivliostyle Viewer: 2.30.0")),
            None
        );
        assert_eq!(extract_core_version(None), None);
    }

    #[test]
    fn test_toc_script_closes_panel_before_resolving() {
        let script = ViewerRequest::TableOfContents.script();
        let close = script.find("showTOC(false)").unwrap();
        let resolve = script.find("resolve(").unwrap();
        let open = script.rfind("showTOC(true)").unwrap();
        assert!(close < resolve);
        assert!(script.find("removeListener").unwrap() < resolve);
        assert!(open > resolve);
    }

    #[test]
    fn test_scripts_are_distinct() {
        for request in ViewerRequest::ALL {
            assert_eq!(ViewerRequest::from_script(request.script()), Some(request));
        }
    }

    #[test]
    fn test_metadata_and_toc_decoding() {
        let metadata: DocumentMetadata = serde_json::from_value(json!({
            "http://purl.org/dc/terms/title": [{ "v": "Book", "o": 0 }],
            "http://purl.org/dc/terms/creator": [{ "v": "A" }, { "v": "B" }]
        }))
        .unwrap();
        assert_eq!(metadata["http://purl.org/dc/terms/creator"].len(), 2);
        assert_eq!(metadata["http://purl.org/dc/terms/title"][0].value, "Book");

        let toc: Vec<TocItem> = serde_json::from_value(json!([
            { "title": "Chapter 1", "id": "ch1", "children": [{ "title": "1.1", "id": "s11" }] }
        ]))
        .unwrap();
        assert_eq!(toc[0].destination, "ch1");
        assert_eq!(toc[0].children[0].title, "1.1");
        assert!(toc[0].children[0].children.is_empty());
    }
}
