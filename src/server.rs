//! Rendering endpoint URLs
//!
//! The content server itself runs outside this crate; builds only need the
//! fully qualified viewer URL for a set of options. [`ViewerUrlServer`]
//! derives it on the assumption that the server exposes the workspace
//! directory at the root of the viewer's origin.

use crate::{absolute_path, relative_to, BuildError, BuildOptions};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

/// Produces the rendering endpoint for a build
#[async_trait]
pub trait ContentServer: Send + Sync {
    async fn viewer_url(&self, options: &BuildOptions) -> Result<Url, BuildError>;
}

/// Composes viewer URLs against an already running content server
#[derive(Debug, Default, Clone, Copy)]
pub struct ViewerUrlServer;

#[async_trait]
impl ContentServer for ViewerUrlServer {
    async fn viewer_url(&self, options: &BuildOptions) -> Result<Url, BuildError> {
        viewer_full_url(options)
    }
}

pub fn viewer_full_url(options: &BuildOptions) -> Result<Url, BuildError> {
    let viewer = options.viewer.as_deref().unwrap_or(&options.viewer_base_url);
    let mut url = Url::parse(viewer)
        .map_err(|e| BuildError::ConfigurationError(format!("Invalid viewer URL {viewer}: {e}")))?;

    let source = resolve_resource(&options.input, &url, &options.workspace_dir)?;
    let params = viewer_params(&source, options, &url)?;
    url.set_fragment(Some(&params));
    Ok(url)
}

/// Hash parameters understood by the viewer.
pub fn viewer_params(source: &str, options: &BuildOptions, viewer: &Url) -> Result<String, BuildError> {
    let mut params = format!("src={}", escape_param(source));
    params.push_str(&format!(
        "&bookMode={}&renderAllPages={}",
        !options.single_doc, !options.quick
    ));

    if let Some(style) = &options.style {
        let style = resolve_resource(style, viewer, &options.workspace_dir)?;
        params.push_str(&format!("&style={}", escape_param(&style)));
    }
    if let Some(user_style) = &options.user_style {
        let user_style = resolve_resource(user_style, viewer, &options.workspace_dir)?;
        params.push_str(&format!("&userStyle={}", escape_param(&user_style)));
    }

    if let Some(page_style) = page_style(options) {
        // Page rules go between the viewer markers so the viewer can replace them
        params.push_str(&format!(
            "&style=data:,/*<viewer>*/{}/*</viewer>*/{}",
            encode_uri_component(&page_style),
            encode_uri_component(options.css.as_deref().unwrap_or_default())
        ));
    }

    if let Some(extra) = &options.viewer_params {
        params.push('&');
        params.push_str(extra);
    }

    Ok(params)
}

/// `@page` rule implied by the size, crop and bleed overrides, if any.
pub fn page_style(options: &BuildOptions) -> Option<String> {
    if options.size.is_none()
        && !options.crop_marks
        && options.bleed.is_none()
        && options.crop_offset.is_none()
        && options.css.is_none()
    {
        return None;
    }

    let mut style = String::from("@page{");
    if let Some(size) = &options.size {
        style.push_str(&format!("size:{size};"));
    }
    if options.crop_marks {
        style.push_str("marks:crop cross;");
    }
    if options.bleed.is_some() || options.crop_marks {
        style.push_str(&format!("bleed:{};", options.bleed.as_deref().unwrap_or("3mm")));
    }
    if let Some(offset) = &options.crop_offset {
        style.push_str(&format!("crop-offset:{offset};"));
    }
    style.push('}');
    Some(style)
}

/// URLs pass through; local paths inside the workspace are served from the viewer's origin,
/// anything else is loaded as a `file:` URL.
fn resolve_resource(reference: &str, viewer: &Url, workspace_dir: &Path) -> Result<String, BuildError> {
    if let Ok(url) = Url::parse(reference) {
        if url.scheme().len() > 1 {
            return Ok(url.to_string());
        }
    }

    let workspace_dir = absolute_path(workspace_dir)?;
    let path = PathBuf::from(reference);
    let path = if path.is_absolute() {
        path
    } else {
        workspace_dir.join(path)
    };

    if let Some(rel) = relative_to(&path, &workspace_dir) {
        let rel = rel.to_string_lossy().replace('\\', "/");
        let served = viewer
            .join(&format!("/{rel}"))
            .map_err(|e| BuildError::ConfigurationError(e.to_string()))?;
        return Ok(served.to_string());
    }

    Url::from_file_path(&path)
        .map(|url| url.to_string())
        .map_err(|_| BuildError::ConfigurationError(format!("Not an absolute path: {}", path.display())))
}

fn escape_param(value: &str) -> String {
    value.replace('&', "%26")
}

/// Characters `encodeURIComponent` leaves alone besides ASCII alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode like JavaScript's `encodeURIComponent`.
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BuildOptions {
        BuildOptions {
            input: "dist/index.html".to_string(),
            workspace_dir: PathBuf::from("/work"),
            viewer_base_url: "http://localhost:13000/__viewer/index.html".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_workspace_input_is_served_from_viewer_origin() {
        let url = ViewerUrlServer.viewer_url(&options()).await.unwrap();
        assert_eq!(url.path(), "/__viewer/index.html");
        assert_eq!(
            url.fragment(),
            Some("src=http://localhost:13000/dist/index.html&bookMode=true&renderAllPages=true")
        );
    }

    #[test]
    fn test_remote_input_and_flags() {
        let opts = BuildOptions {
            input: "https://example.com/book/?a=1&b=2".to_string(),
            single_doc: true,
            quick: true,
            viewer_params: Some("spread=false".to_string()),
            ..options()
        };
        let url = viewer_full_url(&opts).unwrap();
        assert_eq!(
            url.fragment(),
            Some("src=https://example.com/book/?a=1%26b=2&bookMode=false&renderAllPages=false&spread=false")
        );
    }

    #[test]
    fn test_outside_workspace_uses_file_url() {
        let opts = BuildOptions {
            input: "/elsewhere/index.html".to_string(),
            ..options()
        };
        let url = viewer_full_url(&opts).unwrap();
        assert!(url.fragment().unwrap().starts_with("src=file:///elsewhere/index.html&"));
    }

    #[test]
    fn test_absolute_input_with_relative_workspace() {
        let opts = BuildOptions {
            input: "/nonexistent-root/book/index.html".to_string(),
            workspace_dir: PathBuf::from("."),
            ..options()
        };
        let url = viewer_full_url(&opts).unwrap();
        assert!(url
            .fragment()
            .unwrap()
            .starts_with("src=file:///nonexistent-root/book/index.html&"));
    }

    #[test]
    fn test_relative_input_with_relative_workspace_is_served() {
        let opts = BuildOptions {
            input: "./dist/index.html".to_string(),
            workspace_dir: PathBuf::from("."),
            ..options()
        };
        let url = viewer_full_url(&opts).unwrap();
        assert!(url
            .fragment()
            .unwrap()
            .starts_with("src=http://localhost:13000/dist/index.html&"));
    }

    #[test]
    fn test_page_style_from_overrides() {
        assert_eq!(page_style(&options()), None);

        let opts = BuildOptions {
            size: Some("A5".to_string()),
            crop_marks: true,
            crop_offset: Some("10mm".to_string()),
            ..options()
        };
        assert_eq!(
            page_style(&opts).as_deref(),
            Some("@page{size:A5;marks:crop cross;bleed:3mm;crop-offset:10mm;}")
        );
    }

    #[test]
    fn test_css_is_appended_after_viewer_markers() {
        let opts = BuildOptions {
            css: Some("body{color:red}".to_string()),
            ..options()
        };
        let params = viewer_params("src", &opts, &Url::parse("http://localhost/").unwrap()).unwrap();
        assert!(params.ends_with("&style=data:,/*<viewer>*/%40page%7B%7D/*</viewer>*/body%7Bcolor%3Ared%7D"));
    }

    #[test]
    fn test_custom_viewer_replaces_base() {
        let opts = BuildOptions {
            viewer: Some("https://viewer.example.com/v/".to_string()),
            input: "https://example.com/doc.html".to_string(),
            ..options()
        };
        let url = viewer_full_url(&opts).unwrap();
        assert_eq!(url.host_str(), Some("viewer.example.com"));
    }

    #[test]
    fn test_encode_uri_component() {
        assert_eq!(encode_uri_component("@page{size:A4;}"), "%40page%7Bsize%3AA4%3B%7D");
        assert_eq!(encode_uri_component("a b"), "a%20b");
        assert_eq!(encode_uri_component("-_.!~*'()"), "-_.!~*'()");
        assert_eq!(encode_uri_component("/?#&="), "%2F%3F%23%26%3D");
        assert_eq!(encode_uri_component("é"), "%C3%A9");
    }
}
