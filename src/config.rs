//! Build options with serde serialization/deserialization
//!
//! This module provides the resolved configuration for a single PDF build,
//! the manuscript entries it correlates progress against, and the browser
//! launch settings derived from it.

use crate::{absolute_path, BuildError};
use chromiumoxide::browser::BrowserConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the viewer's bootstrap script; console errors raised from it are fatal.
pub const VIEWER_BOOTSTRAP_SCRIPT: &str = "vivliostyle-viewer.js";

/// Default container image for containerized builds and preflight.
pub const DEFAULT_IMAGE: &str = "ghcr.io/vivliostyle/cli:latest";

/// One logical source document contributing to the output
///
/// Only used to translate observed network activity into a readable
/// progress label; the build never reads the files themselves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManuscriptEntry {
    /// Manuscript source (Markdown, HTML, ...)
    pub source_path: PathBuf,
    /// Document the viewer actually loads
    pub target_path: PathBuf,
    #[serde(default)]
    pub title: Option<String>,
}

/// Optional validation pass applied when the final PDF is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreflightMode {
    /// Run press-ready inside the container image
    PressReady,
    /// Run a locally installed press-ready
    PressReadyLocal,
}

/// Output target descriptor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PdfTarget {
    pub path: PathBuf,
    #[serde(default)]
    pub preflight: Option<PreflightMode>,
    #[serde(default)]
    pub preflight_options: Vec<String>,
}

/// Resolved, immutable configuration for one build invocation
///
/// # Examples
///
/// ```rust
/// use pagepress::BuildOptions;
///
/// let options = BuildOptions {
///     input: "index.html".to_string(),
///     timeout_ms: 60_000,
///     ..Default::default()
/// };
/// assert_eq!(options.timeout().as_secs(), 60);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Entry document reference, a local path or a URL
    pub input: String,

    pub target: PdfTarget,

    /// Root the content server exposes; non-`file:` URLs resolve against it
    pub workspace_dir: PathBuf,

    /// Directory progress labels are made relative to
    pub entry_context_dir: PathBuf,

    /// Page size override, e.g. `A5` or `148mm 210mm`
    pub size: Option<String>,
    pub crop_marks: bool,
    pub bleed: Option<String>,
    pub crop_offset: Option<String>,
    /// Extra CSS text injected as a user style
    pub css: Option<String>,
    /// Author style sheet path or URL
    pub style: Option<String>,
    /// User style sheet path or URL
    pub user_style: Option<String>,
    pub single_doc: bool,
    pub quick: bool,

    /// Run the browser with its sandbox (default: true)
    pub sandbox: bool,

    /// Forward ordinary console output to the log (default: false)
    pub verbose: bool,

    /// Shared budget for navigation, typesetting and capture (default: 300 seconds)
    pub timeout_ms: u64,

    /// Manuscript entries in reading order
    pub entries: Vec<ManuscriptEntry>,

    /// Custom viewer URL; `None` uses the bundled viewer
    pub viewer: Option<String>,
    /// Extra viewer hash parameters, appended verbatim
    pub viewer_params: Option<String>,
    /// Where the bundled viewer is served from
    pub viewer_base_url: String,
    pub language: Option<String>,

    /// Browser binary; `None` lets the driver detect one
    pub executable_path: Option<PathBuf>,

    /// Container image for containerized builds and preflight
    pub image: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            input: String::new(),
            target: PdfTarget {
                path: PathBuf::from("output.pdf"),
                ..Default::default()
            },
            workspace_dir: PathBuf::from("."),
            entry_context_dir: PathBuf::from("."),
            size: None,
            crop_marks: false,
            bleed: None,
            crop_offset: None,
            css: None,
            style: None,
            user_style: None,
            single_doc: false,
            quick: false,
            sandbox: true,
            verbose: false,
            timeout_ms: 300_000,
            entries: Vec::new(),
            viewer: None,
            viewer_params: None,
            viewer_base_url: "http://localhost:13000/__vivliostyle-viewer/index.html".to_string(),
            language: None,
            executable_path: None,
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl BuildOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether a custom renderer replaces the bundled one.
    pub fn uses_custom_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    /// Copy with the workspace and entry context directories made absolute.
    pub fn with_absolute_dirs(&self) -> Result<Self, BuildError> {
        let mut resolved = self.clone();
        resolved.workspace_dir = absolute_path(&self.workspace_dir)?;
        resolved.entry_context_dir = absolute_path(&self.entry_context_dir)?;
        Ok(resolved)
    }
}

pub fn validate_options(options: &BuildOptions) -> Result<(), BuildError> {
    if options.timeout_ms == 0 {
        return Err(BuildError::ConfigurationError(
            "Timeout must be greater than 0".to_string(),
        ));
    }

    if options.input.trim().is_empty() {
        return Err(BuildError::ConfigurationError(
            "An input document is required".to_string(),
        ));
    }

    if options.target.path.as_os_str().is_empty() {
        return Err(BuildError::ConfigurationError(
            "Output path must not be empty".to_string(),
        ));
    }

    if let Some(entry) = options
        .entries
        .iter()
        .find(|e| e.source_path.as_os_str().is_empty() || e.target_path.as_os_str().is_empty())
    {
        return Err(BuildError::ConfigurationError(format!(
            "Manuscript entry has an empty path: {entry:?}"
        )));
    }

    Ok(())
}

/// Generate Chrome command-line arguments for a build
///
/// Web security is only relaxed for the bundled viewer, which loads
/// manuscripts across origins. `in_container` adds the shared-memory
/// workaround needed under Docker.
///
/// # Examples
///
/// ```rust
/// use pagepress::{BuildOptions, get_chrome_args};
///
/// let args = get_chrome_args(&BuildOptions::default(), false);
/// assert!(args.contains(&"--disable-web-security".to_string()));
/// ```
pub fn get_chrome_args(options: &BuildOptions, in_container: bool) -> Vec<String> {
    let mut args = vec![
        "--allow-file-access-from-files".to_string(),
        // Avoids layout differences on HiDPI hosts
        "--force-device-scale-factor=1".to_string(),
    ];

    if !options.uses_custom_viewer() {
        args.push("--disable-web-security".to_string());
    }

    if in_container {
        args.push("--disable-dev-shm-usage".to_string());
    }

    if let Some(lang) = &options.language {
        args.push(format!("--lang={lang}"));
    }

    args
}

/// Launch timeout used in place of "no limit"; cold starts are not charged to the build.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub fn create_browser_config(
    options: &BuildOptions,
    executable: Option<&Path>,
    in_container: bool,
) -> Result<BrowserConfig, BuildError> {
    let mut builder = BrowserConfig::builder()
        .args(get_chrome_args(options, in_container))
        .launch_timeout(LAUNCH_TIMEOUT)
        // CDP commands (print-to-PDF in particular) are bounded by the build budget instead
        .request_timeout(options.timeout().max(Duration::from_secs(30)));

    if !options.sandbox {
        builder = builder.no_sandbox();
    }

    if let Some(path) = executable {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(BuildError::BrowserLaunchFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_absolute_dirs() {
        let cwd = std::env::current_dir().unwrap();
        let options = BuildOptions {
            entry_context_dir: PathBuf::from("src/../manuscript"),
            ..Default::default()
        };
        let resolved = options.with_absolute_dirs().unwrap();
        assert_eq!(resolved.workspace_dir, crate::normalize_path(&cwd));
        assert_eq!(resolved.entry_context_dir, crate::normalize_path(&cwd.join("manuscript")));
        assert_eq!(resolved.input, options.input);
    }

    #[test]
    fn test_default_options() {
        let options = BuildOptions::default();
        assert!(options.sandbox);
        assert!(!options.verbose);
        assert_eq!(options.timeout(), Duration::from_secs(300));
        assert!(options.target.preflight.is_none());
        assert!(!options.uses_custom_viewer());
    }

    #[test]
    fn test_chrome_args_custom_viewer_keeps_web_security() {
        let options = BuildOptions {
            viewer: Some("https://viewer.example.com/".to_string()),
            ..Default::default()
        };
        let args = get_chrome_args(&options, false);
        assert!(!args.contains(&"--disable-web-security".to_string()));
        assert!(args.contains(&"--allow-file-access-from-files".to_string()));
    }

    #[test]
    fn test_chrome_args_container_and_language() {
        let options = BuildOptions {
            language: Some("ja".to_string()),
            ..Default::default()
        };
        let args = get_chrome_args(&options, true);
        assert!(args.contains(&"--disable-dev-shm-usage".to_string()));
        assert!(args.contains(&"--lang=ja".to_string()));
    }

    #[test]
    fn test_validate_options() {
        let mut options = BuildOptions {
            input: "index.html".to_string(),
            ..Default::default()
        };
        assert!(validate_options(&options).is_ok());

        options.timeout_ms = 0;
        assert!(matches!(
            validate_options(&options),
            Err(BuildError::ConfigurationError(_))
        ));

        options.timeout_ms = 1000;
        options.entries.push(ManuscriptEntry {
            source_path: PathBuf::from("a.md"),
            target_path: PathBuf::new(),
            title: None,
        });
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_options_json_round_trip_uses_kebab_preflight() {
        let json = r#"{
            "input": "index.html",
            "target": { "path": "out/book.pdf", "preflight": "press-ready-local" },
            "timeout_ms": 5000
        }"#;
        let options: BuildOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.target.preflight, Some(PreflightMode::PressReadyLocal));
        assert_eq!(options.timeout_ms, 5000);
        assert!(options.sandbox);
    }
}
