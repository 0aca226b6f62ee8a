use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Cannot find the browser executable: {0}")]
    BrowserUnavailable(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Failed to load the viewer: {0}")]
    RendererLoadFailure(String),

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Viewer did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("PDF capture timed out after {0:?}")]
    CaptureTimeout(Duration),

    #[error("Typesetting process timed out")]
    TimeoutBudgetExhausted,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Page evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("PDF capture failed: {0}")]
    CaptureFailed(String),

    #[error("Post-processing failed: {0}")]
    PostProcessFailed(String),

    #[error("Container execution failed: {0}")]
    ContainerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("PDF error: {0}")]
    PdfError(String),

    #[error("Chrome error: {0}")]
    ChromeError(String),
}

impl BuildError {
    /// Timeout-class failures, whichever bounded wait produced them.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BuildError::NavigationTimeout(_)
                | BuildError::ReadinessTimeout(_)
                | BuildError::CaptureTimeout(_)
                | BuildError::TimeoutBudgetExhausted
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BuildError::ConfigurationError(_) => ErrorSeverity::High,
            BuildError::BrowserUnavailable(_) => ErrorSeverity::High,
            BuildError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            BuildError::RendererLoadFailure(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit status for a run that failed at this severity.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Low | ErrorSeverity::Medium => 1,
            ErrorSeverity::High => 2,
            ErrorSeverity::Critical => 3,
        }
    }
}

/// Observed page conditions that are reported but never stop a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// A resolved resource answered outside the 2xx range, or a `file:` read failed.
    NetworkResponseError { status: i64, url: String },
    /// An uncaught error inside the rendered document.
    ScriptError(String),
}

impl std::fmt::Display for PageSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSignal::NetworkResponseError { status, url } => write!(f, "{status} {url}"),
            PageSignal::ScriptError(message) => f.write_str(message),
        }
    }
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

impl From<lopdf::Error> for BuildError {
    fn from(err: lopdf::Error) -> Self {
        BuildError::PdfError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for BuildError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BuildError::ChromeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_severity_and_exit_codes() {
        let renderer = BuildError::RendererLoadFailure("boom".to_string());
        assert_eq!(renderer.severity(), ErrorSeverity::Critical);
        assert_eq!(renderer.severity().exit_code(), 3);

        let config = BuildError::ConfigurationError("no input".to_string());
        assert_eq!(config.severity().exit_code(), 2);

        let budget = BuildError::TimeoutBudgetExhausted;
        assert_eq!(budget.severity(), ErrorSeverity::Medium);
        assert_eq!(budget.severity().exit_code(), 1);
    }

    #[test]
    fn test_timeout_classification() {
        assert!(BuildError::ReadinessTimeout(Duration::from_secs(1)).is_timeout());
        assert!(BuildError::CaptureTimeout(Duration::from_secs(1)).is_timeout());
        assert!(BuildError::TimeoutBudgetExhausted.is_timeout());
        assert!(!BuildError::PostProcessFailed("x".to_string()).is_timeout());
    }
}
