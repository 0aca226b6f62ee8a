//! Navigation to the rendering endpoint and readiness synchronization

use crate::{BuildError, BuildPhase, RenderPage, Viewer, READY_STATE_COMPLETE};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Interval between `readyState` checks while pages are typeset.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Interval between checks for the viewer handle after navigation.
pub const VIEWER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives the page to the viewer and waits for typesetting to finish
///
/// Every wait is bounded by the configured build timeout as a whole, not by
/// what is left of it; only capture uses the remaining budget.
pub struct Navigator<'a> {
    page: &'a dyn RenderPage,
    timeout: Duration,
}

impl<'a> Navigator<'a> {
    pub fn new(page: &'a dyn RenderPage, timeout: Duration) -> Self {
        Self { page, timeout }
    }

    /// Navigate, wait for the viewer, switch to print media, wait for `readyState === "complete"`.
    pub async fn load(&self, url: &str) -> Result<(), BuildError> {
        info!("{}", BuildPhase::Navigating);
        debug!("Navigating to {}", url);
        self.page.goto(url, self.timeout).await?;

        let viewer = Viewer::new(self.page);
        self.wait_for_viewer(&viewer).await?;
        self.page.emulate_print_media().await?;

        info!("{}", BuildPhase::Typesetting);
        self.wait_until_complete(&viewer).await
    }

    async fn wait_for_viewer(&self, viewer: &Viewer<'_>) -> Result<(), BuildError> {
        let poll = async {
            loop {
                if viewer.is_present().await? {
                    return Ok::<(), BuildError>(());
                }
                sleep(VIEWER_POLL_INTERVAL).await;
            }
        };

        timeout(self.timeout, poll)
            .await
            .map_err(|_| BuildError::ReadinessTimeout(self.timeout))?
    }

    async fn wait_until_complete(&self, viewer: &Viewer<'_>) -> Result<(), BuildError> {
        let poll = async {
            loop {
                let state = viewer.ready_state().await?;
                if state.as_deref() == Some(READY_STATE_COMPLETE) {
                    return Ok::<(), BuildError>(());
                }
                debug!("Viewer readyState: {:?}", state);
                sleep(READY_POLL_INTERVAL).await;
            }
        };

        timeout(self.timeout, poll)
            .await
            .map_err(|_| BuildError::ReadinessTimeout(self.timeout))?
    }
}
