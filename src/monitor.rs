//! Page event monitoring and manuscript entry correlation
//!
//! While the viewer typesets, the page emits script errors, console output
//! and network responses. [`EventMonitor`] consumes them in order: it logs,
//! classifies fatal versus non-fatal signals, and feeds response URLs to the
//! [`EntryCorrelator`], which turns them into per-entry progress.

use crate::{
    path_equals, relative_to, BuildError, BuildOptions, ConsoleKind, ManuscriptEntry, PageEvent,
    PageEventStream, PageSignal, VIEWER_BOOTSTRAP_SCRIPT,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use url::Url;

/// Debug output the viewer emits for its own profiling; never worth showing.
const PROFILING_MARKER: &str = "time slice";

/// Progress transition for a manuscript entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryProgress {
    Started(ManuscriptEntry),
    Completed(ManuscriptEntry),
}

/// Maps response URLs back to manuscript entries and tracks the one being typeset
#[derive(Debug, Clone)]
pub struct EntryCorrelator {
    entries: Vec<ManuscriptEntry>,
    workspace_dir: PathBuf,
    current: Option<usize>,
}

impl EntryCorrelator {
    pub fn new(entries: Vec<ManuscriptEntry>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            workspace_dir: workspace_dir.into(),
            current: None,
        }
    }

    /// Index of the entry a response URL belongs to.
    ///
    /// `file:` URLs must name the target path exactly; anything else is
    /// compared by its root-relative path against the workspace.
    pub fn resolve(&self, url: &str) -> Option<usize> {
        let url = Url::parse(url).ok()?;

        if url.scheme() == "file" {
            let path = url.to_file_path().ok()?;
            return self
                .entries
                .iter()
                .position(|entry| path_equals(&self.absolute(&entry.target_path), &path));
        }

        let requested = url.path().strip_prefix('/').unwrap_or(url.path());
        self.entries.iter().position(|entry| {
            relative_to(&self.absolute(&entry.target_path), &self.workspace_dir)
                .is_some_and(|rel| path_equals(&rel, Path::new(requested)))
        })
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_dir.join(path)
        }
    }

    /// Feed one response URL; returns the progress transitions it causes.
    pub fn observe(&mut self, url: &str) -> Vec<EntryProgress> {
        let Some(index) = self.resolve(url) else {
            return Vec::new();
        };

        match self.current.replace(index) {
            None => vec![EntryProgress::Started(self.entries[index].clone())],
            Some(previous) if previous == index => Vec::new(),
            Some(previous) => vec![
                EntryProgress::Completed(self.entries[previous].clone()),
                EntryProgress::Started(self.entries[index].clone()),
            ],
        }
    }

    pub fn current(&self) -> Option<&ManuscriptEntry> {
        self.current.map(|index| &self.entries[index])
    }

    /// Close out the active entry once typesetting has finished.
    pub fn finish(&mut self) -> Option<EntryProgress> {
        self.current
            .take()
            .map(|index| EntryProgress::Completed(self.entries[index].clone()))
    }
}

/// Consumes the page event stream for one build
pub struct EventMonitor {
    correlator: EntryCorrelator,
    entry_context_dir: PathBuf,
    verbose: bool,
    progress: Vec<EntryProgress>,
    signals: Vec<PageSignal>,
}

impl EventMonitor {
    pub fn new(options: &BuildOptions) -> Self {
        Self {
            correlator: EntryCorrelator::new(options.entries.clone(), &options.workspace_dir),
            entry_context_dir: options.entry_context_dir.clone(),
            verbose: options.verbose,
            progress: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Process one event. Only a viewer bootstrap failure is an error.
    pub fn handle(&mut self, event: PageEvent) -> Result<(), BuildError> {
        match event {
            PageEvent::PageError(message) => {
                error!("{}", message);
                self.signals.push(PageSignal::ScriptError(message));
            }
            PageEvent::Console {
                kind,
                text,
                source_url,
            } => self.handle_console(kind, text, source_url.as_deref())?,
            PageEvent::Response { url, status, ok } => self.handle_response(&url, status, ok),
        }
        Ok(())
    }

    fn handle_console(
        &mut self,
        kind: ConsoleKind,
        text: String,
        source_url: Option<&str>,
    ) -> Result<(), BuildError> {
        if kind == ConsoleKind::Error
            && source_url.is_some_and(|url| url.ends_with(VIEWER_BOOTSTRAP_SCRIPT))
        {
            error!("{}", text);
            return Err(BuildError::RendererLoadFailure(text));
        }

        if kind == ConsoleKind::Debug && text.contains(PROFILING_MARKER) {
            return Ok(());
        }

        if !self.verbose {
            return Ok(());
        }

        match kind {
            ConsoleKind::Error => error!("viewer: {}", text),
            ConsoleKind::Warning => warn!("viewer: {}", text),
            ConsoleKind::Debug => debug!("viewer: {}", text),
            _ => info!("viewer: {}", text),
        }
        Ok(())
    }

    fn handle_response(&mut self, url: &str, status: i64, ok: bool) {
        debug!("viewer:response {} {}", status, url);

        for transition in self.correlator.observe(url) {
            self.report(transition);
        }

        if (200..300).contains(&status) {
            return;
        }
        // file: loads carry no meaningful status code
        if url.starts_with("file://") && ok {
            return;
        }

        error!("{} {}", status, url);
        self.signals.push(PageSignal::NetworkResponseError {
            status,
            url: url.to_string(),
        });
    }

    fn report(&mut self, transition: EntryProgress) {
        match &transition {
            EntryProgress::Started(entry) => info!("Building {}", self.label(entry)),
            EntryProgress::Completed(entry) => info!("Built {}", self.label(entry)),
        }
        self.progress.push(transition);
    }

    fn label(&self, entry: &ManuscriptEntry) -> String {
        let source = relative_to(&entry.source_path, &self.entry_context_dir)
            .unwrap_or_else(|| entry.source_path.clone());
        match &entry.title {
            Some(title) => format!("{} {}", source.display(), title),
            None => source.display().to_string(),
        }
    }

    /// Drain `events` until a fatal signal arrives.
    ///
    /// Never completes otherwise: once the stream ends this stays pending, so
    /// it can race the readiness wait inside `select!`.
    pub async fn watch(&mut self, events: &mut PageEventStream) -> BuildError {
        while let Some(event) = events.next().await {
            if let Err(fatal) = self.handle(event) {
                return fatal;
            }
        }
        futures::future::pending().await
    }

    /// Mark the last active entry complete after a successful readiness wait.
    pub fn finish(&mut self) {
        if let Some(transition) = self.correlator.finish() {
            self.report(transition);
        }
    }

    pub fn progress(&self) -> &[EntryProgress] {
        &self.progress
    }

    pub fn signals(&self) -> &[PageSignal] {
        &self.signals
    }
}
