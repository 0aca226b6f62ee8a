//! # pagepress
//!
//! Drives a headless Chromium through the Vivliostyle viewer to typeset HTML
//! documents, then writes the result as a print-ready PDF.
//!
//! A build is a single sequential pipeline sharing one timeout budget:
//!
//! 1. launch the browser (fetching a managed build when the requested
//!    executable is missing),
//! 2. navigate to the viewer and wait until every page is laid out, while
//!    page events are monitored for fatal viewer failures and per-entry
//!    progress,
//! 3. read document data back from the viewer (page progression, metadata,
//!    table of contents, page geometry),
//! 4. print to PDF with whatever budget remains,
//! 5. hand the PDF to the post-processor for metadata, outline, page boxes
//!    and optional preflight.
//!
//! Builds can also be re-executed inside a container image, with host paths
//! mirrored under `/data`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagepress::{BuildOptions, PdfBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = BuildOptions {
//!         input: "dist/index.html".to_string(),
//!         workspace_dir: "./book".into(),
//!         ..Default::default()
//!     };
//!     let path = PdfBuilder::default().build(&options).await?;
//!     println!("PDF written to {}", path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! pagepress build dist/index.html --output book.pdf --timeout 120
//! pagepress build --config build.json --container
//! pagepress validate --config build.json
//! ```
//!
//! A failed run exits with 1, or with 2 for configuration and browser
//! problems and 3 when the viewer itself fails to load.

/// Build options and browser launch settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Shared timeout budget and build phases
pub mod timeout;

/// Browser, session and page seams plus the Chromium implementation
pub mod browser;

/// Navigation and readiness waits
pub mod navigation;

/// Page event monitoring and manuscript entry correlation
pub mod monitor;

/// Typed requests against the in-page viewer
pub mod viewer;

/// Print-to-PDF capture
pub mod capture;

/// PDF post-processing
pub mod postprocess;

/// Viewer URL composition
pub mod server;

/// Build orchestration
pub mod pipeline;

/// Containerized builds
pub mod container;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;


pub use browser::*;
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use container::*;
pub use error::*;
pub use monitor::*;
pub use navigation::*;
pub use pipeline::*;
pub use postprocess::*;
pub use server::*;
pub use timeout::*;
pub use utils::*;
pub use viewer::*;
