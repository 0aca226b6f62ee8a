use crate::{
    build_pdf_with_container, validate_options, BuildError, BuildOptions, DockerRunner, PdfBuilder,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(name = "pagepress")]
#[command(about = "Typeset HTML documents into print-ready PDF with a headless browser")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Build options file (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging and forward viewer console output")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a PDF
    Build(BuildArgs),

    /// Validate a build options file
    Validate {
        #[arg(short, long, help = "Build options file to validate")]
        config: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[arg(help = "Entry document path or URL")]
    pub input: Option<String>,

    #[arg(short, long, help = "Output PDF path")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Build timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Disable the browser sandbox")]
    pub no_sandbox: bool,

    #[arg(long, help = "Browser executable path")]
    pub executable_path: Option<PathBuf>,

    #[arg(long, help = "Run the build inside the container image")]
    pub container: bool,

    #[arg(long, help = "Container image for containerized builds")]
    pub image: Option<String>,

    /// Fully resolved options, passed to builds re-executed inside a container
    #[arg(long, hide = true)]
    pub bypassed_pdf_builder_option: Option<String>,
}

pub struct CliRunner {
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

impl CliRunner {
    pub fn new(args: &Cli) -> Self {
        Self {
            config: args.config.clone(),
            verbose: args.verbose,
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Build(args) => self.run_build(args).await,
            Commands::Validate { config } => self.validate_config(&config).await,
        }
    }

    pub async fn run_build(&self, args: BuildArgs) -> anyhow::Result<()> {
        let options = match &args.bypassed_pdf_builder_option {
            Some(json) => serde_json::from_str(json).context("Invalid bypassed build options")?,
            None => {
                let mut options = load_options(self.config.as_deref()).await?;
                apply_overrides(&mut options, &args, self.verbose);
                options
            }
        };
        validate_options(&options)?;

        info!("Building {}", options.input);
        let path = if args.container {
            build_pdf_with_container(&options, &DockerRunner).await?
        } else {
            PdfBuilder::default().build(&options).await?
        };

        println!("Built {}", path.display());
        Ok(())
    }

    pub async fn validate_config(&self, config_path: &Path) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let options = load_options(Some(config_path)).await?;
        validate_options(&options)?;

        println!("Configuration is valid:");
        println!("  Input: {}", options.input);
        println!("  Output: {}", options.target.path.display());
        println!("  Timeout: {:?}", options.timeout());
        println!("  Entries: {}", options.entries.len());
        if let Some(viewer) = &options.viewer {
            println!("  Viewer: {viewer}");
        }

        Ok(())
    }
}

/// Read options from a JSON file, or start from defaults.
pub async fn load_options(path: Option<&Path>) -> anyhow::Result<BuildOptions> {
    let Some(path) = path else {
        return Ok(BuildOptions::default());
    };
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid build options in {}", path.display()))
}

/// Command-line flags take precedence over the options file.
pub fn apply_overrides(options: &mut BuildOptions, args: &BuildArgs, verbose: bool) {
    if let Some(input) = &args.input {
        options.input = input.clone();
    }
    if let Some(output) = &args.output {
        options.target.path = output.clone();
    }
    if let Some(timeout) = args.timeout {
        options.timeout_ms = timeout * 1000;
    }
    if args.no_sandbox {
        options.sandbox = false;
    }
    if let Some(path) = &args.executable_path {
        options.executable_path = Some(path.clone());
    }
    if let Some(image) = &args.image {
        options.image = image.clone();
    }
    if verbose {
        options.verbose = true;
    }
}

fn build_error(err: &anyhow::Error) -> Option<&BuildError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BuildError>())
}

/// Exit status for a failed run, graded by the severity of the underlying build error.
pub fn failure_exit_code(err: &anyhow::Error) -> i32 {
    build_error(err).map_or(1, |e| e.severity().exit_code())
}

/// Advice printed after a failed run, if any applies.
pub fn failure_hint(err: &anyhow::Error) -> Option<&'static str> {
    let err = build_error(err)?;
    if err.is_timeout() {
        Some("The document did not finish in time; raise --timeout for long or heavy manuscripts")
    } else if matches!(err, BuildError::BrowserUnavailable(_)) {
        Some("Pass --executable-path or run with --container to use the bundled browser")
    } else {
        None
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;


    #[test]
    fn test_failure_exit_code_follows_severity() {
        let critical = anyhow::Error::from(BuildError::RendererLoadFailure("boom".to_string()));
        assert_eq!(failure_exit_code(&critical), 3);

        let wrapped = anyhow::Error::from(BuildError::ConfigurationError("no input".to_string()))
            .context("Failed to build PDF");
        assert_eq!(failure_exit_code(&wrapped), 2);

        assert_eq!(failure_exit_code(&anyhow::anyhow!("Interrupted")), 1);
    }

    #[test]
    fn test_failure_hint() {
        let timeout = anyhow::Error::from(BuildError::TimeoutBudgetExhausted);
        assert!(failure_hint(&timeout).unwrap().contains("--timeout"));

        let missing = anyhow::Error::from(BuildError::BrowserUnavailable("not found".to_string()));
        assert!(failure_hint(&missing).unwrap().contains("--executable-path"));

        let other = anyhow::Error::from(BuildError::PostProcessFailed("x".to_string()));
        assert_eq!(failure_hint(&other), None);
        assert_eq!(failure_hint(&anyhow::anyhow!("Interrupted")), None);
    }
    #[test]
    fn test_parse_build_command() {
        let cli = Cli::parse_from([
            "pagepress",
            "build",
            "index.html",
            "-o",
            "out/book.pdf",
            "--timeout",
            "60",
            "--no-sandbox",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.input.as_deref(), Some("index.html"));
                assert_eq!(args.output, Some(PathBuf::from("out/book.pdf")));
                assert_eq!(args.timeout, Some(60));
                assert!(args.no_sandbox);
                assert!(!args.container);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut options = BuildOptions {
            input: "from-file.html".to_string(),
            timeout_ms: 1000,
            ..Default::default()
        };
        let args = BuildArgs {
            output: Some(PathBuf::from("book.pdf")),
            timeout: Some(120),
            no_sandbox: true,
            ..Default::default()
        };

        apply_overrides(&mut options, &args, true);
        assert_eq!(options.input, "from-file.html");
        assert_eq!(options.target.path, PathBuf::from("book.pdf"));
        assert_eq!(options.timeout_ms, 120_000);
        assert!(!options.sandbox);
        assert!(options.verbose);
    }

    #[tokio::test]
    async fn test_load_options_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input": "dist/index.html", "timeout_ms": 5000, "target": {{"path": "book.pdf", "preflight": "press-ready-local"}}}}"#
        )
        .unwrap();

        let options = load_options(Some(file.path())).await.unwrap();
        assert_eq!(options.input, "dist/index.html");
        assert_eq!(options.timeout_ms, 5000);
        assert_eq!(options.target.preflight, Some(crate::PreflightMode::PressReadyLocal));
        assert!(options.sandbox);
    }

    #[tokio::test]
    async fn test_load_options_defaults_without_file() {
        let options = load_options(None).await.unwrap();
        assert_eq!(options.timeout_ms, 300_000);
    }

    #[tokio::test]
    async fn test_invalid_options_file_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_options(Some(file.path())).await.unwrap_err();
        assert!(err.to_string().contains("Invalid build options"));
    }
}
