//! Containerized builds
//!
//! Host paths are mirrored under [`CONTAINER_ROOT`] so that absolute paths in
//! the options keep pointing at the same files once the workspace is mounted.

use crate::{absolute_path, normalize_path, BuildError, BuildOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

pub const CONTAINER_ROOT: &str = "/data";

/// A single `docker run` worth of arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    pub image: String,
    /// Host directory and its mount point inside the container
    pub volumes: Vec<(PathBuf, PathBuf)>,
    pub workdir: PathBuf,
    pub args: Vec<String>,
}

impl ContainerInvocation {
    /// Arguments for `docker`, starting with `run`.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        for (host, container) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), container.display()));
        }
        args.push("-w".to_string());
        args.push(self.workdir.display().to_string());
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<(), BuildError>;
}

/// Runs invocations through the local `docker` CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerRunner;

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<(), BuildError> {
        let args = invocation.docker_args();
        debug!("docker {}", args.join(" "));

        let status = Command::new("docker")
            .args(&args)
            .status()
            .await
            .map_err(|e| BuildError::ContainerFailed(format!("Failed to start docker: {e}")))?;

        if !status.success() {
            return Err(BuildError::ContainerFailed(format!(
                "Container exited with {status}"
            )));
        }
        Ok(())
    }
}

/// Mirror a host path under the container root.
///
/// `/abs/path` becomes `/data/abs/path` and `C:\x` becomes `/data/C/x`.
/// Relative paths are returned unchanged.
pub fn to_container_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();

    if has_drive_letter(&text) {
        let rest = text[2..].replace('\\', "/");
        let rest = rest.trim_start_matches('/');
        let mut mirrored = format!("{CONTAINER_ROOT}/{}", &text[..1]);
        if !rest.is_empty() {
            mirrored.push('/');
            mirrored.push_str(rest);
        }
        return PathBuf::from(mirrored);
    }

    if path.is_absolute() {
        let rest = text.trim_start_matches('/');
        return Path::new(CONTAINER_ROOT).join(rest);
    }

    path.to_path_buf()
}

fn has_drive_letter(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_url(reference: &str) -> bool {
    Url::parse(reference)
        .map(|url| url.scheme().len() > 1)
        .unwrap_or(false)
}

fn resolve(path: &Path, workspace: &Path) -> PathBuf {
    if path.is_absolute() || has_drive_letter(&path.to_string_lossy()) {
        normalize_path(path)
    } else {
        normalize_path(&workspace.join(path))
    }
}

fn translate_path(path: &Path, workspace: &Path) -> PathBuf {
    to_container_path(&resolve(path, workspace))
}

fn translate_reference(reference: &str, workspace: &Path) -> String {
    if is_url(reference) {
        reference.to_string()
    } else {
        translate_path(Path::new(reference), workspace)
            .to_string_lossy()
            .into_owned()
    }
}

/// Rewrite every host path in `options` to its container location.
pub fn translate_options(options: &BuildOptions, workspace: &Path) -> BuildOptions {
    let mut translated = options.clone();

    translated.input = translate_reference(&options.input, workspace);
    translated.target.path = translate_path(&options.target.path, workspace);
    translated.workspace_dir = to_container_path(workspace);
    translated.entry_context_dir = translate_path(&options.entry_context_dir, workspace);

    for entry in &mut translated.entries {
        entry.source_path = translate_path(&entry.source_path, workspace);
        entry.target_path = translate_path(&entry.target_path, workspace);
    }

    for style in [&mut translated.style, &mut translated.user_style, &mut translated.viewer]
        .into_iter()
        .flatten()
    {
        *style = translate_reference(style, workspace);
    }

    // The image provides its own browser
    translated.sandbox = false;
    translated.executable_path = None;

    translated
}

fn host_workspace(options: &BuildOptions) -> Result<PathBuf, BuildError> {
    Ok(absolute_path(&options.workspace_dir)?)
}

/// Describe the container run for `options` without executing it.
pub fn container_invocation(options: &BuildOptions) -> Result<ContainerInvocation, BuildError> {
    let workspace = host_workspace(options)?;
    let translated = translate_options(options, &workspace);
    let payload = serde_json::to_string(&translated)?;

    let target = resolve(&options.target.path, &workspace);
    let mut volumes = vec![(workspace.clone(), to_container_path(&workspace))];
    if let Some(parent) = target.parent() {
        if !parent.starts_with(&workspace) {
            volumes.push((parent.to_path_buf(), to_container_path(parent)));
        }
    }

    Ok(ContainerInvocation {
        image: options.image.clone(),
        volumes,
        workdir: to_container_path(&workspace),
        args: vec![
            "build".to_string(),
            "--bypassed-pdf-builder-option".to_string(),
            payload,
        ],
    })
}

/// Run the whole build inside the container image; returns the host-side output path.
pub async fn build_pdf_with_container(
    options: &BuildOptions,
    runner: &dyn ContainerRunner,
) -> Result<PathBuf, BuildError> {
    let invocation = container_invocation(options)?;
    info!("Building PDF in container {}", invocation.image);

    let target = resolve(&options.target.path, &host_workspace(options)?);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    runner.run(&invocation).await?;
    Ok(target)
}
