use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{BrelloError, Result};

pub const DEFAULT_REPO_NAME: &str = "brello-ei-0";
pub const DEFAULT_INCLUDE: &str = "*.py,*.md,*.txt,*.json";

/// Exit status and error output of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
        }
    }
}

/// The hub command-line tool.
pub trait HubCli {
    /// Runs the tool with `args`. `Err` means it could not be started at all.
    fn run(&self, args: &[&str]) -> Result<CommandOutcome>;
}

/// Spawns `huggingface-cli` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessHubCli {
    program: String,
}

impl Default for ProcessHubCli {
    fn default() -> Self {
        Self {
            program: "huggingface-cli".to_string(),
        }
    }
}

impl ProcessHubCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl HubCli for ProcessHubCli {
    fn run(&self, args: &[&str]) -> Result<CommandOutcome> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| BrelloError::Publish(format!("cannot run {}: {}", self.program, e)))?;
        Ok(CommandOutcome {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub username: String,
    pub repo_name: String,
    pub package_dir: PathBuf,
    pub include: String,
    pub logo: Option<PathBuf>,
}

impl UploadRequest {
    pub fn new(username: impl Into<String>, package_dir: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            repo_name: DEFAULT_REPO_NAME.to_string(),
            package_dir: package_dir.into(),
            include: DEFAULT_INCLUDE.to_string(),
            logo: None,
        }
    }

    pub fn with_logo(mut self, logo: impl Into<PathBuf>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.username, self.repo_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoStatus {
    NotRequested,
    Uploaded,
    Missing(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub repo_id: String,
    /// False when creation failed, usually because the repository exists
    pub repo_created: bool,
    pub logo: LogoStatus,
}

impl UploadReport {
    pub fn url(&self) -> String {
        format!("https://huggingface.co/{}", self.repo_id)
    }
}

/// Creates the repository, uploads the package and optionally a logo.
///
/// A failed repository creation is tolerated; a failed file upload is not.
pub fn upload(cli: &dyn HubCli, request: &UploadRequest) -> Result<UploadReport> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(BrelloError::configuration("username", "Username is required"));
    }
    if !request.package_dir.is_dir() {
        return Err(BrelloError::Publish(format!(
            "package directory {} not found",
            request.package_dir.display()
        )));
    }

    match cli.run(&["--version"]) {
        Ok(outcome) if outcome.success => info!("huggingface-cli found"),
        _ => {
            return Err(BrelloError::Publish(
                "huggingface-cli not found; install it with `pip install huggingface_hub`".to_string(),
            ))
        }
    }

    let repo_id = format!("{}/{}", username, request.repo_name);

    info!(repo = %repo_id, "Creating repository");
    let create = cli.run(&["repo", "create", &request.repo_name, "--type", "model"])?;
    if !create.success {
        warn!(repo = %request.repo_name, stderr = %create.stderr, "Repository might already exist");
    }

    info!(repo = %repo_id, include = %request.include, "Uploading model files");
    let package_dir = request.package_dir.to_string_lossy();
    let uploaded = cli.run(&["upload", &repo_id, &package_dir, "--include", &request.include])?;
    if !uploaded.success {
        return Err(BrelloError::Publish(format!("Upload failed: {}", uploaded.stderr)));
    }

    let logo = match &request.logo {
        None => LogoStatus::NotRequested,
        Some(path) => upload_logo(cli, &repo_id, path)?,
    };

    Ok(UploadReport {
        repo_id,
        repo_created: create.success,
        logo,
    })
}

fn upload_logo(cli: &dyn HubCli, repo_id: &str, path: &Path) -> Result<LogoStatus> {
    if !path.is_file() {
        warn!(path = %path.display(), "Logo file not found");
        return Ok(LogoStatus::Missing(path.to_path_buf()));
    }
    let outcome = cli.run(&["upload", repo_id, &path.to_string_lossy()])?;
    if outcome.success {
        info!(repo = %repo_id, "Logo uploaded");
        Ok(LogoStatus::Uploaded)
    } else {
        warn!(repo = %repo_id, stderr = %outcome.stderr, "Logo upload failed");
        Ok(LogoStatus::Failed(outcome.stderr))
    }
}
