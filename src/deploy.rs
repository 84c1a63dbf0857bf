//! Deployment executor: re-syncs a project's working copy with its remote and
//! rebuilds its containers, one discrete command per step.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{Config, Credentials};
use crate::error::DeployError;
use crate::job::DeploymentAttempt;

const REDACTED: &str = "***";

/// A single program invocation. No shell is involved.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub step: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Masked wherever the command or its output is logged
    sensitive: Option<String>,
}

impl CommandSpec {
    pub fn new(step: &'static str, program: impl Into<String>) -> Self {
        Self {
            step,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            sensitive: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    fn sensitive(mut self, value: &str) -> Self {
        self.sensitive = Some(value.to_string());
        self
    }

    /// Command line safe to log.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        self.redact(&line)
    }

    pub fn redact(&self, text: &str) -> String {
        match &self.sensitive {
            Some(secret) if !secret.is_empty() => text.replace(secret.as_str(), REDACTED),
            _ => text.to_string(),
        }
    }
}

/// Result of a finished command, stdout and stderr combined.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub output: String,
}

/// Runs commands on behalf of the deployer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput>;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        (**self).run(command).await
    }
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).stdin(Stdio::null());
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            output: combined,
        })
    }
}

/// What the webhook handler hands to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    pub project: String,
    pub path: PathBuf,
}

/// Seam between the HTTP handler and the deployment steps.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: DeploymentRequest) -> DeploymentAttempt;
}

/// Settings the executor needs from the start-up configuration
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub credentials: Option<Credentials>,
    pub branch: String,
    pub compose_command: Vec<String>,
    pub git_host: String,
    pub serialize_deployments: bool,
}

impl DeploySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            credentials: config.credentials(),
            branch: config.deploy_branch.clone(),
            compose_command: config.compose_command.clone(),
            git_host: config.git_host.clone(),
            serialize_deployments: config.serialize_deployments,
        }
    }
}

/// `https://<token>@<host>/<user>/<project>.git`
pub fn authenticated_remote_url(host: &str, credentials: &Credentials, project: &str) -> String {
    format!(
        "https://{}@{}/{}/{}.git",
        credentials.token.expose(),
        host,
        credentials.user,
        project
    )
}

/// Pulls the deploy branch with git and restarts the project with compose.
pub struct GitComposeDeployer<R> {
    runner: R,
    settings: DeploySettings,
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<R: CommandRunner> GitComposeDeployer<R> {
    pub fn new(runner: R, settings: DeploySettings) -> Self {
        Self {
            runner,
            settings,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn project_lock(&self, project: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one step, collecting its output. A non-zero exit aborts the chain.
    async fn run_step(
        &self,
        command: CommandSpec,
        attempt: &mut DeploymentAttempt,
    ) -> Result<(), DeployError> {
        info!("Running (cwd = {:?}): {}", command.cwd, command.display());
        let result = self
            .runner
            .run(&command)
            .await
            .map_err(|source| DeployError::Spawn {
                step: command.step,
                source,
            })?;
        let output = command.redact(&result.output);
        attempt.append_output(&output);

        if !result.success {
            return Err(DeployError::StepFailed {
                step: command.step,
                command: command.display(),
                status: result.status,
                output,
            });
        }
        Ok(())
    }

    async fn run_steps(
        &self,
        request: &DeploymentRequest,
        attempt: &mut DeploymentAttempt,
    ) -> Result<(), DeployError> {
        let path = request.path.as_path();
        let path_str = path.to_string_lossy();

        // Best-effort: the directory may be owned by another user
        let safe_dir = CommandSpec::new("git safe.directory", "git").args([
            "config",
            "--global",
            "--add",
            "safe.directory",
            &*path_str,
        ]);
        match self.runner.run(&safe_dir).await {
            Ok(out) if out.success => {}
            Ok(out) => warn!(
                "Could not mark {} as a safe directory ({}): {}",
                path_str, out.status, out.output
            ),
            Err(e) => warn!("Could not mark {} as a safe directory: {}", path_str, e),
        }

        let credentials = self
            .settings
            .credentials
            .as_ref()
            .ok_or(DeployError::MissingCredentials)?;
        let remote_url =
            authenticated_remote_url(&self.settings.git_host, credentials, &request.project);
        let token = credentials.token.expose();

        self.run_step(
            CommandSpec::new("git remote set-url", "git")
                .args(["remote", "set-url", "origin", remote_url.as_str()])
                .current_dir(path)
                .sensitive(token),
            attempt,
        )
        .await?;

        self.run_step(
            CommandSpec::new("git fetch", "git")
                .args(["fetch", "--depth=1", "origin", self.settings.branch.as_str()])
                .current_dir(path)
                .sensitive(token),
            attempt,
        )
        .await?;

        self.run_step(
            CommandSpec::new("git reset", "git")
                .args(["reset", "--hard", "FETCH_HEAD"])
                .current_dir(path)
                .sensitive(token),
            attempt,
        )
        .await?;

        self.run_step(
            self.compose_step("compose down", path, &["down"])?
                .sensitive(token),
            attempt,
        )
        .await?;
        self.run_step(
            self.compose_step("compose up", path, &["up", "-d", "--build"])?
                .sensitive(token),
            attempt,
        )
        .await?;

        Ok(())
    }

    fn compose_step(
        &self,
        step: &'static str,
        path: &Path,
        args: &[&str],
    ) -> Result<CommandSpec, DeployError> {
        let (program, leading) = self
            .settings
            .compose_command
            .split_first()
            .ok_or(DeployError::InvalidCommand(step))?;
        Ok(CommandSpec::new(step, program.as_str())
            .args(leading.iter().map(String::as_str))
            .args(args.iter().copied())
            .current_dir(path))
    }

    async fn execute(&self, request: &DeploymentRequest, attempt: &mut DeploymentAttempt) {
        // Overlapping pushes to one project race unless serialization is on
        let lock = if self.settings.serialize_deployments {
            Some(self.project_lock(&request.project).await)
        } else {
            None
        };
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        info!("Deployment started for {}", request.project);
        match self.run_steps(request, attempt).await {
            Ok(()) => {
                attempt.mark_succeeded();
                info!(
                    "Deployment for {} successful in {}ms\n{}",
                    request.project,
                    attempt.duration_ms().unwrap_or_default(),
                    attempt.output
                );
            }
            Err(DeployError::MissingCredentials) => {
                error!(
                    "Deployment for {} aborted: {}",
                    request.project,
                    DeployError::MissingCredentials
                );
                attempt.mark_aborted(DeployError::MissingCredentials.to_string());
            }
            Err(e) => {
                error!("Error deploying {}: {}", request.project, e);
                attempt.mark_failed(e.to_string());
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Deployer for GitComposeDeployer<R> {
    async fn deploy(&self, request: DeploymentRequest) -> DeploymentAttempt {
        let mut attempt = DeploymentAttempt::start(&request.project);
        let span = info_span!("deploy", attempt_id = %attempt.id, project = %request.project);
        self.execute(&request, &mut attempt).instrument(span).await;
        attempt
    }
}
