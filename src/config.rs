//! Start-up configuration, read once from the environment and an optional
//! TOML projects file, then shared read-only with every handler.

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_PROJECTS: [&str; 3] = ["ai-picture", "budget", "invoicer"];
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9000";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_COMPOSE_COMMAND: &str = "docker-compose";
pub const DEFAULT_GIT_HOST: &str = "github.com";
/// GitHub caps webhook payloads at 25 MB
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Token and account used for authenticated fetches.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: Secret,
    pub user: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProjectConfig {
    pub name: String,
    /// Working copy location; defaults to `<PROJECTS_FOLDER>/<name>`.
    pub path: Option<PathBuf>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// URL path the project's webhook is served on.
    pub fn route(&self) -> String {
        format!("/{}", self.name)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    project: Vec<ProjectConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_secret: Option<Secret>,
    pub github_token: Option<Secret>,
    pub github_user: Option<String>,
    pub projects_folder: Option<PathBuf>,
    pub bind_address: String,
    pub deploy_branch: String,
    pub compose_command: Vec<String>,
    pub git_host: String,
    pub require_signature: bool,
    pub serialize_deployments: bool,
    pub max_body_bytes: usize,
    pub log_dir: Option<PathBuf>,
    pub projects: Vec<ProjectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            github_token: None,
            github_user: None,
            projects_folder: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            deploy_branch: DEFAULT_BRANCH.to_string(),
            compose_command: vec![DEFAULT_COMPOSE_COMMAND.to_string()],
            git_host: DEFAULT_GIT_HOST.to_string(),
            require_signature: true,
            serialize_deployments: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            log_dir: None,
            projects: DEFAULT_PROJECTS.iter().map(|p| ProjectConfig::new(*p)).collect(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let projects = match get("PROJECTS_CONFIG") {
            Some(path) => load_projects_file(&path)?,
            None => defaults.projects,
        };

        Ok(Self {
            webhook_secret: get("GITHUB_WEBHOOK_SECRET").map(Secret::new),
            github_token: get("GITHUB_TOKEN").map(Secret::new),
            github_user: get("GITHUB_USER"),
            projects_folder: get("PROJECTS_FOLDER").map(PathBuf::from),
            bind_address: get("HTTP_PORT")
                .map(|v| normalize_bind_address(&v))
                .unwrap_or(defaults.bind_address),
            deploy_branch: get("DEPLOY_BRANCH").unwrap_or(defaults.deploy_branch),
            compose_command: get("COMPOSE_COMMAND")
                .map(|v| v.split_whitespace().map(String::from).collect())
                .unwrap_or(defaults.compose_command),
            git_host: get("GIT_HOST").unwrap_or(defaults.git_host),
            require_signature: parse_bool("REQUIRE_SIGNATURE", get("REQUIRE_SIGNATURE"))?
                .unwrap_or(defaults.require_signature),
            serialize_deployments: parse_bool(
                "SERIALIZE_DEPLOYMENTS",
                get("SERIALIZE_DEPLOYMENTS"),
            )?
            .unwrap_or(defaults.serialize_deployments),
            max_body_bytes: parse_size("MAX_BODY_BYTES", get("MAX_BODY_BYTES"))?
                .unwrap_or(defaults.max_body_bytes),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            projects,
        })
    }

    /// Both token and user, or nothing.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.github_token, &self.github_user) {
            (Some(token), Some(user)) => Some(Credentials {
                token: token.clone(),
                user: user.clone(),
            }),
            _ => None,
        }
    }

    /// Local working copy of `project`, if one can be resolved.
    pub fn project_path(&self, project: &ProjectConfig) -> Option<PathBuf> {
        project
            .path
            .clone()
            .or_else(|| self.projects_folder.as_ref().map(|f| f.join(&project.name)))
    }
}

/// `9000` and `:9000` bind on all interfaces, `host:port` is kept as is.
pub fn normalize_bind_address(value: &str) -> String {
    let value = value.trim();
    if let Some(port) = value.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else if value.chars().all(|c| c.is_ascii_digit()) {
        format!("0.0.0.0:{}", value)
    } else {
        value.to_string()
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value,
        }),
    }
}

fn parse_size(key: &str, value: Option<String>) -> Result<Option<usize>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber {
            key: key.to_string(),
            value,
        }),
    }
}

/// Load and validate the `[[project]]` list from a TOML file
pub fn load_projects_file(path: &str) -> Result<Vec<ProjectConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ProjectsFileUnreadable {
        path: path.to_string(),
        source,
    })?;
    parse_projects(&content, path)
}

fn parse_projects(content: &str, path: &str) -> Result<Vec<ProjectConfig>, ConfigError> {
    let file: ProjectsFile =
        toml::from_str(content).map_err(|source| ConfigError::ProjectsFileInvalid {
            path: path.to_string(),
            source,
        })?;

    let mut seen = HashSet::new();
    for project in &file.project {
        if !is_valid_project_name(&project.name) {
            return Err(ConfigError::InvalidProjectName(project.name.clone()));
        }
        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::DuplicateProject(project.name.clone()));
        }
    }
    Ok(file.project)
}

/// Names end up in a URL path, a remote URL and a directory name.
fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
