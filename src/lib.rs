pub mod config;
pub mod deploy;
pub mod error;
pub mod handlers;
pub mod job;
pub mod logging;
pub mod signature;
pub mod webhook;

use std::sync::Arc;

use config::Config;
use deploy::{DeploySettings, Deployer, GitComposeDeployer, ProcessRunner};

pub use handlers::app;

pub struct AppState {
    pub config: Config,
    pub deployer: Arc<dyn Deployer>,
}

impl AppState {
    pub fn new(config: Config, deployer: Arc<dyn Deployer>) -> Self {
        Self { config, deployer }
    }

    /// State wired to the real git/compose executor.
    pub fn with_process_deployer(config: Config) -> Self {
        let deployer = GitComposeDeployer::new(ProcessRunner, DeploySettings::from_config(&config));
        Self::new(config, Arc::new(deployer))
    }
}

pub type SharedState = Arc<AppState>;
