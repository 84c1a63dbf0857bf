use hook_deployer::config::Config;
use hook_deployer::logging::{FileLogger, setup_logging};
use hook_deployer::{AppState, app};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    // Flushes file logs on drop, keep it for the life of the server
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    if config.require_signature && config.webhook_secret.is_none() {
        warn!("GITHUB_WEBHOOK_SECRET is not set, webhook endpoints will answer 500");
    }
    if config.credentials().is_none() {
        warn!("GITHUB_TOKEN or GITHUB_USER is not set, deployments will be skipped");
    }
    if config.projects_folder.is_none() {
        warn!("PROJECTS_FOLDER is not set");
    }

    let bind_address = config.bind_address.clone();
    let routes: Vec<String> = config.projects.iter().map(|p| p.route()).collect();
    let state = Arc::new(AppState::with_process_deployer(config));
    let router = app(state);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", bind_address);
    info!("Webhook endpoints: {}", routes.join(", "));
    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
