use axum::{
    Router,
    body::Bytes,
    extract::DefaultBodyLimit,
    extract::State as AxumState,
    extract::rejection::BytesRejection,
    http::{HeaderMap, StatusCode},
    routing,
};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::config::ProjectConfig;
use crate::deploy::DeploymentRequest;
use crate::error::WebhookError;
use crate::signature::{SIGNATURE_HEADER, verify_signature};
use crate::webhook::PushEvent;

pub const ROOT_MESSAGE: &str = "The root of Project, nothing here";

/// Builds the router: one webhook endpoint per configured project, everything
/// else answered by the root handler.
pub fn app(state: SharedState) -> Router {
    let mut router = Router::new().route("/", routing::any(root));

    for project in &state.config.projects {
        let route = project.route();
        let project = project.clone();
        router = router.route(
            &route,
            routing::any(
                move |AxumState(state): AxumState<SharedState>,
                      headers: HeaderMap,
                      body: Result<Bytes, BytesRejection>| {
                    let project = project.clone();
                    async move { handle_deploy(state, project, headers, body).await }
                },
            ),
        );
    }

    let body_limit = DefaultBodyLimit::max(state.config.max_body_bytes);
    router.fallback(root).layer(body_limit).with_state(state)
}

pub async fn root(AxumState(state): AxumState<SharedState>) -> &'static str {
    let routes: Vec<String> = state.config.projects.iter().map(|p| p.route()).collect();
    info!(
        "The root endpoint doesn't contain anything, please try: {}",
        routes.join(" or ")
    );
    ROOT_MESSAGE
}

/// Handles a push delivery for `project`. The response is sent before the
/// deployment runs; its outcome is only logged.
pub async fn handle_deploy(
    state: SharedState,
    project: ProjectConfig,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, WebhookError> {
    let config = &state.config;

    let signature = if config.require_signature {
        let Some(secret) = config.webhook_secret.as_ref() else {
            error!("Webhook secret not configured");
            return Err(WebhookError::SecretNotConfigured);
        };
        let Some(signature) = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
        else {
            warn!("({}) Signature missing for project '{}'", SIGNATURE_HEADER, project.name);
            return Err(WebhookError::SignatureMissing);
        };
        Some((secret, signature))
    } else {
        None
    };

    let body = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!("Request body for project '{}' is too large: {}", project.name, e);
            WebhookError::PayloadTooLarge
        } else {
            error!("Could not read request body: {}", e);
            WebhookError::BodyUnreadable
        }
    })?;

    if let Some((secret, signature)) = signature {
        if !verify_signature(secret.expose(), signature, &body) {
            warn!("Invalid signature for project '{}'", project.name);
            return Err(WebhookError::InvalidSignature);
        }
    }

    let event = PushEvent::from_slice(&body).inspect_err(|_| {
        info!("Bad request for project '{}'", project.name);
    })?;

    if !event.is_push_to(&config.deploy_branch) {
        let message = format!("Not a {} branch push", config.deploy_branch);
        info!("{} (project '{}', branch '{}')", message, project.name, event.branch());
        return Ok(message);
    }

    let Some(path) = config.project_path(&project) else {
        error!("PROJECTS_FOLDER is not set");
        return Err(WebhookError::ProjectsFolderNotSet);
    };

    let request = DeploymentRequest {
        project: project.name.clone(),
        path,
    };
    let deployer = state.deployer.clone();
    // Detached: the caller only learns that the deployment started
    tokio::spawn(async move {
        deployer.deploy(request).await;
    });

    info!("Webhook verified for '{}', deployment scheduled", project.name);
    Ok(format!(
        "Webhook verified. Deployment started for {}",
        project.name
    ))
}
