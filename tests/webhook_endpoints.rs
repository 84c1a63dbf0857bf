//! End-to-end behaviour of the webhook router with fake deployers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use hook_deployer::config::{Config, Secret};
use hook_deployer::deploy::{
    CommandOutput, CommandRunner, CommandSpec, DeploySettings, Deployer, DeploymentRequest,
    GitComposeDeployer,
};
use hook_deployer::handlers::ROOT_MESSAGE;
use hook_deployer::job::{AttemptStatus, DeploymentAttempt};
use hook_deployer::signature::{SIGNATURE_HEADER, sign};
use hook_deployer::{AppState, app};
use tokio::sync::mpsc;
use tower::ServiceExt;

const SECRET: &str = "webhook-secret";
const MASTER_PUSH: &str = r#"{"ref":"refs/heads/master","after":"4f1c0de"}"#;

/// Records requests instead of deploying.
struct ChannelDeployer {
    tx: mpsc::UnboundedSender<DeploymentRequest>,
}

#[async_trait]
impl Deployer for ChannelDeployer {
    async fn deploy(&self, request: DeploymentRequest) -> DeploymentAttempt {
        let attempt = DeploymentAttempt::start(&request.project);
        let _ = self.tx.send(request);
        attempt
    }
}

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        Ok(CommandOutput {
            success: true,
            status: "exit status: 0".to_string(),
            output: String::new(),
        })
    }
}

/// Runs the real step sequence against a recording runner and reports the
/// finished attempt.
struct ObservedDeployer {
    inner: GitComposeDeployer<Arc<RecordingRunner>>,
    done: mpsc::UnboundedSender<DeploymentAttempt>,
}

#[async_trait]
impl Deployer for ObservedDeployer {
    async fn deploy(&self, request: DeploymentRequest) -> DeploymentAttempt {
        let attempt = self.inner.deploy(request).await;
        let _ = self.done.send(attempt.clone());
        attempt
    }
}

fn configured() -> Config {
    Config {
        webhook_secret: Some(Secret::new(SECRET)),
        github_token: Some(Secret::new("ghp_token")),
        github_user: Some("octocat".to_string()),
        projects_folder: Some(PathBuf::from("/srv/projects")),
        ..Config::default()
    }
}

fn router_with_channel(config: Config) -> (axum::Router, mpsc::UnboundedReceiver<DeploymentRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(AppState::new(config, Arc::new(ChannelDeployer { tx })));
    (app(state), rx)
}

fn signed_push(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-GitHub-Event", "push")
        .header(SIGNATURE_HEADER, sign(SECRET, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn next_request(rx: &mut mpsc::UnboundedReceiver<DeploymentRequest>) -> DeploymentRequest {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("deployment was not started")
        .expect("channel closed")
}

#[tokio::test]
async fn root_serves_static_message() {
    let (router, _rx) = router_with_channel(configured());
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ROOT_MESSAGE);
}

#[tokio::test]
async fn unmapped_path_serves_root_message() {
    let (router, mut rx) = router_with_channel(configured());
    let (status, body) = send(router, signed_push("/unknown-project", MASTER_PUSH)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ROOT_MESSAGE);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn master_push_starts_deployment() {
    let (router, mut rx) = router_with_channel(configured());
    let (status, body) = send(router, signed_push("/budget", MASTER_PUSH)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Webhook verified. Deployment started for budget");
    let request = next_request(&mut rx).await;
    assert_eq!(
        request,
        DeploymentRequest {
            project: "budget".to_string(),
            path: PathBuf::from("/srv/projects/budget"),
        }
    );
}

#[tokio::test]
async fn every_default_project_has_an_endpoint() {
    for project in ["ai-picture", "budget", "invoicer"] {
        let (router, mut rx) = router_with_channel(configured());
        let (status, body) = send(router, signed_push(&format!("/{}", project), MASTER_PUSH)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("Webhook verified. Deployment started for {}", project));
        assert_eq!(next_request(&mut rx).await.project, project);
    }
}

#[tokio::test]
async fn other_branch_is_skipped() {
    let (router, mut rx) = router_with_channel(configured());
    let body = r#"{"ref":"refs/heads/develop"}"#;
    let (status, text) = send(router, signed_push("/budget", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Not a master branch push");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn configured_branch_replaces_master() {
    let config = Config {
        deploy_branch: "main".to_string(),
        ..configured()
    };
    let (router, mut rx) = router_with_channel(config.clone());
    let (_, text) = send(router, signed_push("/budget", MASTER_PUSH)).await;
    assert_eq!(text, "Not a main branch push");
    assert!(rx.try_recv().is_err());

    let (router, mut rx) = router_with_channel(config);
    let (status, _) = send(router, signed_push("/budget", r#"{"ref":"refs/heads/main"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    next_request(&mut rx).await;
}

#[tokio::test]
async fn unparsable_body_is_bad_request() {
    let (router, mut rx) = router_with_channel(configured());
    let (status, text) = send(router, signed_push("/budget", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "Bad request");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let (router, mut rx) = router_with_channel(configured());
    let request = Request::builder()
        .method("POST")
        .uri("/budget")
        .body(Body::from(MASTER_PUSH))
        .unwrap();
    let (status, text) = send(router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text, "Signature missing");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn empty_signature_header_counts_as_missing() {
    let (router, mut rx) = router_with_channel(configured());
    let request = Request::builder()
        .method("POST")
        .uri("/budget")
        .header(SIGNATURE_HEADER, "")
        .body(Body::from(MASTER_PUSH))
        .unwrap();
    let (status, text) = send(router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text, "Signature missing");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn bad_or_short_signatures_are_unauthorized() {
    let forged = sign("another secret", MASTER_PUSH.as_bytes());
    for header in ["sha256=deadbeef", "sha", forged.as_str()] {
        let (router, mut rx) = router_with_channel(configured());
        let request = Request::builder()
            .method("POST")
            .uri("/budget")
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(MASTER_PUSH))
            .unwrap();
        let (status, text) = send(router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "header {:?}", header);
        assert_eq!(text, "Invalid signature");
        assert!(rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn signature_over_different_body_is_unauthorized() {
    let (router, _rx) = router_with_channel(configured());
    let request = Request::builder()
        .method("POST")
        .uri("/budget")
        .header(SIGNATURE_HEADER, sign(SECRET, b"{\"ref\":\"refs/heads/develop\"}"))
        .body(Body::from(MASTER_PUSH))
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_secret_is_internal_error() {
    let config = Config {
        webhook_secret: None,
        ..configured()
    };
    let (router, mut rx) = router_with_channel(config);
    let (status, text) = send(router, signed_push("/budget", MASTER_PUSH)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text, "Webhook secret not configured");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn missing_projects_folder_is_internal_error() {
    let config = Config {
        projects_folder: None,
        ..configured()
    };
    let (router, mut rx) = router_with_channel(config);
    let (status, text) = send(router, signed_push("/budget", MASTER_PUSH)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text, "PROJECTS_FOLDER is not set");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn signature_check_can_be_disabled() {
    let config = Config {
        webhook_secret: None,
        require_signature: false,
        ..configured()
    };
    let (router, mut rx) = router_with_channel(config);
    let request = Request::builder()
        .method("POST")
        .uri("/invoicer")
        .body(Body::from(MASTER_PUSH))
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next_request(&mut rx).await.project, "invoicer");
}

#[tokio::test]
async fn any_method_is_accepted_on_project_paths() {
    let (router, mut rx) = router_with_channel(configured());
    let request = Request::builder()
        .method("PUT")
        .uri("/budget")
        .header(SIGNATURE_HEADER, sign(SECRET, MASTER_PUSH.as_bytes()))
        .body(Body::from(MASTER_PUSH))
        .unwrap();
    let (status, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    next_request(&mut rx).await;
}

#[tokio::test]
async fn missing_token_reports_started_but_runs_no_repository_commands() {
    let config = Config {
        github_token: None,
        ..configured()
    };
    let runner = Arc::new(RecordingRunner::default());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let deployer = ObservedDeployer {
        inner: GitComposeDeployer::new(runner.clone(), DeploySettings::from_config(&config)),
        done: done_tx,
    };
    let router = app(Arc::new(AppState::new(config, Arc::new(deployer))));

    let (status, text) = send(router, signed_push("/budget", MASTER_PUSH)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Webhook verified. Deployment started for budget");

    let attempt = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Aborted);

    let calls = runner.calls.lock().unwrap();
    let steps: Vec<_> = calls.iter().map(|c| c.step).collect();
    assert_eq!(steps, vec!["git safe.directory"]);
}

#[tokio::test]
async fn full_deployment_runs_through_the_router() {
    let config = configured();
    let runner = Arc::new(RecordingRunner::default());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let deployer = ObservedDeployer {
        inner: GitComposeDeployer::new(runner.clone(), DeploySettings::from_config(&config)),
        done: done_tx,
    };
    let router = app(Arc::new(AppState::new(config, Arc::new(deployer))));

    let (status, _) = send(router, signed_push("/ai-picture", MASTER_PUSH)).await;
    assert_eq!(status, StatusCode::OK);

    let attempt = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Succeeded);
    assert_eq!(attempt.project_name, "ai-picture");

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 6);
    assert_eq!(
        calls[1].args,
        vec![
            "remote",
            "set-url",
            "origin",
            "https://ghp_token@github.com/octocat/ai-picture.git"
        ]
    );
    assert_eq!(calls[2].args, vec!["fetch", "--depth=1", "origin", "master"]);
}

#[tokio::test]
async fn large_signed_push_is_accepted() {
    let (router, mut rx) = router_with_channel(configured());
    let body = format!(
        r#"{{"ref":"refs/heads/master","commits":"{}"}}"#,
        "a".repeat(3 * 1024 * 1024)
    );
    let (status, text) = send(router, signed_push("/budget", &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Webhook verified. Deployment started for budget");
    assert_eq!(next_request(&mut rx).await.project, "budget");
}

#[tokio::test]
async fn body_over_configured_limit_is_payload_too_large() {
    let config = Config {
        max_body_bytes: 1024,
        ..configured()
    };
    let (router, mut rx) = router_with_channel(config);
    let body = format!(
        r#"{{"ref":"refs/heads/master","commits":"{}"}}"#,
        "a".repeat(4096)
    );
    let (status, text) = send(router, signed_push("/budget", &body)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(text, "Payload too large");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn null_ref_is_not_a_branch_push() {
    let (router, mut rx) = router_with_channel(configured());
    let (status, text) = send(router, signed_push("/budget", r#"{"ref":null}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Not a master branch push");
    assert!(rx.try_recv().is_err());
}
