//! Serve command - HTTP control plane for the pipeline.
//!
//! Routes:
//! - `POST /api/build` with `{"prompt": "..."}` (prompt optional)
//! - `GET /api/health`
//! - `GET /api/lock`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Args;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use warden_core::{PipelineOutcome, Supervisor};

use super::TargetArgs;

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Address to bind the control plane to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Abort each pipeline run after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

struct AppState {
    supervisor: Supervisor,
    deadline: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

pub fn router(supervisor: Supervisor, deadline: Option<Duration>) -> Router {
    let state = Arc::new(AppState {
        supervisor,
        deadline,
    });
    Router::new()
        .route("/api/build", post(build))
        .route("/api/health", get(health))
        .route("/api/lock", get(lock))
        .with_state(state)
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.target.load_config()?;
    let addr: SocketAddr = format!("{}:{}", args.host, config.control_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", args.host, config.control_port))?;
    let target = config.target_dir.clone();

    let supervisor = super::build::supervisor(config, false);
    let app = router(supervisor, args.deadline_secs.map(Duration::from_secs));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, dir = %target.display(), "Control plane listening");
    axum::serve(listener, app).await.context("Control plane server failed")?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn lock(State(state): State<Arc<AppState>>) -> Json<Value> {
    let locks = state.supervisor.lock_manager();
    Json(json!({
        "locked": locks.is_locked(),
        "holder": locks.inspect(),
    }))
}

async fn build(
    State(state): State<Arc<AppState>>,
    body: Option<Json<BuildRequest>>,
) -> (StatusCode, Json<Value>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let prompt = request.prompt.as_deref().filter(|p| !p.trim().is_empty());
    info!(repair = prompt.is_some(), "Build requested");

    let outcome = match state.deadline {
        Some(deadline) => state.supervisor.run_with_deadline(prompt, deadline).await,
        None => state.supervisor.run(prompt).await,
    };
    outcome_response(outcome)
}

/// Map a pipeline outcome to the control-plane response.
pub fn outcome_response(outcome: PipelineOutcome) -> (StatusCode, Json<Value>) {
    match outcome {
        PipelineOutcome::Ready(success) => (
            StatusCode::OK,
            Json(json!({ "success": true, "url": success.url })),
        ),
        PipelineOutcome::Busy(holder) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Build already in progress",
                "holder": holder,
                "suggestion": "Wait for the running build to finish, then retry.",
            })),
        ),
        PipelineOutcome::Failed(failure) => {
            let body = serde_json::to_value(&failure)
                .unwrap_or_else(|e| json!({ "error": format!("failed to encode failure: {}", e) }));
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_core::{BuildFailure, BuildLog, FailureKind, FatalBuildError, SupervisorConfig};
    use warden_runner::{MockResponse, MockRunner};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_failure_maps_to_500_with_suggestion() {
        let failure = BuildFailure::new(
            FatalBuildError::new(FailureKind::Compile, "Build failed with exit code 1")
                .with_stderr("Type error"),
            &BuildLog::new(),
        );

        let (status, Json(body)) = outcome_response(PipelineOutcome::Failed(failure));

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Build failed with exit code 1");
        assert_eq!(body["stderr"], "Type error");
        assert!(body["suggestion"].as_str().unwrap().len() > 10);
        assert!(body.get("logs").is_some());
    }

    #[test]
    fn test_busy_maps_to_409() {
        let (status, Json(body)) = outcome_response(PipelineOutcome::Busy(None));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("in progress"));
    }

    #[tokio::test]
    async fn test_build_endpoint_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
        let runner = MockRunner::new()
            .respond("npm run build", MockResponse::failure(1, "Failed to compile"));
        let supervisor = Supervisor::new(
            SupervisorConfig::new(dir.path()).with_port_settle_ms(0),
            Arc::new(runner),
        );
        let base = spawn(router(supervisor, None)).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/build", base))
            .json(&json!({ "prompt": "A blog" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["kind"], "compile");
        assert!(body["stderr"].as_str().unwrap().contains("Failed to compile"));
    }

    #[tokio::test]
    async fn test_build_endpoint_returns_409_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(SupervisorConfig::new(dir.path()), Arc::new(MockRunner::new()));
        let locks = supervisor.lock_manager();
        let _held = locks.acquire(Default::default()).unwrap();
        let base = spawn(router(supervisor, None)).await;
        let client = reqwest::Client::new();

        let response = client.post(format!("{}/api/build", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 409);

        let lock: Value = client
            .get(format!("{}/api/lock", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(lock["locked"], true);
        assert!(lock["holder"]["pid"].is_number());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(SupervisorConfig::new(dir.path()), Arc::new(MockRunner::new()));
        let base = spawn(router(supervisor, None)).await;

        let body: Value = reqwest::get(format!("{}/api/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
