//! Request server - the health and predict HTTP surface.
//!
//! This module provides:
//! - `app_router` wiring the configurable health and predict routes
//! - `AppState` with the readiness gate, run loop and job slots
//! - `serve` for running the router on a bound listener until shutdown
//!
//! Engine work runs on blocking worker threads, so health checks are
//! answered while a predict run is in progress.

mod error;
mod handlers;
mod state;

use std::future::Future;

use axum::Router;
use axum::routing::{get, post};
use log::info;
use tokio::net::TcpListener;

use crate::error::Result;

pub use error::ApiError;
pub use handlers::parse_instances;
pub use state::{AppState, ResponseMode};

/// Default route for health checks.
pub const DEFAULT_HEALTH_ROUTE: &str = "/health_check";

/// Default route for predictions.
pub const DEFAULT_PREDICT_ROUTE: &str = "/predict";

/// Paths the health and predict handlers are mounted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub health_route: String,
    pub predict_route: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_ROUTE, DEFAULT_PREDICT_ROUTE)
    }
}

impl RouteConfig {
    /// Routes are normalized to start with `/`.
    pub fn new(health_route: impl Into<String>, predict_route: impl Into<String>) -> Self {
        Self {
            health_route: normalize_route(health_route.into()),
            predict_route: normalize_route(predict_route.into()),
        }
    }
}

fn normalize_route(route: String) -> String {
    let trimmed = route.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Build the application router.
pub fn app_router(state: AppState, routes: &RouteConfig) -> Router {
    let mut router = Router::new()
        .route(&routes.health_route, get(handlers::health))
        .route(&routes.predict_route, post(handlers::predict));

    if routes.health_route != "/" && routes.predict_route != "/" {
        router = router.route("/", get(handlers::info_route));
    }

    router.with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngineFactory;
    use crate::publish::NoopPublisher;
    use crate::readiness::ReadinessGate;
    use crate::runner::{RunLoop, RunLoopConfig};
    use crate::snapshot::SnapshotCopier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, factory: ScriptedEngineFactory, mode: ResponseMode) -> (Router, ReadinessGate) {
        app_with_workers(dir, factory, mode, 1)
    }

    fn app_with_workers(
        dir: &TempDir,
        factory: ScriptedEngineFactory,
        mode: ResponseMode,
        workers: usize,
    ) -> (Router, ReadinessGate) {
        let runner = RunLoop::with_config(
            Arc::new(factory),
            SnapshotCopier::new(dir.path().join("snaps")),
            Arc::new(NoopPublisher),
            RunLoopConfig {
                jobs_dir: dir.path().join("jobs"),
                ..Default::default()
            },
        );
        let gate = ReadinessGate::new();
        let state = AppState::new(gate.clone(), Arc::new(runner), workers, mode);
        (app_router(state, &RouteConfig::default()), gate)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn predict_req(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(DEFAULT_PREDICT_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn decode_prediction(body: &Value) -> String {
        let b64 = body["predictions"][0]["image_bytes"]["b64"].as_str().unwrap();
        String::from_utf8(STANDARD.decode(b64).unwrap()).unwrap()
    }

    #[test]
    fn test_route_normalization() {
        let routes = RouteConfig::new("healthz", " /v1/predict ");
        assert_eq!(routes.health_route, "/healthz");
        assert_eq!(routes.predict_route, "/v1/predict");
        assert_eq!(RouteConfig::default().health_route, "/health_check");
    }

    #[tokio::test]
    async fn test_health_follows_gate() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(&dir, ScriptedEngineFactory::new(), ResponseMode::Json);

        let resp = router.clone().oneshot(get_req(DEFAULT_HEALTH_ROUTE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        gate.mark_ready();
        let resp = router.oneshot(get_req(DEFAULT_HEALTH_ROUTE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_info_route() {
        let dir = TempDir::new().unwrap();
        let (router, _gate) = app(&dir, ScriptedEngineFactory::new(), ResponseMode::Json);

        let resp = router.oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["service"], "genserve");
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_predict_not_ready() {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEngineFactory::new();
        let (router, _gate) = app(&dir, factory.clone(), ResponseMode::Json);

        let resp = router
            .oneshot(predict_req(r#"{"instances": {"prompts": "x"}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_predict_returns_final_snapshot_as_base64() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(&dir, ScriptedEngineFactory::new(), ResponseMode::Json);
        gate.mark_ready();

        let resp = router
            .oneshot(predict_req(r#"{"instances": {"prompts": "a red cube", "iterations": 2}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(decode_prediction(&body), "a red cube #2");
    }

    #[tokio::test]
    async fn test_predict_object_and_list_match() {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEngineFactory::new();
        let (router, gate) = app(&dir, factory.clone(), ResponseMode::Json);
        gate.mark_ready();

        let object = router
            .clone()
            .oneshot(predict_req(r#"{"instances": {"prompts": "same"}}"#))
            .await
            .unwrap();
        let list = router
            .oneshot(predict_req(r#"{"instances": [{"prompts": "same"}, {"prompts": "other"}]}"#))
            .await
            .unwrap();

        let object = body_json(object).await;
        let list = body_json(list).await;
        assert_eq!(decode_prediction(&object), decode_prediction(&list));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_predict_bad_requests() {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEngineFactory::new();
        let (router, gate) = app(&dir, factory.clone(), ResponseMode::Json);
        gate.mark_ready();

        for body in ["not json", r#"{"prompts": "x"}"#, r#"{"instances": []}"#, r#"{"instances": {}}"#] {
            let resp = router.clone().oneshot(predict_req(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            let json = body_json(resp).await;
            assert!(json["error"].is_string());
        }
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_predict_engine_failure_is_500_and_stays_ready() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(&dir, ScriptedEngineFactory::new().fail_init(), ResponseMode::Json);
        gate.mark_ready();

        let resp = router
            .clone()
            .oneshot(predict_req(r#"{"instances": {"prompts": "x"}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("scripted init failure"));

        let resp = router.oneshot(get_req(DEFAULT_HEALTH_ROUTE)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_file_mode() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(&dir, ScriptedEngineFactory::new(), ResponseMode::File);
        gate.mark_ready();

        let resp = router
            .oneshot(predict_req(r#"{"instances": {"prompts": "raw"}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"raw #1");
    }

    #[tokio::test]
    async fn test_health_answers_during_run() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(
            &dir,
            ScriptedEngineFactory::new().step_delay(Duration::from_millis(100)),
            ResponseMode::Json,
        );
        gate.mark_ready();

        let running = router.clone();
        let run = tokio::spawn(async move {
            running
                .oneshot(predict_req(r#"{"instances": {"prompts": "slow", "iterations": 5}}"#))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let health = tokio::time::timeout(Duration::from_millis(100), router.oneshot(get_req(DEFAULT_HEALTH_ROUTE)))
            .await
            .expect("health check blocked by a running job")
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert!(!run.is_finished());

        assert_eq!(run.await.unwrap().status(), StatusCode::OK);
    }

    /// Fire two slow predicts at once; returns the peak number of engines
    /// stepping at the same time.
    async fn peak_concurrent_steps(workers: usize) -> usize {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEngineFactory::new().step_delay(Duration::from_millis(50));
        let (router, gate) = app_with_workers(&dir, factory.clone(), ResponseMode::Json, workers);
        gate.mark_ready();

        let a = tokio::spawn(router.clone().oneshot(predict_req(r#"{"instances": {"prompts": "a", "iterations": 4}}"#)));
        let b = tokio::spawn(router.oneshot(predict_req(r#"{"instances": {"prompts": "b", "iterations": 4}}"#)));

        let a = body_json(a.await.unwrap().unwrap()).await;
        let b = body_json(b.await.unwrap().unwrap()).await;
        assert_eq!(decode_prediction(&a), "a #4");
        assert_eq!(decode_prediction(&b), "b #4");
        factory.peak_active_steps()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_predicts_are_serialized() {
        assert_eq!(peak_concurrent_steps(1).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_extra_workers_run_predicts_in_parallel() {
        assert_eq!(peak_concurrent_steps(2).await, 2);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (router, gate) = app(&dir, ScriptedEngineFactory::new(), ResponseMode::Json);
        gate.mark_ready();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, router, async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
