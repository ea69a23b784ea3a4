#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! [`TestApp`] wraps the REAL router and state built by the kernel
//! library. State is in-process, so every test gets its own app.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use marginalia_kernel::{AppState, Config, build_router};
use marginalia_test_utils::TestDir;

/// Environment ID used by token-enabled test apps.
pub const ENVIRONMENT_ID: &str = "test-environment";

/// Access key used by token-enabled test apps.
pub const ACCESS_KEY: &str = "test-access-key-with-enough-entropy";

/// Cron trigger key.
pub const CRON_KEY: &str = "test-cron-key";

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub export_dir: TestDir,
}

impl TestApp {
    /// App with collaboration tokens configured.
    pub fn new() -> Self {
        Self::with_config(|config| {
            config.ckeditor_environment_id = Some(ENVIRONMENT_ID.to_string());
            config.ckeditor_access_key = Some(ACCESS_KEY.to_string());
        })
    }

    /// App without a collaboration service.
    pub fn without_tokens() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let export_dir = TestDir::new("api_export");
        let mut config = Config {
            content_export_dir: export_dir.to_path_buf(),
            cron_key: Some(CRON_KEY.to_string()),
            ..Config::default()
        };
        customize(&mut config);

        let state = AppState::new(&config).expect("Failed to initialize AppState");
        let router = build_router(state.clone(), &config);

        Self {
            router,
            state,
            export_dir,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> Response {
        self.send_json("POST", uri, body).await
    }

    pub async fn put_json(&self, uri: &str, body: &Value) -> Response {
        self.send_json("PUT", uri, body).await
    }

    async fn send_json(&self, method: &str, uri: &str, body: &Value) -> Response {
        self.request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Trigger a cron run through the HTTP endpoint.
    pub async fn run_cron(&self) {
        let response = self
            .request(
                Request::post(format!("/cron/{CRON_KEY}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

/// Read a response body as a string.
pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Read a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}
