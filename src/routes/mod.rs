pub mod analyze;
pub mod health;
pub mod refine;
pub mod waitlist;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/analyze", post(analyze::analyze))
        .route("/api/refine", post(refine::refine))
        .route("/api/waitlist", post(waitlist::join_waitlist))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::config::test_config;
    use crate::pipeline::testing::{
        FakeService, HEAT_ISLAND_DECOMPOSITION, HEAT_ISLAND_QUERY, HEAT_ISLAND_SYNTHESIS,
    };

    struct TestApp {
        app: Router,
        _dir: tempfile::TempDir,
        waitlist_path: std::path::PathBuf,
    }

    fn app_with(service: FakeService) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let waitlist_path = dir.path().join("data.json");
        let mut config = test_config();
        config.waitlist_path = waitlist_path.to_string_lossy().into_owned();

        TestApp {
            app: router(AppState::new(Arc::new(service), &config)),
            _dir: dir,
            waitlist_path,
        }
    }

    fn heat_island_app() -> TestApp {
        app_with(FakeService::new(
            HEAT_ISLAND_DECOMPOSITION,
            HEAT_ISLAND_SYNTHESIS,
        ))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let test = heat_island_app();
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "atomic-reasoner");
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let test = heat_island_app();
        let req = post_json("/api/analyze", json!({ "query": HEAT_ISLAND_QUERY }));
        let (status, body) = send(&test.app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["original_query"], HEAT_ISLAND_QUERY);
        assert_eq!(body["atomic_decomposition"].as_array().unwrap().len(), 3);
        assert_eq!(body["atomic_reasoning"].as_array().unwrap().len(), 3);
        assert_eq!(body["key_insights"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_analyze_pipeline_failure_is_enveloped() {
        let test = app_with(
            FakeService::new(HEAT_ISLAND_DECOMPOSITION, HEAT_ISLAND_SYNTHESIS)
                .failing_stage("synthesize"),
        );
        let req = post_json("/api/analyze", json!({ "query": HEAT_ISLAND_QUERY }));
        let (status, body) = send(&test.app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Error!");
        assert_eq!(body["message"], "Failed to process query");
        assert!(body["error"].as_str().unwrap().contains("synthesis"));
    }

    #[tokio::test]
    async fn test_analyze_empty_query() {
        let test = heat_island_app();
        let req = post_json("/api/analyze", json!({ "query": "   " }));
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Error!");
    }

    #[tokio::test]
    async fn test_analyze_rejects_malformed_body() {
        let test = heat_island_app();
        let req = Request::post("/api/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"query\": "))
            .unwrap();
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let req = post_json("/api/analyze", json!({ "question": "wrong field" }));
        let (status, _) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refine() {
        let test = heat_island_app();
        let req = post_json("/api/refine", json!({ "Text": "their going home" }));
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "Text": "Refined: their going home" }));
    }

    #[tokio::test]
    async fn test_refine_empty_text() {
        let test = heat_island_app();
        let req = post_json("/api/refine", json!({ "Text": "" }));
        let (status, _) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refine_service_failure() {
        let test = app_with(FakeService::new("{}", "{}").failing_stage("refine"));
        let req = post_json("/api/refine", json!({ "Text": "some text" }));
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_waitlist_signup() {
        let test = heat_island_app();
        let req = post_json(
            "/api/waitlist",
            json!({ "name": " Ada ", "mail": "ada@example.com" }),
        );
        let (status, body) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Saved");

        let content = tokio_test::assert_ok!(std::fs::read_to_string(&test.waitlist_path));
        let records: Vec<Value> = tokio_test::assert_ok!(serde_json::from_str(&content));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_waitlist_requires_fields() {
        let test = heat_island_app();
        let req = post_json("/api/waitlist", json!({ "name": "", "mail": "ada@example.com" }));
        let (status, _) = send(&test.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!test.waitlist_path.exists());
    }
}
