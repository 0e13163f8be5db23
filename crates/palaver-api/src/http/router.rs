//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/` except `/health`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions", post(handlers::session::create_session))
        .route("/sessions/{id}/messages", get(handlers::session::get_messages))
        .route("/sessions/{id}/interrupt", post(handlers::session::interrupt))
        .route("/sessions/{id}/chat", post(handlers::chat::chat))
        .route("/sessions/{id}/chat/stream", post(handlers::chat::stream_chat));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness plus circuit-breaker state of each provider.
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.engine.provider_status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use palaver_core::llm::box_provider::BoxLlmProvider;
    use palaver_core::llm::provider::{LlmProvider, LlmStream};
    use palaver_core::llm::registry::ProviderRegistry;
    use palaver_types::config::PalaverConfig;
    use palaver_types::llm::{
        CompletionRequest, CompletionResponse, LlmError, MessageRole, ProviderCapabilities,
        StopReason, StreamEvent, Usage,
    };

    use crate::http::extractors::caller::CALLER_HEADER;

    const AGENT_ID: &str = "0191e3a4-7b5c-7cc0-8a1e-2f3b4c5d6e7f";
    const DISABLED_AGENT_ID: &str = "0191e3a4-7b5c-7cc0-8a1e-2f3b4c5d6e80";

    const CONFIG: &str = r#"
[[providers]]
id = "local"
name = "Local"
base_url = "http://localhost:11434/v1"

[[models]]
id = "echo-model"
provider_id = "local"
model_name = "echo"

[[agents]]
id = "0191e3a4-7b5c-7cc0-8a1e-2f3b4c5d6e7f"
owner_id = "alice"
name = "Echo"
system_prompt = "Repeat the user."
model_id = "echo-model"

[[agents]]
id = "0191e3a4-7b5c-7cc0-8a1e-2f3b4c5d6e80"
owner_id = "alice"
name = "Retired"
model_id = "echo-model"
enabled = false
"#;

    /// Replies `echo: <last user message>`.
    struct EchoProvider {
        capabilities: ProviderCapabilities,
    }

    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.capabilities
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                id: "cmpl-1".to_string(),
                content: "summary".to_string(),
                model: request.model.clone(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }

        fn stream(&self, request: CompletionRequest) -> LlmStream {
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Box::pin(futures_util::stream::iter(vec![
                Ok(StreamEvent::TextDelta { text: "echo: ".to_string() }),
                Ok(StreamEvent::TextDelta { text: last }),
                Ok(StreamEvent::Usage(Usage { input_tokens: 10, output_tokens: 3 })),
                Ok(StreamEvent::MessageDelta { stop_reason: StopReason::EndTurn }),
                Ok(StreamEvent::Done),
            ]))
        }
    }

    fn router() -> Router {
        let config: PalaverConfig = toml::from_str(CONFIG).unwrap();
        let mut providers = ProviderRegistry::new();
        providers.register(
            "local",
            BoxLlmProvider::new(EchoProvider {
                capabilities: ProviderCapabilities::default(),
            }),
        );
        build_router(AppState::with_providers(config, providers, PathBuf::from("./data")))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(CALLER_HEADER, "alice")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn open_session(router: &Router) -> String {
        let (status, body) = send(router, post_json("/api/v1/sessions", serde_json::json!({ "agent_id": AGENT_ID }))).await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_sync_chat_then_messages() {
        let router = router();
        let session_id = open_session(&router).await;

        let (status, body) = send(
            &router,
            post_json(&format!("/api/v1/sessions/{session_id}/chat"), serde_json::json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "echo: hi");
        assert_eq!(body["data"]["agent_id"], AGENT_ID);

        let (status, body) = send(
            &router,
            Request::get(format!("/api/v1/sessions/{session_id}/messages"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["data"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "hi");
        assert_eq!(messages[1]["content"], "echo: hi");
    }

    #[tokio::test]
    async fn test_stream_chat_emits_sse_events() {
        let router = router();
        let session_id = open_session(&router).await;

        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/sessions/{session_id}/chat/stream"),
                serde_json::json!({ "message": "hello" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains("event: partial_text"));
        assert!(text.contains("event: end_of_text"));
        assert!(text.contains("echo: hello"));
        assert!(!text.contains("event: error"));
    }

    #[tokio::test]
    async fn test_error_envelope_statuses() {
        let router = router();

        let (status, body) = send(
            &router,
            post_json("/api/v1/sessions", serde_json::json!({ "agent_id": DISABLED_AGENT_ID })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"][0]["code"], "DISABLED");
        assert!(body["data"].is_null());

        let unknown = uuid::Uuid::now_v7();
        let (status, body) = send(
            &router,
            post_json(&format!("/api/v1/sessions/{unknown}/chat/stream"), serde_json::json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");

        let (status, _) = send(
            &router,
            post_json("/api/v1/sessions/not-a-uuid/chat", serde_json::json!({ "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_caller_header_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/sessions")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "agent_id": AGENT_ID }).to_string()))
            .unwrap();
        let (status, body) = send(&router(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_interrupt_without_stream() {
        let router = router();
        let session_id = open_session(&router).await;
        let (status, body) = send(
            &router,
            post_json(&format!("/api/v1/sessions/{session_id}/interrupt"), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["interrupted"], false);
    }
}
