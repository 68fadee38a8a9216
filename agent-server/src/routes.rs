//! HTTP route handlers for the controller API.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tracing::warn;

use agent::controller::ControllerError;
use agent::core::types::{ConversationHistory, ErrorBody, StepRequest, StepResponse};
use agent::io::transport::STEP_PATH;

use crate::state::AppState;

/// Read-only view of a stored conversation.
pub const CONVERSATION_PATH: &str = "/v1/agent/conversations/{id}";

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(STEP_PATH, post(step))
        .route(CONVERSATION_PATH, get(conversation))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /v1/agent/step - advance a conversation by one event.
///
/// The controller blocks on the store and the reasoning service, so each step
/// runs on the blocking pool.
async fn step(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let controller = state.controller.clone();
    let response = tokio::task::spawn_blocking(move || controller.handle(request))
        .await
        .map_err(|err| ControllerError::Internal(format!("step task failed: {err}")))??;
    Ok(Json(response))
}

/// GET /v1/agent/conversations/{id} - stored turns of one conversation.
async fn conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationHistory>, ApiError> {
    let controller = state.controller.clone();
    let history = tokio::task::spawn_blocking(move || controller.history(&id))
        .await
        .map_err(|err| ControllerError::Internal(format!("history task failed: {err}")))??;
    Ok(Json(history))
}

/// Controller failure rendered as `{"error": kind, "message": text}`.
#[derive(Debug)]
pub struct ApiError(ControllerError);

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ControllerError::UnknownConversation(_) => StatusCode::NOT_FOUND,
            ControllerError::ProtocolViolation(_) => StatusCode::CONFLICT,
            ControllerError::ReasoningUnavailable(_) => StatusCode::BAD_GATEWAY,
            ControllerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), error = %self.0, "request rejected");
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::controller::Controller;
    use agent::io::reasoner::Reasoner;
    use agent::io::store::{ConversationStore, MemoryStore};
    use agent::test_support::{FailingReasoner, FailingStore, ScriptedReasoner};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(reasoner: impl Reasoner + 'static) -> Router {
        app_with_store(reasoner, MemoryStore::new())
    }

    fn app_with_store(
        reasoner: impl Reasoner + 'static,
        store: impl ConversationStore + 'static,
    ) -> Router {
        let reasoner: Box<dyn Reasoner> = Box::new(reasoner);
        let store: Box<dyn ConversationStore> = Box::new(store);
        let controller = Controller::new(reasoner, store).with_id_generator(|| "conv-1".to_string());
        api_router().with_state(AppState::new(controller))
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(STEP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn prompt() -> Value {
        json!({"prompt": {"title": "T", "body": "B"}})
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = app(ScriptedReasoner::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn fresh_prompt_returns_flattened_action() {
        let app = app(ScriptedReasoner::new([
            r#"{"action":"write_file","file_path":"x.txt","content":"hi"}"#,
        ]));

        let (status, body) = send(&app, post_json(prompt())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "conversation_id": "conv-1",
                "action": "write_file",
                "file_path": "x.txt",
                "content": "hi",
            })
        );
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let app = app(ScriptedReasoner::default());
        let request = post_json(json!({
            "conversation_id": "missing",
            "tool_response": {
                "tool_name": "list_directory",
                "output": {"kind": "error", "error": "x"},
            },
        }));

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_conversation");
    }

    #[tokio::test]
    async fn both_events_are_a_conflict() {
        let app = app(ScriptedReasoner::default());
        let request = post_json(json!({
            "prompt": {"title": "T", "body": "B"},
            "tool_response": {
                "tool_name": "read_file",
                "output": {"kind": "content", "content": ""},
            },
        }));

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "protocol_violation");
    }

    #[tokio::test]
    async fn finished_conversation_rejects_tool_response() {
        let app = app(ScriptedReasoner::new([r#"{"action":"finish","message":"done"}"#]));
        let (status, body) = send(&app, post_json(prompt())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "finish");

        let (status, body) = send(
            &app,
            post_json(json!({
                "conversation_id": "conv-1",
                "tool_response": {
                    "tool_name": "run_shell_command",
                    "output": {"kind": "process", "stdout": "", "stderr": "", "exit_code": 0},
                },
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "protocol_violation");
    }

    #[tokio::test]
    async fn reasoner_failure_is_bad_gateway() {
        let app = app(FailingReasoner::default());

        let (status, body) = send(&app, post_json(prompt())).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "reasoning_unavailable");
        assert!(
            body["message"]
                .as_str()
                .expect("message")
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn store_failure_is_service_unavailable() {
        let app = app_with_store(ScriptedReasoner::default(), FailingStore::failing_writes());

        let (status, body) = send(&app, post_json(prompt())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "store_unavailable");
    }

    #[tokio::test]
    async fn conversation_history_lists_stored_turns() {
        let app = app(ScriptedReasoner::new([r#"{"action":"finish","message":"done"}"#]));
        let (status, _) = send(&app, post_json(prompt())).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::get("/v1/agent/conversations/conv-1")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "conv-1");
        let turns = body["turns"].as_array().expect("turns");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1]["content"], r#"{"action":"finish","message":"done"}"#);
    }

    #[tokio::test]
    async fn missing_conversation_history_is_not_found() {
        let app = app(ScriptedReasoner::default());
        let request = Request::get("/v1/agent/conversations/missing")
            .body(Body::empty())
            .expect("request");

        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_conversation");
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let app = app(ScriptedReasoner::default());
        let request = Request::builder()
            .method("POST")
            .uri(STEP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .expect("request");

        let (status, _) = send(&app, request).await;

        assert!(status.is_client_error());
    }
}
