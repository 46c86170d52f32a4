//! REST endpoints for onboarding turns, status, and profile.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::agent::OnboardingAgent;
use super::model::Flow;
use super::prompts::FALLBACK_MESSAGE;
use super::state::allowed_tool_names;
use super::types::TurnRequest;
use crate::store::Database;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub prospect: Arc<OnboardingAgent>,
    pub owner: Arc<OnboardingAgent>,
    pub db: Arc<dyn Database>,
}

impl OnboardingRouteState {
    fn agent(&self, flow: Flow) -> &Arc<OnboardingAgent> {
        match flow {
            Flow::Prospect => &self.prospect,
            Flow::Owner => &self.owner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    identity_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn parse_flow(raw: &str) -> Result<Flow, Response> {
    raw.parse::<Flow>()
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e))
}

/// POST /api/onboarding/{flow}/turn
///
/// Runs one turn. An empty reply is replaced with a neutral fallback.
async fn post_turn(
    State(state): State<OnboardingRouteState>,
    Path(flow): Path<String>,
    Json(request): Json<TurnRequest>,
) -> Response {
    let flow = match parse_flow(&flow) {
        Ok(flow) => flow,
        Err(response) => return response,
    };
    if request.message.trim().is_empty() && request.approved_action.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "message must not be empty");
    }

    match state.agent(flow).process_turn(request).await {
        Ok(mut response) => {
            if response.message.content.trim().is_empty() {
                response.message.content = FALLBACK_MESSAGE.to_string();
            }
            Json(response).into_response()
        }
        Err(e) => {
            tracing::error!(flow = %flow, "Onboarding turn failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, FALLBACK_MESSAGE)
        }
    }
}

/// GET /api/onboarding/{flow}/status?identity_id=
///
/// Current step, entity flags and the tools the step allows.
async fn get_status(
    State(state): State<OnboardingRouteState>,
    Path(flow): Path<String>,
    Query(query): Query<IdentityQuery>,
) -> Response {
    let flow = match parse_flow(&flow) {
        Ok(flow) => flow,
        Err(response) => return response,
    };
    match state.agent(flow).status(query.identity_id.as_deref()).await {
        Ok((step, entities)) => Json(serde_json::json!({
            "flow": flow,
            "step": step,
            "completed": step.is_terminal(),
            "entities": entities,
            "allowed_tools": allowed_tool_names(flow, step),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(flow = %flow, "Status lookup failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "status unavailable")
        }
    }
}

/// GET /api/onboarding/profile?identity_id=
///
/// Returns the stored profile, or 404 if none exists.
async fn get_profile(
    State(state): State<OnboardingRouteState>,
    Query(query): Query<IdentityQuery>,
) -> Response {
    let Some(identity) = query.identity_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "identity_id is required");
    };
    match state.db.get_profile_by_user(&identity).await {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No profile exists yet"),
        Err(e) => {
            tracing::error!("Profile lookup failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "profile unavailable")
        }
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/profile", get(get_profile))
        .route("/api/onboarding/{flow}/turn", post(post_turn))
        .route("/api/onboarding/{flow}/status", get(get_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnboardingConfig;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::onboarding::agent::AgentDeps;
    use crate::store::LibSqlBackend;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    /// Always answers with the same text.
    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
            })
        }
    }

    async fn app(reply: &'static str) -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let deps = AgentDeps {
            db: db.clone(),
            llm: Arc::new(FixedLlm(reply)),
            tools: Arc::new(ToolRegistry::builtin()),
        };
        let config = OnboardingConfig::default();
        onboarding_routes(OnboardingRouteState {
            prospect: Arc::new(OnboardingAgent::new(Flow::Prospect, config.clone(), deps.clone())),
            owner: Arc::new(OnboardingAgent::new(Flow::Owner, config, deps)),
            db,
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn turn(flow: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(format!("/api/onboarding/{flow}/turn"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn turn_returns_model_reply() {
        let app = app("Where would you like to sail?").await;
        let response = app
            .oneshot(turn("prospect", serde_json::json!({"message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"]["content"], "Where would you like to sail?");
        assert_eq!(body["step"], "sign_up");
    }

    #[tokio::test]
    async fn empty_reply_gets_fallback() {
        let app = app("").await;
        let response = app
            .oneshot(turn("owner", serde_json::json!({"message": "Hi", "identity_id": "u1"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["message"]["content"], FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn unknown_flow_is_404() {
        let app = app("hello").await;
        let response = app
            .oneshot(turn("pirate", serde_json::json!({"message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_step_and_tools() {
        let app = app("hello").await;
        let response = app
            .oneshot(
                Request::get("/api/onboarding/owner/status?identity_id=u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["step"], "create_profile");
        assert_eq!(body["completed"], false);
        assert!(
            body["allowed_tools"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("create_profile"))
        );
    }

    #[tokio::test]
    async fn missing_profile_is_404() {
        let app = app("hello").await;
        let response = app
            .oneshot(
                Request::get("/api/onboarding/profile?identity_id=u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
