//! HTTP API for invoking harvesters.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/` | GET | HTML form listing the invoke parameters |
//! | `/invoke_harvester` | POST | Form-encoded invoke; answers `{success, message}` |
//! | `/health` | GET | `{status, version}` |
//!
//! A request missing any of the seven parameters gets a 400 naming them.

use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::agent::{Agent, InvokeParams};
use crate::config::Config;
use crate::db;

#[derive(Clone)]
struct AppState {
    agent: Arc<Agent>,
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let agent = Agent::new(config.clone(), pool);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Agent API listening on http://{}", bind_addr);
    axum::serve(listener, router(Arc::new(agent))).await?;

    Ok(())
}

pub fn router(agent: Arc<Agent>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/invoke_harvester", post(handle_invoke))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { agent })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET / ============

async fn handle_index() -> Html<String> {
    let fields: String = InvokeParams::NAMES
        .iter()
        .map(|name| {
            format!(
                "<tr><td>{0}:</td><td><input type=\"text\" name=\"{0}\"></td></tr>\n",
                name
            )
        })
        .collect();
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Agent API</title></head>\n<body>\n\
         Invoke a Harvester with the following input:\n\
         <form method=\"post\" action=\"invoke_harvester\">\n<table>\n{}</table>\n\
         <input type=\"submit\" value=\"Submit\"/>\n</form>\n</body>\n</html>\n",
        fields
    ))
}

// ============ POST /invoke_harvester ============

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub success: bool,
    pub message: String,
}

fn invoke_params(mut form: HashMap<String, String>) -> Result<InvokeParams, AppError> {
    let missing: Vec<&str> = InvokeParams::NAMES
        .iter()
        .copied()
        .filter(|name| !form.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(bad_request(format!(
            "Missing input arg(s): {}",
            missing.join(", ")
        )));
    }

    let mut take = |name: &str| form.remove(name).unwrap_or_default();
    Ok(InvokeParams {
        harvester_uid: take("harvester_uid"),
        datasource_uid: take("datasource_uid"),
        repository_uid: take("repository_uid"),
        repository_url: take("repository_url"),
        username: take("username"),
        password: take("password"),
        institution: take("institution"),
    })
}

async fn handle_invoke(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<InvokeResponse>, AppError> {
    let params = invoke_params(form)?;
    let (success, message) = state.agent.invoke_harvester(&params).await;
    Ok(Json(InvokeResponse { success, message }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
