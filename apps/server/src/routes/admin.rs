//! Workflow administration endpoints
//!
//! Configuration inspection and replacement, type catalogues, service
//! listing, document validation, reload, and engine status.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use conductor_engine::config::parse_document;
use conductor_engine::EngineError;

use crate::{ApiError, AppState};

/// Routes under `/api/workflow`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/modules", get(get_modules))
        .route("/services", get(get_services))
        .route("/validate", post(post_validate))
        .route("/reload", post(post_reload))
        .route("/status", get(get_status))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Result of validating a candidate document
#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    errors: Vec<ValidationIssue>,
}

/// One validation failure with optional location and suggestion
#[derive(Debug, Serialize)]
struct ValidationIssue {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

/// A registered service and the capability it advertises
#[derive(Debug, Serialize)]
struct ServiceEntry {
    name: String,
    capability: &'static str,
}

// =============================================================================
// Handlers
// =============================================================================

/// Current document as JSON
async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    serde_json::to_value(state.engine.document())
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Replace the document (YAML or JSON body) and apply it atomically
async fn put_config(State(state): State<AppState>, body: String) -> Result<Json<Value>, ApiError> {
    let doc = parse_document(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.engine.reload(doc).await.map_err(|e| match e {
        EngineError::Config(_) | EngineError::Factory(_) => ApiError::BadRequest(e.to_string()),
        other => ApiError::Internal(other.to_string()),
    })?;

    Ok(Json(serde_json::json!({ "status": "applied" })))
}

/// Available module, step, and trigger type catalogue
async fn get_modules(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.catalogue())
}

/// Registered services and their capabilities
async fn get_services(State(state): State<AppState>) -> Json<Vec<Value>> {
    let entries: Vec<Value> = state
        .engine
        .handle()
        .services()
        .catalogue()
        .into_iter()
        .filter_map(|(name, capability)| {
            serde_json::to_value(ServiceEntry { name, capability }).ok()
        })
        .collect();
    Json(entries)
}

/// Validate a candidate document without applying it
async fn post_validate(State(state): State<AppState>, body: String) -> Json<ValidateResponse> {
    let outcome = parse_document(&body).and_then(|doc| state.engine.validate(&doc));

    match outcome {
        Ok(()) => Json(ValidateResponse {
            valid: true,
            errors: Vec::new(),
        }),
        Err(error) => Json(ValidateResponse {
            valid: false,
            errors: vec![ValidationIssue {
                message: error.message,
                location: error.location,
                suggestion: error.suggestion,
            }],
        }),
    }
}

/// Re-apply the current document
async fn post_reload(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let doc = state.engine.document();
    state
        .engine
        .reload(doc)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "status": "reloaded" })))
}

/// Engine status map
async fn get_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.status().await)
}
