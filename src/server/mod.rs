//! Loopback control protocol. Every response carries the `ok` envelope:
//! `{"ok": true, ...payload}` on success, `{"ok": false, "error": reason,
//! "code": discriminant}` on failure. Clients key on `ok` and `code`, never
//! on transport status alone, so the envelope shape is wire compatibility
//! that must be preserved exactly.

use crate::error::{FieldscribeError, Result as DomainResult};
use crate::runtime::snapshot::{self, RuntimeSnapshot};
use crate::state::{AppState, ControlPlane};
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type ApiState = Arc<AppState>;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Merge `"ok": true` into a payload object.
fn ok_envelope(payload: serde_json::Value) -> Json<serde_json::Value> {
    let mut map = match payload {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    map.insert("ok".to_string(), serde_json::Value::Bool(true));
    Json(serde_json::Value::Object(map))
}

/// Domain error carried onto the wire. Transport status is advisory;
/// the body's `ok: false` is authoritative, and `code` is the stable
/// machine-readable discriminant clients branch on.
pub struct ApiError(FieldscribeError);

impl From<FieldscribeError> for ApiError {
    fn from(e: FieldscribeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            FieldscribeError::NotFound(_) => (StatusCode::NOT_FOUND, "unknown_field"),
            FieldscribeError::Gone(_) => (StatusCode::GONE, "field_gone"),
            FieldscribeError::NoUndoAvailable(_) => (StatusCode::CONFLICT, "no_undo"),
            FieldscribeError::InsertionBlocked(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insertion_blocked")
            }
            FieldscribeError::Environment(_) => (StatusCode::SERVICE_UNAVAILABLE, "environment"),
            FieldscribeError::Driver(_) => (StatusCode::INTERNAL_SERVER_ERROR, "driver"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = Json(serde_json::json!({
            "ok": false,
            "error": self.0.to_string(),
            "code": code,
        }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// A client disconnect drops the handler future mid-await. Page mutations
/// must still run to completion (a half-typed field with no undo snapshot
/// is the worst outcome), so mutation handlers move their owned lock guard
/// into a task and await its handle instead.
async fn shielded<F>(fut: F) -> DomainResult<serde_json::Value>
where
    F: Future<Output = DomainResult<serde_json::Value>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| FieldscribeError::Driver(format!("mutation task failed: {}", e)))?
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scan", post(scan))
        .route("/api/page", get(page_info))
        .route("/api/fields/:id", get(get_field))
        .route("/api/fields/:id/highlight", post(highlight_field))
        .route("/api/fields/:id/value", get(read_value).post(set_value))
        .route("/api/fields/:id/type", post(type_keystrokes))
        .route("/api/fields/:id/revert", post(revert_field))
        .route("/api/shutdown", post(shutdown))
        .with_state(state)
}

/// Build the full API app. Split out so integration tests can exercise the
/// router with `tower::ServiceExt::oneshot`.
pub fn app(state: ApiState) -> Router {
    router(state)
}

/// Serve on an already-bound loopback listener until shutdown is signalled
/// (POST /api/shutdown or Ctrl-C). The listener is bound by the session
/// lifecycle *before* the connection descriptor is published.
pub async fn run_server(
    state: ApiState,
    listener: tokio::net::TcpListener,
) -> Result<(), FieldscribeError> {
    let app = app(state.clone());
    let graceful = async move {
        tokio::select! {
            _ = state.shutdown.notified() => {
                tracing::info!("Shutdown requested over the control protocol");
            }
            r = tokio::signal::ctrl_c() => {
                if let Err(e) = r {
                    tracing::warn!("Ctrl-C handler failed: {}", e);
                }
                tracing::info!("Interrupt received, stopping");
            }
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
        .map_err(|e| FieldscribeError::Environment(format!("API server error: {}", e)))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    ok_envelope(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn scan(State(state): State<ApiState>) -> ApiResult {
    let mut plane = state.control.lock().await;
    let ControlPlane {
        driver,
        registry,
        engine,
    } = &mut *plane;

    let fields = registry.scan(driver.as_ref()).await?;
    // Ids from the prior DOM state are no longer trustworthy
    engine.clear_undo();

    let url = match driver.page_info().await {
        Ok(info) => info.url,
        Err(e) => {
            tracing::warn!("Could not read page info during scan: {}", e);
            String::new()
        }
    };

    let snap = RuntimeSnapshot {
        captured_at: chrono::Utc::now(),
        url,
        fields: fields.clone(),
    };
    if let Err(e) = snapshot::save(&state.runtime_dir, &snap).await {
        tracing::warn!("Failed to persist scan snapshot: {}", e);
    }

    Ok(ok_envelope(serde_json::json!({
        "count": fields.len(),
        "fields": fields,
    })))
}

async fn page_info(State(state): State<ApiState>) -> ApiResult {
    let plane = state.control.lock().await;
    let info = plane.driver.page_info().await?;
    Ok(ok_envelope(serde_json::json!({
        "url": info.url,
        "title": info.title,
    })))
}

async fn get_field(State(state): State<ApiState>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let plane = state.control.lock().await;
    let field = plane.registry.get(&id)?;
    Ok(ok_envelope(serde_json::json!({
        "field": field,
        "has_undo": plane.engine.has_undo(&id),
    })))
}

async fn highlight_field(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    let plane = state.control.lock().await;
    let field = plane.registry.get(&id)?;
    if !plane.driver.highlight(&field.dom_path).await? {
        return Err(FieldscribeError::Gone(id).into());
    }
    Ok(ok_envelope(serde_json::json!({ "field_id": id })))
}

async fn read_value(State(state): State<ApiState>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let plane = state.control.lock().await;
    let field = plane.registry.get(&id)?;
    let value = plane
        .driver
        .read_value(&field.dom_path)
        .await?
        .ok_or(FieldscribeError::Gone(id.clone()))?;
    Ok(ok_envelope(serde_json::json!({
        "field_id": id,
        "value": value,
    })))
}

#[derive(serde::Deserialize)]
struct SetValueReq {
    text: String,
}

async fn set_value(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<SetValueReq>,
) -> ApiResult {
    let mut plane = state.control.clone().lock_owned().await;
    let payload = shielded(async move {
        let ControlPlane {
            driver,
            registry,
            engine,
        } = &mut *plane;

        let field = registry.get(&id)?.clone();
        engine.set_value(driver.as_ref(), &field, &req.text).await?;
        Ok(serde_json::json!({
            "field_id": id,
            "undo_available": true,
        }))
    })
    .await?;
    Ok(ok_envelope(payload))
}

#[derive(serde::Deserialize)]
struct TypeKeysReq {
    text: String,
    /// Inter-key delay; defaults to the configured value
    delay_ms: Option<u64>,
}

async fn type_keystrokes(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<TypeKeysReq>,
) -> ApiResult {
    let delay_ms = req
        .delay_ms
        .unwrap_or_else(|| state.config.read().key_delay_ms);

    let mut plane = state.control.clone().lock_owned().await;
    let payload = shielded(async move {
        let ControlPlane {
            driver,
            registry,
            engine,
        } = &mut *plane;

        let field = registry.get(&id)?.clone();
        engine
            .type_keystrokes(
                driver.as_ref(),
                &field,
                &req.text,
                Duration::from_millis(delay_ms),
            )
            .await?;
        Ok(serde_json::json!({
            "field_id": id,
            "undo_available": true,
        }))
    })
    .await?;
    Ok(ok_envelope(payload))
}

async fn revert_field(State(state): State<ApiState>, AxumPath(id): AxumPath<String>) -> ApiResult {
    let mut plane = state.control.clone().lock_owned().await;
    let payload = shielded(async move {
        let ControlPlane {
            driver,
            registry,
            engine,
        } = &mut *plane;

        let field = registry.get(&id)?.clone();
        let restored = engine.revert(driver.as_ref(), &field).await?;
        Ok(serde_json::json!({
            "field_id": id,
            "value": restored,
        }))
    })
    .await?;
    Ok(ok_envelope(payload))
}

async fn shutdown(State(state): State<ApiState>) -> ApiResult {
    state.shutdown.notify_one();
    Ok(ok_envelope(serde_json::json!({ "stopping": true })))
}
