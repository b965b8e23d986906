//! HTTP ingest endpoints
//!
//! - `POST /{index}/_doc`: one JSON object
//! - `POST /{index}/_ingest`: a JSON array of objects
//! - `POST /_reload`: force a table registry reload
//! - `GET /{index}/_mapping`: column to original field name
//! - `GET /health`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jsonhouse_ingest::{Document, IngestError, IngestProcessor};
use jsonhouse_registry::{RegistryError, ReloadHandle};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info_span, warn, Level};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<IngestProcessor>,
    pub reload: ReloadHandle,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Ingest(IngestError),
    Registry(RegistryError),
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Ingest(e)
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Ingest(e @ IngestError::InvalidTableName { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_INDEX_NAME", e.to_string())
            }
            ApiError::Ingest(e @ IngestError::NoAttributeKind { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNSTORABLE_FIELD", e.to_string())
            }
            ApiError::Ingest(e @ IngestError::Execution(_)) => {
                (StatusCode::BAD_GATEWAY, "BACKEND_ERROR", e.to_string())
            }
            ApiError::Ingest(e) => {
                error!(error = %e, "ingest failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INGEST_ERROR", e.to_string())
            }
            ApiError::Registry(RegistryError::RefreshStopped) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "REFRESH_STOPPED",
                RegistryError::RefreshStopped.to_string(),
            ),
            ApiError::Registry(e) => (StatusCode::INTERNAL_SERVER_ERROR, "REGISTRY_ERROR", e.to_string()),
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };
        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/_reload", post(force_reload))
        .route("/:index/_doc", post(ingest_document))
        .route("/:index/_ingest", post(ingest_batch))
        .route("/:index/_mapping", get(field_mapping))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn ingest_document(
    State(state): State<AppState>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let document = into_document(body)?;
    run_ingest(state, index, vec![document]).await
}

async fn ingest_batch(
    State(state): State<AppState>,
    Path(index): Path<String>,
    Json(body): Json<Vec<Value>>,
) -> Result<Json<Value>, ApiError> {
    let documents = body
        .into_iter()
        .map(into_document)
        .collect::<Result<Vec<_>, _>>()?;
    run_ingest(state, index, documents).await
}

async fn field_mapping(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> Json<BTreeMap<String, String>> {
    Json(state.processor.field_mapping(&index))
}

async fn force_reload(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let reloaded = state.reload.force_reload().await?;
    Ok(Json(json!({"reloaded": reloaded})))
}

fn into_document(value: Value) -> Result<Document, ApiError> {
    match value {
        Value::Object(document) => Ok(document),
        other => Err(ApiError::BadRequest(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Runs one batch on the blocking pool; the processor executes
/// statements synchronously.
async fn run_ingest(state: AppState, index: String, documents: Vec<Document>) -> Result<Json<Value>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("ingest", request_id = %request_id, index = %index);
    let started = Instant::now();
    let batch_size = documents.len();

    let processor = Arc::clone(&state.processor);
    let ingested = tokio::task::spawn_blocking(move || span.in_scope(|| processor.ingest(&index, documents)))
        .await
        .map_err(|e| ApiError::Internal(format!("ingest task failed: {}", e)))?
        .map_err(|e| {
            warn!(request_id = %request_id, error = %e, "batch rejected");
            ApiError::from(e)
        })?;

    crate::log_event!(
        level: Level::INFO,
        event: "batch_ingested",
        request_id: request_id,
        documents: batch_size,
        duration_ms: started.elapsed().as_millis()
    );
    Ok(Json(json!({"ingested": ingested})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DryRunCatalog;
    use jsonhouse_ingest::IngestConfig;
    use jsonhouse_registry::{spawn_refresh_loop, InMemoryTableRegistry, MemoryJsonStore, RefreshConfig};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct TestApp {
        state: AppState,
        catalog: Arc<DryRunCatalog>,
        shutdown: CancellationToken,
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    fn app() -> TestApp {
        let config = IngestConfig::default();
        let catalog = Arc::new(DryRunCatalog::new(config.clone()));
        let store = Arc::new(MemoryJsonStore::new());
        let registry = Arc::new(InMemoryTableRegistry::new(catalog.clone(), store.clone()));
        let shutdown = CancellationToken::new();
        let refresh = RefreshConfig {
            interval: Duration::from_secs(3600),
            force_debounce: Duration::ZERO,
        };
        let (_task, reload) = spawn_refresh_loop(registry.clone(), refresh, shutdown.clone());
        let processor = Arc::new(IngestProcessor::new(config, registry, catalog.clone(), store));
        TestApp {
            state: AppState { processor, reload },
            catalog,
            shutdown,
        }
    }

    #[tokio::test]
    async fn test_ingest_batch_then_mapping() {
        let app = app();
        let Json(body) = ingest_batch(
            State(app.state.clone()),
            Path("logs".to_string()),
            Json(vec![json!({"host.name": "a"}), json!({"host.name": "b"})]),
        )
        .await
        .unwrap();
        assert_eq!(body, json!({"ingested": 2}));
        assert_eq!(app.catalog.table_names(), vec!["logs"]);
        assert_eq!(app.catalog.inserted_rows(), 2);

        let Json(mapping) = field_mapping(State(app.state.clone()), Path("logs".to_string())).await;
        assert_eq!(mapping.get("host_name").map(String::as_str), Some("host.name"));
    }

    #[tokio::test]
    async fn test_ingest_document_rejects_non_objects() {
        let app = app();
        let err = ingest_document(State(app.state.clone()), Path("logs".to_string()), Json(json!([1])))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(app.catalog.table_names().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_index_name() {
        let app = app();
        let err = ingest_document(State(app.state.clone()), Path("Logs".to_string()), Json(json!({"a": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reload_picks_up_catalog_tables() {
        let app = app();
        app.catalog.load_statement("CREATE TABLE audit (actor String)").unwrap();
        let Json(body) = force_reload(State(app.state.clone())).await.unwrap();
        assert_eq!(body, json!({"reloaded": true}));
        assert!(app.state.processor.registry().find_table("audit").is_some());
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health_check().await;
        assert_eq!(body, json!({"status": "ok"}));
    }
}
