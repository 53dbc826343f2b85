use std::path::Path;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{app_state::AppState, error::RagError, models::ChatTurn};

/// Tamaño máximo de un fichero subido.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    reply: String,
    sources: Vec<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/reset_docs", post(reset_docs_handler))
        .route("/clear_history", post(clear_history_handler))
        .route("/chat", post(chat_handler))
        .route("/status", get(status_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// Traduce un error del núcleo a una respuesta HTTP con `{error}`.
fn rag_error(err: RagError) -> ApiError {
    (status_for(&err), Json(json!({ "error": err.to_string() })))
}

fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::UnsupportedType(_) | RagError::Config(_) => StatusCode::BAD_REQUEST,
        RagError::Extraction { .. } | RagError::DimensionMismatch(_) | RagError::ArityMismatch { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RagError::Generation(_) | RagError::Embedding(_) => StatusCode::BAD_GATEWAY,
        RagError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// --- Handlers ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&format!("Formulario multipart inválido: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        // Sólo el último componente: el nombre es también la identidad del documento.
        let filename = field
            .file_name()
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| bad_request("No se ha seleccionado ningún fichero"))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(&format!("No se pudo leer el fichero: {e}")))?;

        let report = state
            .store
            .ingest_document(&filename, bytes.to_vec())
            .await
            .map_err(|e| {
                warn!("Fallo al procesar {}: {}", filename, e);
                rag_error(e)
            })?;

        return Ok(Json(json!({
            "ok": true,
            "filename": report.filename,
            "chunks_added": report.chunks_added,
            "persisted": report.persisted,
        })));
    }

    Err(bad_request("No se encontró el campo 'file'"))
}

#[axum::debug_handler]
async fn reset_docs_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.store.reset().await;
    Json(json!({ "ok": true, "persisted": report.persisted }))
}

/// El historial no forma parte del núcleo RAG; sólo se vacía el de memoria.
#[axum::debug_handler]
async fn clear_history_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.clear_history();
    info!("Historial de conversación borrado.");
    Json(json!({ "ok": true }))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user_msg = payload.message.trim();
    if user_msg.is_empty() {
        return Err(bad_request("Mensaje vacío"));
    }

    let history = state.history_snapshot();
    let answer = state.assistant.answer(user_msg, &history).await.map_err(|e| {
        error!("Error al procesar el mensaje: {}", e);
        rag_error(e)
    })?;

    state.push_turn(ChatTurn::new(user_msg, answer.reply.clone()));

    Ok(Json(ChatResponse {
        reply: answer.reply,
        sources: answer.sources,
    }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "chunks": state.store.size().await,
        "documents": state.store.sources().await,
        "embedding_model": state.store.embedding_model(),
    }))
}
