//! Superficie HTTP del pipeline: envío de consultas, reindexado y estado.
//!
//! La autenticación y las rutas de gestión (usuarios, mascotas, citas,
//! revisión veterinaria) viven en colaboradores externos; aquí sólo se
//! exponen los puntos de entrada del pipeline.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    config::PoliticaSalidaInvalida,
    pipeline::{EstadoRespuesta, SubmitResponse, TriageQuery},
};

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/consulta", post(consulta_handler))
        .route("/api/reindex", post(reindex_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

/// Código HTTP para una respuesta del pipeline. Las degradaciones por caída
/// del proveedor devuelven 503; la salida inválida depende de la política.
fn codigo_para(respuesta: &SubmitResponse, politica: PoliticaSalidaInvalida) -> StatusCode {
    match respuesta.estado {
        EstadoRespuesta::Ok => StatusCode::OK,
        EstadoRespuesta::Rejected => StatusCode::BAD_REQUEST,
        EstadoRespuesta::Degraded => {
            if respuesta.fallback.is_some() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                match politica {
                    PoliticaSalidaInvalida::Soft => StatusCode::OK,
                    PoliticaSalidaInvalida::Hard => StatusCode::SERVICE_UNAVAILABLE,
                }
            }
        }
    }
}

#[axum::debug_handler]
async fn consulta_handler(
    State(state): State<AppState>,
    Json(payload): Json<TriageQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let politica = state.servicio.config().politica_salida_invalida;
    match state.servicio.submit(payload).await {
        Ok(respuesta) => Ok((codigo_para(&respuesta, politica), Json(respuesta))),
        Err(e) => {
            error!("fallo del pipeline de triaje: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error al procesar la consulta: {e}")})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn reindex_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.servicio.reindex().await {
        Ok(total) => Ok(Json(json!({ "ok": true, "indexed_documents": total }))),
        Err(e) => {
            error!("fallo reindexando el corpus: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error al reindexar: {e}")})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let documentos = state.servicio.indice().documentos().await.len();
    Json(json!({
        "status": "ok",
        "documentos_indexados": documentos,
    }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
