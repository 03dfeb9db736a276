use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{debug, warn};

use super::{api_error, ApiResult};
use crate::adapters::object_store::{catalog_id_of, content_type_for};
use crate::api::{state::AppState, types::*};

/// GET /health -- liveness plus a store round trip
pub async fn health_handler(
    State(state): State<AppState>,
) -> std::result::Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let store = match state.engine.ledger().ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!("Health check: store unreachable: {}", e);
            format!("error: {e}")
        }
    };

    let healthy = store == "ok";
    let resp = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        store,
        uptime_secs: state.uptime_seconds(),
    };

    if healthy {
        Ok(Json(resp))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(resp)))
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics().prometheus(),
    )
}

/// GET /objects/:catalog_dir/:file -- screenshots behind a presigned URL
pub async fn get_object(
    State(state): State<AppState>,
    Path((catalog_dir, file)): Path<(String, String)>,
    Query(query): Query<SignedObjectQuery>,
) -> ApiResult<impl IntoResponse> {
    let Some(objects) = state.objects.as_ref() else {
        return Err(api_error(StatusCode::NOT_FOUND, "Object serving is disabled"));
    };

    let object_name = format!("{catalog_dir}/{file}");
    let data = objects
        .read_signed(&object_name, query.expires, &query.signature)
        .await
        .map_err(|e| {
            let catalog_id = catalog_id_of(&object_name).unwrap_or_default();
            debug!(%object_name, %catalog_id, "Object request refused: {}", e);
            api_error(StatusCode::FORBIDDEN, "Invalid, expired or unknown object URL")
        })?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&object_name))], data))
}
