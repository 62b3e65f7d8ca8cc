use std::sync::Arc;

use poem::{
    handler,
    http::StatusCode,
    web::{Data, Json},
    IntoResponse, Response,
};
use serde::Serialize;
use tracing::error;

use crate::AppState;

#[derive(Serialize, Debug)]
#[serde(tag = "status", rename_all = "lowercase")]
enum HealthResp {
    Healthy {
        converter_version: String,
        uploads_dir: String,
    },
    Unhealthy {
        error: String,
        uploads_dir: String,
    },
}

#[handler]
pub async fn health(Data(state): Data<&Arc<AppState>>) -> Response {
    let uploads_dir = state.storage.dir().display().to_string();

    match state.registry.version().await {
        Ok(converter_version) => Json(HealthResp::Healthy {
            converter_version,
            uploads_dir,
        })
        .into_response(),
        Err(e) => {
            error!("health check failed: {}", e);
            Json(HealthResp::Unhealthy {
                error: format!("primary converter unavailable: {e}"),
                uploads_dir,
            })
            .with_status(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response()
        }
    }
}
