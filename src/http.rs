//! Minimal HTTP surface: a JSON listing of every stored download.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::{signal, task};
use tracing::{error, info};

use crate::storage::Storage;

#[derive(Clone)]
struct AppState {
    storage: Storage,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(storage: Storage) -> Router {
    Router::new()
        .route("/downloadlist", get(list_downloads))
        .with_state(AppState { storage })
}

/// Serves [`router`] on `addr` until Ctrl+C.
pub async fn serve(addr: SocketAddr, storage: Storage) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "download list listening");

    axum::serve(listener, router(storage))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let storage = state.storage.clone();
    let files = task::spawn_blocking(move || storage.list_all())
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok(Json(
        files
            .into_iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_list(storage: Storage) -> (StatusCode, serde_json::Value) {
        let response = router(storage)
            .oneshot(
                Request::builder()
                    .uri("/downloadlist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn empty_storage_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("download")).unwrap();
        let (status, body) = get_list(storage).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn lists_media_files_of_finished_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("download")).unwrap();
        let mut expected = Vec::new();
        for title in ["First", "Second"] {
            let (id, path) = storage.allocate().unwrap();
            let media = path.join(format!("{title}.mp3"));
            std::fs::write(&media, b"audio").unwrap();
            storage.write_title(id, title).unwrap();
            expected.push(media.to_string_lossy().into_owned());
        }
        expected.sort();

        let (status, body) = get_list(storage).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<String> = serde_json::from_value(body).unwrap();
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn unreadable_root_reports_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("download")).unwrap();
        std::fs::remove_dir(storage.root()).unwrap();

        let (status, body) = get_list(storage).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }
}
