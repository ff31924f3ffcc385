use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/uploads", post(upload))
        .route("/uploads/{name}", get(serve))
}

/// POST /api/uploads — store a multipart `file` part under the uploads
/// directory and return its public URL.
async fn upload(
    State(state): State<AppState>,
    _user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let extension = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;
        if data.is_empty() {
            return Err(AppError::BadRequest("Uploaded file is empty".into()));
        }

        let file_name = match extension {
            Some(ext) => format!("{}.{}", uuid::Uuid::now_v7(), ext),
            None => uuid::Uuid::now_v7().to_string(),
        };

        let dir = state.config.uploads_path();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create uploads dir: {}", e)))?;
        tokio::fs::write(dir.join(&file_name), &data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store upload: {}", e)))?;

        let url = format!("/uploads/{}", file_name);
        return Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "url": url })),
        )
            .into_response());
    }

    Err(AppError::BadRequest("Missing file field".into()))
}

/// GET /uploads/{name} — serve a stored file with a guessed content type.
async fn serve(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<Response> {
    // The name is a single generated path component; anything else is hostile
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(AppError::BadRequest("Invalid file name".into()));
    }

    let path = state.config.uploads_path().join(&name);
    match tokio::fs::read(&path).await {
        Ok(data) => {
            let mime = mime_guess::from_path(&name).first_or_octet_stream();
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                ],
                data,
            )
                .into_response())
        }
        Err(_) => Err(AppError::NotFound),
    }
}
