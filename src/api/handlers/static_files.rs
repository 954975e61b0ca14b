use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::object_store::ObjectStoreError;
use crate::AppState;

/// Serve uploaded content by its stored name.
/// Route: GET /uploads/:stored_name
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(stored_name): Path<String>,
) -> Result<Response, ApiError> {
    let data = state
        .object_store
        .get(&stored_name)
        .await
        .map_err(|e| match e {
            ObjectStoreError::NotFound(_) => ApiError::not_found("File not found"),
            ObjectStoreError::InvalidKey(_) => ApiError::bad_request("Invalid file name"),
            _ => ApiError::internal(format!("Failed to retrieve file: {e}")),
        })?;

    let content_type = mime_guess::from_path(&stored_name).first_or_octet_stream();
    let byte_size = data.len() as u64;

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .as_ref()
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(byte_size));

    // Stored names are random and never rewritten, so content is immutable
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}
