use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::api::owner::Owner;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::storage::models::{normalize_tags, parse_tag_list, FileRecord, MediaType, NewFile};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub byte_size: u64,
    pub created_at: String,
    pub id: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub name: String,
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_link: Option<String>,
    pub tags: Vec<String>,
    pub updated_at: String,
    pub url: String,
    pub views: u64,
}

#[derive(Debug, Deserialize)]
pub struct MoveFileRequest {
    /// Signed so that negative values reach validation instead of failing
    /// deserialization with a type error.
    pub position: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddTagRequest {
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share_link: String,
    pub url: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JSend<FileResponse>>), ApiError> {
    let limits = &state.config.uploads;
    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut tags = Default::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_content_type = field.content_type().map(|s| s.to_string());

                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() as u64 > limits.max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {} bytes",
                        limits.max_upload_size
                    )));
                }
                file_data = Some(data);
            }
            "tags" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid tags: {e}")))?;
                tags = parse_tag_list(&text);
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::bad_request("file field is required"))?;
    if file_data.is_empty() {
        return Err(ApiError::bad_request("file must not be empty"));
    }

    let original_name = file_name
        .as_deref()
        .and_then(|n| n.rsplit(|c| c == '/' || c == '\\').next())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string();

    // MIME type: from the multipart Content-Type, else guessed from the filename
    let mime_type = file_content_type
        .as_deref()
        .and_then(mime_essence)
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(&original_name).first().map(|m| m.to_string()))
        .map(|m| m.to_ascii_lowercase())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let media_type = MediaType::from_mime(&mime_type)
        .filter(|_| limits.is_allowed(&mime_type))
        .ok_or_else(|| {
            ApiError::unsupported_media_type(format!("File type '{mime_type}' is not allowed"))
        })?;

    let stored_name = stored_name_for(&original_name, &mime_type);
    let byte_size = file_data.len() as u64;

    // Phase 1: write the content to object storage
    state
        .object_store
        .put(&stored_name, file_data)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store file: {e}")))?;

    // Phase 2: record metadata at the end of the owner's ordering
    let created = state.db.create_file(NewFile {
        owner: owner.clone(),
        original_name,
        stored_name: stored_name.clone(),
        mime_type,
        media_type,
        byte_size,
        tags,
    });

    let file = match created {
        Ok(file) => file,
        Err(e) => {
            // Best-effort cleanup of the uploaded blob
            let _ = state.object_store.delete(&stored_name).await;
            return Err(e.into());
        }
    };

    tracing::debug!(file_id = %file.id, owner = %owner, position = file.position, "Uploaded file");
    Ok(JSend::created(file_to_response(&file)))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let files = state.db.list_files_by_owner(&owner)?;
    let tag = params.tag.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let items = files
        .iter()
        .filter(|f| tag.map_or(true, |t| f.tags.contains(t)))
        .map(file_to_response)
        .collect();

    Ok(JSend::success(items))
}

/// Public read by id; counts as a view.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state
        .db
        .record_view(&id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(public_response(&file)))
}

/// Public read by share link; counts as a view.
pub async fn get_shared_file(
    State(state): State<Arc<AppState>>,
    Path(share_link): Path<String>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state
        .db
        .record_share_view(&share_link)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(public_response(&file)))
}

pub async fn move_file(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    AppJson(req): AppJson<MoveFileRequest>,
) -> Result<Json<JSend<Vec<FileResponse>>>, ApiError> {
    let position = u32::try_from(req.position)
        .map_err(|_| ApiError::bad_request("position must be a non-negative integer"))?;

    let files = state.db.move_file(&owner, &id, position)?;

    tracing::debug!(file_id = %id, owner = %owner, position, "Moved file");
    Ok(JSend::success(files.iter().map(file_to_response).collect()))
}

pub async fn replace_tags(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    AppJson(req): AppJson<ReplaceTagsRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state
        .db
        .replace_tags(&owner, &id, normalize_tags(&req.tags))?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(file_to_response(&file)))
}

pub async fn add_tag(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    AppJson(req): AppJson<AddTagRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let tag = req.tag.trim();
    if tag.is_empty() {
        return Err(ApiError::bad_request("tag must not be empty"));
    }

    let file = state
        .db
        .add_tag(&owner, &id, tag)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(file_to_response(&file)))
}

pub async fn remove_tag(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path((id, tag)): Path<(String, String)>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state
        .db
        .remove_tag(&owner, &id, tag.trim())?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(file_to_response(&file)))
}

pub async fn share_file(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<JSend<ShareResponse>>, ApiError> {
    let share_link = state
        .db
        .ensure_share_link(&owner, &id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(JSend::success(ShareResponse {
        url: format!("/files/shared/{share_link}"),
        share_link,
    }))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    // Phase 1: remove metadata and compact the owner's ordering
    let removed = state
        .db
        .delete_file(&owner, &id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    // Phase 2: delete content from object storage (best-effort)
    if let Err(e) = state.object_store.delete(&removed.stored_name).await {
        tracing::warn!(file_id = %id, error = %e, "Failed to delete file from object storage");
    }

    tracing::debug!(file_id = %id, owner = %owner, "Deleted file");
    Ok(JSend::success(()))
}

// ============================================================================
// Helpers
// ============================================================================

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(e.body_text())
    } else {
        ApiError::bad_request(format!("Invalid multipart data: {}", e.body_text()))
    }
}

/// Random object key that keeps a recognisable extension for static serving.
/// Bare `type/subtype` of a Content-Type value, without parameters.
fn mime_essence(content_type: &str) -> Option<String> {
    content_type
        .parse::<mime_guess::Mime>()
        .ok()
        .map(|m| m.essence_str().to_ascii_lowercase())
}

fn stored_name_for(original_name: &str, mime_type: &str) -> String {
    let extension = FsPath::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime_type)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        });

    let key = uuid::Uuid::new_v4().simple().to_string();
    match extension {
        Some(ext) => format!("{key}.{ext}"),
        None => key,
    }
}

fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        byte_size: file.byte_size,
        created_at: file.created_at.to_rfc3339(),
        id: file.id.clone(),
        media_type: file.media_type,
        mime_type: file.mime_type.clone(),
        name: file.original_name.clone(),
        position: file.position,
        share_link: file.share_link.clone(),
        tags: file.tags.iter().cloned().collect(),
        updated_at: file.updated_at.to_rfc3339(),
        url: format!("/uploads/{}", file.stored_name),
        views: file.views,
    }
}

/// Response for unauthenticated readers; never reveals the share token.
fn public_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        share_link: None,
        ..file_to_response(file)
    }
}
